use comet_core::backend::EmbeddedBackend;
use comet_core::llm::{LlmDriver, MockProvider, MockScript, ProviderKind};
use comet_core::state::{MessageStatus, SessionStore};
use comet_core::store::{JsonFilePersistence, SessionPersistence};
use std::sync::Arc;
use tempfile::TempDir;

fn store_at(dir: &TempDir, script: MockScript) -> SessionStore {
    let driver = LlmDriver::fake().with_provider(Arc::new(MockProvider::scripted(script)));
    SessionStore::new(
        Arc::new(EmbeddedBackend::new(driver)),
        Arc::new(JsonFilePersistence::new(dir.path().join("sessions.json"))),
    )
}

#[tokio::test]
async fn reload_restores_sessions_and_recomputes_code_blocks() {
    let dir = TempDir::new().expect("tempdir");
    let script = MockScript::fragments([
        "Here you go:\n```jsx\n",
        "export default function Card() { return <div/>; }",
        "\n```\n",
    ]);
    let store = store_at(&dir, script.clone());
    store.set_provider(Some(ProviderKind::Mock));
    store.set_temperature(Some(1.1));
    let message_id = store.send_message("card please").await.expect("sent");
    let session_id = store.current_session_id().expect("session");

    let reloaded = store_at(&dir, script);
    assert_eq!(reloaded.current_session_id(), Some(session_id));
    assert_eq!(reloaded.provider(), Some(ProviderKind::Mock));
    assert_eq!(reloaded.temperature(), Some(1.1));
    let message = reloaded.message(message_id).expect("message");
    assert_eq!(message.status, MessageStatus::Finalized);
    let blocks = message.code_blocks.expect("blocks");
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].language, "jsx");
    assert_eq!(blocks[0].component_name.as_deref(), Some("Card"));
}

#[tokio::test]
async fn session_file_omits_derived_code_blocks() {
    let dir = TempDir::new().expect("tempdir");
    let store = store_at(&dir, MockScript::fragments(["```ts\nconst x = 1;\n```"]));
    store.send_message("code").await.expect("sent");

    let raw = std::fs::read_to_string(dir.path().join("sessions.json")).expect("file");
    assert!(raw.contains("const x = 1;"));
    assert!(!raw.contains("codeBlocks"));
}

#[test]
fn corrupt_session_file_starts_empty() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("sessions.json");
    std::fs::write(&path, "{ not json").expect("write");

    assert!(JsonFilePersistence::new(&path).load().is_none());
    let store = store_at(&dir, MockScript::default());
    assert!(store.session_summaries().is_empty());
}
