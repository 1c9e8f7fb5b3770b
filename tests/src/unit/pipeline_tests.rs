use comet_core::backend::{EmbeddedBackend, GenerationBackend, HttpBackend};
use comet_core::llm::{LlmDriver, MockProvider, MockScript};
use comet_core::state::{MessageStatus, SessionStore};
use comet_core::store::MemoryPersistence;
use std::sync::Arc;
use tokio::net::TcpListener;

const COMPONENT_REPLY: [&str; 3] = [
    "```tsx\n",
    "export default function Btn(){return <button>Hi</button>;}",
    "\n```",
];

fn driver(script: MockScript) -> LlmDriver {
    LlmDriver::fake().with_provider(Arc::new(MockProvider::scripted(script)))
}

async fn spawn_relay(driver: LlmDriver) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(comet::serve_on(listener, driver));
    format!("http://{addr}/")
}

fn store_over(backend: impl GenerationBackend + 'static) -> SessionStore {
    SessionStore::new(Arc::new(backend), Arc::new(MemoryPersistence::default()))
}

#[tokio::test]
async fn component_reply_over_http_yields_one_component_block() {
    let base = spawn_relay(driver(MockScript::fragments(COMPONENT_REPLY))).await;
    let store = store_over(HttpBackend::new(&base).expect("backend"));

    let message_id = store.send_message("make a button").await.expect("sent");
    let message = store.message(message_id).expect("message");
    assert_eq!(message.status, MessageStatus::Finalized);
    assert_eq!(message.content, COMPONENT_REPLY.concat());

    let blocks = message.code_blocks.expect("blocks");
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].language, "tsx");
    assert!(blocks[0].is_component);
    assert_eq!(blocks[0].component_name.as_deref(), Some("Btn"));
}

#[tokio::test]
async fn provider_outage_over_http_is_reported_as_connection_failure() {
    let base = spawn_relay(LlmDriver::fake().with_provider(Arc::new(MockProvider::unavailable()))).await;
    let store = store_over(HttpBackend::new(&base).expect("backend"));

    let message_id = store.send_message("hi").await.expect("sent");
    let message = store.message(message_id).expect("message");
    assert_eq!(message.status, MessageStatus::Errored);
    assert_eq!(message.content, "Error: Failed to connect to AI service.");
}

#[tokio::test]
async fn relay_disconnect_over_http_interrupts_the_message() {
    let script = MockScript::fragments(["one ", "two ", "three"]).failing_after(2);
    let base = spawn_relay(driver(script)).await;
    let store = store_over(HttpBackend::new(&base).expect("backend"));

    let message_id = store.send_message("count").await.expect("sent");
    let message = store.message(message_id).expect("message");
    assert_eq!(message.status, MessageStatus::Errored);
    assert!(!store.is_streaming());
}

#[tokio::test]
async fn unreachable_relay_fails_the_message() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let store = store_over(HttpBackend::new(&format!("http://{addr}/")).expect("backend"));

    let message_id = store.send_message("hi").await.expect("sent");
    let message = store.message(message_id).expect("message");
    assert_eq!(message.status, MessageStatus::Errored);
    assert_eq!(message.content, "Error: Failed to connect to AI service.");
}

#[tokio::test]
async fn embedded_backend_matches_http_result() {
    let store = store_over(EmbeddedBackend::new(driver(MockScript::fragments(COMPONENT_REPLY))));

    let message_id = store.send_message("make a button").await.expect("sent");
    let message = store.message(message_id).expect("message");
    assert_eq!(message.content, COMPONENT_REPLY.concat());
    let blocks = message.code_blocks.expect("blocks");
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].component_name.as_deref(), Some("Btn"));
}

#[tokio::test]
async fn echo_reply_names_the_prompt() {
    let store = store_over(EmbeddedBackend::new(LlmDriver::fake()));
    let message_id = store.send_message("ping").await.expect("sent");
    let message = store.message(message_id).expect("message");
    assert!(message.content.contains("'ping'"));
    assert_eq!(message.code_blocks.map(|blocks| blocks.len()), Some(0));
}
