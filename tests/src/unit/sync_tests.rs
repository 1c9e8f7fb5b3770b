use comet_core::backend::EmbeddedBackend;
use comet_core::llm::LlmDriver;
use comet_core::state::{SessionStore, StoreEvent};
use comet_core::store::MemoryPersistence;
use comet_core::sync::{FileSynchronizer, SyncOutcome};
use comet_core::templates::find_template;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use uuid::Uuid;

fn template_store() -> (SessionStore, Uuid) {
    let store = SessionStore::new(
        Arc::new(EmbeddedBackend::new(LlmDriver::fake())),
        Arc::new(MemoryPersistence::default()),
    );
    let template = find_template("nextjs-starter").expect("template");
    store.create_session_from_template("nextjs-starter", template);
    let message_id = store
        .current_session()
        .and_then(|session| session.messages.first().map(|message| message.id))
        .expect("template message");
    (store, message_id)
}

fn mount(store: &SessionStore, message_id: Uuid) -> FileSynchronizer {
    let files = store
        .message(message_id)
        .and_then(|message| message.project_files)
        .expect("project files");
    FileSynchronizer::mount(message_id, files, Arc::new(store.clone()))
}

fn edit(path: &str, contents: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(path.to_string(), contents.to_string())])
}

fn project_file_events(events: &mut Receiver<StoreEvent>) -> usize {
    let mut count = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, StoreEvent::ProjectFilesChanged { .. }) {
            count += 1;
        }
    }
    count
}

#[tokio::test(start_paused = true)]
async fn edits_inside_quiet_period_commit_once_with_latest_text() {
    let (store, message_id) = template_store();
    let mut sync = mount(&store, message_id);
    let mut events = store.subscribe();

    sync.on_runtime_change(edit("/app/page.tsx", "B"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    sync.on_runtime_change(edit("/app/page.tsx", "C"));
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(project_file_events(&mut events), 1);
    let files = store
        .message(message_id)
        .and_then(|message| message.project_files)
        .expect("files");
    assert_eq!(files.get("app/page.tsx"), Some("C"));
    assert!(files.get("package.json").is_some());
}

#[tokio::test(start_paused = true)]
async fn unchanged_sandbox_commits_nothing() {
    let (store, message_id) = template_store();
    let mut sync = mount(&store, message_id);
    let mut events = store.subscribe();
    let current = sync.canonical().get("app/page.tsx").expect("page").to_string();

    sync.on_runtime_change(edit("/app/page.tsx", &current));
    assert_eq!(sync.flush(), Some(SyncOutcome::Unchanged));
    assert_eq!(project_file_events(&mut events), 0);
}

#[tokio::test(start_paused = true)]
async fn bootstrap_edits_never_reach_the_message() {
    let (store, message_id) = template_store();
    let mut sync = mount(&store, message_id);
    let mut events = store.subscribe();

    sync.on_runtime_change(edit("/index.tsx", "render()"));
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(project_file_events(&mut events), 0);
    let files = store
        .message(message_id)
        .and_then(|message| message.project_files)
        .expect("files");
    assert!(files.get("index.tsx").is_none());
}

#[tokio::test(start_paused = true)]
async fn remount_drops_the_pending_commit() {
    let (store, first) = template_store();
    let template = find_template("api-only").expect("template");
    store.create_session_from_template("api-only", template);
    let second = store
        .current_session()
        .and_then(|session| session.messages.first().map(|message| message.id))
        .expect("second message");
    let mut sync = mount(&store, first);
    let mut events = store.subscribe();

    sync.on_runtime_change(edit("/app/page.tsx", "lost"));
    let files = store
        .message(second)
        .and_then(|message| message.project_files)
        .expect("files");
    sync.remount(second, files);
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(project_file_events(&mut events), 0);
    assert_ne!(
        store
            .message(first)
            .and_then(|message| message.project_files)
            .and_then(|files| files.get("app/page.tsx").map(str::to_string))
            .as_deref(),
        Some("lost")
    );
}

#[tokio::test(start_paused = true)]
async fn commit_to_a_deleted_message_is_not_reported() {
    let (store, message_id) = template_store();
    let mut sync = mount(&store, message_id);
    assert!(store.delete_message(message_id));

    sync.on_runtime_change(edit("/app/page.tsx", "orphan"));
    assert_eq!(sync.flush(), Some(SyncOutcome::Unchanged));
    assert_ne!(sync.canonical().get("app/page.tsx"), Some("orphan"));
}
