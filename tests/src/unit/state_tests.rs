use super::support::{bytewise, ScriptedBackend, Step};
use comet_core::error::StreamError;
use comet_core::state::{MessageRole, MessageStatus, SessionStore, StoreEvent};
use comet_core::store::MemoryPersistence;
use std::sync::Arc;

fn store_over(backend: Arc<ScriptedBackend>) -> SessionStore {
    SessionStore::new(backend, Arc::new(MemoryPersistence::default()))
}

#[tokio::test]
async fn records_split_across_chunks_reassemble_in_order() {
    let mut body = bytewise("{\"content\":\"Hel\"}\n");
    body.extend(bytewise("{\"content\":\"lo\"}\n"));
    let store = store_over(Arc::new(ScriptedBackend::new(vec![body])));

    let message_id = store.send_message("greet me").await.expect("sent");
    let message = store.message(message_id).expect("message");
    assert_eq!(message.content, "Hello");
    assert_eq!(message.status, MessageStatus::Finalized);
}

#[tokio::test]
async fn malformed_record_is_skipped() {
    let store = store_over(Arc::new(ScriptedBackend::new(vec![vec![Step::Chunk(
        "{\"content\":\"a\"}\nnot json\n{\"content\":\"b\"}\n",
    )]])));
    let message_id = store.send_message("hi").await.expect("sent");
    let message = store.message(message_id).expect("message");
    assert_eq!(message.content, "ab");
    assert_eq!(message.status, MessageStatus::Finalized);
}

#[tokio::test]
async fn close_mid_record_is_an_interruption() {
    let store = store_over(Arc::new(ScriptedBackend::new(vec![vec![Step::Chunk(
        "{\"content\":\"Hel\"}\n{\"content\":\"l",
    )]])));
    let message_id = store.send_message("hi").await.expect("sent");
    let message = store.message(message_id).expect("message");
    assert_eq!(message.status, MessageStatus::Errored);
    assert_eq!(
        message.content,
        "Error: The response was interrupted. Please try again."
    );
    assert!(!store.is_streaming());
}

#[tokio::test]
async fn transport_error_mid_stream_errors_the_message() {
    let store = store_over(Arc::new(ScriptedBackend::new(vec![vec![
        Step::Chunk("{\"content\":\"partial\"}\n"),
        Step::Fail(StreamError::StreamInterrupted("connection reset".into())),
    ]])));
    let message_id = store.send_message("hi").await.expect("sent");
    let message = store.message(message_id).expect("message");
    assert_eq!(message.status, MessageStatus::Errored);
    assert!(message.code_blocks.is_none());
}

#[tokio::test]
async fn stop_keeps_accumulated_text_and_unblocks_next_send() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        vec![
            Step::Chunk("{\"content\":\"Hel\"}\n"),
            Step::Chunk("{\"content\":\"lo\"}\n"),
            Step::Hang,
        ],
        vec![Step::Chunk("{\"content\":\"again\"}\n")],
    ]));
    let store = store_over(backend.clone());
    let mut events = store.subscribe();

    let running = tokio::spawn({
        let store = store.clone();
        async move { store.send_message("hi").await }
    });
    let mut applied = 0;
    while applied < 2 {
        if let StoreEvent::MessageUpdated { .. } = events.recv().await.expect("event") {
            applied += 1;
        }
    }

    assert_eq!(store.stop_streaming(), 1);
    let message_id = running.await.expect("join").expect("sent");
    let message = store.message(message_id).expect("message");
    assert_eq!(message.content, "Hello");
    assert_eq!(message.status, MessageStatus::Finalized);
    assert!(!store.is_streaming());

    let next = store.send_message("again").await.expect("sent");
    assert_eq!(store.message(next).expect("message").content, "again");
}

#[tokio::test]
async fn history_is_forwarded_with_the_next_request() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        vec![Step::Chunk("{\"content\":\"first answer\"}\n")],
        vec![Step::Chunk("{\"content\":\"second answer\"}\n")],
    ]));
    let store = store_over(backend.clone());
    store.send_message("first question").await.expect("sent");
    store.send_message("second question").await.expect("sent");

    let requests = backend.requests();
    assert!(requests[0].messages.is_empty());
    let history = &requests[1].messages;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, MessageRole::User);
    assert_eq!(history[1].content, "first answer");
    assert_eq!(requests[1].message, "second question");
    assert_eq!(requests[0].chat_id, requests[1].chat_id);
}

#[tokio::test]
async fn errored_turns_are_left_out_of_history() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        vec![Step::Fail(StreamError::Transport("refused".into()))],
        vec![Step::Chunk("{\"content\":\"ok\"}\n")],
    ]));
    let store = store_over(backend.clone());
    store.send_message("first").await.expect("sent");
    store.send_message("second").await.expect("sent");

    let history = &backend.requests()[1].messages;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "first");
}
