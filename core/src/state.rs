use crate::backend::{ByteStream, GenerationBackend};
use crate::code_blocks::{extract_code_blocks, CodeBlock};
use crate::error::StreamError;
use crate::llm::ProviderKind;
use crate::store::SessionPersistence;
use crate::sync::{ProjectFileSet, ProjectFilesSink};
use crate::templates::ProjectTemplate;
use crate::wire::{ChatTurn, GenerationRequest, RecordDecoder};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use uuid::Uuid;

pub const DEFAULT_TITLE: &str = "New chat";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Streaming,
    Finalized,
    Errored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub status: MessageStatus,
    /// Derived from `content`; rebuilt on load rather than stored.
    #[serde(skip)]
    pub code_blocks: Option<Vec<CodeBlock>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_files: Option<ProjectFileSet>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            provider: None,
            model: None,
            status: MessageStatus::Finalized,
            code_blocks: None,
            project_files: None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.status == MessageStatus::Streaming
    }

    fn finalize(&mut self) {
        self.status = MessageStatus::Finalized;
        self.code_blocks = Some(extract_code_blocks(&self.content));
    }

    fn fail(&mut self, err: &StreamError) {
        self.status = MessageStatus::Errored;
        self.content = err.user_message();
        self.code_blocks = None;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::titled(DEFAULT_TITLE)
    }

    pub fn titled(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    pub fn add_message(&mut self, message: ChatMessage) -> bool {
        let mut title_changed = false;
        if self.messages.is_empty() && message.role == MessageRole::User && self.title == DEFAULT_TITLE
        {
            self.title = snippet(&message.content);
            title_changed = true;
        }
        self.messages.push(message);
        self.updated_at = Utc::now();
        title_changed
    }

    pub fn message(&self, id: Uuid) -> Option<&ChatMessage> {
        self.messages.iter().find(|message| message.id == id)
    }

    fn message_mut(&mut self, id: Uuid) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|message| message.id == id)
    }

    fn history(&self) -> Vec<ChatTurn> {
        self.messages
            .iter()
            .filter(|message| message.status == MessageStatus::Finalized)
            .filter(|message| !message.content.trim().is_empty())
            .map(|message| ChatTurn::new(message.role, message.content.clone()))
            .collect()
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: Uuid,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Everything the store persists. Unset generation settings defer to the
/// backend's configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub sessions: Vec<ChatSession>,
    #[serde(default)]
    pub current_session: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    SessionsChanged,
    MessageUpdated { message_id: Uuid },
    StreamFinished { message_id: Uuid, status: MessageStatus },
    ProjectFilesChanged { message_id: Uuid },
}

pub type StreamId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Applied,
    Duplicate,
    OutOfOrder,
    Orphaned,
}

struct StreamSession {
    session_id: Uuid,
    message_id: Uuid,
    next_seq: u64,
    cancel: Arc<Notify>,
}

#[derive(Debug)]
pub struct Generation {
    pub stream_id: StreamId,
    pub session_id: Uuid,
    pub message_id: Uuid,
    pub request: GenerationRequest,
    cancel: Arc<Notify>,
}

impl Generation {
    pub fn cancelled(&self) -> Arc<Notify> {
        Arc::clone(&self.cancel)
    }
}

struct InnerState {
    sessions: Vec<ChatSession>,
    current_session: Option<Uuid>,
    provider: Option<ProviderKind>,
    model: Option<String>,
    temperature: Option<f32>,
    streams: HashMap<StreamId, StreamSession>,
}

impl InnerState {
    fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        let mut sessions = snapshot.sessions;
        for message in sessions.iter_mut().flat_map(|session| session.messages.iter_mut()) {
            match message.status {
                MessageStatus::Pending | MessageStatus::Streaming => {
                    message.fail(&StreamError::StreamInterrupted(
                        "session closed while streaming".to_string(),
                    ));
                }
                MessageStatus::Finalized if message.role == MessageRole::Assistant => {
                    message.code_blocks = Some(extract_code_blocks(&message.content));
                }
                _ => {}
            }
        }
        let current_session = snapshot
            .current_session
            .filter(|id| sessions.iter().any(|session| session.id == *id))
            .or_else(|| sessions.first().map(|session| session.id));
        Self {
            sessions,
            current_session,
            provider: snapshot.provider,
            model: snapshot.model,
            temperature: snapshot.temperature.map(clamp_temperature),
            streams: HashMap::new(),
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            sessions: self.sessions.clone(),
            current_session: self.current_session,
            provider: self.provider,
            model: self.model.clone(),
            temperature: self.temperature,
        }
    }

    fn session_mut(&mut self, id: Uuid) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|session| session.id == id)
    }

    fn ensure_current(&mut self) -> &mut ChatSession {
        let position = self
            .current_session
            .and_then(|id| self.sessions.iter().position(|session| session.id == id));
        let position = match position {
            Some(position) => position,
            None => {
                self.sessions.insert(0, ChatSession::new());
                0
            }
        };
        self.current_session = Some(self.sessions[position].id);
        &mut self.sessions[position]
    }

    /// Forget streams whose message no longer exists. Their consumers see
    /// `Orphaned` on the next record and stop.
    fn orphan_streams(&mut self) {
        let sessions = &self.sessions;
        self.streams.retain(|stream_id, stream| {
            let alive = sessions
                .iter()
                .find(|session| session.id == stream.session_id)
                .and_then(|session| session.message(stream.message_id))
                .is_some();
            if !alive {
                tracing::debug!(%stream_id, message_id = %stream.message_id, "orphaned stream");
            }
            alive
        });
    }
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<InnerState>>,
    backend: Arc<dyn GenerationBackend>,
    persistence: Arc<dyn SessionPersistence>,
    events: broadcast::Sender<StoreEvent>,
}

impl SessionStore {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        persistence: Arc<dyn SessionPersistence>,
    ) -> Self {
        let snapshot = persistence.load().unwrap_or_default();
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(RwLock::new(InnerState::from_snapshot(snapshot))),
            backend,
            persistence,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }

    fn persist(&self) {
        let snapshot = self.inner.read().snapshot();
        self.persistence.save(&snapshot);
    }

    pub fn session_summaries(&self) -> Vec<SessionSummary> {
        let inner = self.inner.read();
        inner
            .sessions
            .iter()
            .map(|session| SessionSummary {
                id: session.id,
                title: session.title.clone(),
                updated_at: session.updated_at,
                message_count: session.messages.len(),
            })
            .collect()
    }

    pub fn current_session(&self) -> Option<ChatSession> {
        let inner = self.inner.read();
        let id = inner.current_session?;
        inner.sessions.iter().find(|session| session.id == id).cloned()
    }

    pub fn current_session_id(&self) -> Option<Uuid> {
        self.inner.read().current_session
    }

    pub fn message(&self, id: Uuid) -> Option<ChatMessage> {
        let inner = self.inner.read();
        inner
            .sessions
            .iter()
            .find_map(|session| session.message(id))
            .cloned()
    }

    pub fn is_streaming(&self) -> bool {
        !self.inner.read().streams.is_empty()
    }

    pub fn provider(&self) -> Option<ProviderKind> {
        self.inner.read().provider
    }

    pub fn model(&self) -> Option<String> {
        self.inner.read().model.clone()
    }

    pub fn temperature(&self) -> Option<f32> {
        self.inner.read().temperature
    }

    pub fn create_session(&self, title: Option<&str>) -> Uuid {
        let id = {
            let mut inner = self.inner.write();
            let session = match title.map(str::trim).filter(|title| !title.is_empty()) {
                Some(title) => ChatSession::titled(title),
                None => ChatSession::new(),
            };
            let id = session.id;
            inner.sessions.insert(0, session);
            inner.current_session = Some(id);
            id
        };
        self.persist();
        self.emit(StoreEvent::SessionsChanged);
        id
    }

    pub fn load_session(&self, id: Uuid) -> bool {
        {
            let mut inner = self.inner.write();
            if inner.current_session == Some(id)
                || !inner.sessions.iter().any(|session| session.id == id)
            {
                return inner.current_session == Some(id);
            }
            inner.current_session = Some(id);
        }
        self.persist();
        self.emit(StoreEvent::SessionsChanged);
        true
    }

    pub fn delete_session(&self, id: Uuid) -> bool {
        {
            let mut inner = self.inner.write();
            let Some(position) = inner.sessions.iter().position(|session| session.id == id) else {
                return false;
            };
            inner.sessions.remove(position);
            if inner.current_session == Some(id) {
                inner.current_session = inner.sessions.first().map(|session| session.id);
            }
            inner.orphan_streams();
        }
        self.persist();
        self.emit(StoreEvent::SessionsChanged);
        true
    }

    pub fn update_session_title(&self, id: Uuid, title: &str) -> bool {
        let title = title.trim();
        {
            let mut inner = self.inner.write();
            let Some(session) = inner.session_mut(id) else {
                return false;
            };
            if title.is_empty() || session.title == title {
                return false;
            }
            session.title = title.to_string();
            session.updated_at = Utc::now();
        }
        self.persist();
        self.emit(StoreEvent::SessionsChanged);
        true
    }

    pub fn clear_messages(&self) {
        {
            let mut inner = self.inner.write();
            let Some(id) = inner.current_session else {
                return;
            };
            let Some(session) = inner.session_mut(id) else {
                return;
            };
            if session.messages.is_empty() {
                return;
            }
            session.messages.clear();
            session.updated_at = Utc::now();
            inner.orphan_streams();
        }
        self.persist();
        self.emit(StoreEvent::SessionsChanged);
    }

    pub fn delete_message(&self, message_id: Uuid) -> bool {
        {
            let mut inner = self.inner.write();
            let removed = inner.sessions.iter_mut().any(|session| {
                let before = session.messages.len();
                session.messages.retain(|message| message.id != message_id);
                session.messages.len() != before
            });
            if !removed {
                return false;
            }
            inner.orphan_streams();
        }
        self.persist();
        self.emit(StoreEvent::SessionsChanged);
        true
    }

    pub fn set_provider(&self, provider: Option<ProviderKind>) {
        {
            let mut inner = self.inner.write();
            if inner.provider == provider {
                return;
            }
            inner.provider = provider;
            inner.model = None;
        }
        self.persist();
    }

    pub fn set_model(&self, model: Option<String>) {
        let model = model.filter(|model| !model.trim().is_empty());
        {
            let mut inner = self.inner.write();
            if inner.model == model {
                return;
            }
            inner.model = model;
        }
        self.persist();
    }

    pub fn set_temperature(&self, temperature: Option<f32>) {
        let temperature = temperature
            .filter(|value| !value.is_nan())
            .map(clamp_temperature);
        self.inner.write().temperature = temperature;
        self.persist();
    }

    pub fn create_session_from_template(&self, key: &str, template: &ProjectTemplate) -> Uuid {
        let project_files = template.project_files();
        let mut message = ChatMessage::new(
            MessageRole::Assistant,
            format!(
                "**{}**: {}\n\n```tsx\n{}\n```",
                template.name,
                template.description,
                template.main_contents()
            ),
        );
        message.project_files = Some(project_files);

        let mut session = ChatSession::titled(template.name);
        session.add_message(message);
        let id = session.id;
        {
            let mut inner = self.inner.write();
            inner.sessions.insert(0, session);
            inner.current_session = Some(id);
        }
        tracing::info!(template = key, session_id = %id, "created session from template");
        self.persist();
        self.emit(StoreEvent::SessionsChanged);
        id
    }

    pub fn update_message_project_files(&self, message_id: Uuid, files: ProjectFileSet) -> bool {
        {
            let mut inner = self.inner.write();
            let Some(message) = inner
                .sessions
                .iter_mut()
                .find_map(|session| session.message_mut(message_id))
            else {
                return false;
            };
            if message.project_files.as_ref() == Some(&files) {
                return false;
            }
            message.project_files = Some(files);
        }
        self.persist();
        self.emit(StoreEvent::ProjectFilesChanged { message_id });
        true
    }

    pub fn begin_generation(&self, text: &str) -> Option<Generation> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let generation = {
            let mut inner = self.inner.write();
            let provider = inner.provider;
            let model = inner.model.clone();
            let temperature = inner.temperature;
            let session = inner.ensure_current();
            let history = session.history();

            session.add_message(ChatMessage::new(MessageRole::User, text));
            let mut assistant = ChatMessage::new(MessageRole::Assistant, String::new());
            assistant.status = MessageStatus::Pending;
            assistant.provider = provider;
            assistant.model = model.clone();
            let message_id = assistant.id;
            let session_id = session.id;
            session.add_message(assistant);
            if let Some(message) = session.message_mut(message_id) {
                message.status = MessageStatus::Streaming;
            }

            let request = GenerationRequest {
                message: text.to_string(),
                chat_id: Some(session_id.to_string()),
                streaming: Some(true),
                provider: provider.map(|kind| kind.as_str().to_string()),
                model,
                temperature,
                max_tokens: None,
                messages: history,
            };
            let stream_id = Uuid::new_v4();
            let cancel = Arc::new(Notify::new());
            inner.streams.insert(
                stream_id,
                StreamSession {
                    session_id,
                    message_id,
                    next_seq: 0,
                    cancel: Arc::clone(&cancel),
                },
            );
            Generation {
                stream_id,
                session_id,
                message_id,
                request,
                cancel,
            }
        };
        tracing::debug!(stream_id = %generation.stream_id, message_id = %generation.message_id, "generation started");
        self.persist();
        self.emit(StoreEvent::SessionsChanged);
        Some(generation)
    }

    /// Append record `seq` of a stream to the message it was opened for.
    pub fn apply_record(&self, stream_id: StreamId, seq: u64, fragment: &str) -> RecordOutcome {
        let message_id = {
            let mut inner = self.inner.write();
            let Some(stream) = inner.streams.get(&stream_id) else {
                tracing::debug!(%stream_id, seq, "discarding record for closed stream");
                return RecordOutcome::Orphaned;
            };
            if seq < stream.next_seq {
                return RecordOutcome::Duplicate;
            }
            if seq > stream.next_seq {
                tracing::warn!(%stream_id, seq, expected = stream.next_seq, "record out of order");
                return RecordOutcome::OutOfOrder;
            }
            let (session_id, message_id) = (stream.session_id, stream.message_id);
            let message = inner
                .session_mut(session_id)
                .and_then(|session| session.message_mut(message_id))
                .filter(|message| message.is_streaming());
            let Some(message) = message else {
                inner.streams.remove(&stream_id);
                tracing::debug!(%stream_id, seq, "discarding record for removed message");
                return RecordOutcome::Orphaned;
            };
            message.content.push_str(fragment);
            if let Some(stream) = inner.streams.get_mut(&stream_id) {
                stream.next_seq += 1;
            }
            message_id
        };
        self.emit(StoreEvent::MessageUpdated { message_id });
        RecordOutcome::Applied
    }

    fn close_stream<F>(&self, stream_id: StreamId, transition: F) -> Option<MessageStatus>
    where
        F: FnOnce(&mut ChatMessage),
    {
        let (message_id, status) = {
            let mut inner = self.inner.write();
            let stream = inner.streams.remove(&stream_id)?;
            let message = inner
                .session_mut(stream.session_id)
                .and_then(|session| session.message_mut(stream.message_id))
                .filter(|message| message.is_streaming())?;
            transition(message);
            (message.id, message.status)
        };
        self.persist();
        self.emit(StoreEvent::StreamFinished { message_id, status });
        Some(status)
    }

    pub fn finish_stream(&self, stream_id: StreamId) -> Option<MessageStatus> {
        let status = self.close_stream(stream_id, ChatMessage::finalize);
        tracing::debug!(%stream_id, ?status, "stream finished");
        status
    }

    pub fn fail_stream(&self, stream_id: StreamId, err: &StreamError) -> Option<MessageStatus> {
        tracing::warn!(%stream_id, %err, "stream failed");
        self.close_stream(stream_id, |message| message.fail(err))
    }

    /// Detach every active stream, keeping whatever content has arrived.
    pub fn stop_streaming(&self) -> usize {
        let stream_ids: Vec<StreamId> = {
            let inner = self.inner.read();
            inner
                .streams
                .iter()
                .map(|(id, stream)| {
                    stream.cancel.notify_one();
                    *id
                })
                .collect()
        };
        stream_ids
            .into_iter()
            .filter(|stream_id| self.close_stream(*stream_id, ChatMessage::finalize).is_some())
            .count()
    }

    /// Send `text` and drive the reply to completion. Returns the assistant
    /// message id, or `None` for blank input.
    pub async fn send_message(&self, text: &str) -> Option<Uuid> {
        let generation = self.begin_generation(text)?;
        let message_id = generation.message_id;
        self.run_generation(generation).await;
        Some(message_id)
    }

    pub async fn run_generation(&self, generation: Generation) {
        let Generation {
            stream_id,
            request,
            cancel,
            ..
        } = generation;
        let opened = tokio::select! {
            biased;
            _ = cancel.notified() => return,
            opened = self.backend.open(request) => opened,
        };
        match opened {
            Ok(bytes) => self.consume(stream_id, bytes, &cancel).await,
            Err(err) => {
                self.fail_stream(stream_id, &err);
            }
        }
    }

    async fn consume(&self, stream_id: StreamId, mut bytes: ByteStream, cancel: &Notify) {
        let mut decoder = RecordDecoder::default();
        let mut seq = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.notified() => {
                    tracing::debug!(%stream_id, "consumer detached");
                    return;
                }
                next = bytes.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    for record in decoder.feed(&chunk) {
                        match record {
                            Ok(record) => match self.apply_record(stream_id, seq, &record.content) {
                                RecordOutcome::Applied => seq += 1,
                                RecordOutcome::Orphaned => return,
                                RecordOutcome::Duplicate | RecordOutcome::OutOfOrder => {}
                            },
                            Err(err) => tracing::warn!(%stream_id, %err, "dropping malformed record"),
                        }
                    }
                }
                Some(Err(err)) => {
                    self.fail_stream(stream_id, &err);
                    return;
                }
                None => {
                    match decoder.finish() {
                        Ok(()) => {
                            self.finish_stream(stream_id);
                        }
                        Err(err) => {
                            self.fail_stream(stream_id, &StreamError::StreamInterrupted(err.to_string()));
                        }
                    }
                    return;
                }
            }
        }
    }
}

impl ProjectFilesSink for SessionStore {
    fn commit_project_files(&self, message_id: Uuid, files: &ProjectFileSet) -> bool {
        self.update_message_project_files(message_id, files.clone())
    }
}

fn clamp_temperature(value: f32) -> f32 {
    value.clamp(0.0, 2.0)
}

fn snippet(content: &str) -> String {
    const MAX: usize = 42;
    let trimmed = content.trim();
    if trimmed.chars().count() <= MAX {
        return trimmed.to_string();
    }
    let mut acc: String = trimmed.chars().take(MAX).collect();
    acc.push('…');
    acc
}
