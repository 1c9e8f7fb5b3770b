pub mod backend;
pub mod code_blocks;
pub mod config;
pub mod error;
pub mod framing;
pub mod llm;
pub mod relay;
pub mod state;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod templates;
pub mod wire;

pub use backend::{ByteStream, EmbeddedBackend, GenerationBackend, HttpBackend};
pub use code_blocks::{extract_code_blocks, CodeBlock, Segment};
pub use config::{AiConfigError, AiRuntimeSettings};
pub use error::{ProviderError, StreamError, WireError};
pub use llm::{FragmentStream, LlmDriver, ProviderKind};
pub use state::{
    ChatMessage, ChatSession, MessageRole, MessageStatus, SessionSnapshot, SessionStore,
    StoreEvent,
};
pub use store::{JsonFilePersistence, MemoryPersistence, SessionPersistence};
pub use sync::{FileSynchronizer, ProjectFileSet, ProjectFilesSink};
pub use wire::{GenerationRequest, GenerationResponse, WireRecord};
