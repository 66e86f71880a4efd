//! Streams an explanation of the current selection from a chat-completions
//! service and re-renders it as it arrives.

pub mod config;
pub mod error;
pub mod pacer;
pub mod payload;
pub mod pipeline;
pub mod render;
pub mod sse;
pub mod transport;

pub use config::{load_or_default, AiConfig, AiConfigStore, JsonAiConfigStore, MemoryAiConfigStore};
pub use error::AnnotateError;
pub use pipeline::{
    AnnotationPipeline, PipelineEvent, PipelineState, PreparedRequest, RunOutcome, STATUS_STALE,
};
pub use render::{Formatter, PassthroughFormatter};
pub use transport::{CompletionTransport, UreqTransport};
