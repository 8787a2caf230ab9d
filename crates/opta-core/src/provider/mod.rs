//! Inference provider resolution: local Opta LMX daemon first, cloud
//! fallback second, with a process-wide client cache.

pub mod client;
pub mod router;

pub use client::{ChatClient, ChatMessage, ChatRequest, ChatResponse, ChatToolCall};
pub use router::{get_provider, probe_provider, resolve_subagent_model, ProviderSettings};
