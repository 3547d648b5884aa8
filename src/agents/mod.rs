//! Chat-model agents: the provider-neutral client seam, the conversation
//! orchestrator, and executables built from declarative definitions.

pub mod client;
pub mod executable;
pub mod orchestrator;

#[cfg(test)]
pub mod testing;

pub use client::{AgentError, ChatClient, ChatCompletion, ChatMessage, ChatRequest, ChunkStream};
pub use executable::AgentExecutable;
pub use orchestrator::{AgentOrchestrator, AgentResponse, estimate_tokens};
