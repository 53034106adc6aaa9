//! Chat orchestration over the CRM core.
//!
//! A turn runs as a constrained loop:
//! 1. **Planning** (`planner`) - one model call turns the request into a `Plan`
//! 2. **Execution** (`executor`) - steps run in order, threading discovered ids
//! 3. **Actions** (`actions`, `protocol`) - model-proposed writes are validated,
//!    resolved and gated by `guardrails` before a single remote write
//!
//! `scan` reviews one record and returns suggestions without writing anything.
//! `related` optionally lets the model narrow which related lists a fetch reads.
//!
//! The model only ever proposes. Field validation, reference resolution and
//! the confirmation gate are deterministic.

pub mod actions;
pub mod conversation;
pub mod describe;
pub mod executor;
pub mod guardrails;
pub mod llm;
pub mod planner;
pub mod prompts;
pub mod protocol;
pub mod related;
pub mod runtime;
pub mod scan;

pub use conversation::{ChatRequest, ChatResponse, ConversationTurn};
pub use llm::{LlmClient, TextStream};
pub use runtime::{AgentRuntime, RuntimeSettings};
