//! `scrub-runtime` – the instruction cycle.
//!
//! Turns one spoken instruction into one actuator command by composing the
//! reasoning service, the perception validator and the command table.
//!
//! # Modules
//!
//! - [`intent`] – [`IntentNormalizer`][intent::IntentNormalizer]: operator
//!   detection, the [`ReasoningService`][intent::ReasoningService] seam, and
//!   strict validation of the `{tool, action, handedness}` reply.
//! - [`llm_driver`] – [`LlmDriver`][llm_driver::LlmDriver]: an
//!   OpenAI-compatible async HTTP client (Ollama, OpenAI, OpenRouter) that
//!   implements [`ReasoningService`][intent::ReasoningService].  The
//!   [`IntentReply`][scrub_types::IntentReply] JSON Schema is sent via
//!   `response_format` to force a typed reply.
//! - [`prompts`] – [`PromptProfile`][prompts::PromptProfile]: the system
//!   prompt and its `default` / `detailed` / `conservative` presets.
//! - [`pipeline`] – [`InstructionPipeline`][pipeline::InstructionPipeline]:
//!   runs interpretation and perception concurrently, resolves the command,
//!   dispatches it, and reports every stage in a
//!   [`CycleReport`][scrub_types::CycleReport].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod intent;
pub mod llm_driver;
pub mod pipeline;
pub mod prompts;
pub mod telemetry;

pub use intent::{IntentNormalizer, ReasoningService};
pub use llm_driver::{ChatMessage, LlmDriver, LlmError, LlmProvider, Role};
pub use pipeline::{InstructionPipeline, PipelineConfig};
pub use prompts::PromptProfile;
pub use telemetry::{TracerProviderGuard, init_tracing};
