//! # OKAMI
//!
//! Orchestrated knowledge-driven autonomous multi-agent intelligence: a
//! task orchestration engine that routes free-form requests through a
//! directed graph of cooperating agents, gates outputs with guardrails,
//! persists episodic and semantic memory across runs, and evolves its own
//! knowledge store from execution traces.
//!
//! The LLM, embedding, and vector-store providers are opaque capabilities
//! ([`llms::Completer`], [`embedder::Embedder`], [`rag::VectorIndex`]);
//! everything else lives here.

pub mod agent;
pub mod agents;
pub mod config;
pub mod context;
pub mod crew;
pub mod crews;
pub mod embedder;
pub mod evolution;
pub mod guardrails;
pub mod knowledge;
pub mod llms;
pub mod memory;
pub mod process;
pub mod rag;
pub mod server;
pub mod task;
pub mod tasks;
pub mod tools;
pub mod trace;
pub mod utilities;

pub use agent::Agent;
pub use agents::executor::AgentRuntime;
pub use config::OkamiConfig;
pub use context::RunContext;
pub use crew::Crew;
pub use crews::{CrewRegistry, CrewResult};
pub use evolution::EvolutionCoordinator;
pub use knowledge::KnowledgeStore;
pub use memory::MemoryStore;
pub use process::Process;
pub use task::Task;
pub use tasks::TaskOutput;
pub use trace::{ExecutionTrace, RunStatus};
pub use utilities::OkamiError;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
