//! The okami HTTP server.
//!
//! Wires the engine together from environment configuration and serves the
//! task API. Provider SDKs are out of tree; without one configured, the
//! built-in echo completer keeps the server operable for smoke testing.

use std::sync::Arc;
use std::time::Duration;

use okami::agents::executor::AgentRuntime;
use okami::config::OkamiConfig;
use okami::crews::registry::CrewRegistry;
use okami::crews::schema::SchemaRegistry;
use okami::embedder::HashEmbedder;
use okami::evolution::coordinator::{EvolutionCoordinator, EVOLUTION_CREW};
use okami::evolution::ImprovementApplier;
use okami::guardrails::GuardrailRegistry;
use okami::knowledge::KnowledgeStore;
use okami::llms::providers::EchoCompleter;
use okami::llms::retry::BackoffPolicy;
use okami::memory::MemoryStore;
use okami::rag::InMemoryVectorIndex;
use okami::server::{app_router, AppState};
use okami::tools::{KnowledgeSearchTool, ToolRegistry};
use okami::utilities::logger::init_logging;
use okami::utilities::paths::storage_path;
use okami::utilities::rpm_controller::RpmRegistry;
use okami::{Agent, Crew, Task};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    init_logging();
    let config = OkamiConfig::from_env();
    log::info!("okami {} starting", okami::VERSION);

    let embedder = Arc::new(HashEmbedder::default());
    let knowledge_index = Arc::new(InMemoryVectorIndex::new(256));
    let memory_index = Arc::new(InMemoryVectorIndex::new(256));
    let storage_dir = storage_path();

    let knowledge = Arc::new(
        KnowledgeStore::open(&config.knowledge_dir, embedder.clone(), knowledge_index)?
            .with_dedup_threshold(config.evolution.dedup_threshold),
    );
    let indexed = knowledge.reindex_existing().await?;
    log::info!("knowledge store ready ({} documents)", indexed);

    let memory = if config.memory_enabled {
        Some(Arc::new(MemoryStore::new(
            embedder.clone(),
            memory_index,
            storage_dir.clone(),
            config.memory_config.short_term_window,
        )?))
    } else {
        None
    };

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(KnowledgeSearchTool::new(knowledge.clone())));

    let guardrails = GuardrailRegistry::from_config(&config.guardrails, embedder.clone());
    let default_pipeline = guardrails.names();

    let runtime = Arc::new(AgentRuntime {
        completer: Arc::new(EchoCompleter),
        tools: Arc::new(tools),
        guardrails: Arc::new(guardrails),
        schemas: Arc::new(SchemaRegistry::new()),
        rpm: Arc::new(RpmRegistry::new(
            config.rate_limits.max_rpm_default,
            Duration::from_millis(config.rate_limits.rpm_wait_budget_ms),
        )),
        memory,
        knowledge: Some(knowledge.clone()),
        backoff: BackoffPolicy::with_max_tries(config.retries.completer),
        default_pipeline,
        max_delegation_depth: config.max_delegation_depth,
        task_timeout: Duration::from_millis(config.timeouts.task_ms),
    });

    if config.memory_config.provider == okami::config::MemoryProvider::Mem0 {
        log::warn!(
            "memory provider 'mem0' requested but no external provider is linked; \
             running with local tiers only"
        );
    }

    let registry = Arc::new(CrewRegistry::new());
    registry.register(default_main_crew(config.retries.guardrail));
    registry.register(default_evolution_crew());
    registry.set_default("main_crew");

    let applier = ImprovementApplier::new(knowledge, config.evolution.max_changes);
    let evolution = Arc::new(EvolutionCoordinator::new(
        registry.clone(),
        runtime.clone(),
        applier,
        config.evolution.enabled,
        config.evolution.auto_apply,
        storage_dir.join("evolution_history.jsonl"),
    ));

    let state = AppState::new(
        registry,
        runtime,
        evolution,
        config.server.queue_capacity,
        Duration::from_millis(config.timeouts.request_ms),
    );

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    log::info!("listening on {}", address);
    axum::serve(listener, app_router(state)).await?;
    Ok(())
}

fn default_main_crew(guardrail_retries: u32) -> Crew {
    let assistant = Agent::new(
        "assistant",
        "General Assistant",
        "Answer the user's request completely and accurately",
        "A careful generalist who consults the knowledge base before answering",
    )
    .with_tools(["knowledge_search"]);

    let answer = Task::new(
        "answer",
        "Handle the following request: {task}",
        "A complete, direct response to the request",
    )
    .with_agent("assistant")
    .with_max_retries(guardrail_retries);

    Crew::new("main_crew", vec![assistant], vec![answer])
}

fn default_evolution_crew() -> Crew {
    let analyst = Agent::new(
        "evolution_analyst",
        "System Improvement Analyst",
        "Turn execution traces into safe, concrete knowledge improvements",
        "A reviewer who studies how tasks went and writes down what the system should remember",
    );

    let analyze = Task::new(
        "analyze",
        "{task}",
        "A JSON object with a top-level 'changes' array of improvement entries",
    )
    .with_agent("evolution_analyst");

    Crew::new(EVOLUTION_CREW, vec![analyst], vec![analyze]).with_memory(false)
}
