//! Route handlers.
//!
//! - `GET  /health` — liveness probe
//! - `GET  /status` — system status (crews, task counts, pending proposals)
//! - `POST /tasks` — execute a task against a named (or the default) crew
//! - `GET  /tasks/{id}` — terminal record of a prior submission
//! - `GET  /tasks/recent` — recent submissions, newest first
//!
//! The request queue is bounded: when it is full, submissions fail fast
//! with 429 so clients can retry. The evolution pass is spawned after the
//! primary response is produced and never blocks it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;

use crate::agents::executor::AgentRuntime;
use crate::context::RunContext;
use crate::crew::Crew;
use crate::crews::registry::CrewRegistry;
use crate::evolution::coordinator::{EvolutionCoordinator, EVOLUTION_CREW};
use crate::trace::RunStatus;

/// Task submission body.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskRequest {
    pub task: String,
    #[serde(default)]
    pub crew_name: Option<String>,
    #[serde(default)]
    pub async_execution: bool,
    #[serde(default)]
    pub inputs: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub context: Option<HashMap<String, Value>>,
}

/// Result payload inside a terminal task response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultBody {
    pub raw: String,
    pub tasks_output: Value,
    pub token_usage: Value,
}

/// Task submission response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: String,
    pub status: String,
    pub result: Option<TaskResultBody>,
    pub error: Option<String>,
    pub execution_time: Option<f64>,
}

/// One entry of the in-memory task history.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub crew_name: String,
    pub task_description: String,
    pub status: String,
    pub result: Option<TaskResultBody>,
    pub error: Option<String>,
    pub execution_time: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<CrewRegistry>,
    pub runtime: Arc<AgentRuntime>,
    pub evolution: Arc<EvolutionCoordinator>,
    pub history: Arc<RwLock<HashMap<String, TaskRecord>>>,
    queue: Arc<Semaphore>,
    request_timeout: Duration,
}

impl AppState {
    pub fn new(
        registry: Arc<CrewRegistry>,
        runtime: Arc<AgentRuntime>,
        evolution: Arc<EvolutionCoordinator>,
        queue_capacity: usize,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            runtime,
            evolution,
            history: Arc::new(RwLock::new(HashMap::new())),
            queue: Arc::new(Semaphore::new(queue_capacity.max(1))),
            request_timeout,
        }
    }
}

/// Build the router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/tasks", post(execute_task_handler))
        .route("/tasks/recent", get(recent_tasks_handler))
        .route("/tasks/:id", get(get_task_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "okami",
    }))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let history = state.history.read();
    let metrics = state.evolution.metrics();
    Json(json!({
        "status": "healthy",
        "crews": state.registry.names(),
        "total_tasks": history.len(),
        "pending_proposals": state.evolution.pending_proposals(),
        "evolution": {
            "runs": metrics.runs,
            "applied": metrics.applied,
            "proposed": metrics.proposed,
            "failed": metrics.failed,
        },
    }))
}

async fn get_task_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, (StatusCode, Json<Value>)> {
    let history = state.history.read();
    match history.get(&id) {
        Some(record) => Ok(Json(TaskResponse {
            task_id: record.task_id.clone(),
            status: record.status.clone(),
            result: record.result.clone(),
            error: record.error.clone(),
            execution_time: record.execution_time,
        })),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("task not found: {}", id)})),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    #[serde(default = "default_recent_limit")]
    limit: usize,
}

fn default_recent_limit() -> usize {
    10
}

async fn recent_tasks_handler(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> impl IntoResponse {
    let history = state.history.read();
    let mut records: Vec<TaskRecord> = history.values().cloned().collect();
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    records.truncate(query.limit);
    Json(records)
}

async fn execute_task_handler(
    State(state): State<AppState>,
    Json(request): Json<TaskRequest>,
) -> Result<Json<TaskResponse>, (StatusCode, Json<Value>)> {
    let permit = match state.queue.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            return Err((
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({"error": "request queue is full"})),
            ));
        }
    };

    let crew = match &request.crew_name {
        Some(name) => state.registry.get(name),
        None => state.registry.default_crew(),
    };
    let Some(crew) = crew else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": format!(
                    "crew not found: {}",
                    request.crew_name.as_deref().unwrap_or("<default>")
                ),
            })),
        ));
    };

    let task_id = format!("task_{}", uuid::Uuid::new_v4().simple());
    state.history.write().insert(
        task_id.clone(),
        TaskRecord {
            task_id: task_id.clone(),
            crew_name: crew.name.clone(),
            task_description: request.task.clone(),
            status: "processing".to_string(),
            result: None,
            error: None,
            execution_time: None,
            timestamp: Utc::now(),
        },
    );

    let inputs = build_inputs(&request);

    if request.async_execution {
        let state_bg = state.clone();
        let task_id_bg = task_id.clone();
        let task_text = request.task.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let response =
                run_crew(&state_bg, crew, &task_id_bg, task_text, inputs).await;
            log::info!(
                "async task {} finished with status {}",
                task_id_bg,
                response.status
            );
        });
        return Ok(Json(TaskResponse {
            task_id,
            status: "processing".to_string(),
            result: None,
            error: None,
            execution_time: None,
        }));
    }

    let response = run_crew(&state, crew, &task_id, request.task.clone(), inputs).await;
    drop(permit);
    Ok(Json(response))
}

fn build_inputs(request: &TaskRequest) -> HashMap<String, String> {
    let mut inputs = HashMap::new();
    if let Some(extra) = &request.inputs {
        for (key, value) in extra {
            inputs.insert(key.clone(), value_to_string(value));
        }
    }
    inputs.insert("task".to_string(), request.task.clone());
    if let Some(context) = &request.context {
        inputs.insert(
            "context".to_string(),
            serde_json::to_string(context).unwrap_or_default(),
        );
    }
    inputs
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Execute the crew, update the history record, and trigger evolution.
async fn run_crew(
    state: &AppState,
    crew: Arc<Crew>,
    task_id: &str,
    task_text: String,
    inputs: HashMap<String, String>,
) -> TaskResponse {
    let started = Instant::now();
    let ctx = RunContext::with_timeout(state.request_timeout);

    let response = match crew.kickoff(&state.runtime, inputs, &ctx).await {
        Ok(result) => {
            let status = match (result.status, &result.error) {
                (_, Some(_)) => "failed",
                (RunStatus::Completed, None) => "completed",
                (RunStatus::Partial, None) => "partial",
                (RunStatus::Failed, None) => "failed",
            };

            // The primary answer is ready; evolution happens after the fact.
            if crew.name != EVOLUTION_CREW {
                state
                    .evolution
                    .trigger(&result.trace, task_text, result.raw.clone());
            }

            TaskResponse {
                task_id: task_id.to_string(),
                status: status.to_string(),
                result: Some(TaskResultBody {
                    raw: result.raw.clone(),
                    tasks_output: serde_json::to_value(&result.tasks_output)
                        .unwrap_or(Value::Null),
                    token_usage: serde_json::to_value(&result.token_usage)
                        .unwrap_or(Value::Null),
                }),
                error: result
                    .error
                    .clone()
                    .or_else(|| result.terminal_error().map(String::from)),
                execution_time: Some(started.elapsed().as_secs_f64()),
            }
        }
        Err(error) => TaskResponse {
            task_id: task_id.to_string(),
            status: "failed".to_string(),
            result: None,
            error: Some(error.to_string()),
            execution_time: Some(started.elapsed().as_secs_f64()),
        },
    };

    if let Some(record) = state.history.write().get_mut(task_id) {
        record.status = response.status.clone();
        record.result = response.result.clone();
        record.error = response.error.clone();
        record.execution_time = response.execution_time;
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::crews::schema::SchemaRegistry;
    use crate::embedder::HashEmbedder;
    use crate::evolution::ImprovementApplier;
    use crate::guardrails::GuardrailRegistry;
    use crate::knowledge::KnowledgeStore;
    use crate::llms::providers::ScriptedCompleter;
    use crate::llms::retry::BackoffPolicy;
    use crate::rag::InMemoryVectorIndex;
    use crate::task::Task;
    use crate::tools::ToolRegistry;
    use crate::utilities::rpm_controller::RpmRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn test_state(replies: Vec<&str>, queue_capacity: usize) -> AppState {
        let dir = tempdir().unwrap();
        let embedder = Arc::new(HashEmbedder::new(64));
        let index = Arc::new(InMemoryVectorIndex::new(64));
        let knowledge = Arc::new(
            KnowledgeStore::open(dir.path().join("knowledge"), embedder.clone(), index.clone())
                .unwrap(),
        );

        let runtime = Arc::new(AgentRuntime {
            completer: Arc::new(ScriptedCompleter::new(replies)),
            tools: Arc::new(ToolRegistry::new()),
            guardrails: Arc::new(GuardrailRegistry::new()),
            schemas: Arc::new(SchemaRegistry::new()),
            rpm: Arc::new(RpmRegistry::new(0, Duration::from_secs(1))),
            memory: None,
            knowledge: Some(knowledge.clone()),
            backoff: BackoffPolicy {
                base: Duration::from_millis(1),
                ..BackoffPolicy::default()
            },
            default_pipeline: Vec::new(),
            max_delegation_depth: 3,
            task_timeout: Duration::from_secs(30),
        });

        let registry = Arc::new(CrewRegistry::new());
        let agent = Agent::new("assistant", "Assistant", "answer questions", "helpful");
        let task = Task::new("answer", "Answer: {task}", "a direct answer").with_agent("assistant");
        registry.register(Crew::new("main_crew", vec![agent], vec![task]).with_memory(false));

        let evolution = Arc::new(EvolutionCoordinator::new(
            registry.clone(),
            runtime.clone(),
            ImprovementApplier::new(knowledge, 10),
            false,
            true,
            dir.path().join("history.jsonl"),
        ));

        AppState::new(
            registry,
            runtime,
            evolution,
            queue_capacity,
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn health_reports_version() {
        let app = app_router(test_state(vec![], 4));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["service"], "okami");
    }

    #[tokio::test]
    async fn post_tasks_completes_and_records_history() {
        let state = test_state(
            vec!["The direct answer is 42 and it is final enough."],
            4,
        );
        let app = app_router(state.clone());

        let request = Request::post("/tasks")
            .header("Content-Type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({"task": "what is the answer?"})).unwrap(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 65536).await.unwrap();
        let parsed: TaskResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.status, "completed");
        assert!(parsed.result.unwrap().raw.contains("42"));

        // The record is retrievable.
        let app = app_router(state);
        let response = app
            .oneshot(
                Request::get(format!("/tasks/{}", parsed.task_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_crew_is_404() {
        let app = app_router(test_state(vec![], 4));
        let request = Request::post("/tasks")
            .header("Content-Type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({"task": "x", "crew_name": "ghost_crew"})).unwrap(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
