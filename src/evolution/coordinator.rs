//! Post-run evolution coordination.
//!
//! After a primary crew completes (whatever its status), the coordinator
//! runs the evolution crew over the execution trace, feeds its output
//! through the parser and applier, and records metrics. The whole pipeline
//! runs off the hot path: `trigger` spawns a background task and returns
//! immediately, and a run id is processed at most once.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::agents::executor::AgentRuntime;
use crate::context::RunContext;
use crate::crews::registry::CrewRegistry;
use crate::evolution::applier::{ApplyReport, ChangeStatus, ImprovementApplier};
use crate::evolution::parser::ImprovementParser;
use crate::trace::ExecutionTrace;

/// Crew name the coordinator looks up for the evolution pass.
pub const EVOLUTION_CREW: &str = "evolution_crew";

/// Aggregate evolution statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvolutionMetrics {
    pub runs: u64,
    pub applied: u64,
    pub skipped: u64,
    pub failed: u64,
    pub proposed: u64,
    /// Attempted/applied counts per change type.
    pub by_type: HashMap<String, (u64, u64)>,
}

impl EvolutionMetrics {
    /// Fraction of attempted changes of this type that were applied.
    pub fn success_rate(&self, change_type: &str) -> f64 {
        match self.by_type.get(change_type) {
            Some((attempted, applied)) if *attempted > 0 => {
                *applied as f64 / *attempted as f64
            }
            _ => 0.0,
        }
    }

    fn absorb(&mut self, report: &ApplyReport) {
        self.runs += 1;
        self.applied += report.count(ChangeStatus::Applied) as u64;
        self.skipped += report.count(ChangeStatus::Skipped) as u64;
        self.failed += report.count(ChangeStatus::Failed) as u64;
        self.proposed += report.count(ChangeStatus::Proposed) as u64;
        for outcome in &report.outcomes {
            let entry = self.by_type.entry(outcome.change_type.clone()).or_default();
            entry.0 += 1;
            if outcome.status == ChangeStatus::Applied {
                entry.1 += 1;
            }
        }
    }
}

pub struct EvolutionCoordinator {
    registry: Arc<CrewRegistry>,
    runtime: Arc<AgentRuntime>,
    parser: ImprovementParser,
    applier: ImprovementApplier,
    enabled: bool,
    auto_apply: bool,
    metrics: parking_lot::Mutex<EvolutionMetrics>,
    seen_runs: parking_lot::Mutex<HashSet<Uuid>>,
    /// Append-only JSONL history of evolution passes.
    history_path: PathBuf,
}

impl EvolutionCoordinator {
    pub fn new(
        registry: Arc<CrewRegistry>,
        runtime: Arc<AgentRuntime>,
        applier: ImprovementApplier,
        enabled: bool,
        auto_apply: bool,
        history_path: PathBuf,
    ) -> Self {
        Self {
            registry,
            runtime,
            parser: ImprovementParser::new(),
            applier,
            enabled,
            auto_apply,
            metrics: parking_lot::Mutex::new(EvolutionMetrics::default()),
            seen_runs: parking_lot::Mutex::new(HashSet::new()),
            history_path,
        }
    }

    pub fn metrics(&self) -> EvolutionMetrics {
        self.metrics.lock().clone()
    }

    /// Pending (never-applied) proposals, for status reporting.
    pub fn pending_proposals(&self) -> usize {
        self.applier_knowledge_proposals()
    }

    fn applier_knowledge_proposals(&self) -> usize {
        // The proposals log lives in the knowledge store the applier wraps;
        // route through the runtime handle when present.
        self.runtime
            .knowledge
            .as_ref()
            .map(|k| k.proposals().len())
            .unwrap_or(0)
    }

    /// Kick off the evolution pass for a finished primary run. Fires at
    /// most once per run id and never blocks the caller.
    pub fn trigger(
        self: &Arc<Self>,
        trace: &ExecutionTrace,
        user_input: String,
        main_response: String,
    ) {
        if !self.enabled {
            return;
        }
        {
            let mut seen = self.seen_runs.lock();
            if !seen.insert(trace.run_id) {
                return;
            }
        }

        let coordinator = self.clone();
        let trace_summary = trace.summary();
        let run_id = trace.run_id;
        tokio::spawn(async move {
            if let Err(error) = coordinator
                .run_once(run_id, user_input, main_response, trace_summary)
                .await
            {
                log::error!("evolution pass for run {} failed: {}", run_id, error);
            }
        });
    }

    /// One full evolution pass. Public for tests and manual invocation.
    pub async fn run_once(
        &self,
        run_id: Uuid,
        user_input: String,
        main_response: String,
        trace_summary: String,
    ) -> Result<ApplyReport, anyhow::Error> {
        let Some(crew) = self.registry.get(EVOLUTION_CREW) else {
            log::warn!("no '{}' registered, skipping evolution", EVOLUTION_CREW);
            return Ok(ApplyReport::default());
        };

        let mut inputs = HashMap::new();
        inputs.insert(
            "task".to_string(),
            format!(
                "Analyze the following task execution and propose improvements.\n\n\
                 Original request: {}\n\nMain response: {}\n\nExecution trace:\n{}\n\n\
                 Reply with a JSON object {{\"changes\": [...]}} where each change is one of\n\
                 add_knowledge {{category, file, title, content, tags, reason}} or\n\
                 update_knowledge {{file, section?, content, operation, reason}}.",
                truncate(&user_input, 800),
                truncate(&main_response, 1200),
                trace_summary
            ),
        );
        inputs.insert("user_input".to_string(), user_input);
        inputs.insert("main_response".to_string(), main_response);
        inputs.insert("trace_summary".to_string(), trace_summary);

        let ctx = RunContext::new();
        let result = crew.kickoff(&self.runtime, inputs, &ctx).await?;
        let parsed = self.parser.parse(&result.raw);

        let report = if self.auto_apply {
            self.applier.apply(parsed.changes).await
        } else {
            // Review mode: everything lands as a proposal.
            let demoted = parsed
                .changes
                .into_iter()
                .map(|change| match change {
                    crate::evolution::Change::Proposed(p) => crate::evolution::Change::Proposed(p),
                    other => crate::evolution::Change::Proposed(
                        crate::evolution::ProposedChange {
                            change_type: other.change_type().to_string(),
                            target_path: Some(other.target()),
                            payload: other.to_value(),
                            reason: "auto_apply is disabled".to_string(),
                        },
                    ),
                })
                .collect();
            self.applier.apply(demoted).await
        };

        self.metrics.lock().absorb(&report);
        self.append_history(run_id, &report);
        Ok(report)
    }

    fn append_history(&self, run_id: Uuid, report: &ApplyReport) {
        let line = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "run_id": run_id,
            "applied": report.count(ChangeStatus::Applied),
            "skipped": report.count(ChangeStatus::Skipped),
            "failed": report.count(ChangeStatus::Failed),
            "proposed": report.count(ChangeStatus::Proposed),
            "outcomes": report.outcomes,
        });
        if let Some(parent) = self.history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let record = format!("{}\n", line);
        if let Err(error) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_path)
            .and_then(|mut file| std::io::Write::write_all(&mut file, record.as_bytes()))
        {
            log::warn!("failed to append evolution history: {}", error);
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect::<String>() + "..."
    }
}
