//! The per-task execution loop.
//!
//! One call to [`execute_task`] drives a single task to its terminal state:
//! prompt assembly, the completer iteration loop with tool dispatch under
//! the subprotocol, schema validation, and the guardrail pipeline with its
//! bounded retry. Delegated subtasks recurse through the same function with
//! an explicit depth counter.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use crate::agent::Agent;
use crate::agents::delegation::{self, DelegationRequest};
use crate::context::RunContext;
use crate::crews::schema::SchemaRegistry;
use crate::guardrails::{GuardrailContext, GuardrailRegistry, Verdict};
use crate::knowledge::{KnowledgeFilter, KnowledgeStore};
use crate::llms::retry::{call_with_retry, BackoffPolicy};
use crate::llms::{parse_reply, Completer, CompleterMessage, ParsedReply};
use crate::memory::MemoryStore;
use crate::task::Task;
use crate::tasks::task_output::TaskOutput;
use crate::tools::{ToolRegistry, DELEGATE_TOOL};
use crate::trace::{ExecutionStep, FinalVerdict, ToolCall, UsageMetrics};
use crate::utilities::errors::OkamiError;
use crate::utilities::rpm_controller::RpmRegistry;

/// Shared resources the executor draws on.
pub struct AgentRuntime {
    pub completer: Arc<dyn Completer>,
    pub tools: Arc<ToolRegistry>,
    pub guardrails: Arc<GuardrailRegistry>,
    pub schemas: Arc<SchemaRegistry>,
    pub rpm: Arc<RpmRegistry>,
    pub memory: Option<Arc<MemoryStore>>,
    pub knowledge: Option<Arc<KnowledgeStore>>,
    pub backoff: BackoffPolicy,
    /// Ordered guardrail refs applied to tasks that declare none.
    pub default_pipeline: Vec<String>,
    pub max_delegation_depth: u32,
    /// Per-task deadline, clamped to the request deadline at execution.
    pub task_timeout: std::time::Duration,
}

/// How the task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskDisposition {
    Passed,
    /// Guardrail or schema rejection with the retry budget exhausted.
    GuardrailFailed,
    /// The task died: iteration cap, fatal completer error, strict tool
    /// failure, or persistent rate exhaustion.
    Fatal,
}

/// Everything one task execution produced.
pub struct StepOutcome {
    pub step: ExecutionStep,
    /// Present whenever a candidate output was produced, even on failure.
    pub output: Option<TaskOutput>,
    pub usage: UsageMetrics,
    pub disposition: TaskDisposition,
    /// Steps of delegated subtasks, in completion order.
    pub extra_steps: Vec<ExecutionStep>,
}

/// Execute one task to completion. Boxed so delegation can recurse.
///
/// Only cancellation and deadline expiry surface as `Err`; every other
/// failure is reported through the returned outcome so the caller still
/// gets the step artifact.
pub fn execute_task<'a>(
    runtime: &'a AgentRuntime,
    directory: &'a HashMap<String, Agent>,
    agent: &'a Agent,
    task: &'a Task,
    context_block: Option<String>,
    ctx: &'a RunContext,
    depth: u32,
) -> Pin<Box<dyn Future<Output = Result<StepOutcome, OkamiError>> + Send + 'a>> {
    Box::pin(execute_task_inner(
        runtime,
        directory,
        agent,
        task,
        context_block,
        ctx,
        depth,
    ))
}

async fn execute_task_inner(
    runtime: &AgentRuntime,
    directory: &HashMap<String, Agent>,
    agent: &Agent,
    task: &Task,
    context_block: Option<String>,
    ctx: &RunContext,
    depth: u32,
) -> Result<StepOutcome, OkamiError> {
    let started = Instant::now();
    log::debug!(
        "agent '{}' starting task '{}' (depth {})",
        agent.name,
        task.name,
        depth
    );

    let mut usage = UsageMetrics::default();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut verdicts: Vec<Verdict> = Vec::new();
    let mut extra_steps: Vec<ExecutionStep> = Vec::new();
    let mut hints: Vec<String> = Vec::new();

    let fail = |reason: String,
                raw: String,
                tool_calls: Vec<ToolCall>,
                verdicts: Vec<Verdict>,
                extra_steps: Vec<ExecutionStep>,
                usage: UsageMetrics,
                disposition: TaskDisposition,
                started: Instant| StepOutcome {
        step: ExecutionStep {
            task_name: task.name.clone(),
            agent_name: agent.name.clone(),
            attempts: 1,
            tool_calls,
            raw_output: raw,
            guardrail_verdicts: verdicts,
            final_verdict: FinalVerdict::Fail,
            duration_ms: started.elapsed().as_millis() as u64,
            error: Some(reason),
        },
        output: None,
        usage,
        disposition,
        extra_steps,
    };

    // Resolve per-task resources up front.
    let pipeline_refs: &[String] = if task.guardrail_refs.is_empty() {
        &runtime.default_pipeline
    } else {
        &task.guardrail_refs
    };
    let pipeline = runtime.guardrails.pipeline(pipeline_refs)?;
    let schema = match &task.output_schema {
        Some(name) => Some(runtime.schemas.get(name).ok_or_else(|| {
            OkamiError::Validation(format!("unknown output schema '{}'", name))
        })?),
        None => None,
    };
    let tool_names: Vec<String> = task
        .tools
        .clone()
        .unwrap_or_else(|| agent.tools.clone())
        .into_iter()
        .collect();
    let allowed_tools: BTreeSet<&str> = tool_names.iter().map(String::as_str).collect();

    // Prompt assembly: task contract, dependency context, retrieval blocks.
    let mut manifest = runtime.tools.manifest(&tool_names);
    if !directory.is_empty() {
        if !manifest.is_empty() {
            manifest.push('\n');
        }
        manifest.push_str(&delegation::manifest_entry(directory));
    }

    let mut input = task.prompt();
    if let Some(context) = &context_block {
        input.push_str("\n\nContext:\n");
        input.push_str(context);
    }
    if agent.memory {
        if let Some(memory) = &runtime.memory {
            let block = memory.task_context(ctx.run_id, &task.description).await;
            if !block.is_empty() {
                input.push_str("\n\n");
                input.push_str(&block);
            }
        }
    }
    if let Some(knowledge) = &runtime.knowledge {
        let filter = agent
            .knowledge_refs
            .first()
            .and_then(|r| r.parse().ok())
            .map(|category| KnowledgeFilter {
                category: Some(category),
                tags: Default::default(),
            });
        match knowledge.search(&task.description, 3, filter.as_ref()).await {
            Ok(hits) if !hits.is_empty() => {
                input.push_str("\n\n## Knowledge context\n");
                for hit in hits {
                    input.push_str(&format!("- {}\n", first_line(&hit.content, 240)));
                }
            }
            Ok(_) => {}
            Err(error) => log::warn!("knowledge retrieval failed: {}", error),
        }
    }

    let system = CompleterMessage::system(agent.system_prompt(Some(&manifest)));
    let base_user = agent.user_prompt(&input);
    let bucket = runtime.rpm.bucket(&agent.name, agent.max_rpm);
    let guardrail_ctx = GuardrailContext {
        task_description: task.description.clone(),
        expected_output: task.expected_output.clone(),
        input: base_user.clone(),
    };

    let max_attempts = task.max_retries + 1;
    let max_iter = agent.max_iter.max(1);

    for attempt in 1..=max_attempts {
        let mut user = base_user.clone();
        for hint in &hints {
            user.push_str("\n\n");
            user.push_str(hint);
        }
        let mut messages = vec![system.clone(), CompleterMessage::user(user)];

        // Completer iteration loop: each iteration is one completer call.
        let mut candidate: Option<String> = None;
        for iteration in 0..max_iter {
            ctx.check()?;

            if let Err(error) = bucket.acquire(&agent.name).await {
                return Ok(fail(
                    error.to_string(),
                    String::new(),
                    tool_calls,
                    verdicts,
                    extra_steps,
                    usage,
                    TaskDisposition::Fatal,
                    started,
                ));
            }

            let completion = match call_with_retry(
                runtime.completer.as_ref(),
                &messages,
                &runtime.backoff,
                ctx,
                &agent.name,
            )
            .await
            {
                Ok(completion) => completion,
                Err(error) if error.is_run_fatal() => return Err(error),
                Err(error) => {
                    return Ok(fail(
                        error.to_string(),
                        String::new(),
                        tool_calls,
                        verdicts,
                        extra_steps,
                        usage,
                        TaskDisposition::Fatal,
                        started,
                    ));
                }
            };
            usage.absorb(&completion.usage);

            match parse_reply(&completion.text) {
                ParsedReply::Text(text) => {
                    candidate = Some(text);
                    break;
                }
                ParsedReply::ToolCall { tool, args } => {
                    // A tool call needs a further completer call to turn its
                    // observation into an answer; without iteration budget
                    // left the tool is not invoked at all.
                    if iteration + 1 >= max_iter {
                        return Ok(fail(
                            OkamiError::MaxIterExceeded {
                                agent: agent.name.clone(),
                                max_iter,
                            }
                            .to_string(),
                            String::new(),
                            tool_calls,
                            verdicts,
                            extra_steps,
                            usage,
                            TaskDisposition::Fatal,
                            started,
                        ));
                    }

                    let call_started = Instant::now();
                    let recorded_args = args.clone();
                    let observation: Value;
                    let mut call_error: Option<String> = None;

                    if tool == DELEGATE_TOOL {
                        match run_delegation(
                            runtime,
                            directory,
                            &args,
                            ctx,
                            depth,
                            &mut extra_steps,
                            &mut usage,
                        )
                        .await
                        {
                            Ok(value) => observation = value,
                            Err(error) if error.is_run_fatal() => return Err(error),
                            Err(error) => {
                                call_error = Some(error.to_string());
                                observation = json!({"error": error.to_string()});
                            }
                        }
                    } else if !allowed_tools.contains(tool.as_str()) {
                        let message = format!(
                            "unknown tool '{}'; available tools: {}",
                            tool,
                            tool_names.join(", ")
                        );
                        call_error = Some(message.clone());
                        observation = json!({"error": message});
                    } else {
                        match runtime.tools.get(&tool) {
                            Some(instance) => match instance.run(args.clone()).await {
                                Ok(value) => observation = value,
                                Err(error) => {
                                    if instance.strict() {
                                        tool_calls.push(ToolCall {
                                            name: tool.clone(),
                                            args,
                                            result: None,
                                            error: Some(error.to_string()),
                                            duration_ms: call_started.elapsed().as_millis()
                                                as u64,
                                        });
                                        return Ok(fail(
                                            OkamiError::Tool {
                                                tool,
                                                message: error.to_string(),
                                                strict: true,
                                            }
                                            .to_string(),
                                            String::new(),
                                            tool_calls,
                                            verdicts,
                                            extra_steps,
                                            usage,
                                            TaskDisposition::Fatal,
                                            started,
                                        ));
                                    }
                                    call_error = Some(error.to_string());
                                    observation = json!({"error": error.to_string()});
                                }
                            },
                            None => {
                                let message = format!("tool '{}' is not registered", tool);
                                call_error = Some(message.clone());
                                observation = json!({"error": message});
                            }
                        }
                    }

                    tool_calls.push(ToolCall {
                        name: tool.clone(),
                        args: recorded_args,
                        result: Some(observation.clone()),
                        error: call_error,
                        duration_ms: call_started.elapsed().as_millis() as u64,
                    });

                    messages.push(CompleterMessage::assistant(completion.text.clone()));
                    messages.push(CompleterMessage::user(format!(
                        "Observation: {}",
                        observation
                    )));
                }
            }
        }

        let Some(raw) = candidate else {
            return Ok(fail(
                OkamiError::MaxIterExceeded {
                    agent: agent.name.clone(),
                    max_iter,
                }
                .to_string(),
                String::new(),
                tool_calls,
                verdicts,
                extra_steps,
                usage,
                TaskDisposition::Fatal,
                started,
            ));
        };

        // Schema check: a parse failure is a guardrail-style reject.
        let mut json_dict = None;
        if let Some(schema) = schema {
            match schema.validate(&raw) {
                Ok(value) => json_dict = Some(value),
                Err(reason) => {
                    let verdict = Verdict::fail("output_schema", &reason);
                    hints.push(verdict.corrective_hint());
                    verdicts.push(verdict);
                    if attempt < max_attempts {
                        continue;
                    }
                    return Ok(StepOutcome {
                        step: ExecutionStep {
                            task_name: task.name.clone(),
                            agent_name: agent.name.clone(),
                            attempts: attempt,
                            tool_calls,
                            raw_output: raw.clone(),
                            guardrail_verdicts: verdicts,
                            final_verdict: FinalVerdict::Fail,
                            duration_ms: started.elapsed().as_millis() as u64,
                            error: Some(format!("output schema rejected: {}", reason)),
                        },
                        output: Some(TaskOutput::new(
                            &task.name,
                            &task.description,
                            &task.expected_output,
                            raw,
                            None,
                            &agent.name,
                        )),
                        usage,
                        disposition: TaskDisposition::GuardrailFailed,
                        extra_steps,
                    });
                }
            }
        }

        let attempt_verdicts = pipeline.validate(&raw, &guardrail_ctx).await;
        let rejected = attempt_verdicts.iter().find(|v| !v.passed).cloned();
        verdicts.extend(attempt_verdicts);

        match rejected {
            None => {
                log::debug!(
                    "task '{}' passed on attempt {}/{}",
                    task.name,
                    attempt,
                    max_attempts
                );
                return Ok(StepOutcome {
                    step: ExecutionStep {
                        task_name: task.name.clone(),
                        agent_name: agent.name.clone(),
                        attempts: attempt,
                        tool_calls,
                        raw_output: raw.clone(),
                        guardrail_verdicts: verdicts,
                        final_verdict: FinalVerdict::Pass,
                        duration_ms: started.elapsed().as_millis() as u64,
                        error: None,
                    },
                    output: Some(TaskOutput::new(
                        &task.name,
                        &task.description,
                        &task.expected_output,
                        raw,
                        json_dict,
                        &agent.name,
                    )),
                    usage,
                    disposition: TaskDisposition::Passed,
                    extra_steps,
                });
            }
            Some(verdict) => {
                log::info!(
                    "task '{}' rejected by '{}' on attempt {}/{}",
                    task.name,
                    verdict.guardrail,
                    attempt,
                    max_attempts
                );
                hints.push(verdict.corrective_hint());
                if attempt < max_attempts {
                    continue;
                }
                let reason = OkamiError::GuardrailRejected {
                    guardrail: verdict.guardrail.clone(),
                    reason: verdict.reason.clone().unwrap_or_default(),
                }
                .to_string();
                return Ok(StepOutcome {
                    step: ExecutionStep {
                        task_name: task.name.clone(),
                        agent_name: agent.name.clone(),
                        attempts: attempt,
                        tool_calls,
                        raw_output: raw.clone(),
                        guardrail_verdicts: verdicts,
                        final_verdict: FinalVerdict::Fail,
                        duration_ms: started.elapsed().as_millis() as u64,
                        error: Some(reason),
                    },
                    output: Some(TaskOutput::new(
                        &task.name,
                        &task.description,
                        &task.expected_output,
                        raw,
                        json_dict,
                        &agent.name,
                    )),
                    usage,
                    disposition: TaskDisposition::GuardrailFailed,
                    extra_steps,
                });
            }
        }
    }

    unreachable!("attempt loop always returns");
}

/// Resolve one `delegate` call: validate, execute the child task, and turn
/// its result into the manager's observation.
async fn run_delegation(
    runtime: &AgentRuntime,
    directory: &HashMap<String, Agent>,
    args: &Value,
    ctx: &RunContext,
    depth: u32,
    extra_steps: &mut Vec<ExecutionStep>,
    usage: &mut UsageMetrics,
) -> Result<Value, OkamiError> {
    let request = match DelegationRequest::from_args(args) {
        Ok(request) => request,
        Err(message) => return Ok(json!({"error": message})),
    };

    let child_depth = depth + 1;
    let target = match delegation::validate(
        &request,
        directory,
        child_depth,
        runtime.max_delegation_depth,
    ) {
        Ok(target) => target,
        Err(structured) => return Ok(structured),
    };

    let mut child_task = Task::new(
        format!("delegated:{}", first_line(&request.task, 48)),
        request.task.clone(),
        "A complete, direct answer to the delegated task",
    );
    child_task.agent = Some(target.name.clone());

    let outcome = execute_task(
        runtime,
        directory,
        target,
        &child_task,
        request.context.clone(),
        ctx,
        child_depth,
    )
    .await?;

    usage.absorb(&outcome.usage);
    let passed = outcome.disposition == TaskDisposition::Passed;
    let result_raw = outcome.output.as_ref().map(|output| output.raw.clone());
    let step_error = outcome.step.error.clone();
    extra_steps.extend(outcome.extra_steps);
    extra_steps.push(outcome.step);

    match (passed, result_raw) {
        (true, Some(raw)) => Ok(json!({
            "agent": target.name,
            "result": raw,
        })),
        _ => Ok(json!({
            "agent": target.name,
            "error": step_error.unwrap_or_else(|| "delegated task failed".to_string()),
        })),
    }
}

fn first_line(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    line.chars().take(max_chars).collect()
}
