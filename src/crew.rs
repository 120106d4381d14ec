//! The crew: a compiled bundle of agents, tasks, and a process discipline.
//!
//! A crew definition is validated into an execution plan and then driven to
//! completion by `kickoff`. Kickoff never mutates the definition: inputs are
//! interpolated into working copies, so one registered crew serves
//! concurrent requests.

use std::collections::HashMap;

use futures::future::join_all;
use md5_dep::{Digest, Md5};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::Agent;
use crate::agents::executor::{execute_task, AgentRuntime, StepOutcome, TaskDisposition};
use crate::context::RunContext;
use crate::crews::crew_output::CrewResult;
use crate::crews::plan::{self, ExecutionPlan};
use crate::crews::schema::SchemaRegistry;
use crate::guardrails::GuardrailRegistry;
use crate::llms::retry::call_with_retry;
use crate::llms::CompleterMessage;
use crate::process::Process;
use crate::task::Task;
use crate::trace::{ExecutionTrace, RunStatus, UsageMetrics};
use crate::utilities::errors::OkamiError;
use crate::utilities::logger::Logger;
use crate::utilities::printer::PrinterColor;

/// A group of agents and the tasks they perform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crew {
    pub name: String,
    pub id: Uuid,
    pub process: Process,
    pub agents: Vec<Agent>,
    pub tasks: Vec<Task>,
    /// Required for (and only meaningful under) the hierarchical process.
    /// Never listed in `agents`; injected into the live executor set at
    /// kickoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_agent: Option<Agent>,
    pub memory: bool,
    /// Knowledge categories made available to every agent in the crew.
    #[serde(default)]
    pub knowledge_sources: Vec<String>,
    /// When set, a pre-execution planning pass drafts a step plan that is
    /// appended to every task description.
    pub planning: bool,
    pub verbose: bool,
}

impl Crew {
    pub fn new(name: impl Into<String>, agents: Vec<Agent>, tasks: Vec<Task>) -> Self {
        Self {
            name: name.into(),
            id: Uuid::new_v4(),
            process: Process::default(),
            agents,
            tasks,
            manager_agent: None,
            memory: true,
            knowledge_sources: Vec::new(),
            planning: false,
            verbose: false,
        }
    }

    pub fn with_process(mut self, process: Process) -> Self {
        self.process = process;
        self
    }

    pub fn with_manager(mut self, manager: Agent) -> Self {
        self.manager_agent = Some(manager);
        self
    }

    pub fn with_memory(mut self, memory: bool) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_knowledge_sources<I: IntoIterator<Item = S>, S: Into<String>>(
        mut self,
        sources: I,
    ) -> Self {
        self.knowledge_sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_planning(mut self, planning: bool) -> Self {
        self.planning = planning;
        self
    }

    /// Stable fingerprint over member fingerprints.
    pub fn key(&self) -> String {
        let mut source: Vec<String> = self.agents.iter().map(Agent::key).collect();
        source.extend(self.tasks.iter().map(Task::key));
        let mut hasher = Md5::new();
        hasher.update(source.join("|").as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Validate the definition against the runtime registries.
    pub fn compile(
        &self,
        guardrails: &GuardrailRegistry,
        schemas: &SchemaRegistry,
    ) -> Result<ExecutionPlan, OkamiError> {
        plan::compile(
            self.process,
            &self.agents,
            &self.tasks,
            self.manager_agent.as_ref(),
            guardrails,
            schemas,
        )
    }

    /// Execute the crew.
    ///
    /// Compile failures surface as `Err`. Runtime failures, including
    /// cancellation, are reported inside the returned result so callers
    /// always receive the trace.
    pub async fn kickoff(
        &self,
        runtime: &AgentRuntime,
        inputs: HashMap<String, String>,
        ctx: &RunContext,
    ) -> Result<CrewResult, OkamiError> {
        let plan = self.compile(&runtime.guardrails, &runtime.schemas)?;
        let logger = Logger::new(self.verbose);
        logger.log(
            "info",
            &format!("crew '{}' starting ({} process)", self.name, self.process),
            Some(PrinterColor::BoldCyan),
        );

        // Working copies; the registered definition stays pristine.
        let mut agents = self.agents.clone();
        let mut tasks = self.tasks.clone();
        let mut manager = self.manager_agent.clone();
        for agent in &mut agents {
            agent.interpolate_inputs(&inputs);
            // Crew-wide knowledge is visible to every member.
            for source in &self.knowledge_sources {
                if !agent.knowledge_refs.contains(source) {
                    agent.knowledge_refs.push(source.clone());
                }
            }
        }
        for task in &mut tasks {
            task.interpolate_inputs(&inputs);
        }
        if let Some(manager) = &mut manager {
            manager.interpolate_inputs(&inputs);
        }

        if self.planning {
            if let Some(step_plan) = self
                .draft_plan(runtime, &agents, manager.as_ref(), &tasks, &inputs, ctx)
                .await
            {
                for task in &mut tasks {
                    task.description
                        .push_str(&format!("\n\nPlanned approach:\n{}", step_plan));
                }
            }
        }

        let mut trace = ExecutionTrace::begin(&self.name, ctx.run_id, inputs.clone());
        let mut usage = UsageMetrics::default();

        let run = match self.process {
            Process::Sequential => {
                self.run_sequential(runtime, &agents, &tasks, &plan, ctx, &mut trace, &mut usage)
                    .await
            }
            Process::Hierarchical => {
                let manager = manager.as_ref().ok_or_else(|| {
                    OkamiError::Validation("hierarchical crew lost its manager".to_string())
                })?;
                self.run_hierarchical(runtime, &agents, manager, &tasks, &inputs, ctx, &mut trace, &mut usage)
                    .await
            }
        };

        let (status, final_output, error) = match run {
            Ok((status, final_output)) => (status, final_output, None),
            Err(error) if error.is_run_fatal() && !matches!(error, OkamiError::Validation(_)) => {
                (RunStatus::Failed, String::new(), Some(error.to_string()))
            }
            Err(error) => return Err(error),
        };

        trace.finish(status, final_output.clone());

        // Memory flush happens only for runs that ended on their own terms.
        if self.memory && error.is_none() {
            if let Some(memory) = &runtime.memory {
                let facts: Vec<(String, String)> = trace
                    .steps
                    .iter()
                    .filter(|step| step.error.is_none())
                    .map(|step| {
                        (
                            step.agent_name.clone(),
                            format!(
                                "{} handled task '{}' successfully",
                                step.agent_name, step.task_name
                            ),
                        )
                    })
                    .collect();
                if let Err(memory_error) = memory
                    .finish_run(ctx.run_id, &self.name, &final_output, &facts)
                    .await
                {
                    log::warn!("memory flush failed for run {}: {}", ctx.run_id, memory_error);
                }
            }
        }

        logger.log(
            "info",
            &format!("crew '{}' finished with status {:?}", self.name, status),
            Some(PrinterColor::BoldGreen),
        );

        Ok(CrewResult {
            raw: final_output,
            tasks_output: trace.steps.clone(),
            token_usage: usage,
            trace,
            status,
            error,
        })
    }

    /// Drive tasks in dependency order; consecutive async-flagged tasks
    /// whose dependencies are satisfied run concurrently.
    #[allow(clippy::too_many_arguments)]
    async fn run_sequential(
        &self,
        runtime: &AgentRuntime,
        agents: &[Agent],
        tasks: &[Task],
        plan: &ExecutionPlan,
        ctx: &RunContext,
        trace: &mut ExecutionTrace,
        usage: &mut UsageMetrics,
    ) -> Result<(RunStatus, String), OkamiError> {
        let by_name: HashMap<&str, &Agent> =
            agents.iter().map(|a| (a.name.as_str(), a)).collect();
        let no_delegation: HashMap<String, Agent> = HashMap::new();

        let mut outputs: HashMap<String, String> = HashMap::new();
        let mut last_passing: Option<String> = None;
        let mut any_failed = false;

        let mut position = 0;
        while position < plan.order.len() {
            // A maximal run of async tasks whose dependencies are already
            // complete executes as one concurrent batch.
            let mut batch = Vec::new();
            while position < plan.order.len() {
                let index = plan.order[position];
                let task = &tasks[index];
                let ready = task.context.iter().all(|dep| outputs.contains_key(dep));
                if task.async_execution && ready {
                    batch.push(index);
                    position += 1;
                } else {
                    break;
                }
            }
            if batch.is_empty() {
                batch.push(plan.order[position]);
                position += 1;
            }

            // Each task runs under its own deadline, clamped to the request's.
            let task_ctxs: Vec<RunContext> = batch
                .iter()
                .map(|_| ctx.for_task(runtime.task_timeout))
                .collect();
            let mut executions = Vec::with_capacity(batch.len());
            for (offset, &index) in batch.iter().enumerate() {
                let task = &tasks[index];
                let agent = by_name
                    .get(task.agent.as_deref().unwrap_or_default())
                    .copied()
                    .ok_or_else(|| {
                        OkamiError::Validation(format!(
                            "task '{}' has no resolvable agent",
                            task.name
                        ))
                    })?;
                let context_block = build_context_block(task, &outputs);
                executions.push(execute_task(
                    runtime,
                    &no_delegation,
                    agent,
                    task,
                    context_block,
                    &task_ctxs[offset],
                    0,
                ));
            }
            let results: Vec<Result<StepOutcome, OkamiError>> = join_all(executions).await;

            for (offset, result) in results.into_iter().enumerate() {
                let task = &tasks[batch[offset]];
                let outcome = result?;
                usage.absorb(&outcome.usage);

                if let Some(output) = &outcome.output {
                    outputs.insert(task.name.clone(), output.raw.clone());
                    if outcome.disposition == TaskDisposition::Passed {
                        last_passing = Some(output.raw.clone());
                        if self.memory {
                            if let Some(memory) = &runtime.memory {
                                if let Err(error) = memory
                                    .record_step(
                                        ctx.run_id,
                                        &outcome.step.agent_name,
                                        &task.name,
                                        &output.raw,
                                    )
                                    .await
                                {
                                    log::warn!("short-term record failed: {}", error);
                                }
                            }
                        }
                    }
                }

                let disposition = outcome.disposition;
                trace.record_step(outcome.step);

                match disposition {
                    TaskDisposition::Passed => {}
                    TaskDisposition::GuardrailFailed => any_failed = true,
                    TaskDisposition::Fatal => {
                        // Unrecoverable under the sequential process.
                        return Ok((
                            RunStatus::Failed,
                            last_passing.clone().unwrap_or_default(),
                        ));
                    }
                }
            }
        }

        let final_output = last_passing.unwrap_or_default();
        let status = if any_failed {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };
        Ok((status, final_output))
    }

    /// Hand the synthesized root task to the manager, which decomposes it
    /// over the worker inventory via delegation.
    #[allow(clippy::too_many_arguments)]
    async fn run_hierarchical(
        &self,
        runtime: &AgentRuntime,
        agents: &[Agent],
        manager: &Agent,
        tasks: &[Task],
        inputs: &HashMap<String, String>,
        ctx: &RunContext,
        trace: &mut ExecutionTrace,
        usage: &mut UsageMetrics,
    ) -> Result<(RunStatus, String), OkamiError> {
        let directory: HashMap<String, Agent> = agents
            .iter()
            .map(|agent| (agent.name.clone(), agent.clone()))
            .collect();

        let description = match inputs.get("task") {
            Some(task) if !task.trim().is_empty() => task.clone(),
            _ => tasks
                .iter()
                .map(Task::prompt)
                .collect::<Vec<_>>()
                .join("\n\n"),
        };
        let root = Task::new(
            "main",
            description,
            "The complete final answer, synthesized from any delegated work",
        );

        let task_ctx = ctx.for_task(runtime.task_timeout);
        let outcome = execute_task(runtime, &directory, manager, &root, None, &task_ctx, 0).await?;
        usage.absorb(&outcome.usage);

        for step in &outcome.extra_steps {
            trace.record_step(step.clone());
        }
        let had_children = !outcome.extra_steps.is_empty();
        let disposition = outcome.disposition;
        let final_output = outcome
            .output
            .as_ref()
            .map(|output| output.raw.clone())
            .unwrap_or_default();
        trace.record_step(outcome.step);

        let status = match disposition {
            TaskDisposition::Passed => RunStatus::Completed,
            TaskDisposition::GuardrailFailed => RunStatus::Partial,
            TaskDisposition::Fatal if had_children => RunStatus::Partial,
            TaskDisposition::Fatal => RunStatus::Failed,
        };
        Ok((status, final_output))
    }

    /// Ask the manager (or the first agent) for a numbered step plan.
    async fn draft_plan(
        &self,
        runtime: &AgentRuntime,
        agents: &[Agent],
        manager: Option<&Agent>,
        tasks: &[Task],
        inputs: &HashMap<String, String>,
        ctx: &RunContext,
    ) -> Option<String> {
        let planner = manager.or_else(|| agents.first())?;
        let inventory: Vec<String> = tasks
            .iter()
            .map(|task| format!("- {}: {}", task.name, task.description))
            .collect();
        let request = format!(
            "Draft a concise numbered plan for completing these tasks.\n\
             Inputs: {:?}\n\nTasks:\n{}",
            inputs,
            inventory.join("\n")
        );
        let messages = [
            CompleterMessage::system(planner.system_prompt(None)),
            CompleterMessage::user(request),
        ];
        match call_with_retry(
            runtime.completer.as_ref(),
            &messages,
            &runtime.backoff,
            ctx,
            "planner",
        )
        .await
        {
            Ok(completion) => Some(completion.text),
            Err(error) => {
                log::warn!("planning pass failed, continuing without a plan: {}", error);
                None
            }
        }
    }
}

/// The ordered concatenation of dependency outputs, each exactly once.
fn build_context_block(task: &Task, outputs: &HashMap<String, String>) -> Option<String> {
    if task.context.is_empty() {
        return None;
    }
    let parts: Vec<&str> = task
        .context
        .iter()
        .filter_map(|name| outputs.get(name).map(String::as_str))
        .collect();
    Some(parts.join("\n\n"))
}

impl std::fmt::Display for Crew {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Crew(name={}, process={}, agents={}, tasks={})",
            self.name,
            self.process,
            self.agents.len(),
            self.tasks.len()
        )
    }
}
