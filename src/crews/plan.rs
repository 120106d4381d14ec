//! Plan compilation: validation and task ordering.

use std::collections::{HashMap, HashSet};

use crate::agent::Agent;
use crate::crews::schema::SchemaRegistry;
use crate::guardrails::GuardrailRegistry;
use crate::process::Process;
use crate::task::Task;
use crate::utilities::errors::OkamiError;

/// A validated, executable ordering of a crew's tasks.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Indices into the crew's task list, in execution order. Dependencies
    /// always precede their dependents; ties keep the listed order.
    pub order: Vec<usize>,
}

/// Validate the crew definition and derive the execution order.
///
/// Rejected at compile time: unresolved agent/task/guardrail/schema
/// references, duplicate identity keys, dependency cycles, a hierarchical
/// crew without a manager (or with the manager listed among the workers),
/// and a sequential crew with unassigned tasks.
pub fn compile(
    process: Process,
    agents: &[Agent],
    tasks: &[Task],
    manager: Option<&Agent>,
    guardrails: &GuardrailRegistry,
    schemas: &SchemaRegistry,
) -> Result<ExecutionPlan, OkamiError> {
    let mut agent_names = HashSet::new();
    for agent in agents {
        if !agent_names.insert(agent.name.as_str()) {
            return Err(OkamiError::Validation(format!(
                "duplicate agent name '{}'",
                agent.name
            )));
        }
    }

    let mut task_index: HashMap<&str, usize> = HashMap::new();
    for (i, task) in tasks.iter().enumerate() {
        if task_index.insert(task.name.as_str(), i).is_some() {
            return Err(OkamiError::Validation(format!(
                "duplicate task name '{}'",
                task.name
            )));
        }
    }

    match process {
        Process::Hierarchical => {
            let manager = manager.ok_or_else(|| {
                OkamiError::Validation(
                    "hierarchical process requires a manager agent".to_string(),
                )
            })?;
            if agent_names.contains(manager.name.as_str()) {
                return Err(OkamiError::Validation(format!(
                    "manager agent '{}' must not be listed among the crew agents",
                    manager.name
                )));
            }
        }
        Process::Sequential => {
            for task in tasks {
                match &task.agent {
                    Some(agent) if agent_names.contains(agent.as_str()) => {}
                    Some(agent) => {
                        return Err(OkamiError::Validation(format!(
                            "task '{}' references unknown agent '{}'",
                            task.name, agent
                        )))
                    }
                    None => {
                        return Err(OkamiError::Validation(format!(
                            "task '{}' has no agent assigned; sequential crews require one",
                            task.name
                        )))
                    }
                }
            }
        }
    }

    for task in tasks {
        if process == Process::Hierarchical {
            if let Some(agent) = &task.agent {
                if !agent_names.contains(agent.as_str()) {
                    return Err(OkamiError::Validation(format!(
                        "task '{}' references unknown agent '{}'",
                        task.name, agent
                    )));
                }
            }
        }
        for dependency in &task.context {
            if !task_index.contains_key(dependency.as_str()) {
                return Err(OkamiError::Validation(format!(
                    "task '{}' depends on unknown task '{}'",
                    task.name, dependency
                )));
            }
        }
        for guardrail in &task.guardrail_refs {
            if !guardrails.contains(guardrail) {
                return Err(OkamiError::Validation(format!(
                    "task '{}' references unknown guardrail '{}'",
                    task.name, guardrail
                )));
            }
        }
        if let Some(schema) = &task.output_schema {
            if !schemas.contains(schema) {
                return Err(OkamiError::Validation(format!(
                    "task '{}' references unknown output schema '{}'",
                    task.name, schema
                )));
            }
        }
    }

    // Kahn's algorithm, preferring the listed order among ready tasks.
    let mut in_degree = vec![0usize; tasks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    for (i, task) in tasks.iter().enumerate() {
        for dependency in &task.context {
            let dep = task_index[dependency.as_str()];
            in_degree[i] += 1;
            dependents[dep].push(i);
        }
    }

    let mut order = Vec::with_capacity(tasks.len());
    let mut ready: Vec<usize> = (0..tasks.len()).filter(|&i| in_degree[i] == 0).collect();
    while let Some(&next) = ready.iter().min() {
        ready.retain(|&i| i != next);
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    if order.len() != tasks.len() {
        let stuck: Vec<&str> = (0..tasks.len())
            .filter(|&i| !order.contains(&i))
            .map(|i| tasks[i].name.as_str())
            .collect();
        return Err(OkamiError::Validation(format!(
            "task dependency graph has a cycle involving: {}",
            stuck.join(", ")
        )));
    }

    Ok(ExecutionPlan { order })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str) -> Agent {
        Agent::new(name, name, "goal", "story")
    }

    fn task(name: &str, agent: &str, context: &[&str]) -> Task {
        Task::new(name, format!("do {}", name), "output")
            .with_agent(agent)
            .with_context(context.iter().copied())
    }

    fn empty_registries() -> (GuardrailRegistry, SchemaRegistry) {
        (GuardrailRegistry::new(), SchemaRegistry::new())
    }

    #[test]
    fn orders_dependencies_before_dependents() {
        let agents = vec![agent("a")];
        let tasks = vec![
            task("late", "a", &["early"]),
            task("early", "a", &[]),
        ];
        let (guardrails, schemas) = empty_registries();
        let plan = compile(
            Process::Sequential,
            &agents,
            &tasks,
            None,
            &guardrails,
            &schemas,
        )
        .unwrap();
        assert_eq!(plan.order, vec![1, 0]);
    }

    #[test]
    fn rejects_cycles() {
        let agents = vec![agent("a")];
        let tasks = vec![
            task("one", "a", &["two"]),
            task("two", "a", &["one"]),
        ];
        let (guardrails, schemas) = empty_registries();
        let err = compile(
            Process::Sequential,
            &agents,
            &tasks,
            None,
            &guardrails,
            &schemas,
        )
        .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn rejects_unknown_agent_reference() {
        let agents = vec![agent("a")];
        let tasks = vec![task("one", "ghost", &[])];
        let (guardrails, schemas) = empty_registries();
        let err = compile(
            Process::Sequential,
            &agents,
            &tasks,
            None,
            &guardrails,
            &schemas,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown agent"));
    }

    #[test]
    fn sequential_requires_assignment() {
        let agents = vec![agent("a")];
        let tasks = vec![Task::new("orphan", "do it", "output")];
        let (guardrails, schemas) = empty_registries();
        let err = compile(
            Process::Sequential,
            &agents,
            &tasks,
            None,
            &guardrails,
            &schemas,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no agent assigned"));
    }

    #[test]
    fn hierarchical_rejects_manager_among_workers() {
        let agents = vec![agent("lead"), agent("worker")];
        let tasks = vec![Task::new("main", "do it", "output")];
        let manager = agent("lead");
        let (guardrails, schemas) = empty_registries();
        let err = compile(
            Process::Hierarchical,
            &agents,
            &tasks,
            Some(&manager),
            &guardrails,
            &schemas,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must not be listed"));
    }

    #[test]
    fn hierarchical_requires_manager() {
        let agents = vec![agent("worker")];
        let tasks = vec![Task::new("main", "do it", "output")];
        let (guardrails, schemas) = empty_registries();
        let err = compile(
            Process::Hierarchical,
            &agents,
            &tasks,
            None,
            &guardrails,
            &schemas,
        )
        .unwrap_err();
        assert!(err.to_string().contains("requires a manager"));
    }

    #[test]
    fn rejects_unknown_schema() {
        let agents = vec![agent("a")];
        let mut t = task("one", "a", &[]);
        t.output_schema = Some("ghost_schema".into());
        let (guardrails, schemas) = empty_registries();
        let err = compile(
            Process::Sequential,
            &agents,
            &[t],
            None,
            &guardrails,
            &schemas,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown output schema"));
    }
}
