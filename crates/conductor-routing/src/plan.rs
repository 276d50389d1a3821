use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A reference to an upstream step's output consumed as input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBinding {
    /// The producing step.
    pub from_step: Uuid,
    /// Name of the artifact to consume.
    pub artifact: String,
}

/// Input for one step: the goal text plus upstream artifact bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInput {
    /// Sub-goal text sent to the target agent.
    pub text: String,
    /// Upstream outputs mapped into this step.
    pub bindings: Vec<InputBinding>,
}

/// One planned invocation of a specific agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique step id.
    pub id: Uuid,
    /// Step name; doubles as the produced artifact name.
    pub name: String,
    /// Target agent id (resolved against the registry at dispatch time).
    pub agent_id: String,
    /// Input mapping.
    pub input: StepInput,
    /// Steps that must be terminal-successful before this one dispatches.
    pub depends_on: Vec<Uuid>,
    /// Position of the originating sub-goal in the source text; orders
    /// dependency-free siblings deterministically.
    pub position: usize,
}

/// DAG of steps with dependency edges, kept in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Unique plan id.
    pub id: Uuid,
    /// The query this plan serves.
    pub query_id: Uuid,
    /// Owning conversation context.
    pub context_id: String,
    /// Steps in declaration order (aggregation merges artifacts in this
    /// order).
    pub steps: Vec<Step>,
}

impl ExecutionPlan {
    /// Create a plan; call [`ExecutionPlan::validate`] before executing.
    pub fn new(query_id: Uuid, context_id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: Uuid::new_v4(),
            query_id,
            context_id: context_id.into(),
            steps,
        }
    }

    /// Look up a step by id.
    pub fn step(&self, id: Uuid) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Steps with no dependencies; eligible for dispatch immediately at
    /// plan start.
    pub fn roots(&self) -> Vec<&Step> {
        self.steps.iter().filter(|s| s.depends_on.is_empty()).collect()
    }

    /// Steps that list `id` as a dependency.
    pub fn dependents_of(&self, id: Uuid) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|s| s.depends_on.contains(&id))
            .collect()
    }

    /// Whether `id` sits on the critical path: some other step consumes
    /// its output, or it is the plan's only step.
    pub fn is_critical(&self, id: Uuid) -> bool {
        self.steps.len() == 1 || !self.dependents_of(id).is_empty()
    }

    /// Reject cycles and dangling dependency references.
    pub fn validate(&self) -> ConductorResult<()> {
        if self.steps.is_empty() {
            return Err(ConductorError::InvalidPlan("plan has no steps".to_string()));
        }

        let ids: HashMap<Uuid, &Step> = self.steps.iter().map(|s| (s.id, s)).collect();
        if ids.len() != self.steps.len() {
            return Err(ConductorError::InvalidPlan(
                "duplicate step ids".to_string(),
            ));
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if !ids.contains_key(dep) {
                    return Err(ConductorError::InvalidPlan(format!(
                        "step '{}' depends on unknown step {dep}",
                        step.name
                    )));
                }
                if *dep == step.id {
                    return Err(ConductorError::InvalidPlan(format!(
                        "step '{}' depends on itself",
                        step.name
                    )));
                }
            }
        }

        // Three-color DFS: 1 = in progress, 2 = done.
        let mut visited: HashMap<Uuid, u8> = HashMap::new();
        for &id in ids.keys() {
            if Self::dfs_cycle(id, &ids, &mut visited) {
                return Err(ConductorError::InvalidPlan(
                    "dependency cycle detected".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn dfs_cycle(id: Uuid, ids: &HashMap<Uuid, &Step>, visited: &mut HashMap<Uuid, u8>) -> bool {
        match visited.get(&id) {
            Some(1) => return true, // back edge
            Some(2) => return false,
            _ => {}
        }
        visited.insert(id, 1);
        if let Some(step) = ids.get(&id) {
            for dep in &step.depends_on {
                if Self::dfs_cycle(*dep, ids, visited) {
                    return true;
                }
            }
        }
        visited.insert(id, 2);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str, deps: Vec<Uuid>, position: usize) -> Step {
        Step {
            id: Uuid::new_v4(),
            name: name.to_string(),
            agent_id: "agent".to_string(),
            input: StepInput {
                text: name.to_string(),
                bindings: Vec::new(),
            },
            depends_on: deps,
            position,
        }
    }

    #[test]
    fn test_valid_chain() {
        let a = step("a", vec![], 0);
        let b = step("b", vec![a.id], 1);
        let plan = ExecutionPlan::new(Uuid::new_v4(), "ctx", vec![a, b]);
        assert!(plan.validate().is_ok());
        assert_eq!(plan.roots().len(), 1);
    }

    #[test]
    fn test_empty_plan_invalid() {
        let plan = ExecutionPlan::new(Uuid::new_v4(), "ctx", vec![]);
        assert!(matches!(
            plan.validate(),
            Err(ConductorError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_dangling_dependency_rejected() {
        let a = step("a", vec![Uuid::new_v4()], 0);
        let plan = ExecutionPlan::new(Uuid::new_v4(), "ctx", vec![a]);
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("unknown step"));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut a = step("a", vec![], 0);
        a.depends_on = vec![a.id];
        let plan = ExecutionPlan::new(Uuid::new_v4(), "ctx", vec![a]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_two_step_cycle_rejected() {
        let mut a = step("a", vec![], 0);
        let mut b = step("b", vec![], 1);
        a.depends_on = vec![b.id];
        b.depends_on = vec![a.id];
        let plan = ExecutionPlan::new(Uuid::new_v4(), "ctx", vec![a, b]);
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_critical_path_classification() {
        let a = step("a", vec![], 0);
        let b = step("b", vec![a.id], 1);
        let c = step("c", vec![], 2);
        let a_id = a.id;
        let b_id = b.id;
        let c_id = c.id;
        let plan = ExecutionPlan::new(Uuid::new_v4(), "ctx", vec![a, b, c]);
        // a feeds b → critical; b and c are sinks → non-critical.
        assert!(plan.is_critical(a_id));
        assert!(!plan.is_critical(b_id));
        assert!(!plan.is_critical(c_id));
    }

    #[test]
    fn test_single_step_plan_is_critical() {
        let a = step("a", vec![], 0);
        let a_id = a.id;
        let plan = ExecutionPlan::new(Uuid::new_v4(), "ctx", vec![a]);
        assert!(plan.is_critical(a_id));
    }

    #[test]
    fn test_dependents_lookup() {
        let a = step("a", vec![], 0);
        let b = step("b", vec![a.id], 1);
        let c = step("c", vec![a.id], 2);
        let a_id = a.id;
        let plan = ExecutionPlan::new(Uuid::new_v4(), "ctx", vec![a, b, c]);
        assert_eq!(plan.dependents_of(a_id).len(), 2);
    }
}
