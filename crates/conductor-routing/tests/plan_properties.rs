//! Property tests for plan validation: every generated cycle must be
//! rejected, every forward-edge-only graph must be accepted.

use conductor_routing::{ExecutionPlan, Step, StepInput};
use proptest::prelude::*;
use uuid::Uuid;

fn make_steps(n: usize) -> Vec<Step> {
    (0..n)
        .map(|i| Step {
            id: Uuid::new_v4(),
            name: format!("step{}", i + 1),
            agent_id: "agent".to_string(),
            input: StepInput {
                text: format!("goal {i}"),
                bindings: Vec::new(),
            },
            depends_on: Vec::new(),
            position: i,
        })
        .collect()
}

proptest! {
    /// Graphs whose edges all point to earlier steps are acyclic by
    /// construction and must validate.
    #[test]
    fn forward_only_graphs_validate(
        n in 1usize..12,
        edges in prop::collection::vec((0usize..12, 0usize..12), 0..24),
    ) {
        let mut steps = make_steps(n);
        for (a, b) in edges {
            let (a, b) = (a % n, b % n);
            if b < a {
                let dep = steps[b].id;
                if !steps[a].depends_on.contains(&dep) {
                    steps[a].depends_on.push(dep);
                }
            }
        }
        let plan = ExecutionPlan::new(Uuid::new_v4(), "ctx", steps);
        prop_assert!(plan.validate().is_ok());
    }

    /// Any graph containing a directed cycle must be rejected, no matter
    /// what other edges it carries.
    #[test]
    fn cyclic_graphs_are_rejected(
        n in 2usize..12,
        cycle_len in 2usize..6,
        extra_edges in prop::collection::vec((0usize..12, 0usize..12), 0..12),
    ) {
        let mut steps = make_steps(n);
        let cycle_len = cycle_len.min(n);

        // Plant a cycle over the first cycle_len steps.
        for i in 0..cycle_len {
            let next = (i + 1) % cycle_len;
            let dep = steps[next].id;
            steps[i].depends_on.push(dep);
        }
        // Sprinkle arbitrary extra forward edges on top.
        for (a, b) in extra_edges {
            let (a, b) = (a % n, b % n);
            if b < a {
                let dep = steps[b].id;
                if !steps[a].depends_on.contains(&dep) {
                    steps[a].depends_on.push(dep);
                }
            }
        }

        let plan = ExecutionPlan::new(Uuid::new_v4(), "ctx", steps);
        prop_assert!(plan.validate().is_err());
    }
}
