//! Planner (C4): folds pending steps into the plan DAG, rejecting cycles
//! and unknown dependencies.
//!
//! Acyclicity and ready-set computation are grounded directly on
//! `mofa_foundation::workflow::graph::WorkflowGraph::{has_cycle,
//! get_parallel_groups}` (Kahn's-algorithm cycle check + layered BFS).

use std::collections::HashSet;

use petgraph::Direction;

use crate::error::{PlanError, ReactorError};
use crate::reactor::{EdgeLabel, PlanVertex, Reactor, StepRef};
use crate::template::Template;

/// Commit the reactor's pending `steps` queue into the plan graph (§4.3).
pub fn plan(reactor: &mut Reactor) -> Result<(), ReactorError> {
    if reactor.steps.is_empty() {
        return Ok(());
    }

    let pending: Vec<_> = reactor.steps.drain(..).collect();

    let mut seen_in_this_call = HashSet::new();
    for step in &pending {
        if !seen_in_this_call.insert(step.name.clone()) {
            return Err(PlanError::DuplicateStepName(step.name.clone()).into());
        }
    }

    let mut added = Vec::with_capacity(pending.len());
    for step in pending {
        let name = step.name.clone();
        let idx = reactor.plan.add_node(PlanVertex::Step(step));
        // Overwriting an existing name→ref mapping is intentional: it is
        // how dynamic re-injection with a matching name (controlled
        // recursion, §4.1) takes over the prior vertex's identity.
        reactor.name_to_ref.insert(name, idx);
        added.push(idx);
    }

    for idx in &added {
        let arguments = reactor.plan[*idx].as_step().unwrap().arguments.clone();
        let step_name = reactor.plan[*idx].name().to_string();
        for arg in &arguments {
            let Template::ResultRef { name: dep_name, .. } = &arg.source else {
                continue;
            };
            let dep_idx = *reactor
                .name_to_ref
                .get(dep_name)
                .ok_or_else(|| PlanError::UnknownDependency {
                    step: step_name.clone(),
                    depends_on: dep_name.clone(),
                })?;
            if dep_idx == *idx {
                // Self-reference: the dynamic-recursion case. The
                // dependency name resolved to the step we just inserted
                // (it shares a name with, and superseded, the prior
                // vertex), so no edge is added.
                continue;
            }
            reactor.plan.add_edge(
                dep_idx,
                *idx,
                EdgeLabel {
                    argument: arg.name.clone(),
                    for_step: step_name.clone(),
                },
            );
        }
    }

    if petgraph::algo::is_cyclic_directed(&reactor.plan) {
        return Err(PlanError::Cyclic.into());
    }

    Ok(())
}

/// Steps with in-degree zero that are still `Step` vertices (not
/// `Executing` pseudo-vertices) — the ready set for §4.8 step 5.
pub fn ready_steps(reactor: &Reactor) -> Vec<StepRef> {
    reactor
        .plan
        .node_indices()
        .filter(|&idx| {
            matches!(reactor.plan[idx], PlanVertex::Step(_))
                && reactor.plan.neighbors_directed(idx, Direction::Incoming).count() == 0
        })
        .collect()
}
