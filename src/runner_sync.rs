//! Sync Runner (C8): runs one ready step inline on the executor's own
//! task, for steps whose `async_decision` resolves to `false`.
//!
//! Merges the step's outcome through the same folding logic the async
//! runner uses (§4.6), so a sync step and a completed async task are
//! indistinguishable to the rest of the executor loop once applied.

use tracing::debug;

use crate::middleware::{self, Event};
use crate::reactor::{PlanVertex, Reactor, StepRef};
use crate::runner_async::{apply_outcome, Completion};
use crate::step_runner;

/// Run the single ready step named by `step_ref` to completion inline,
/// fold its outcome into `reactor`, and report whether it halted/failed.
pub async fn run_one(reactor: &mut Reactor, step_ref: StepRef) -> StepResult {
    let def = reactor.plan[step_ref]
        .as_step()
        .expect("sync runner given a non-Step vertex")
        .clone();
    let implementation = def.implementation.clone();
    let capabilities = def.capabilities();
    let step_name = def.name.clone();

    if let Some(weight) = reactor.plan.node_weight_mut(step_ref) {
        *weight = PlanVertex::Executing {
            step_name: step_name.clone(),
        };
    }

    debug!(step = %step_name, reactor_id = %reactor.id, "step process start");
    middleware::notify(&reactor.middleware, Event::ProcessStart { step_name: &step_name });

    let snapshot = reactor.snapshot();
    let outcome = step_runner::execute_step(&def, &snapshot).await;

    match apply_outcome(reactor, step_ref, step_name, implementation, capabilities, outcome) {
        Completion::Succeeded => StepResult::Succeeded,
        Completion::Halted => StepResult::Halted,
        Completion::Failed(error) => StepResult::Failed(error),
    }
}

/// Outcome of running one step inline, for the executor loop to act on.
pub enum StepResult {
    Succeeded,
    Halted,
    Failed(crate::error::ReactorError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactorErrors;
    use crate::reactor::ReactorState;
    use crate::step::StepDef;
    use crate::template::{Argument, Template};
    use crate::testing::{AlwaysFail, Greet};
    use std::sync::Arc;

    #[tokio::test]
    async fn run_one_applies_a_successful_sync_step() {
        let mut reactor = Reactor::new();
        reactor.state = ReactorState::Executing;
        let step = StepDef::new("greet", Arc::new(Greet))
            .with_argument(Argument::new("whom", Template::value(serde_json::json!("World"))));
        reactor.steps.push_back(step);
        crate::planner::plan(&mut reactor).unwrap();
        let step_ref = reactor.name_to_ref["greet"];

        match run_one(&mut reactor, step_ref).await {
            StepResult::Succeeded => {}
            _ => panic!("expected success"),
        }
        assert_eq!(reactor.plan.node_count(), 0);
    }

    #[tokio::test]
    async fn run_one_reports_failure_without_panicking() {
        let mut reactor = Reactor::new();
        let step = StepDef::new("boom", Arc::new(AlwaysFail::new("nope")));
        reactor.steps.push_back(step);
        crate::planner::plan(&mut reactor).unwrap();
        let step_ref = reactor.name_to_ref["boom"];

        let mut errors = ReactorErrors::new();
        match run_one(&mut reactor, step_ref).await {
            StepResult::Failed(error) => errors.push(error),
            _ => panic!("expected failure"),
        }
        assert_eq!(errors.len(), 1);
    }
}
