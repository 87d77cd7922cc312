//! End-to-end scenarios (§8): the six literal behaviors the engine must
//! exhibit, run through the public `reactor::executor::run` entry point
//! exactly as an embedding binary would call it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use reactor::executor::{self, Outcome, RunOptions};
use reactor::step::{MaxRetries, RunResult, Step, StepDef};
use reactor::template::{Argument, Template};
use reactor::testing::{AlwaysFail, AtomToString, CountDown, Greet, UndoableAdd, Upcase};
use reactor::Context;
use reactor::Reactor;

#[tokio::test]
async fn linear_scenario_greets_uppercased() {
    let reactor = Reactor::new()
        .add_input("whom")
        .add_step(StepDef::new("greet", Arc::new(Greet)).with_argument(Argument::new("whom", Template::input("whom"))))
        .set_return("greet");

    let inputs = HashMap::from([("whom".to_string(), json!("Dear Reader"))]);
    match executor::run(reactor, inputs, RunOptions::default()).await {
        Outcome::Ok(value) => assert_eq!(value, json!("DEAR READER")),
        _ => panic!("expected Ok"),
    }
}

/// A step that sleeps for a fixed duration before returning its name.
struct SleepyEcho {
    millis: u64,
}

#[async_trait]
impl Step for SleepyEcho {
    async fn run(&self, arguments: &HashMap<String, Value>, _context: &Context) -> RunResult {
        tokio::time::sleep(Duration::from_millis(self.millis)).await;
        RunResult::Ok(arguments.get("upstream").cloned().unwrap_or(Value::Null))
    }
}

#[tokio::test]
async fn diamond_scenario_runs_concurrent_siblings_within_budget() {
    let reactor = Reactor::new()
        .add_step(StepDef::new("a", Arc::new(SleepyEcho { millis: 0 })))
        .add_step(
            StepDef::new("b", Arc::new(SleepyEcho { millis: 100 }))
                .with_async(true)
                .with_argument(Argument::new("upstream", Template::result("a"))),
        )
        .add_step(
            StepDef::new("c", Arc::new(SleepyEcho { millis: 100 }))
                .with_async(true)
                .with_argument(Argument::new("upstream", Template::result("a"))),
        )
        .add_step(
            StepDef::new("d", Arc::new(SleepyEcho { millis: 0 }))
                .with_argument(Argument::wait_for(Template::result("b")))
                .with_argument(Argument::new("upstream", Template::result("c"))),
        )
        .set_return("d");

    let options = RunOptions {
        max_concurrency: 2,
        ..RunOptions::default()
    };

    let started = Instant::now();
    match executor::run(reactor, HashMap::new(), options).await {
        Outcome::Ok(_) => {}
        _ => panic!("expected Ok"),
    }
    assert!(started.elapsed() <= Duration::from_millis(250), "siblings should overlap");
}

#[tokio::test]
async fn halt_and_resume_scenario() {
    let reactor = Reactor::new()
        .add_step(StepDef::new("atom_to_string", Arc::new(AtomToString)))
        .add_step(
            StepDef::new("upcase", Arc::new(Upcase))
                .with_argument(Argument::new("value", Template::result("atom_to_string"))),
        )
        .set_return("upcase");

    let halted = match executor::run(reactor, HashMap::new(), RunOptions::default()).await {
        Outcome::Halted(reactor) => *reactor,
        _ => panic!("expected Halted on first run"),
    };

    match executor::run(halted, HashMap::new(), RunOptions::default()).await {
        Outcome::Ok(value) => assert_eq!(value, json!("MARTY")),
        _ => panic!("expected Ok on resume"),
    }
}

#[tokio::test]
async fn saga_rollback_scenario_undoes_every_successful_step() {
    let set = Arc::new(Mutex::new(std::collections::HashSet::new()));
    let reactor = Reactor::new()
        .add_step(StepDef::new("add1", Arc::new(UndoableAdd::new(set.clone(), 1))))
        .add_step(
            StepDef::new("add2", Arc::new(UndoableAdd::new(set.clone(), 2)))
                .with_argument(Argument::wait_for(Template::result("add1"))),
        )
        .add_step(
            StepDef::new("add3", Arc::new(UndoableAdd::new(set.clone(), 3)))
                .with_argument(Argument::wait_for(Template::result("add2"))),
        )
        .add_step(
            StepDef::new("add4_fails", Arc::new(AlwaysFail::new("I fail")))
                .with_argument(Argument::wait_for(Template::result("add3"))),
        )
        .set_return("add4_fails");

    match executor::run(reactor, HashMap::new(), RunOptions::default()).await {
        Outcome::Err(errors) => {
            assert!(errors.iter().any(|e| e.to_string().contains("I fail")));
        }
        _ => panic!("expected Err"),
    }
    assert!(set.lock().unwrap().is_empty());
}

#[tokio::test]
async fn dynamic_injection_scenario_counts_down_to_zero() {
    let reactor = Reactor::new()
        .add_step(StepDef::new("count_down", Arc::new(CountDown)).with_argument(Argument::new(
            "from",
            Template::value(json!(7)),
        )))
        .set_return("count_down");

    match executor::run(reactor, HashMap::new(), RunOptions::default()).await {
        Outcome::Ok(value) => assert_eq!(value, json!([7, 6, 5, 4, 3, 2, 1, 0])),
        _ => panic!("expected Ok"),
    }
}

#[tokio::test]
async fn retry_exhaustion_scenario_reports_retry_count() {
    let reactor = Reactor::new()
        .add_step(
            StepDef::new("flaky", Arc::new(AlwaysFail::retry("net")))
                .with_max_retries(MaxRetries::Count(2)),
        )
        .set_return("flaky");

    match executor::run(reactor, HashMap::new(), RunOptions::default()).await {
        Outcome::Err(errors) => {
            let found = errors.iter().any(|e| matches!(
                e,
                reactor::ReactorError::RetriesExceeded { retry_count, .. } if *retry_count == 2
            ));
            assert!(found, "expected a RetriesExceeded error with retry_count == 2");
        }
        _ => panic!("expected Err"),
    }
}
