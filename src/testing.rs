//! Test-only fixture steps (C15, §10.4) used by the unit tests alongside
//! each module and by the top-level `tests/` end-to-end scenarios.
//!
//! Grounded on the teacher's convention of shipping dedicated test-fixture
//! crates (`mofa-cli`'s test fixtures) rather than ad-hoc inline mocks, and
//! on `mofa_foundation::workflow::node`'s in-module `#[cfg(test)]`
//! fixtures.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::reactor::Context;
use crate::step::{CompensateResult, RunResult, Step, StepCapabilities, StepDef, UndoResult};
use crate::template::{Argument, Template};

/// Scenario 1 (Linear): uppercases its `whom` argument.
pub struct Greet;

#[async_trait]
impl Step for Greet {
    async fn run(&self, arguments: &HashMap<String, Value>, _context: &Context) -> RunResult {
        let whom = arguments.get("whom").and_then(Value::as_str).unwrap_or_default();
        RunResult::Ok(json!(whom.to_uppercase()))
    }
}

/// Scenario 3 (Halt & resume): always halts with a fixed value.
pub struct AtomToString;

#[async_trait]
impl Step for AtomToString {
    async fn run(&self, _arguments: &HashMap<String, Value>, _context: &Context) -> RunResult {
        RunResult::Halt(json!("marty"))
    }
}

/// Scenario 3 (Halt & resume): uppercases its `value` argument.
pub struct Upcase;

#[async_trait]
impl Step for Upcase {
    async fn run(&self, arguments: &HashMap<String, Value>, _context: &Context) -> RunResult {
        let value = arguments.get("value").and_then(Value::as_str).unwrap_or_default();
        RunResult::Ok(json!(value.to_uppercase()))
    }
}

/// Scenario 5 (Dynamic injection): counts down to zero, re-injecting
/// itself under the same name with the decremented value and the
/// countdown so far; its `run` value *is* the accumulated list
/// (`[7]`, then `[7, 6]`, ...), so the reactor's real output is the full
/// countdown rather than a side-channel the engine never sees.
pub struct CountDown;

#[async_trait]
impl Step for CountDown {
    async fn run(&self, arguments: &HashMap<String, Value>, _context: &Context) -> RunResult {
        let from = arguments.get("from").and_then(Value::as_i64).unwrap_or(0);
        let mut acc: Vec<i64> = arguments
            .get("acc")
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();
        acc.push(from);

        if from <= 0 {
            RunResult::Ok(json!(acc))
        } else {
            let next = StepDef::new("count_down", Arc::new(CountDown))
                .with_argument(Argument::new("from", Template::value(json!(from - 1))))
                .with_argument(Argument::new("acc", Template::value(json!(acc.clone()))));
            RunResult::OkWithSteps(json!(acc), vec![next])
        }
    }
}

/// Scenarios 4 and 6: a step that either always fails outright, or
/// always asks for a retry, depending on how it's constructed.
pub struct AlwaysFail {
    mode: AlwaysFailMode,
}

enum AlwaysFailMode {
    Err(String),
    Retry(String),
}

impl AlwaysFail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            mode: AlwaysFailMode::Err(message.into()),
        }
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        Self {
            mode: AlwaysFailMode::Retry(reason.into()),
        }
    }
}

#[async_trait]
impl Step for AlwaysFail {
    async fn run(&self, _arguments: &HashMap<String, Value>, _context: &Context) -> RunResult {
        match &self.mode {
            AlwaysFailMode::Err(message) => RunResult::Err(message.clone()),
            AlwaysFailMode::Retry(reason) => RunResult::Retry(Some(reason.clone())),
        }
    }

    async fn compensate(
        &self,
        error: &str,
        _arguments: &HashMap<String, Value>,
        _context: &Context,
    ) -> CompensateResult {
        // No compensation offered; surface the original error and begin rollback.
        let _ = error;
        CompensateResult::Ok
    }
}

/// Scenario 4 (Saga rollback): adds `item` to a shared set on success,
/// removes it on undo.
pub struct UndoableAdd {
    set: Arc<Mutex<HashSet<i64>>>,
    item: i64,
}

impl UndoableAdd {
    pub fn new(set: Arc<Mutex<HashSet<i64>>>, item: i64) -> Self {
        Self { set, item }
    }
}

#[async_trait]
impl Step for UndoableAdd {
    fn capabilities(&self) -> StepCapabilities {
        StepCapabilities {
            undo: true,
            ..Default::default()
        }
    }

    async fn run(&self, _arguments: &HashMap<String, Value>, _context: &Context) -> RunResult {
        self.set.lock().unwrap().insert(self.item);
        RunResult::Ok(json!(self.item))
    }

    async fn undo(&self, value: &Value, _arguments: &HashMap<String, Value>, _context: &Context) -> UndoResult {
        if let Some(item) = value.as_i64() {
            self.set.lock().unwrap().remove(&item);
        }
        UndoResult::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn greet_uppercases_whom() {
        let args = HashMap::from([("whom".to_string(), json!("Dear Reader"))]);
        match Greet.run(&args, &Context::new()).await {
            RunResult::Ok(value) => assert_eq!(value, json!("DEAR READER")),
            _ => panic!("expected Ok"),
        }
    }

    #[tokio::test]
    async fn undoable_add_round_trips_through_undo() {
        let set = Arc::new(Mutex::new(HashSet::new()));
        let step = UndoableAdd::new(set.clone(), 7);
        step.run(&HashMap::new(), &Context::new()).await;
        assert!(set.lock().unwrap().contains(&7));
        step.undo(&json!(7), &HashMap::new(), &Context::new()).await;
        assert!(!set.lock().unwrap().contains(&7));
    }
}
