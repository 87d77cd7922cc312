//! Step contract (C2): the polymorphic unit of work.
//!
//! Modeled as a trait with a required `run` and default (no-op) `compensate`/
//! `undo`/`backoff` implementations, paired with an explicit
//! `capabilities()` table lookup — the Rust equivalent of the source's
//! load-time capability query, since Rust has no runtime reflection over
//! "was this method overridden".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::reactor::Context;
use crate::template::{Argument, MapTransform};

/// Outcome of a step's `run`.
#[derive(Debug, Clone)]
pub enum RunResult {
    /// The step succeeded.
    Ok(Value),
    /// The step succeeded and injects further steps to be planned into the
    /// graph on the next iteration.
    OkWithSteps(Value, Vec<StepDef>),
    /// Re-enqueue the step; `reason` (if any) is held for the final error
    /// if retries are exhausted.
    Retry(Option<String>),
    /// Cooperatively pause the reactor; `value` is recorded as this step's
    /// intermediate result.
    Halt(Value),
    /// Failure; the engine consults `compensate` next.
    Err(String),
}

/// Outcome of a step's `compensate`.
#[derive(Debug, Clone)]
pub enum CompensateResult {
    /// Treat compensation as if the step had returned `Ok(value)`.
    Continue(Value),
    /// Re-enqueue the step.
    Retry(Option<String>),
    /// Compensation acknowledged; the original error surfaces and rollback begins.
    Ok,
    /// Compensation itself failed; this error supersedes the original.
    Err(String),
}

/// Outcome of a step's `undo`.
#[derive(Debug, Clone)]
pub enum UndoResult {
    Ok,
    Retry(Option<String>),
    Err(String),
}

/// Capability table for a step implementation, discovered once at
/// construction rather than probed at call time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepCapabilities {
    pub compensate: bool,
    pub undo: bool,
    pub backoff: bool,
}

/// The contract a step implementation must satisfy (§4.1).
#[async_trait]
pub trait Step: Send + Sync {
    /// Capability table; override alongside overriding the corresponding
    /// method so the engine can skip work (e.g. skip undo-stack pushes)
    /// for steps that don't need it.
    fn capabilities(&self) -> StepCapabilities {
        StepCapabilities::default()
    }

    async fn run(&self, arguments: &HashMap<String, Value>, context: &Context) -> RunResult;

    async fn compensate(
        &self,
        _error: &str,
        _arguments: &HashMap<String, Value>,
        _context: &Context,
    ) -> CompensateResult {
        CompensateResult::Ok
    }

    async fn undo(
        &self,
        _value: &Value,
        _arguments: &HashMap<String, Value>,
        _context: &Context,
    ) -> UndoResult {
        UndoResult::Ok
    }

    async fn backoff(
        &self,
        _attempt_no: u32,
        _error_or_value: &Value,
        _arguments: &HashMap<String, Value>,
        _context: &Context,
    ) -> Option<Duration> {
        None
    }

    /// Permits dynamic async/sync decisions based on `options`. The default
    /// honors the step definition's declared `async_flag`.
    fn async_decision(&self, step: &StepDef) -> bool {
        match &step.async_flag {
            AsyncFlag::Fixed(b) => *b,
            AsyncFlag::Predicate(p) => p(&step.context_overlay),
        }
    }
}

/// Whether a step runs async: a fixed flag, or a predicate evaluated
/// against the step's `options` (here represented as its context overlay).
#[derive(Clone)]
pub enum AsyncFlag {
    Fixed(bool),
    Predicate(Arc<dyn Fn(&HashMap<String, Value>) -> bool + Send + Sync>),
}

impl std::fmt::Debug for AsyncFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AsyncFlag::Fixed(b) => write!(f, "AsyncFlag::Fixed({b})"),
            AsyncFlag::Predicate(_) => write!(f, "AsyncFlag::Predicate(<fn>)"),
        }
    }
}

/// Non-negative retry budget, or unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxRetries {
    Count(u32),
    Infinity,
}

impl MaxRetries {
    pub fn exceeded(&self, attempts: u32) -> bool {
        match self {
            MaxRetries::Count(n) => attempts >= *n,
            MaxRetries::Infinity => false,
        }
    }
}

/// A step definition, exclusively owned by the Reactor value's pending
/// `steps` queue until planned, at which point the planner assigns it a
/// `petgraph::NodeIndex` as its vertex identity (the `ref` of §3).
#[derive(Clone)]
pub struct StepDef {
    pub name: String,
    pub arguments: Vec<Argument>,
    pub implementation: Arc<dyn Step>,
    pub async_flag: AsyncFlag,
    pub max_retries: MaxRetries,
    pub context_overlay: HashMap<String, Value>,
    pub transform: Option<MapTransform>,
}

impl std::fmt::Debug for StepDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDef")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .field("async_flag", &self.async_flag)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl StepDef {
    pub fn new(name: impl Into<String>, implementation: Arc<dyn Step>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
            implementation,
            async_flag: AsyncFlag::Fixed(false),
            max_retries: MaxRetries::Count(0),
            context_overlay: HashMap::new(),
            transform: None,
        }
    }

    pub fn with_argument(mut self, argument: Argument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn with_arguments(mut self, arguments: Vec<Argument>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_async(mut self, is_async: bool) -> Self {
        self.async_flag = AsyncFlag::Fixed(is_async);
        self
    }

    pub fn with_max_retries(mut self, max_retries: MaxRetries) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_async(&self) -> bool {
        self.implementation.async_decision(self)
    }

    pub fn capabilities(&self) -> StepCapabilities {
        self.implementation.capabilities()
    }
}
