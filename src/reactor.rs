//! Reactor value (C3): immutable-by-convention snapshot of inputs, pending
//! steps, planned DAG, intermediate results, undo stack, and lifecycle
//! state.
//!
//! The plan graph uses `petgraph::stable_graph::StableDiGraph` with
//! `NodeIndex` as the opaque vertex identity (the arena pattern of
//! SPEC_FULL.md §9's Design Notes) — the stable variant is required (not
//! plain `Graph`) because removing a completed step's vertex must not
//! invalidate the `NodeIndex` stored elsewhere (`name_to_ref`, undo-stack
//! entries). Grounded on
//! `mofa_foundation::workflow::graph::WorkflowGraph`'s "owns nodes +
//! adjacency, mutated incrementally" shape.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use serde_json::Value;
use uuid::Uuid;

use crate::middleware::Middleware;
use crate::pool::PoolKey;
use crate::step::StepDef;

pub type Context = HashMap<String, Value>;

/// Opaque vertex identifier for a planned step — the `ref` of §3.
pub type StepRef = NodeIndex;

/// A vertex in the plan graph: either a step awaiting execution, or a
/// pseudo-vertex representing a currently-running async task (so
/// completion cleanup stays graph-coherent per §4.5 step 3).
#[derive(Debug, Clone)]
pub enum PlanVertex {
    Step(StepDef),
    Executing { step_name: String },
}

impl PlanVertex {
    pub fn name(&self) -> &str {
        match self {
            PlanVertex::Step(def) => &def.name,
            PlanVertex::Executing { step_name } => step_name,
        }
    }

    pub fn as_step(&self) -> Option<&StepDef> {
        match self {
            PlanVertex::Step(def) => Some(def),
            PlanVertex::Executing { .. } => None,
        }
    }
}

/// Edge label: which argument of which step this dependency satisfies.
#[derive(Debug, Clone)]
pub struct EdgeLabel {
    pub argument: String,
    pub for_step: String,
}

/// Reactor lifecycle state (§4.8 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorState {
    Pending,
    Executing,
    Halted,
    Failed,
    Successful,
}

/// An entry on the undo stack: the step ref/name, the value it produced,
/// and enough of its execution snapshot (implementation + resolved
/// arguments) to invoke `undo` after the vertex itself has been removed
/// from the plan graph.
#[derive(Clone)]
pub struct UndoEntry {
    pub step_ref: StepRef,
    pub step_name: String,
    pub value: Value,
    pub implementation: std::sync::Arc<dyn crate::step::Step>,
    pub arguments: HashMap<String, Value>,
}

impl std::fmt::Debug for UndoEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoEntry")
            .field("step_ref", &self.step_ref)
            .field("step_name", &self.step_name)
            .field("value", &self.value)
            .finish()
    }
}

/// The orchestrator value.
pub struct Reactor {
    pub id: Uuid,
    pub inputs: HashSet<String>,
    pub context: Context,
    pub steps: VecDeque<StepDef>,
    pub plan: StableDiGraph<PlanVertex, EdgeLabel>,
    pub name_to_ref: HashMap<String, StepRef>,
    pub intermediate_results: HashMap<String, Value>,
    pub undo: Vec<UndoEntry>,
    pub return_step: Option<String>,
    pub state: ReactorState,
    pub middleware: Vec<std::sync::Arc<dyn Middleware>>,
    pub concurrency_key: Option<PoolKey>,
}

impl Reactor {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            inputs: HashSet::new(),
            context: Context::new(),
            steps: VecDeque::new(),
            plan: StableDiGraph::new(),
            name_to_ref: HashMap::new(),
            intermediate_results: HashMap::new(),
            undo: Vec::new(),
            return_step: None,
            state: ReactorState::Pending,
            middleware: Vec::new(),
            concurrency_key: None,
        }
    }

    // ---- Builder API (§6) — pure constructors over Reactor values ----

    pub fn add_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.insert(name.into());
        self
    }

    pub fn add_step(mut self, step: StepDef) -> Self {
        self.steps.push_back(step);
        self
    }

    pub fn add_middleware(mut self, middleware: std::sync::Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn set_return(mut self, step_name: impl Into<String>) -> Self {
        self.return_step = Some(step_name.into());
        self
    }

    /// Bind the resolved input values into `context.private.inputs` (§3).
    pub fn bind_inputs(&mut self, inputs: HashMap<String, Value>) -> Result<(), crate::error::ReactorError> {
        for name in &self.inputs {
            if !inputs.contains_key(name) {
                return Err(crate::error::ReactorError::MissingInput { name: name.clone() });
            }
        }
        self.context
            .insert("private.inputs".to_string(), Value::Object(inputs.into_iter().collect()));
        Ok(())
    }

    pub fn private_inputs(&self) -> &serde_json::Map<String, Value> {
        private_inputs_of(&self.context)
    }

    /// A by-value snapshot of the pieces of reactor state needed to
    /// resolve arguments (§5: "a worker accesses its own step's resolved
    /// arguments... passed by value/snapshot"). Spawned async tasks take
    /// one of these rather than a reference into the live `Reactor`, since
    /// the executor loop retains exclusive ownership of the reactor value
    /// while tasks run. Cloning `middleware` is cheap: it clones the `Arc`
    /// handles, not the middleware objects themselves.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            context: self.context.clone(),
            intermediate_results: self.intermediate_results.clone(),
            middleware: self.middleware.clone(),
            concurrency_key: self.concurrency_key,
            reactor_id: self.id,
        }
    }

    /// Compose a nested reactor's definition into this one, returning a
    /// `ComposeError` if the nested reactor's id has already been composed
    /// in the current chain (recursion without an explicit recurse step).
    pub fn compose(mut self, other: Reactor, seen: &mut HashSet<Uuid>) -> Result<Self, crate::error::ReactorError> {
        if !seen.insert(other.id) {
            return Err(crate::error::ReactorError::Compose(
                "recursive composition detected".to_string(),
            ));
        }
        for step in other.steps {
            self.steps.push_back(step);
        }
        Ok(self)
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of the state a detached step needs: the context
/// (including `private.inputs`), the intermediate results map, the
/// installed middleware (for per-attempt event fanout from inside a
/// spawned task, §4.9), the pool key (§4.7 step 2's `concurrency_key`
/// context entry), and the owning reactor's id (for log correlation).
/// Cloned at dispatch time and moved into a task by value.
#[derive(Clone, Default)]
pub struct Snapshot {
    pub context: Context,
    pub intermediate_results: HashMap<String, Value>,
    pub middleware: Vec<std::sync::Arc<dyn Middleware>>,
    pub concurrency_key: Option<PoolKey>,
    pub reactor_id: Uuid,
}

pub fn private_inputs_of(context: &Context) -> &serde_json::Map<String, Value> {
    static EMPTY: once_cell::sync::Lazy<serde_json::Map<String, Value>> =
        once_cell::sync::Lazy::new(serde_json::Map::new);
    context
        .get("private.inputs")
        .and_then(Value::as_object)
        .unwrap_or(&EMPTY)
}
