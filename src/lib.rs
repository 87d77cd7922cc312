//! Reactor: a concurrent, dependency-resolving saga orchestrator.
//!
//! A caller declares a workflow as named inputs and named steps; each step
//! declares its argument dependencies (by input name, by another step's
//! result, or by a literal). The engine plans the steps as a DAG, runs
//! ready steps as concurrently as the pool allows, and — on an
//! unrecoverable failure — unwinds already-successful work via per-step
//! compensation and undo (the Sagas pattern).
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use reactor::{executor, step::{RunResult, Step, StepDef}, template::{Argument, Template}, Reactor};
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use std::collections::HashMap;
//!
//! struct Greet;
//!
//! #[async_trait]
//! impl Step for Greet {
//!     async fn run(&self, arguments: &HashMap<String, Value>, _context: &reactor::Context) -> RunResult {
//!         let whom = arguments.get("whom").and_then(Value::as_str).unwrap_or_default();
//!         RunResult::Ok(json!(whom.to_uppercase()))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let reactor = Reactor::new()
//!     .add_input("whom")
//!     .add_step(StepDef::new("greet", Arc::new(Greet)).with_argument(Argument::new("whom", Template::input("whom"))))
//!     .set_return("greet");
//! let inputs = HashMap::from([("whom".to_string(), json!("Dear Reader"))]);
//! match executor::run(reactor, inputs, executor::RunOptions::default()).await {
//!     executor::Outcome::Ok(value) => println!("{value}"),
//!     executor::Outcome::Halted(_) => println!("halted"),
//!     executor::Outcome::Err(errors) => eprintln!("{errors}"),
//! }
//! # }
//! ```

pub mod error;
pub mod template;
pub mod step;
pub mod reactor;
pub mod planner;
pub mod resolver;
pub mod pool;
pub mod middleware;
pub mod runner_async;
pub mod runner_sync;
pub mod step_runner;
pub mod executor;

#[cfg(feature = "config")]
pub mod config;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{ReactorError, ReactorErrors, ReactorResult};
pub use executor::{run, Outcome, RunOptions};
pub use reactor::{Context, Reactor};
pub use step::{CompensateResult, RunResult, Step, StepDef, UndoResult};
pub use template::{Argument, Template};

/// Install a `tracing-subscriber` `fmt` layer with `EnvFilter` for
/// binaries and tests that want one-line setup. The library itself never
/// installs a global subscriber on its own; callers decide whether to
/// invoke this, wire their own, or leave tracing unconfigured.
#[cfg(feature = "tracing-init")]
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
