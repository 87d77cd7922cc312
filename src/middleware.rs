//! Middleware Hooks (C11): an ordered list of event-fanout adapters.
//!
//! Grounded on `mofa_kernel::workflow::graph::StreamEvent` for the
//! `#[non_exhaustive]` event-enum convention, and on §9's Design Notes
//! ("an ordered list of handler objects; event dispatch is a simple fold;
//! no global registries").

use serde_json::Value;

use crate::error::ReactorError;
use crate::reactor::Context;

/// A lifecycle event fanned out to every installed middleware, in order.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Event<'a> {
    Init,
    Complete { value: &'a Value },
    Error { error: &'a ReactorError },
    Halt,
    StepRunStart { step_name: &'a str },
    StepRunComplete { step_name: &'a str },
    StepRunError { step_name: &'a str, error: &'a str },
    StepRunRetry { step_name: &'a str, attempt: u32 },
    StepRunHalt { step_name: &'a str },
    StepCompensateStart { step_name: &'a str },
    StepCompensateStop { step_name: &'a str },
    StepUndoStart { step_name: &'a str },
    StepUndoStop { step_name: &'a str },
    ProcessStart { step_name: &'a str },
    ProcessTerminate { step_name: &'a str },
}

/// A pluggable side-effect adapter. `on_init`/`on_halt` may mutate the
/// context; `on_complete` may replace the terminal value; `on_error` may
/// replace the error. All other events are purely observational.
pub trait Middleware: Send + Sync {
    fn on_init(&self, context: Context) -> Context {
        context
    }

    fn on_halt(&self, context: Context) -> Context {
        context
    }

    fn on_complete(&self, value: Value) -> Value {
        value
    }

    fn on_error(&self, error: ReactorError) -> ReactorError {
        error
    }

    /// Observational hook for every event, including the mutating ones
    /// above (so a middleware can log `Init`/`Complete`/`Error`/`Halt`
    /// without overriding the mutating methods).
    fn on_event(&self, _event: &Event<'_>) {}
}

/// Fan `event` out to every middleware in order.
pub fn notify(middleware: &[std::sync::Arc<dyn Middleware>], event: Event<'_>) {
    for mw in middleware {
        mw.on_event(&event);
    }
}

/// Fold `on_init` across every middleware, each seeing the prior one's output.
pub fn fold_init(middleware: &[std::sync::Arc<dyn Middleware>], mut context: Context) -> Context {
    for mw in middleware {
        context = mw.on_init(context);
    }
    context
}

pub fn fold_halt(middleware: &[std::sync::Arc<dyn Middleware>], mut context: Context) -> Context {
    for mw in middleware {
        context = mw.on_halt(context);
    }
    context
}

pub fn fold_complete(middleware: &[std::sync::Arc<dyn Middleware>], mut value: Value) -> Value {
    for mw in middleware {
        value = mw.on_complete(value);
    }
    value
}

pub fn fold_error(middleware: &[std::sync::Arc<dyn Middleware>], mut error: ReactorError) -> ReactorError {
    for mw in middleware {
        error = mw.on_error(error);
    }
    error
}

/// A middleware built from plain closures, for the Builder API's
/// `on_init`/`on_error`/`on_halt`/`on_complete` convenience constructors
/// (§6) rather than requiring callers to implement the trait by hand.
pub struct ClosureMiddleware {
    pub init: Option<Box<dyn Fn(Context) -> Context + Send + Sync>>,
    pub halt: Option<Box<dyn Fn(Context) -> Context + Send + Sync>>,
    pub complete: Option<Box<dyn Fn(Value) -> Value + Send + Sync>>,
    pub error: Option<Box<dyn Fn(ReactorError) -> ReactorError + Send + Sync>>,
}

impl Middleware for ClosureMiddleware {
    fn on_init(&self, context: Context) -> Context {
        self.init.as_ref().map_or(context.clone(), |f| f(context))
    }

    fn on_halt(&self, context: Context) -> Context {
        self.halt.as_ref().map_or(context.clone(), |f| f(context))
    }

    fn on_complete(&self, value: Value) -> Value {
        self.complete.as_ref().map_or(value.clone(), |f| f(value))
    }

    fn on_error(&self, error: ReactorError) -> ReactorError {
        match &self.error {
            Some(f) => f(error),
            None => error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(std::sync::Mutex<Vec<String>>);

    impl Middleware for Recorder {
        fn on_event(&self, event: &Event<'_>) {
            self.0.lock().unwrap().push(format!("{event:?}"));
        }
    }

    #[test]
    fn events_fan_out_in_order() {
        let recorder = std::sync::Arc::new(Recorder(std::sync::Mutex::new(Vec::new())));
        let middleware: Vec<std::sync::Arc<dyn Middleware>> = vec![recorder.clone()];
        notify(&middleware, Event::Init);
        notify(&middleware, Event::Halt);
        assert_eq!(recorder.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn closure_middleware_mutates_context_on_init() {
        let mw: std::sync::Arc<dyn Middleware> = std::sync::Arc::new(ClosureMiddleware {
            init: Some(Box::new(|mut ctx: Context| {
                ctx.insert("touched".to_string(), Value::Bool(true));
                ctx
            })),
            halt: None,
            complete: None,
            error: None,
        });
        let ctx = fold_init(std::slice::from_ref(&mw), Context::new());
        assert_eq!(ctx.get("touched"), Some(&Value::Bool(true)));
    }
}
