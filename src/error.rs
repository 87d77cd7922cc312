//! Error taxonomy for the reactor engine (C12).
//!
//! Leaf errors follow the shape of `mofa_kernel::error::KernelError`: a
//! `thiserror`-derived, `#[non_exhaustive]` enum with one variant per tag.
//! The rollback-time aggregate is a dedicated tree-of-errors value rather
//! than an `error_stack::Report` chain, since rollback collects many
//! independent failures instead of one causal chain.

use std::fmt;

use thiserror::Error;

/// A single tagged failure produced by the core engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReactorError {
    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("missing input '{name}'")]
    MissingInput { name: String },

    #[error("missing result for step '{name}'")]
    MissingResult { name: String },

    #[error("argument subpath error: {0}")]
    ArgumentSubpath(#[from] ArgumentSubpathError),

    #[error("step '{step_name}' failed: {reason}")]
    RunStep { step_name: String, reason: String },

    #[error("compensation for step '{step_name}' failed: {reason}")]
    CompensateStep { step_name: String, reason: String },

    #[error("undo for step '{step_name}' failed: {reason}")]
    UndoStep { step_name: String, reason: String },

    #[error("undo for step '{step_name}' exceeded retry budget ({attempts} attempts)")]
    UndoRetriesExceeded { step_name: String, attempts: u32 },

    #[error("step '{step_name}' exceeded retry budget: retries={retry_count}, last reason: {reason}")]
    RetriesExceeded {
        step_name: String,
        retry_count: u32,
        reason: String,
    },

    #[error("step '{step_name}' forced failure: {message}")]
    ForcedFailure { step_name: String, message: String },

    #[error("could not compose nested reactor: {0}")]
    Compose(String),

    #[error("no result recorded for declared return step '{0}'")]
    MissingReturn(String),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// Marker `error_stack` wraps when an `Invariant` is raised, giving the
/// violation a causal-chain attachment (location, message) the same way
/// the teacher wraps `KernelError`'s "unreachable" cases — even though
/// the public rollback aggregate keeps the flat `Vec<ReactorError>` shape
/// (§10.2: rollback collects many independent failures, not one chain).
#[derive(Debug, Error)]
#[error("internal invariant violated")]
struct InvariantMarker;

impl ReactorError {
    /// Construct an `Invariant` error, reporting it through an
    /// `error_stack::Report` (captured and logged here) before flattening
    /// it into the aggregate's plain `String` payload.
    pub fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        let report = error_stack::Report::new(InvariantMarker).attach_printable(message.clone());
        tracing::error!(%report, "invariant violated");
        ReactorError::Invariant(message)
    }
}

/// Failures raised while folding pending steps into the plan graph (C4).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlanError {
    #[error("duplicate step name '{0}' in a single plan call")]
    DuplicateStepName(String),

    #[error("step '{step}' depends on unknown step '{depends_on}'")]
    UnknownDependency { step: String, depends_on: String },

    #[error("plan would contain a cycle")]
    Cyclic,
}

/// A sub-path traversal failure (C1), naming the full path and offending key.
#[derive(Debug, Error)]
#[error("value at path {path:?} is neither map nor keyword-list (offending key: {key})")]
pub struct ArgumentSubpathError {
    pub path: Vec<String>,
    pub key: String,
}

impl ArgumentSubpathError {
    pub fn not_a_container(path: &[String], key: &str) -> Self {
        Self {
            path: path.to_vec(),
            key: key.to_string(),
        }
    }

    pub fn key_not_found(path: &[String], key: &str) -> Self {
        Self {
            path: path.to_vec(),
            key: key.to_string(),
        }
    }
}

/// A tree-of-errors aggregate collected during non-aborting rollback walks.
///
/// Exposes iteration over contained errors and a pretty-printed `Display`,
/// per the §7 requirement, without forcing a single-chain model onto
/// independent, non-aborting failures.
#[derive(Debug, Default)]
pub struct ReactorErrors {
    errors: Vec<ReactorError>,
}

impl ReactorErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ReactorError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReactorError> {
        self.errors.iter()
    }

    pub fn into_vec(self) -> Vec<ReactorError> {
        self.errors
    }
}

impl fmt::Display for ReactorErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "- {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ReactorErrors {}

impl From<ReactorError> for ReactorErrors {
    fn from(error: ReactorError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl FromIterator<ReactorError> for ReactorErrors {
    fn from_iter<I: IntoIterator<Item = ReactorError>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

pub type ReactorResult<T> = Result<T, ReactorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_pretty_prints_one_error_per_line() {
        let mut agg = ReactorErrors::new();
        agg.push(ReactorError::MissingInput {
            name: "whom".into(),
        });
        agg.push(ReactorError::ForcedFailure {
            step_name: "fail".into(),
            message: "I fail".into(),
        });
        let rendered = agg.to_string();
        assert_eq!(rendered.lines().count(), 2);
        assert!(rendered.contains("whom"));
        assert!(rendered.contains("I fail"));
    }

    #[test]
    fn aggregate_iterates_in_insertion_order() {
        let mut agg = ReactorErrors::new();
        agg.push(ReactorError::MissingInput { name: "a".into() });
        agg.push(ReactorError::MissingInput { name: "b".into() });
        let names: Vec<_> = agg
            .iter()
            .map(|e| match e {
                ReactorError::MissingInput { name } => name.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
