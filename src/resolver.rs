//! Argument Resolver (C5): materializes the argument map for a step from
//! inputs, intermediate results, and literals, applying sub-path access
//! and per-argument/whole-argument transforms.
//!
//! Operates on a `Snapshot` (by-value copy of context + intermediate
//! results) rather than a live `Reactor`, so it can run inside a spawned
//! task without borrowing the reactor the executor loop owns (§5).

use std::collections::HashMap;

use serde_json::Value;

use crate::error::ReactorError;
use crate::reactor::{private_inputs_of, Context, Snapshot};
use crate::step::StepDef;
use crate::template::{apply_sub_path, Argument, Template};

/// Element bindings populated by an enclosing iterator step live under
/// this context key, keyed by element name; the core treats `ElementRef`
/// as an opaque named reference into it.
const ELEMENTS_CONTEXT_KEY: &str = "private.elements";

/// Resolve a single template against a resolution snapshot.
pub fn resolve(template: &Template, snapshot: &Snapshot) -> Result<Value, ReactorError> {
    let base = match template {
        Template::InputRef { name, .. } => private_inputs_of(&snapshot.context)
            .get(name)
            .cloned()
            .ok_or_else(|| ReactorError::MissingInput { name: name.clone() })?,
        Template::ResultRef { name, .. } => snapshot
            .intermediate_results
            .get(name)
            .cloned()
            .ok_or_else(|| ReactorError::MissingResult { name: name.clone() })?,
        Template::ValueRef { value, .. } => value.clone(),
        Template::ElementRef { name, .. } => snapshot
            .context
            .get(ELEMENTS_CONTEXT_KEY)
            .and_then(Value::as_object)
            .and_then(|elements| elements.get(name))
            .cloned()
            .ok_or_else(|| ReactorError::MissingInput { name: name.clone() })?,
    };

    Ok(apply_sub_path(&base, template.sub_path())?)
}

/// Resolve one argument, applying its per-argument transform, and return
/// `None` if the argument is the `"_"` (`wait_for`) sentinel that
/// establishes a dependency without binding a value (§4.2 step 4).
fn resolve_argument(argument: &Argument, snapshot: &Snapshot) -> Result<Option<(String, Value)>, ReactorError> {
    let mut value = resolve(&argument.source, snapshot)?;
    if let Some(transform) = &argument.transform {
        value = transform(value);
    }
    if argument.is_ignored() {
        return Ok(None);
    }
    Ok(Some((argument.name.clone(), value)))
}

/// Build the full argument map for a step, applying the whole-argument
/// transform (§4.7 step 3) if the step declared one.
pub fn build_argument_map(step: &StepDef, snapshot: &Snapshot) -> Result<HashMap<String, Value>, ReactorError> {
    let mut map = HashMap::with_capacity(step.arguments.len());
    for argument in &step.arguments {
        if let Some((name, value)) = resolve_argument(argument, snapshot)? {
            map.insert(name, value);
        }
    }
    if let Some(transform) = &step.transform {
        map = transform(map);
    }
    Ok(map)
}

/// Build the effective per-attempt context: the step's `context_overlay`
/// deep-merged over the reactor context, plus the keys named in §4.7
/// step 2. Kept here alongside `build_argument_map` since both are part
/// of assembling a step's single-attempt inputs from a snapshot.
pub fn effective_context(step: &StepDef, snapshot: &Snapshot, attempt: u32) -> Context {
    let mut context = snapshot.context.clone();
    for (k, v) in &step.context_overlay {
        deep_merge_entry(&mut context, k.clone(), v.clone());
    }
    context.insert("current_step".to_string(), Value::String(step.name.clone()));
    let concurrency_key = match snapshot.concurrency_key {
        Some(key) => Value::String(key.0.to_string()),
        None => Value::Null,
    };
    context.insert("concurrency_key".to_string(), concurrency_key);
    let retries_remaining = match step.max_retries {
        crate::step::MaxRetries::Count(n) => Value::Number((n.saturating_sub(attempt)).into()),
        crate::step::MaxRetries::Infinity => Value::Null,
    };
    context.insert("retries_remaining".to_string(), retries_remaining);
    context.insert("current_try".to_string(), Value::Number(attempt.into()));
    context
}

/// Insert `value` at `key` in `context`, recursively merging if both the
/// existing and incoming values are objects rather than overwriting the
/// existing map wholesale (§4.7 step 2's "deep-merged").
fn deep_merge_entry(context: &mut Context, key: String, value: Value) {
    match context.get_mut(&key) {
        Some(existing @ Value::Object(_)) if value.is_object() => {
            deep_merge_values(existing, value);
        }
        _ => {
            context.insert(key, value);
        }
    }
}

fn deep_merge_values(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Object(existing_map), Value::Object(incoming_map)) => {
            for (k, v) in incoming_map {
                match existing_map.get_mut(&k) {
                    Some(slot @ Value::Object(_)) if v.is_object() => {
                        deep_merge_values(slot, v);
                    }
                    _ => {
                        existing_map.insert(k, v);
                    }
                }
            }
        }
        (slot, incoming) => *slot = incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;

    fn snapshot_with_input(name: &str, value: Value) -> Snapshot {
        let mut reactor = Reactor::new().add_input(name);
        reactor
            .bind_inputs(StdHashMap::from([(name.to_string(), value)]))
            .unwrap();
        reactor.snapshot()
    }

    #[test]
    fn resolve_input_ref_after_binding_yields_bound_value() {
        let snapshot = snapshot_with_input("whom", json!("Dear Reader"));
        let resolved = resolve(&Template::input("whom"), &snapshot).unwrap();
        assert_eq!(resolved, json!("Dear Reader"));
    }

    #[test]
    fn resolve_value_ref_ignores_context() {
        let snapshot = Snapshot::default();
        let resolved = resolve(&Template::value(json!(42)), &snapshot).unwrap();
        assert_eq!(resolved, json!(42));
    }

    #[test]
    fn resolve_result_ref_without_prior_result_is_missing_result_error() {
        let snapshot = Snapshot::default();
        let err = resolve(&Template::result("absent"), &snapshot).unwrap_err();
        assert!(matches!(err, ReactorError::MissingResult { .. }));
    }

    #[test]
    fn wait_for_argument_is_excluded_from_the_built_map() {
        let snapshot = snapshot_with_input("gate", json!(true));
        let step = StepDef::new("s", std::sync::Arc::new(crate::testing::AlwaysFail::new("unused")))
            .with_argument(Argument::wait_for(Template::input("gate")));
        let map = build_argument_map(&step, &snapshot).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn effective_context_carries_concurrency_key_and_attempt_counters() {
        let mut reactor = Reactor::new();
        let guard = crate::pool::allocate_pool(1);
        reactor.concurrency_key = Some(guard.key());
        let snapshot = reactor.snapshot();
        let step = StepDef::new("s", std::sync::Arc::new(crate::testing::AlwaysFail::new("unused")))
            .with_max_retries(crate::step::MaxRetries::Count(3));

        let context = effective_context(&step, &snapshot, 1);
        assert_eq!(context.get("current_step"), Some(&json!("s")));
        assert_eq!(context.get("current_try"), Some(&json!(1)));
        assert_eq!(context.get("retries_remaining"), Some(&json!(2)));
        assert_eq!(context.get("concurrency_key"), Some(&json!(guard.key().0.to_string())));
    }

    #[test]
    fn context_overlay_deep_merges_nested_objects_instead_of_overwriting() {
        let mut reactor = Reactor::new();
        reactor
            .context
            .insert("settings".to_string(), json!({"retries": 3, "nested": {"a": 1, "b": 2}}));
        let snapshot = reactor.snapshot();

        let mut step = StepDef::new("s", std::sync::Arc::new(crate::testing::AlwaysFail::new("unused")));
        step.context_overlay.insert(
            "settings".to_string(),
            json!({"nested": {"b": 20, "c": 3}}),
        );

        let context = effective_context(&step, &snapshot, 0);
        assert_eq!(
            context.get("settings"),
            Some(&json!({"retries": 3, "nested": {"a": 1, "b": 20, "c": 3}}))
        );
    }
}
