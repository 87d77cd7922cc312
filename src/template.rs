//! Templates & Arguments (C1): descriptors for where a step's argument
//! value comes from, plus sub-path access over map-like/keyword-list-like
//! containers and transform application.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::ArgumentSubpathError;

/// Where an argument's value comes from.
#[derive(Debug, Clone)]
pub enum Template {
    /// Value of a named reactor input.
    InputRef { name: String, sub_path: Vec<String> },
    /// Value produced by a named step.
    ResultRef { name: String, sub_path: Vec<String> },
    /// A literal embedded at author time.
    ValueRef { value: Value, sub_path: Vec<String> },
    /// Current element while iterating; the core treats this as an opaque
    /// named reference resolved out of the context's element bindings.
    ElementRef { name: String, sub_path: Vec<String> },
}

impl Template {
    pub fn input(name: impl Into<String>) -> Self {
        Template::InputRef {
            name: name.into(),
            sub_path: Vec::new(),
        }
    }

    pub fn result(name: impl Into<String>) -> Self {
        Template::ResultRef {
            name: name.into(),
            sub_path: Vec::new(),
        }
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Template::ValueRef {
            value: value.into(),
            sub_path: Vec::new(),
        }
    }

    pub fn with_sub_path(mut self, sub_path: Vec<String>) -> Self {
        match &mut self {
            Template::InputRef { sub_path: p, .. }
            | Template::ResultRef { sub_path: p, .. }
            | Template::ValueRef { sub_path: p, .. }
            | Template::ElementRef { sub_path: p, .. } => *p = sub_path,
        }
        self
    }

    pub fn sub_path(&self) -> &[String] {
        match self {
            Template::InputRef { sub_path, .. }
            | Template::ResultRef { sub_path, .. }
            | Template::ValueRef { sub_path, .. }
            | Template::ElementRef { sub_path, .. } => sub_path,
        }
    }
}

/// A callable transform applied to a resolved argument value (per-argument)
/// or to the whole resolved argument map (whole-argument, §4.7 step 3).
///
/// Modeled as a boxed `Fn` rather than the source's
/// `(module, function, extra_args)` descriptor, since Rust has no runtime
/// module/function lookup; callers construct the equivalent closure.
pub type Transform = std::sync::Arc<dyn Fn(Value) -> Value + Send + Sync>;

pub type MapTransform = std::sync::Arc<dyn Fn(HashMap<String, Value>) -> HashMap<String, Value> + Send + Sync>;

/// One named input to a step.
#[derive(Clone)]
pub struct Argument {
    pub name: String,
    pub source: Template,
    pub transform: Option<Transform>,
}

impl std::fmt::Debug for Argument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Argument")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("transform", &self.transform.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Argument {
    pub fn new(name: impl Into<String>, source: Template) -> Self {
        Self {
            name: name.into(),
            source,
            transform: None,
        }
    }

    /// `name == "_"` establishes a dependency without binding a value
    /// (desugared `wait_for`).
    pub fn wait_for(source: Template) -> Self {
        Self::new("_", source)
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn is_ignored(&self) -> bool {
        self.name == "_"
    }
}

/// Abstraction over the container kinds sub-path access may fetch a key
/// from: map-like (JSON object) or keyword-list-like (array of 2-element
/// `[key, value]` arrays). Any other value is not a container.
pub(crate) trait Container {
    fn fetch(&self, key: &str) -> Option<&Value>;
}

impl Container for Value {
    fn fetch(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            Value::Array(items) => items.iter().find_map(|item| match item {
                Value::Array(pair) if pair.len() == 2 => {
                    if pair[0].as_str() == Some(key) {
                        Some(&pair[1])
                    } else {
                        None
                    }
                }
                _ => None,
            }),
            _ => None,
        }
    }
}

/// Walk `sub_path` over `base`, applying map/keyword-list access at each
/// step. A non-container intermediate value is an `ArgumentSubpathError`
/// naming the full path and the offending key.
pub fn apply_sub_path(base: &Value, sub_path: &[String]) -> Result<Value, ArgumentSubpathError> {
    let mut current = base;
    for key in sub_path {
        let is_container = matches!(current, Value::Object(_) | Value::Array(_));
        if !is_container {
            return Err(ArgumentSubpathError::not_a_container(sub_path, key));
        }
        match current.fetch(key) {
            Some(next) => current = next,
            None => return Err(ArgumentSubpathError::key_not_found(sub_path, key)),
        }
    }
    Ok(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sub_path_walks_nested_objects() {
        let base = json!({"a": {"b": {"c": 42}}});
        let path = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(apply_sub_path(&base, &path).unwrap(), json!(42));
    }

    #[test]
    fn sub_path_walks_keyword_list_style() {
        let base = json!([["name", "marty"], ["age", 7]]);
        let path = vec!["name".to_string()];
        assert_eq!(apply_sub_path(&base, &path).unwrap(), json!("marty"));
    }

    #[test]
    fn sub_path_on_non_container_is_an_error() {
        let base = json!({"a": 1});
        let path = vec!["a".to_string(), "b".to_string()];
        let err = apply_sub_path(&base, &path).unwrap_err();
        assert_eq!(err.key, "b");
        assert_eq!(err.path, path);
    }

    #[test]
    fn empty_sub_path_returns_value_unchanged() {
        let base = json!("dear reader");
        assert_eq!(apply_sub_path(&base, &[]).unwrap(), base);
    }

    #[test]
    fn wait_for_argument_is_ignored_for_value_binding() {
        let arg = Argument::wait_for(Template::input("gate"));
        assert!(arg.is_ignored());
    }
}
