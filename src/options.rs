//! The flag bag a run is built from.
//!
//! Options come from three layers, in increasing precedence: built-in
//! defaults, the project's persisted launch configuration, and the overrides
//! of the command that triggered the run. Defaults are applied by the
//! argument builder; this module merges the two user layers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::target::RunTarget;

pub const FAILED: &str = "failed";
pub const REPEAT: &str = "repeat";
pub const PARALLEL: &str = "parallel";
pub const HIDE_SUGGESTION: &str = "hide-suggestion";
pub const SIMPLE_CONSOLE: &str = "simple-console";
pub const TAGS: &str = "tags";
pub const ENV: &str = "env";
pub const NODES: &str = "n";
pub const SCENARIO: &str = "scenario";
pub const RETRY_ONLY: &str = "retry-only";

/// Filters that select at spec granularity and mean nothing for a single
/// scenario.
const SPEC_LEVEL_FILTERS: [&str; 3] = [TAGS, SCENARIO, RETRY_ONLY];

/// Ordered option bag. Keys are tool flag names without leading dashes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunOptions(Map<String, Value>);

impl RunOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Insert or replace. A replaced key keeps its original position.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether `key` is present and truthy.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(is_truthy)
    }

    #[must_use]
    pub fn failed(&self) -> bool {
        self.flag(FAILED)
    }

    #[must_use]
    pub fn repeat(&self) -> bool {
        self.flag(REPEAT)
    }

    #[must_use]
    pub fn parallel(&self) -> bool {
        self.flag(PARALLEL)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Layer `overrides` on top of `self`.
    #[must_use]
    pub fn overridden_by(mut self, overrides: &RunOptions) -> Self {
        for (key, value) in &overrides.0 {
            self.0.insert(key.clone(), value.clone());
        }
        self
    }

    /// Options as seen after the built-in defaults are layered underneath:
    /// suggestions hidden, and the simple console unless running in
    /// parallel.
    #[must_use]
    pub fn with_defaults(&self) -> Self {
        let mut merged = Map::new();
        merged.insert(HIDE_SUGGESTION.to_string(), Value::Bool(true));
        if !self.parallel() {
            merged.insert(SIMPLE_CONSOLE.to_string(), Value::Bool(true));
        }
        for (key, value) in &self.0 {
            merged.insert(key.clone(), value.clone());
        }
        RunOptions(merged)
    }

    /// Drop spec-level filters when the run targets a single scenario.
    #[must_use]
    pub fn scoped_to(mut self, target: &RunTarget) -> Self {
        if target.is_scenario() {
            for key in SPEC_LEVEL_FILTERS {
                if self.0.get(key).is_some_and(|value| !value.is_null()) {
                    log::debug!("ignoring `{key}` filter for scenario target {target}");
                    self.0.insert(key.to_string(), Value::Null);
                }
            }
        }
        self
    }
}

impl From<Map<String, Value>> for RunOptions {
    fn from(map: Map<String, Value>) -> Self {
        RunOptions(map)
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Render a value the way the tool expects it on the command line: arrays
/// become comma separated lists, `None` for values that produce no argument.
pub(crate) fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(_) => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Some(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;

    #[test]
    fn overrides_take_precedence_and_keep_position() {
        let launch = RunOptions::new()
            .with(TAGS, "smoke")
            .with(ENV, json!(["ci"]));
        let overrides = RunOptions::new().with(TAGS, "regression").with(PARALLEL, true);

        let merged = launch.overridden_by(&overrides);
        let keys: Vec<_> = merged.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![TAGS, ENV, PARALLEL]);
        assert_eq!(merged.get(TAGS), Some(&json!("regression")));
    }

    #[test]
    fn defaults_depend_on_parallel() {
        let serial = RunOptions::new().with_defaults();
        assert!(serial.flag(HIDE_SUGGESTION));
        assert!(serial.flag(SIMPLE_CONSOLE));

        let parallel = RunOptions::new().with(PARALLEL, true).with_defaults();
        assert!(parallel.flag(HIDE_SUGGESTION));
        assert!(parallel.get(SIMPLE_CONSOLE).is_none());
    }

    #[test]
    fn user_values_replace_defaults() {
        let merged = RunOptions::new().with(HIDE_SUGGESTION, false).with_defaults();
        assert!(!merged.flag(HIDE_SUGGESTION));
    }

    #[test]
    fn scenario_targets_clear_spec_level_filters() {
        let options = RunOptions::new()
            .with(TAGS, "smoke")
            .with(SCENARIO, json!(["Login"]))
            .with(RETRY_ONLY, "flaky")
            .with(ENV, "ci");
        let scenario = RunTarget::Scenario {
            spec: PathBuf::from("a.spec"),
            line: 3,
        };

        let scoped = options.clone().scoped_to(&scenario);
        assert!(scoped.get(TAGS).unwrap().is_null());
        assert!(scoped.get(SCENARIO).unwrap().is_null());
        assert!(scoped.get(RETRY_ONLY).unwrap().is_null());
        assert_eq!(scoped.get(ENV), Some(&json!("ci")));

        let spec = RunTarget::Spec(PathBuf::from("a.spec"));
        assert_eq!(options.clone().scoped_to(&spec), options);
    }

    #[test]
    fn renders_values() {
        assert_eq!(render_value(&json!(["a", "b", "c"])).as_deref(), Some("a,b,c"));
        assert_eq!(render_value(&json!(3)).as_deref(), Some("3"));
        assert_eq!(render_value(&json!(true)), None);
        assert_eq!(render_value(&Value::Null), None);
    }
}
