//! Turning the language server's scenario list into a run target.
//!
//! The editor asks the language server which scenarios exist around the
//! cursor and forwards the answer. Only the `lineNo` and
//! `executionIdentifier` of each entry matter here.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::SupervisorError, target::RunTarget};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioInfo {
    #[serde(default)]
    pub heading: String,
    /// One-based line of the scenario heading.
    pub line_no: u32,
    #[serde(default)]
    pub execution_identifier: Option<String>,
}

/// Accepts either a single scenario object or an array of them.
pub fn parse_scenarios(response: &Value) -> Result<Vec<ScenarioInfo>, SupervisorError> {
    match response {
        Value::Null => Ok(Vec::new()),
        Value::Array(_) => Ok(serde_json::from_value(response.clone())?),
        _ => Ok(vec![serde_json::from_value(response.clone())?]),
    }
}

/// The scenario enclosing `cursor_line`: the one whose heading is closest
/// at or above it. Falls back to the spec itself when the cursor sits above
/// every scenario.
#[must_use]
pub fn resolve_scenario(spec: &Path, scenarios: &[ScenarioInfo], cursor_line: u32) -> RunTarget {
    let Some(scenario) = scenarios
        .iter()
        .filter(|scenario| scenario.line_no <= cursor_line)
        .max_by_key(|scenario| scenario.line_no)
    else {
        return RunTarget::Spec(spec.to_path_buf());
    };

    scenario
        .execution_identifier
        .as_deref()
        .and_then(|identifier| identifier.parse::<RunTarget>().ok())
        .filter(RunTarget::is_scenario)
        .unwrap_or_else(|| RunTarget::Scenario {
            spec: spec.to_path_buf(),
            line: scenario.line_no,
        })
}
