//! Planner output parsing.

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};

use crate::io::plan_store::plan_from_value;
use crate::plan::Plan;

use super::parse::extract_json;

/// Parse a planner response into a validated [`Plan`].
///
/// Accepts `{"stages": [...]}` or a bare stage array, and criteria given
/// either as `{"text": ..}` objects or plain strings.
pub fn parse_plan(raw: &str) -> Result<Plan> {
    let value = extract_json(raw).ok_or_else(|| anyhow!("planner response contains no JSON"))?;
    let mut value = match value {
        Value::Array(stages) => json!({ "stages": stages }),
        other => other,
    };
    normalize_criteria(&mut value);
    plan_from_value(value).context("planner response is not a valid plan")
}

/// Rewrite plain-string criteria into `{"text": ..}` objects.
pub(super) fn normalize_criteria(value: &mut Value) {
    let Some(stages) = value.get_mut("stages").and_then(Value::as_array_mut) else {
        return;
    };
    for stage in stages {
        let Some(criteria) = stage.get_mut("criteria").and_then(Value::as_array_mut) else {
            continue;
        };
        for criterion in criteria.iter_mut() {
            if let Value::String(text) = criterion {
                *criterion = json!({ "text": text });
            }
        }
    }
}
