//! Plan loading with schema + invariant validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde_json::Value;

use crate::core::invariants::validate_plan;
use crate::plan::Plan;

pub const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");

/// Every schema and invariant violation of a plan document.
///
/// Invariants are only checked once the document matches the schema.
pub fn plan_violations(value: &Value) -> Result<Vec<String>> {
    let schema: Value = serde_json::from_str(PLAN_SCHEMA).context("parse plan schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile plan schema")?;
    let schema_errors: Vec<String> = compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect();
    if !schema_errors.is_empty() {
        return Ok(schema_errors);
    }

    let plan: Plan = serde_json::from_value(value.clone()).context("deserialize plan")?;
    Ok(validate_plan(&plan))
}

/// Validate and deserialize a plan document.
pub fn plan_from_value(value: Value) -> Result<Plan> {
    let violations = plan_violations(&value)?;
    if !violations.is_empty() {
        bail!("plan validation failed:\n- {}", violations.join("\n- "));
    }
    serde_json::from_value(value).context("deserialize plan")
}

pub fn load_plan(path: &Path) -> Result<Plan> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse plan {}", path.display()))?;
    plan_from_value(value).with_context(|| format!("validate plan {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_plan_loads() {
        let value = json!({
            "stages": [
                {"id": "load", "description": "Load data", "criteria": [{"text": "rows counted"}]},
                {"id": "plot", "description": "Plot it", "criteria": ["plot.png exists"]}
            ]
        });
        let plan = plan_from_value(value).expect("plan");
        assert_eq!(plan.stages.len(), 2);
        assert_eq!(plan.stages[1].criteria[0].text, "plot.png exists");
    }

    #[test]
    fn stages_need_at_least_one_criterion() {
        let value = json!({
            "stages": [
                {"id": "load", "description": "Load data"},
                {"id": "plot", "description": "Plot it", "criteria": []}
            ]
        });
        let violations = plan_violations(&value).expect("check");
        assert_eq!(violations.len(), 2, "{violations:?}");
        assert!(plan_from_value(value).is_err());
    }

    #[test]
    fn schema_errors_are_all_reported() {
        let value = json!({
            "stages": [
                {"id": "", "description": "x"},
                {"id": "b", "criteria": [{"text": "ok", "status": "done"}]}
            ]
        });
        let violations = plan_violations(&value).expect("check");
        assert!(violations.len() >= 3, "{violations:?}");
    }

    #[test]
    fn invariant_errors_follow_schema_success() {
        let value = json!({
            "stages": [
                {"id": "a", "description": "one", "criteria": [{"text": "first"}]},
                {"id": "a", "description": "two", "criteria": [{"text": "second"}]}
            ]
        });
        let violations = plan_violations(&value).expect("check");
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("duplicate id 'a'"));
    }

    #[test]
    fn empty_plan_is_rejected() {
        let err = plan_from_value(json!({"stages": []})).unwrap_err();
        assert!(err.to_string().contains("at least one stage"));
    }

    #[test]
    fn load_reports_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("plan.json");
        fs::write(&path, "not json").expect("write");
        let err = load_plan(&path).unwrap_err();
        assert!(format!("{err:#}").contains("plan.json"));
    }
}
