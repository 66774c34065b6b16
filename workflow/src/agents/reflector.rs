//! Reflector output parsing.

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::core::queue::Reflection;
use crate::plan::Stage;

use super::parse::extract_json;
use super::planner::normalize_criteria;

#[derive(Debug, Deserialize)]
struct RawReflection {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    stages: Option<Value>,
}

/// Parse `{"action": "keep"}` or `{"action": "replace", "stages": [...]}`.
///
/// A missing action with a `stages` list means replace. An empty replacement
/// list means no remaining work.
pub fn parse_reflection(raw: &str) -> Result<Reflection> {
    let value = extract_json(raw).ok_or_else(|| anyhow!("reflector response contains no JSON"))?;
    let parsed: RawReflection =
        serde_json::from_value(value).context("reflector response has an unexpected shape")?;

    let action = parsed
        .action
        .as_deref()
        .map(|a| a.trim().to_ascii_lowercase());
    match (action.as_deref(), parsed.stages) {
        (Some("keep" | "unchanged" | "none"), _) | (None, None) => Ok(Reflection::Unchanged),
        (Some("replace" | "update") | None, Some(stages)) => Ok(Reflection::Replace {
            stages: parse_stages(stages)?,
            notes: parsed.notes,
        }),
        (Some("replace" | "update"), None) => bail!("reflector chose replace without a stage list"),
        (Some(other), _) => bail!("unknown reflector action '{other}'"),
    }
}

/// Shape only. Ids and descriptions are validated when the queue is updated.
fn parse_stages(stages: Value) -> Result<Vec<Stage>> {
    let mut wrapped = serde_json::json!({ "stages": stages });
    normalize_criteria(&mut wrapped);
    serde_json::from_value(wrapped["stages"].take()).context("reflector stages have an unexpected shape")
}
