//! Criteria checker output parsing.

use anyhow::{Result, anyhow, bail};
use serde_json::Value;
use tracing::warn;

use crate::collaborators::CriterionAssessment;
use crate::plan::CriterionStatus;

use super::parse::extract_json;

/// Parse `{"criteria": [{"index", "status", "evidence"}]}` or a bare array.
///
/// Entries without a usable index are skipped. Unrecognized statuses count
/// as unmet.
pub fn parse_assessments(raw: &str) -> Result<Vec<CriterionAssessment>> {
    let value =
        extract_json(raw).ok_or_else(|| anyhow!("criteria checker response contains no JSON"))?;
    let entries = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("criteria").and_then(Value::as_array) {
            Some(items) => items.as_slice(),
            None => bail!("criteria checker response has no \"criteria\" list"),
        },
        _ => bail!("criteria checker response is not an object or array"),
    };

    let mut assessments = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(index) = entry.get("index").and_then(Value::as_u64) else {
            warn!(entry = %entry, "skipping assessment without index");
            continue;
        };
        let status = entry
            .get("status")
            .and_then(Value::as_str)
            .map_or(CriterionStatus::Unmet, parse_status);
        let evidence = entry
            .get("evidence")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        assessments.push(CriterionAssessment {
            index: index as usize,
            status,
            evidence,
        });
    }
    Ok(assessments)
}

fn parse_status(raw: &str) -> CriterionStatus {
    match raw.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
        "met" | "pass" | "passed" => CriterionStatus::Met,
        "partially_met" | "partial" | "partially" => CriterionStatus::PartiallyMet,
        "unmet" | "not_met" | "fail" | "failed" => CriterionStatus::Unmet,
        other => {
            warn!(status = other, "unknown criterion status, treating as unmet");
            CriterionStatus::Unmet
        }
    }
}
