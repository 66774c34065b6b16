//! Plan invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::plan::{Plan, Stage};

/// Check semantic invariants of an approved plan:
/// - At least one stage
/// - Stage ids non-empty and unique
/// - Descriptions and criterion texts non-empty
/// - Every stage has at least one criterion
pub fn validate_plan(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();
    if plan.stages.is_empty() {
        errors.push("plan must contain at least one stage".to_string());
    }
    errors.extend(validate_stages(&plan.stages));
    errors
}

/// Same checks as [`validate_plan`] minus the non-empty requirement, for
/// stage queues returned by reflection.
pub fn validate_stages(stages: &[Stage]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (index, stage) in stages.iter().enumerate() {
        let path = format!("stages[{}]", index);
        if stage.id.trim().is_empty() {
            errors.push(format!("{}: id must not be empty", path));
        } else if !seen.insert(stage.id.as_str()) {
            errors.push(format!("{}: duplicate id '{}'", path, stage.id));
        }

        if stage.description.trim().is_empty() {
            errors.push(format!("{} ({}): description must not be empty", path, stage.id));
        }

        if stage.criteria.is_empty() {
            errors.push(format!("{} ({}): criteria must not be empty", path, stage.id));
        }
        for (c_index, criterion) in stage.criteria.iter().enumerate() {
            if criterion.text.trim().is_empty() {
                errors.push(format!(
                    "{} ({}): criteria[{}] text must not be empty",
                    path, stage.id, c_index
                ));
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_plan_has_no_errors() {
        let plan = Plan::new(vec![
            Stage::new("load", "Load the data", ["rows counted"]),
            Stage::new("fit", "Fit the model", ["r2 reported"]),
        ]);
        assert!(validate_plan(&plan).is_empty());
    }

    #[test]
    fn empty_plan_is_rejected() {
        let errors = validate_plan(&Plan::default());
        assert_eq!(errors, vec!["plan must contain at least one stage"]);
    }

    #[test]
    fn reports_every_violation() {
        let plan = Plan::new(vec![
            Stage::new("a", "first", ["ok"]),
            Stage::new("a", " ", [""]),
            Stage::new("", "third", Vec::<String>::new()),
        ]);
        let errors = validate_plan(&plan);
        assert_eq!(errors.len(), 5, "{errors:?}");
        assert!(errors[0].contains("duplicate id 'a'"));
        assert!(errors.iter().any(|e| e.contains("description must not be empty")));
        assert!(errors.iter().any(|e| e.contains("criteria[0]")));
        assert!(errors.iter().any(|e| e.contains("stages[2]: id must not be empty")));
        assert!(errors.iter().any(|e| e.contains("criteria must not be empty")));
    }

    #[test]
    fn stage_without_criteria_is_rejected() {
        let plan = Plan::new(vec![
            Stage::new("load", "Load the data", ["rows counted"]),
            Stage::new("chart", "Draw the chart", Vec::<String>::new()),
        ]);
        assert_eq!(
            validate_plan(&plan),
            vec!["stages[1] (chart): criteria must not be empty"]
        );
    }

    #[test]
    fn empty_stage_queue_is_allowed() {
        assert!(validate_stages(&[]).is_empty());
    }
}
