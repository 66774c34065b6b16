//! Applying a reflection result to the remaining stage queue.
//!
//! Reflection may reorder, edit, insert, or delete pending stages. It may not
//! resurrect a stage that already ran, and the resulting queue must satisfy
//! the stage invariants. A rejected reflection leaves the queue untouched.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::core::invariants::validate_stages;
use crate::plan::Stage;

/// What the reflector decided about the remaining work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reflection {
    /// Keep the queue as is.
    Unchanged,
    /// Replace the remaining queue. An empty list means no remaining work.
    Replace { stages: Vec<Stage>, notes: String },
}

/// Difference between the queue before and after a reflection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueChange {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub edited: Vec<String>,
    pub reordered: bool,
}

impl QueueChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.edited.is_empty() && !self.reordered
    }

    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "queue unchanged".to_string();
        }
        let mut parts = Vec::new();
        if !self.added.is_empty() {
            parts.push(format!("added {}", self.added.join(", ")));
        }
        if !self.removed.is_empty() {
            parts.push(format!("removed {}", self.removed.join(", ")));
        }
        if !self.edited.is_empty() {
            parts.push(format!("edited {}", self.edited.join(", ")));
        }
        if self.reordered {
            parts.push("reordered".to_string());
        }
        parts.join("; ")
    }
}

/// Apply `reflection` to `queue`.
///
/// New stages always start `Pending` with unmet criteria. Returns the list of
/// violations when the reflection is rejected.
pub fn apply_reflection(
    queue: &mut VecDeque<Stage>,
    processed: &HashSet<String>,
    reflection: Reflection,
) -> Result<QueueChange, Vec<String>> {
    let mut stages = match reflection {
        Reflection::Unchanged => return Ok(QueueChange::default()),
        Reflection::Replace { stages, .. } => stages,
    };

    let mut errors = validate_stages(&stages);
    for stage in &stages {
        if processed.contains(&stage.id) {
            errors.push(format!("stage '{}' was already processed", stage.id));
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    for stage in &mut stages {
        stage.reset();
    }

    let change = diff(queue, &stages);
    *queue = stages.into();
    Ok(change)
}

fn diff(before: &VecDeque<Stage>, after: &[Stage]) -> QueueChange {
    let old: HashMap<&str, &Stage> = before.iter().map(|s| (s.id.as_str(), s)).collect();
    let new_ids: HashSet<&str> = after.iter().map(|s| s.id.as_str()).collect();

    let mut change = QueueChange::default();
    for stage in after {
        match old.get(stage.id.as_str()) {
            None => change.added.push(stage.id.clone()),
            Some(previous) => {
                let same_criteria = previous
                    .criteria
                    .iter()
                    .map(|c| c.text.as_str())
                    .eq(stage.criteria.iter().map(|c| c.text.as_str()));
                if previous.description != stage.description || !same_criteria {
                    change.edited.push(stage.id.clone());
                }
            }
        }
    }
    change.removed = before
        .iter()
        .filter(|s| !new_ids.contains(s.id.as_str()))
        .map(|s| s.id.clone())
        .collect();

    let kept_before = before.iter().map(|s| s.id.as_str()).filter(|id| new_ids.contains(id));
    let kept_after = after
        .iter()
        .map(|s| s.id.as_str())
        .filter(|id| old.contains_key(id));
    change.reordered = !kept_before.eq(kept_after);
    change
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{CriterionStatus, StageStatus};

    fn queue(ids: &[&str]) -> VecDeque<Stage> {
        ids.iter()
            .map(|id| Stage::new(*id, format!("do {id}"), [format!("{id} done")]))
            .collect()
    }

    fn replace(stages: Vec<Stage>) -> Reflection {
        Reflection::Replace {
            stages,
            notes: String::new(),
        }
    }

    fn ids(queue: &VecDeque<Stage>) -> Vec<&str> {
        queue.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn unchanged_keeps_queue() {
        let mut q = queue(&["b", "c"]);
        let change = apply_reflection(&mut q, &HashSet::new(), Reflection::Unchanged).expect("apply");
        assert!(change.is_empty());
        assert_eq!(ids(&q), vec!["b", "c"]);
    }

    #[test]
    fn insert_remove_and_reorder() {
        let mut q = queue(&["b", "c", "d"]);
        let mut next: Vec<Stage> = queue(&["d", "b", "x"]).into();
        next[1].description = "do b differently".to_string();

        let change = apply_reflection(&mut q, &HashSet::new(), replace(next)).expect("apply");
        assert_eq!(ids(&q), vec!["d", "b", "x"]);
        assert_eq!(change.added, vec!["x"]);
        assert_eq!(change.removed, vec!["c"]);
        assert_eq!(change.edited, vec!["b"]);
        assert!(change.reordered);
        assert_eq!(change.summary(), "added x; removed c; edited b; reordered");
    }

    #[test]
    fn empty_replacement_clears_remaining_work() {
        let mut q = queue(&["b"]);
        let change = apply_reflection(&mut q, &HashSet::new(), replace(Vec::new())).expect("apply");
        assert!(q.is_empty());
        assert_eq!(change.removed, vec!["b"]);
    }

    #[test]
    fn reusing_processed_id_is_rejected_and_queue_kept() {
        let mut q = queue(&["b"]);
        let processed: HashSet<String> = ["a".to_string()].into();
        let errors =
            apply_reflection(&mut q, &processed, replace(queue(&["a", "b"]).into())).unwrap_err();
        assert!(errors[0].contains("already processed"));
        assert_eq!(ids(&q), vec!["b"]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut q = queue(&["b"]);
        let result = apply_reflection(&mut q, &HashSet::new(), replace(queue(&["x", "x"]).into()));
        assert!(result.is_err());
        assert_eq!(ids(&q), vec!["b"]);
    }

    #[test]
    fn replacement_without_criteria_is_rejected() {
        let mut q = queue(&["b"]);
        let bare = Stage::new("x", "extra", Vec::<String>::new());
        let errors = apply_reflection(&mut q, &HashSet::new(), replace(vec![bare])).unwrap_err();
        assert!(errors[0].contains("criteria must not be empty"));
        assert_eq!(ids(&q), vec!["b"]);
    }

    #[test]
    fn new_stages_start_pending_and_unmet() {
        let mut q = VecDeque::new();
        let mut stage = Stage::new("x", "extra", ["checked"]);
        stage.status = StageStatus::Complete;
        stage.criteria[0].status = CriterionStatus::Met;

        apply_reflection(&mut q, &HashSet::new(), replace(vec![stage])).expect("apply");
        assert_eq!(q[0].status, StageStatus::Pending);
        assert_eq!(q[0].criteria[0].status, CriterionStatus::Unmet);
    }
}
