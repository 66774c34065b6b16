use serde::{Deserialize, Serialize};

/// Lifecycle of a stage inside the orchestrator queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Active,
    Complete,
    Failed,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Active => "active",
            StageStatus::Complete => "complete",
            StageStatus::Failed => "failed",
        }
    }
}

/// Evaluation state of a single criterion. Only criteria evaluation moves it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionStatus {
    #[default]
    Unmet,
    PartiallyMet,
    Met,
}

impl CriterionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CriterionStatus::Unmet => "unmet",
            CriterionStatus::PartiallyMet => "partially_met",
            CriterionStatus::Met => "met",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Criterion {
    pub text: String,
    #[serde(default)]
    pub status: CriterionStatus,
}

impl Criterion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: CriterionStatus::Unmet,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stage {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
    #[serde(default)]
    pub status: StageStatus,
}

impl Stage {
    pub fn new<I, S>(id: impl Into<String>, description: impl Into<String>, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            description: description.into(),
            criteria: criteria.into_iter().map(Criterion::new).collect(),
            status: StageStatus::Pending,
        }
    }

    /// Criteria whose status is anything other than `Met`, in plan order.
    pub fn unmet_criteria(&self) -> Vec<String> {
        self.criteria
            .iter()
            .filter(|c| c.status != CriterionStatus::Met)
            .map(|c| c.text.clone())
            .collect()
    }

    pub fn all_criteria_met(&self) -> bool {
        self.criteria.iter().all(|c| c.status == CriterionStatus::Met)
    }

    /// Put the stage back into its freshly-planned state.
    pub fn reset(&mut self) {
        self.status = StageStatus::Pending;
        for criterion in &mut self.criteria {
            criterion.status = CriterionStatus::Unmet;
        }
    }

    /// Markdown rendering used in prompts and event payloads.
    pub fn render(&self) -> String {
        let mut buf = format!("- [{}] {}\n", self.id, self.description.trim());
        for criterion in &self.criteria {
            buf.push_str(&format!(
                "  - ({}) {}\n",
                criterion.status.as_str(),
                criterion.text.trim()
            ));
        }
        buf
    }
}

/// Ordered stages with success criteria. Order is significant.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    pub stages: Vec<Stage>,
}

impl Plan {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Reset every stage to `Pending` with unmet criteria before execution starts.
    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }

    pub fn render(&self) -> String {
        self.stages.iter().map(Stage::render).collect()
    }
}
