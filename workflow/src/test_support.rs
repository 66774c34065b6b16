//! Test-only collaborators, invokers, and builders.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use anyhow::{Result, anyhow};

use crate::cancel::CancelToken;
use crate::collaborators::{
    Collaborators, ContextView, CriterionAssessment, ReflectionRequest, StageEvidence,
};
use crate::convergence::LoopContext;
use crate::core::queue::Reflection;
use crate::core::types::{CritiqueResponse, Feedback, Role, TerminationSignal};
use crate::events::{Event, Summarizer};
use crate::io::invoker::{InvokeRequest, InvokeResponse, Invoker};
use crate::plan::{CriterionStatus, Plan, Stage};

/// Stage `id` described as "do {id}" with the given criteria.
pub fn stage(id: &str, criteria: &[&str]) -> Stage {
    Stage::new(id, format!("do {id}"), criteria.iter().copied())
}

/// One stage per id, each with the single criterion "{id} done".
pub fn plan(ids: &[&str]) -> Plan {
    Plan::new(
        ids.iter()
            .map(|id| stage(id, &[format!("{id} done").as_str()]))
            .collect(),
    )
}

pub fn reject(issue: &str) -> CritiqueResponse {
    CritiqueResponse::Structured(Feedback::Reject {
        blocking_issues: vec![issue.to_string()],
        suggestions: Vec::new(),
    })
}

pub fn approve() -> CritiqueResponse {
    CritiqueResponse::Structured(Feedback::Approve)
}

/// Collaborators that replay scripted responses and count calls.
///
/// Unscripted calls succeed: reviews approve, every criterion is met,
/// reflection leaves the queue alone. Drafting a plan without one scripted
/// is an error.
#[derive(Default)]
pub struct ScriptedCollaborators {
    plans: RefCell<VecDeque<Plan>>,
    last_plan: RefCell<Option<Plan>>,
    plan_reviews: RefCell<VecDeque<CritiqueResponse>>,
    stage_reviews: RefCell<HashMap<String, VecDeque<CritiqueResponse>>>,
    evaluations: RefCell<HashMap<String, Vec<CriterionAssessment>>>,
    reflections: RefCell<VecDeque<Reflection>>,
    failures: HashMap<Role, (usize, String)>,
    cancel_on: Option<(Role, CancelToken)>,
    counts: RefCell<HashMap<Role, usize>>,
    implemented: RefCell<Vec<String>>,
    summarized: RefCell<Vec<usize>>,
}

impl ScriptedCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plans returned by successive drafts. The last one repeats.
    pub fn with_plans(self, plans: Vec<Plan>) -> Self {
        self.plans.borrow_mut().extend(plans);
        self
    }

    pub fn with_plan_reviews(self, reviews: Vec<CritiqueResponse>) -> Self {
        self.plan_reviews.borrow_mut().extend(reviews);
        self
    }

    pub fn with_stage_reviews(self, stage_id: &str, reviews: Vec<CritiqueResponse>) -> Self {
        self.stage_reviews
            .borrow_mut()
            .entry(stage_id.to_string())
            .or_default()
            .extend(reviews);
        self
    }

    pub fn with_evaluation(self, stage_id: &str, assessments: Vec<CriterionAssessment>) -> Self {
        self.evaluations
            .borrow_mut()
            .insert(stage_id.to_string(), assessments);
        self
    }

    pub fn with_reflections(self, reflections: Vec<Reflection>) -> Self {
        self.reflections.borrow_mut().extend(reflections);
        self
    }

    /// Every call for `role` fails with `message`.
    pub fn failing(self, role: Role, message: &str) -> Self {
        self.failing_after(role, 0, message)
    }

    /// Calls for `role` succeed `calls` times, then fail with `message`.
    pub fn failing_after(mut self, role: Role, calls: usize, message: &str) -> Self {
        self.failures.insert(role, (calls, message.to_string()));
        self
    }

    /// The first call for `role` cancels `token` and then fails.
    pub fn cancelling(mut self, role: Role, token: &CancelToken) -> Self {
        self.cancel_on = Some((role, token.clone()));
        self
    }

    pub fn count(&self, role: Role) -> usize {
        self.counts.borrow().get(&role).copied().unwrap_or(0)
    }

    /// Stage ids passed to `implement`, one entry per call.
    pub fn implemented_stages(&self) -> Vec<String> {
        self.implemented.borrow().clone()
    }

    /// Event counts handed to each summarize call.
    pub fn summarized_batches(&self) -> Vec<usize> {
        self.summarized.borrow().clone()
    }

    fn enter(&self, role: Role) -> Result<()> {
        let calls = {
            let mut counts = self.counts.borrow_mut();
            let count = counts.entry(role).or_default();
            *count += 1;
            *count
        };
        if let Some((cancel_role, token)) = &self.cancel_on
            && *cancel_role == role
        {
            token.cancel();
            return Err(anyhow!("{role} interrupted"));
        }
        match self.failures.get(&role) {
            Some((after, message)) if calls > *after => Err(anyhow!("{message}")),
            _ => Ok(()),
        }
    }
}

impl Summarizer for ScriptedCollaborators {
    fn summarize(&self, events: &[Event]) -> Result<String> {
        self.enter(Role::Summarizer)?;
        self.summarized.borrow_mut().push(events.len());
        Ok(format!("summary of {} events", events.len()))
    }
}

impl Collaborators for ScriptedCollaborators {
    fn draft_plan(&self, _ctx: &LoopContext<'_>) -> Result<Plan> {
        self.enter(Role::Planner)?;
        let next = self.plans.borrow_mut().pop_front();
        let mut last = self.last_plan.borrow_mut();
        if let Some(plan) = next {
            *last = Some(plan);
        }
        last.clone().ok_or_else(|| anyhow!("no plan scripted"))
    }

    fn review_plan(&self, _plan: &Plan, _ctx: &LoopContext<'_>) -> Result<CritiqueResponse> {
        self.enter(Role::PlanReviewer)?;
        Ok(self
            .plan_reviews
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(approve))
    }

    fn implement(&self, stage: &Stage, ctx: &LoopContext<'_>) -> Result<String> {
        self.enter(Role::Implementer)?;
        self.implemented.borrow_mut().push(stage.id.clone());
        Ok(format!("implemented {} (attempt {})", stage.id, ctx.iteration))
    }

    fn review_implementation(
        &self,
        stage: &Stage,
        _artifact: &str,
        _ctx: &LoopContext<'_>,
    ) -> Result<CritiqueResponse> {
        self.enter(Role::Reviewer)?;
        Ok(self
            .stage_reviews
            .borrow_mut()
            .get_mut(&stage.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(approve))
    }

    fn evaluate_criteria(
        &self,
        stage: &Stage,
        _artifact: &str,
        _view: ContextView<'_>,
    ) -> Result<Vec<CriterionAssessment>> {
        self.enter(Role::CriteriaChecker)?;
        if let Some(scripted) = self.evaluations.borrow().get(&stage.id) {
            return Ok(scripted.clone());
        }
        Ok((0..stage.criteria.len())
            .map(|index| CriterionAssessment {
                index,
                status: CriterionStatus::Met,
                evidence: "checked".to_string(),
            })
            .collect())
    }

    fn reflect(&self, _request: ReflectionRequest<'_>) -> Result<Reflection> {
        self.enter(Role::Reflector)?;
        Ok(self
            .reflections
            .borrow_mut()
            .pop_front()
            .unwrap_or(Reflection::Unchanged))
    }

    fn final_report(&self, evidence: &[StageEvidence], _view: ContextView<'_>) -> Result<String> {
        self.enter(Role::Reporter)?;
        Ok(format!("report covering {} stages", evidence.len()))
    }
}

/// Invoker that replays canned replies per role and records every request.
///
/// Replies for a role are consumed in order; the last one repeats.
#[derive(Default)]
pub struct ScriptedInvoker {
    replies: RefCell<HashMap<Role, VecDeque<InvokeResponse>>>,
    requests: RefCell<Vec<InvokeRequest>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, role: Role, text: &str) -> Self {
        self.push(role, InvokeResponse::text(text))
    }

    /// Reply carrying the termination side channel.
    pub fn approve(self, role: Role, text: &str) -> Self {
        self.push(
            role,
            InvokeResponse {
                text: text.to_string(),
                signal: Some(TerminationSignal),
            },
        )
    }

    fn push(self, role: Role, response: InvokeResponse) -> Self {
        self.replies
            .borrow_mut()
            .entry(role)
            .or_default()
            .push_back(response);
        self
    }

    pub fn requests(&self) -> Vec<InvokeRequest> {
        self.requests.borrow().clone()
    }

    pub fn roles(&self) -> Vec<Role> {
        self.requests.borrow().iter().map(|r| r.role).collect()
    }
}

impl Invoker for ScriptedInvoker {
    fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse> {
        self.requests.borrow_mut().push(request.clone());
        let mut replies = self.replies.borrow_mut();
        let queue = replies
            .get_mut(&request.role)
            .ok_or_else(|| anyhow!("no scripted response for {}", request.role))?;
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        reply.ok_or_else(|| anyhow!("no scripted response for {}", request.role))
    }
}
