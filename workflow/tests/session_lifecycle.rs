//! Session-level scenarios driven by scripted collaborators.
//!
//! Each test runs a whole session (planning loop, orchestrator, final report)
//! and checks call counts, stage outcomes, and the event log.

use std::thread;

use workflow::cancel::CancelToken;
use workflow::core::queue::Reflection;
use workflow::core::types::{LoopOutcome, Role};
use workflow::events::{CompactionConfig, EventKind};
use workflow::io::config::WorkflowConfig;
use workflow::io::scratch::ScratchDir;
use workflow::plan::StageStatus;
use workflow::session::{Session, SessionReport, SessionStatus};
use workflow::test_support::{ScriptedCollaborators, plan, reject, stage};

fn run(
    config: WorkflowConfig,
    collab: ScriptedCollaborators,
) -> (Session<ScriptedCollaborators>, SessionReport) {
    let mut session = Session::new(config, collab, CancelToken::new());
    let report = session.run("summarize quarterly sales");
    (session, report)
}

fn stage_statuses(report: &SessionReport) -> Vec<(&str, StageStatus)> {
    report.stages.iter().map(|s| (s.id.as_str(), s.status)).collect()
}

/// Reviewer rejects every plan with distinct issues: exactly 5 rounds, never a 6th.
#[test]
fn planning_exhausts_after_exactly_max_iterations() {
    let mut config = WorkflowConfig::default();
    config.planning.max_iterations = 5;
    let collab = ScriptedCollaborators::new()
        .with_plans(vec![plan(&["a"])])
        .with_plan_reviews(vec![
            reject("the data source is never named"),
            reject("criteria for stage a are subjective"),
            reject("no stage produces a chart"),
            reject("output location unspecified"),
            reject("missing currency normalization"),
            reject("sixth review must never be requested"),
        ]);

    let (session, report) = run(config, collab);

    assert_eq!(report.status, SessionStatus::PlanningFailed);
    assert_eq!(report.planning.outcome, Some(LoopOutcome::Exhausted));
    assert_eq!(report.planning.iterations, 5);
    assert_eq!(report.error.as_ref().map(|e| e.kind), Some("planning_exhausted"));
    let collab = session.collaborators();
    assert_eq!(collab.count(Role::Planner), 5);
    assert_eq!(collab.count(Role::PlanReviewer), 5);
    assert_eq!(collab.count(Role::Implementer), 0);
}

/// Approval on the second critique: 2 produce calls, 2 critique calls, no third.
#[test]
fn implementation_approved_on_second_critique() {
    let collab = ScriptedCollaborators::new()
        .with_plans(vec![plan(&["a"])])
        .with_stage_reviews("a", vec![reject("totals do not match the source")]);

    let (session, report) = run(WorkflowConfig::default(), collab);

    assert_eq!(report.status, SessionStatus::Finished);
    assert_eq!(report.stages[0].iterations, 2);
    assert_eq!(report.stages[0].outcome, Some(LoopOutcome::Approved));
    let collab = session.collaborators();
    assert_eq!(collab.count(Role::Implementer), 2);
    assert_eq!(collab.count(Role::Reviewer), 2);
}

#[test]
fn reflection_inserted_stage_runs_once_and_is_reported() {
    let collab = ScriptedCollaborators::new()
        .with_plans(vec![plan(&["load", "chart"])])
        .with_reflections(vec![Reflection::Replace {
            stages: vec![stage("clean", &["no null rows"]), stage("chart", &["chart done"])],
            notes: "nulls found while loading".to_string(),
        }]);

    let (session, report) = run(WorkflowConfig::default(), collab);

    assert_eq!(report.status, SessionStatus::Finished);
    assert_eq!(
        session.collaborators().implemented_stages(),
        vec!["load", "clean", "chart"]
    );
    assert_eq!(
        stage_statuses(&report),
        vec![
            ("load", StageStatus::Complete),
            ("clean", StageStatus::Complete),
            ("chart", StageStatus::Complete),
        ]
    );
    let reflections: Vec<_> = session
        .events()
        .iter()
        .filter(|e| e.kind == EventKind::Reflection)
        .collect();
    assert_eq!(reflections.len(), 3);
    assert!(reflections[0].payload.contains("added clean"));
}

#[test]
fn fail_fast_reports_every_stage_with_unmet_criteria() {
    let collab = ScriptedCollaborators::new()
        .with_plans(vec![plan(&["a", "b", "c"])])
        .with_stage_reviews("b", vec![reject("script crashes on empty input"); 5]);

    let (session, report) = run(WorkflowConfig::default(), collab);

    assert_eq!(report.status, SessionStatus::Aborted);
    assert_eq!(report.error.as_ref().map(|e| e.kind), Some("stage_failed"));
    assert_eq!(
        stage_statuses(&report),
        vec![
            ("a", StageStatus::Complete),
            ("b", StageStatus::Failed),
            ("c", StageStatus::Pending),
        ]
    );
    assert_eq!(report.stages[1].unmet_criteria, vec!["b done"]);
    assert_eq!(report.stages[2].unmet_criteria, vec!["c done"]);
    // Partial progress still gets a final report.
    assert_eq!(report.final_report.as_deref(), Some("report covering 2 stages"));
    assert_eq!(session.collaborators().count(Role::Reporter), 1);
}

#[test]
fn continue_on_failure_finishes_remaining_stages() {
    let mut config = WorkflowConfig::default();
    config.implementation.fail_fast = false;
    config.implementation.max_iterations = 2;
    let collab = ScriptedCollaborators::new()
        .with_plans(vec![plan(&["a", "b"])])
        .with_stage_reviews(
            "a",
            vec![reject("wrong join key"), reject("dates parsed as strings")],
        );

    let (session, report) = run(config, collab);

    assert_eq!(report.status, SessionStatus::Finished);
    assert_eq!(
        stage_statuses(&report),
        vec![("a", StageStatus::Failed), ("b", StageStatus::Complete)]
    );
    assert_eq!(report.stages[0].outcome, Some(LoopOutcome::Exhausted));
    assert_eq!(session.collaborators().implemented_stages(), vec!["a", "a", "b"]);
    assert_eq!(report.stages_with_gaps().count(), 1);
}

#[test]
fn long_session_compacts_its_event_log() {
    let config = WorkflowConfig {
        compaction: CompactionConfig {
            threshold: 8,
            retain_recent: 3,
            payload_size_cap: 1024,
            hard_event_cap: 100,
        },
        ..WorkflowConfig::default()
    };
    let collab = ScriptedCollaborators::new().with_plans(vec![plan(&["a", "b", "c", "d", "e", "f"])]);

    let (session, report) = run(config, collab);

    assert_eq!(report.status, SessionStatus::Finished);
    assert!(report.compaction.passes > 0);
    assert!(!session.collaborators().summarized_batches().is_empty());
    let events = session.events();
    assert_eq!(events.len(), report.event_count);
    assert!(events.len() <= 8 + 5, "log stays bounded: {}", events.len());
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
    assert!(events.iter().any(|e| e.kind == EventKind::Summary));
}

#[test]
fn summarizer_failure_falls_back_without_failing_the_session() {
    let config = WorkflowConfig {
        compaction: CompactionConfig {
            threshold: 6,
            retain_recent: 2,
            payload_size_cap: 1024,
            hard_event_cap: 100,
        },
        ..WorkflowConfig::default()
    };
    let collab = ScriptedCollaborators::new()
        .with_plans(vec![plan(&["a", "b", "c"])])
        .failing(Role::Summarizer, "summarizer offline");

    let (session, report) = run(config, collab);

    assert_eq!(report.status, SessionStatus::Finished);
    assert!(report.compaction.fallbacks > 0);
    assert!(session.events().iter().all(|e| e.kind != EventKind::Summary));
}

#[test]
fn cancellation_mid_stage_aborts_and_skips_the_report() {
    let cancel = CancelToken::new();
    let collab = ScriptedCollaborators::new()
        .with_plans(vec![plan(&["a", "b"])])
        .cancelling(Role::Implementer, &cancel);
    let mut session = Session::new(WorkflowConfig::default(), collab, cancel);

    let report = session.run("goal");

    assert_eq!(report.status, SessionStatus::Aborted);
    assert_eq!(report.error.as_ref().map(|e| e.kind), Some("cancelled"));
    assert_eq!(report.stages.len(), 2);
    assert_eq!(report.stages[0].status, StageStatus::Failed);
    assert_eq!(report.stages[0].iterations, 1);
    assert_eq!(report.stages[1].status, StageStatus::Pending);
    assert_eq!(session.collaborators().count(Role::Reviewer), 0);
    assert_eq!(session.collaborators().count(Role::Reporter), 0);
}

#[test]
fn scratch_dir_is_released_when_the_session_drops() {
    let scratch = ScratchDir::acquire(None, false).expect("scratch");
    let path = scratch.path().to_path_buf();
    let collab = ScriptedCollaborators::new().with_plans(vec![plan(&["a"])]);
    let mut session =
        Session::new(WorkflowConfig::default(), collab, CancelToken::new()).with_scratch(scratch);
    assert_eq!(session.working_dir(), Some(path.as_path()));

    let report = session.run("goal");
    assert_eq!(report.status, SessionStatus::Finished);
    assert!(path.is_dir());

    drop(session);
    assert!(!path.exists());
}

#[test]
fn independent_sessions_run_on_separate_threads() {
    let handles: Vec<_> = [vec!["a", "b"], vec!["x", "y", "z"]]
        .into_iter()
        .map(|ids| {
            thread::spawn(move || {
                let collab = ScriptedCollaborators::new().with_plans(vec![plan(&ids)]);
                let mut session = Session::new(WorkflowConfig::default(), collab, CancelToken::new());
                let report = session.run("goal");
                (report, session.collaborators().implemented_stages())
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("session thread"))
        .collect();
    assert_eq!(results[0].0.status, SessionStatus::Finished);
    assert_eq!(results[1].0.status, SessionStatus::Finished);
    assert_eq!(results[0].1, vec!["a", "b"]);
    assert_eq!(results[1].1, vec!["x", "y", "z"]);
}
