mod common;

use app_job_tracker::classifier::{
    failure_summary, mismatch_summary, Evidence, ExplicitStatus, LogPhrases, OutcomeClassifier,
    OutcomeStrategy, VanishedDefault,
};
use app_job_tracker::config::ClassifierConfig;
use app_job_tracker::types::{Classification, Confidence, JobKind, JobStatus, Presence};

use common::{make_job, make_job_with_logs};

fn classify(status: JobStatus, logs: &[&str]) -> Classification {
    let job = make_job_with_logs("job-1", status, logs);
    OutcomeClassifier::default().classify(&Evidence::observed(&job))
}

// --- Explicit status ---

#[test]
fn explicit_completed_with_completion_log_is_high_confidence_success() {
    let result = classify(
        JobStatus::Completed,
        &["Fetching hello-world...", "Job 'install' completed"],
    );
    assert_eq!(result, Classification::succeeded(Confidence::High));
}

#[test]
fn explicit_failed_overrides_success_looking_logs() {
    let result = classify(JobStatus::Failed, &["Completed successfully"]);
    assert!(result.terminal);
    assert!(!result.succeeded);
    assert_eq!(result.confidence, Confidence::High);
}

#[test]
fn explicit_completed_overrides_failure_looking_logs() {
    let result = classify(
        JobStatus::Completed,
        &["WARNING: retry failed once", "Traceback (most recent call last):"],
    );
    assert!(result.succeeded);
    assert_eq!(result.confidence, Confidence::High);
}

// --- Log heuristics ---

#[test]
fn error_line_without_status_is_medium_confidence_failure() {
    let result = classify(JobStatus::Running, &["ERROR: disk full"]);
    assert_eq!(result, Classification::failed(Confidence::Medium));
}

#[test]
fn success_phrase_is_matched_case_insensitively() {
    let result = classify(JobStatus::Running, &["Installing", "COMPLETED SUCCESSFULLY"]);
    assert_eq!(result, Classification::succeeded(Confidence::Medium));
}

#[test]
fn failure_wins_when_both_phrase_lists_match() {
    let result = classify(
        JobStatus::Running,
        &["step 1 completed successfully", "step 2 raised an Exception"],
    );
    assert_eq!(result, Classification::failed(Confidence::Medium));
}

#[test]
fn phrases_do_not_match_across_lines() {
    let result = classify(JobStatus::Running, &["job 'install'", "completed"]);
    assert!(!result.terminal);
}

#[test]
fn neutral_logs_leave_job_running() {
    let result = classify(JobStatus::Running, &["Downloading 42%", "Resolving dependencies"]);
    assert_eq!(result, Classification::still_running());
}

#[test]
fn custom_phrase_lists_replace_defaults() {
    let config = ClassifierConfig {
        success_phrases: vec!["All Good".to_string()],
        failure_phrases: vec!["kaput".to_string()],
    };
    let classifier = OutcomeClassifier::new(&config);

    let ok = make_job_with_logs("job-1", JobStatus::Running, &["all good here"]);
    assert!(classifier.classify(&Evidence::observed(&ok)).succeeded);

    // Default failure phrases no longer apply.
    let error = make_job_with_logs("job-2", JobStatus::Running, &["error: ignored"]);
    assert!(!classifier.classify(&Evidence::observed(&error)).terminal);

    let broken = make_job_with_logs("job-3", JobStatus::Running, &["Pump is KAPUT"]);
    assert_eq!(
        classifier.classify(&Evidence::observed(&broken)),
        Classification::failed(Confidence::Medium)
    );
}

// --- Vanished default ---

#[test]
fn vanished_job_is_assumed_successful_with_low_confidence() {
    let mut job = make_job("job-1", JobKind::Install, "hello-world");
    job.status = JobStatus::Running;
    job.observed = true;

    let result = OutcomeClassifier::default().classify(&Evidence::absent(&job, None));
    assert_eq!(result, Classification::succeeded(Confidence::Low));
}

#[test]
fn vanished_job_with_failure_logs_is_a_failure() {
    let mut job = make_job_with_logs("job-1", JobStatus::Running, &["Traceback: boom"]);
    job.observed = true;

    let result = OutcomeClassifier::default().classify(&Evidence::absent(&job, None));
    assert_eq!(result, Classification::failed(Confidence::Medium));
}

#[test]
fn vanished_default_never_overrides_explicit_failure() {
    let mut job = make_job("job-1", JobKind::Install, "hello-world");
    job.status = JobStatus::Failed;
    job.observed = true;

    let result = OutcomeClassifier::default().classify(&Evidence::absent(&job, None));
    assert_eq!(result, Classification::failed(Confidence::High));
}

#[test]
fn installed_list_confirms_or_contradicts_vanished_install() {
    let mut job = make_job("job-1", JobKind::Install, "hello-world");
    job.status = JobStatus::Running;
    job.observed = true;

    assert_eq!(
        VanishedDefault.evaluate(&Evidence::absent(&job, Some(true))),
        Some(Classification::succeeded(Confidence::Medium))
    );
    assert_eq!(
        VanishedDefault.evaluate(&Evidence::absent(&job, Some(false))),
        Some(Classification::failed(Confidence::Medium))
    );
}

#[test]
fn installed_list_expectation_is_inverted_for_removal() {
    let mut job = make_job("job-1", JobKind::Remove, "hello-world");
    job.observed = true;

    assert_eq!(
        VanishedDefault.evaluate(&Evidence::absent(&job, Some(false))),
        Some(Classification::succeeded(Confidence::Medium))
    );
    assert_eq!(
        VanishedDefault.evaluate(&Evidence::absent(&job, Some(true))),
        Some(Classification::failed(Confidence::Medium))
    );
}

#[test]
fn vanished_default_ignores_present_jobs() {
    let job = make_job("job-1", JobKind::Install, "hello-world");
    let evidence = Evidence {
        job: &job,
        presence: Presence::Observed,
        installed: None,
    };
    assert_eq!(VanishedDefault.evaluate(&evidence), None);
}

// --- Chain ---

#[test]
fn chain_reports_deciding_strategy() {
    let job = make_job_with_logs("job-1", JobStatus::Running, &["error: nope"]);
    let (result, source) = OutcomeClassifier::default().classify_with_source(&Evidence::observed(&job));
    assert!(!result.succeeded);
    assert_eq!(source, Some("log-phrases"));

    let job = make_job_with_logs("job-2", JobStatus::Running, &[]);
    let (_, source) = OutcomeClassifier::default().classify_with_source(&Evidence::observed(&job));
    assert_eq!(source, None);
}

#[test]
fn strategy_order_is_respected() {
    // Log phrases first: success-looking logs win over an explicit failure.
    let classifier = OutcomeClassifier::with_strategies(vec![
        Box::new(LogPhrases::new(&["done".to_string()], &[])),
        Box::new(ExplicitStatus),
    ]);
    let job = make_job_with_logs("job-1", JobStatus::Failed, &["done"]);
    assert!(classifier.classify(&Evidence::observed(&job)).succeeded);
}

// --- Summaries ---

#[test]
fn failure_summary_uses_last_log_line_or_generic_text() {
    let job = make_job_with_logs("job-1", JobStatus::Failed, &["Installing", "ERROR: disk full"]);
    assert_eq!(failure_summary(&job), "ERROR: disk full");

    let job = make_job("job-2", JobKind::Remove, "dance");
    assert_eq!(failure_summary(&job), "remove of 'dance' failed");
}

#[test]
fn mismatch_summary_names_the_app() {
    let job = make_job("job-1", JobKind::Install, "dance");
    let summary = mismatch_summary(&job, false);
    assert!(summary.contains("'dance'"), "got: {}", summary);
    assert!(summary.contains("not listed"), "got: {}", summary);
}
