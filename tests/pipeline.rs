//! End-to-end analysis runs against fake cluster, metrics and LLM backends.

mod common;

use common::*;

use gpuwarden::analysis::{AnalysisError, QueueError, ReviewStatus, PHASE2_NOT_EVALUATED};
use gpuwarden::inspect::script::TRUNCATION_MARKER;
use gpuwarden::storage::RecordStore;

const PHASE1_HIGH: &str = r#"{"pid":1234,"score":8,"reason":"near-zero utilization, memory held"}"#;
const PHASE2_HIGH: &str = r#"{"score":9,"reason":"script sleeps in a loop without compute"}"#;

#[tokio::test]
async fn test_idle_job_scored_in_two_phases() {
    let h = Harness::new();
    h.seed_idle_job(&gpu_job(1, "train-a", 3));
    h.llm.reply(PHASE1_HIGH);
    h.llm.reply(&format!("```json\n{}\n```", PHASE2_HIGH));

    let (service, _worker) = h.service();
    let record = service.analyze_job("train-a").await.unwrap();

    assert_eq!(record.phase1_score, 8);
    assert_eq!(record.phase2_score, 9);
    assert_eq!(record.review_status, ReviewStatus::Pending);
    assert_eq!(record.command, "python idle_hold.py");
    assert_eq!(record.script_content, IDLE_SCRIPT);
    assert_eq!(record.model_version, "fake-model");
    assert_eq!(record.pod_name, "train-a-default0-0");
    assert!(record.metrics_snapshot.contains("gpuUtilAvg"));
    assert!(record.id.is_some());

    let prompts = h.llm.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("idle_hold.py"));
    assert!(prompts[1].contains("time.sleep(60)"));

    let live = h.records.list_live().unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, record.id);
}

#[tokio::test]
async fn test_low_score_skips_phase2() {
    let h = Harness::new();
    h.seed_idle_job(&gpu_job(1, "train-a", 3));
    h.llm.reply(r#"{"pid":1234,"score":2,"reason":"busy"}"#);

    let (service, _worker) = h.service();
    let record = service.analyze_job("train-a").await.unwrap();

    assert_eq!(record.phase1_score, 2);
    assert_eq!(record.phase2_score, PHASE2_NOT_EVALUATED);
    assert_eq!(record.command, "python idle_hold.py");
    assert!(record.script_content.is_empty());
    assert_eq!(h.llm.prompts().len(), 1);
    assert!(!h.pods.calls().iter().any(|c| c.starts_with("cat /home")));
}

#[tokio::test]
async fn test_phase1_failure_saves_nothing() {
    let h = Harness::new();
    h.seed_idle_job(&gpu_job(1, "train-a", 3));
    h.llm.fail(503);

    let (service, _worker) = h.service();
    let err = service.analyze_job("train-a").await.unwrap_err();
    assert!(matches!(err, AnalysisError::Llm { .. }), "got {err}");
    assert!(h.records.list_live().unwrap().is_empty());
}

#[tokio::test]
async fn test_phase1_garbage_is_an_llm_error() {
    let h = Harness::new();
    h.seed_idle_job(&gpu_job(1, "train-a", 3));
    h.llm.reply("I think this job is fine.");

    let (service, _worker) = h.service();
    let err = service.analyze_job("train-a").await.unwrap_err();
    assert!(matches!(err, AnalysisError::Llm { .. }), "got {err}");
}

#[tokio::test]
async fn test_missing_metrics_and_process_table_do_not_abort() {
    let mut h = Harness::new();
    h.metrics = None;
    h.seed_idle_job(&gpu_job(1, "train-a", 3));
    h.pods.fail(PS, "ps: not found");
    h.llm.reply(r#"{"score":1,"reason":"no data"}"#);

    let (service, _worker) = h.service();
    let record = service.analyze_job("train-a").await.unwrap();

    assert_eq!(record.phase1_score, 1);
    assert!(record.metrics_snapshot.contains("\"gpuUtilAvg\":0.0"));
    // No pid from the model and no table: the container's init process.
    assert!(h.pods.calls().contains(&"cat /proc/1/cmdline".to_string()));
}

#[tokio::test]
async fn test_null_pid_falls_back_to_process_table() {
    let h = Harness::new();
    h.seed_idle_job(&gpu_job(1, "train-a", 3));
    h.llm.reply(r#"{"pid":null,"score":8,"reason":"near-zero utilization"}"#);
    h.llm.reply(r#"{"score":9,"reason":null}"#);

    let (service, _worker) = h.service();
    let record = service.analyze_job("train-a").await.unwrap();

    assert!(h.pods.calls().contains(&"cat /proc/1234/cmdline".to_string()));
    assert_eq!(record.command, "python idle_hold.py");
    assert_eq!(record.phase1_score, 8);
    assert_eq!(record.phase2_score, 9);
    assert!(record.phase2_reason.is_empty());
}

#[tokio::test]
async fn test_absolute_script_path_read_directly() {
    let h = Harness::new();
    h.seed_idle_job(&gpu_job(1, "train-a", 3));
    h.pods.respond("cat /proc/1234/cmdline", "python\0/work/idle_hold.py\0");
    h.pods.respond("cat /work/idle_hold.py", IDLE_SCRIPT);
    h.llm.reply(PHASE1_HIGH);
    h.llm.reply(PHASE2_HIGH);

    let (service, _worker) = h.service();
    let record = service.analyze_job("train-a").await.unwrap();

    assert_eq!(record.command, "python /work/idle_hold.py");
    assert_eq!(record.script_content, IDLE_SCRIPT);
    assert_eq!(record.phase2_score, 9);
    let calls = h.pods.calls();
    assert!(!calls.iter().any(|c| c.starts_with("stat ") || c.starts_with("runuser ")));
}

#[tokio::test]
async fn test_long_script_stored_truncated() {
    let h = Harness::new();
    h.seed_idle_job(&gpu_job(1, "train-a", 3));
    h.pods.respond("cat /home/alice/idle_hold.py", &"x".repeat(20_000));
    h.llm.reply(PHASE1_HIGH);
    h.llm.reply(PHASE2_HIGH);

    let (service, _worker) = h.service();
    let record = service.analyze_job("train-a").await.unwrap();

    assert!(record.script_content.ends_with(TRUNCATION_MARKER));
    assert_eq!(record.script_content.chars().count(), 15_000 + TRUNCATION_MARKER.chars().count());
    let stored = h.records.get(record.id.unwrap()).unwrap().unwrap();
    assert_eq!(stored.script_content, record.script_content);
}

#[tokio::test]
async fn test_phase2_failure_keeps_script() {
    let h = Harness::new();
    h.seed_idle_job(&gpu_job(1, "train-a", 3));
    h.llm.reply(PHASE1_HIGH);
    h.llm.fail(500);

    let (service, _worker) = h.service();
    let record = service.analyze_job("train-a").await.unwrap();

    assert_eq!(record.phase1_score, 8);
    assert_eq!(record.phase2_score, PHASE2_NOT_EVALUATED);
    assert!(record.phase2_reason.is_empty());
    assert_eq!(record.script_content, IDLE_SCRIPT);
}

#[tokio::test]
async fn test_command_without_script_records_phase1_only() {
    let h = Harness::new();
    h.seed_idle_job(&gpu_job(1, "train-a", 3));
    h.pods.respond("cat /proc/1234/cmdline", "/usr/bin/sleep\0infinity\0");
    h.llm.reply(PHASE1_HIGH);

    let (service, _worker) = h.service();
    let record = service.analyze_job("train-a").await.unwrap();

    assert_eq!(record.command, "/usr/bin/sleep infinity");
    assert_eq!(record.phase2_score, PHASE2_NOT_EVALUATED);
    assert!(record.script_content.is_empty());
    assert_eq!(h.llm.prompts().len(), 1);
}

#[tokio::test]
async fn test_pending_finding_replaced_reviewed_finding_kept() {
    let h = Harness::new();
    h.seed_idle_job(&gpu_job(1, "train-a", 3));
    let (service, _worker) = h.service();

    h.llm.reply(r#"{"pid":1234,"score":2,"reason":"first look"}"#);
    let first = service.analyze_job("train-a").await.unwrap();

    h.llm.reply(r#"{"pid":1234,"score":3,"reason":"second look"}"#);
    let second = service.analyze_job("train-a").await.unwrap();
    assert_ne!(first.id, second.id);
    assert!(h.records.get(first.id.unwrap()).unwrap().is_none());

    assert!(h
        .records
        .set_review_status(second.id.unwrap(), ReviewStatus::Confirmed)
        .unwrap());

    h.llm.reply(r#"{"pid":1234,"score":1,"reason":"third look"}"#);
    let third = service.analyze_job("train-a").await.unwrap();
    assert_eq!(third.id, second.id);
    assert_eq!(third.phase1_reason, "second look");
    assert_eq!(third.review_status, ReviewStatus::Confirmed);
    assert_eq!(h.records.list_live().unwrap().len(), 1);
}

#[tokio::test]
async fn test_changed_command_archives_previous_finding() {
    let h = Harness::new();
    h.seed_idle_job(&gpu_job(1, "train-a", 3));
    let (service, _worker) = h.service();

    h.llm.reply(r#"{"pid":1234,"score":2,"reason":"first"}"#);
    let first = service.analyze_job("train-a").await.unwrap();

    h.pods.respond("cat /proc/1234/cmdline", "python\0train.py\0");
    h.llm.reply(r#"{"pid":1234,"score":2,"reason":"second"}"#);
    let second = service.analyze_job("train-a").await.unwrap();

    let archived = h.records.get(first.id.unwrap()).unwrap().unwrap();
    assert!(!archived.is_live());
    let live = h.records.list_live().unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, second.id);
}

#[tokio::test]
async fn test_job_lookup_errors() {
    let h = Harness::new();
    let (service, _worker) = h.service();

    let err = service.analyze_job("ghost").await.unwrap_err();
    assert!(matches!(err, AnalysisError::NotFound(_)), "got {err}");

    // Too young to qualify.
    h.jobs.upsert(&gpu_job(2, "fresh", 0)).unwrap();
    let err = service.analyze_job("fresh").await.unwrap_err();
    assert!(matches!(err, AnalysisError::NotEligible { .. }), "got {err}");

    // Eligible but no pod.
    h.jobs.upsert(&gpu_job(3, "podless", 3)).unwrap();
    let err = service.analyze_job("podless").await.unwrap_err();
    assert!(matches!(err, AnalysisError::NotFound(_)), "got {err}");
    assert!(err.to_string().contains("no running pod"));
    assert!(h.llm.prompts().is_empty());
}

#[tokio::test]
async fn test_analyze_pod_skips_eligibility() {
    let h = Harness::new();
    let pod = h.seed_idle_job(&gpu_job(1, "fresh", 0));
    h.llm.reply(r#"{"pid":1234,"score":2,"reason":"warming up"}"#);

    let (service, _worker) = h.service();
    let record = service.analyze_pod(&pod.namespace, &pod.name).await.unwrap();
    assert_eq!(record.job_name, "fresh");
    assert_eq!(record.job_id, 1);

    let err = service.analyze_pod("jobs", "missing-pod").await.unwrap_err();
    assert!(matches!(err, AnalysisError::NotFound(_)), "got {err}");
}

#[tokio::test]
async fn test_disabled_analysis_never_touches_cluster() {
    let mut h = Harness::new();
    h.config.llm.enabled = false;
    h.seed_idle_job(&gpu_job(1, "train-a", 3));

    let (service, _worker) = h.service();
    let err = service.analyze_job("train-a").await.unwrap_err();
    assert!(matches!(err, AnalysisError::Configuration(_)), "got {err}");
    assert!(err.to_string().contains("disabled"));

    let err = service.trigger_all_eligible().await.unwrap_err();
    assert!(matches!(err, AnalysisError::Configuration(_)), "got {err}");
    assert!(h.pods.calls().is_empty());
}

#[tokio::test]
async fn test_trigger_all_drains_through_worker() {
    let h = Harness::new();
    h.seed_idle_job(&gpu_job(1, "train-a", 3));
    h.seed_idle_job(&gpu_job(2, "train-b", 5));
    h.jobs.upsert(&gpu_job(3, "fresh", 0)).unwrap();
    h.llm.reply(r#"{"pid":1234,"score":2,"reason":"a"}"#);
    h.llm.reply(r#"{"pid":1234,"score":2,"reason":"b"}"#);

    let (service, worker) = h.service();
    let handler = service.job_handler();
    assert_eq!(service.trigger_all_eligible().await.unwrap(), 2);

    drop(service);
    worker.run(handler).await;

    let mut names: Vec<String> = h.records.list_live().unwrap().into_iter().map(|r| r.job_name).collect();
    names.sort();
    assert_eq!(names, vec!["train-a", "train-b"]);
}

#[tokio::test]
async fn test_trigger_all_with_nothing_running() {
    let h = Harness::new();
    let (service, _worker) = h.service();
    assert_eq!(service.trigger_all_eligible().await.unwrap(), 0);
}

#[tokio::test]
async fn test_trigger_all_reports_full_queue() {
    let mut h = Harness::new();
    h.config.patrol.queue_capacity = 1;
    h.jobs.upsert(&gpu_job(1, "train-a", 3)).unwrap();
    h.jobs.upsert(&gpu_job(2, "train-b", 3)).unwrap();

    let (service, _worker) = h.service();
    let err = service.trigger_all_eligible().await.unwrap_err();
    assert!(
        matches!(err, AnalysisError::Queue(QueueError::Full { enqueued: 1 })),
        "got {err}"
    );
    assert_eq!(service.queue().tracker().len(), 1);
}

#[tokio::test]
async fn test_stale_finding_swept_after_job_finishes() {
    let h = Harness::new();
    let mut job = gpu_job(1, "train-a", 3);
    h.seed_idle_job(&job);
    h.llm.reply(r#"{"pid":1234,"score":2,"reason":"a"}"#);

    let (service, _worker) = h.service();
    service.analyze_job("train-a").await.unwrap();

    job.status = gpuwarden::jobs::JobStatus::Completed;
    h.jobs.upsert(&job).unwrap();
    assert_eq!(service.sweeper().sweep_stale().await.unwrap(), 1);
    assert!(h.records.list_live().unwrap().is_empty());
}
