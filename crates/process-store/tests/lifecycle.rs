//! Cross-database behaviour: deletion boundaries and independent failure.

use process_store::{
    Analysis, AuditAction, Config, EventType, Step, StepKind, StoreError, Workspace,
};
use tempfile::TempDir;

fn onboarding() -> Analysis {
    let mut analysis = Analysis::new("Client Onboarding", "KYC forms are emailed and re-keyed");
    analysis.industry = "Banking".into();
    analysis.desired_outcome = "Same-day account opening".into();
    analysis.current_state.steps = vec![
        Step::new("s1", "Receive application", StepKind::Start).then("s2"),
        Step::new("s2", "Manual KYC check", StepKind::Bottleneck).then("s3"),
        Step::new("s3", "Open account", StepKind::End),
    ];
    analysis
}

#[tokio::test]
async fn deleted_process_keeps_history_and_audit() {
    let dir = TempDir::new().unwrap();
    let ws = Workspace::open(&Config::with_data_dir(dir.path()));

    let saved = ws.save_analysis(onboarding(), Some("Ana")).await.unwrap();
    let mut edited = saved.clone();
    edited.title = "Client Onboarding v2".into();
    ws.save_analysis(edited, Some("Ana")).await.unwrap();
    ws.audit
        .add_audit_entry(&saved.id, AuditAction::SubmittedForReview, "Ready", None)
        .await
        .unwrap();

    assert!(ws.delete_analysis(&saved.id).await.unwrap());

    assert!(ws.processes.get_process(&saved.id).await.unwrap().is_none());
    assert!(ws.processes.get_all_processes().await.unwrap().is_empty());

    let versions = ws.processes.get_versions(&saved.id).await.unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[1].snapshot.title, "Client Onboarding v2");
    assert_eq!(ws.audit.get_audit_log(&saved.id).await.unwrap().len(), 3);

    let report = ws.audit.export_audit_log(&saved.id).await.unwrap();
    assert!(report.contains("Submitted for Review"));
}

#[tokio::test]
async fn databases_reopen_with_their_data() {
    let dir = TempDir::new().unwrap();
    let config = Config::with_data_dir(dir.path());
    let id = {
        let ws = Workspace::open(&config);
        ws.processes.set_meta("welcomeDismissed", &true).await.unwrap();
        ws.save_analysis(onboarding(), None).await.unwrap().id
    };

    let ws = Workspace::open(&config);
    let analysis = ws.processes.get_process(&id).await.unwrap().unwrap();
    assert!(analysis.validate().is_ok());
    assert_eq!(ws.processes.get_meta("welcomeDismissed").await.unwrap(), Some(serde_json::json!(true)));
    assert_eq!(ws.audit.get_audit_log(&id).await.unwrap().len(), 1);
    assert_eq!(ws.analytics.get_events(Some(EventType::ProcessCreated)).await.len(), 1);
}

#[tokio::test]
async fn unavailable_process_storage_fails_loudly_but_analytics_stays_quiet() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("occupied");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let ws = Workspace::open(&Config::with_data_dir(&blocker));

    let err = ws.save_analysis(onboarding(), None).await.unwrap_err();
    assert!(matches!(err, StoreError::StorageUnavailable(_)));
    assert!(err.is_recoverable());

    ws.record_export("anything", "pdf").await;
    assert_eq!(ws.analytics.get_analytics_stats().await.total_events, 0);
}
