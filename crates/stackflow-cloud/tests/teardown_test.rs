mod common;

use common::{RecordingObserver, TEARDOWN_TIMESTAMP, TIMESTAMP, TestProject};
use stackflow_cloud::{
    AssumeYes, CloudError, ConfirmationPrompt, MemoryBehavior, MemoryProvider, Provisioner,
    RecordKey, StateStore, StepResult, Teardown, TeardownPlan,
};
use std::sync::Mutex;

/// Prompt that answers no and remembers what it was shown
#[derive(Default)]
struct Decline {
    shown: Mutex<Option<TeardownPlan>>,
}

impl ConfirmationPrompt for Decline {
    fn confirm(&self, plan: &TeardownPlan) -> stackflow_cloud::Result<bool> {
        *self.shown.lock().unwrap() = Some(plan.clone());
        Ok(false)
    }
}

async fn provisioned(project: &TestProject, provider: &MemoryProvider) -> StateStore {
    let store = project.store();
    Provisioner::new(provider, &project.config, &store, TIMESTAMP)
        .run()
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn test_end_to_end_removes_everything() {
    let project = TestProject::new();
    let provider = MemoryProvider::new("us-east-1");
    let store = provisioned(&project, &provider).await;

    assert_eq!(
        provider.bucket_names().await,
        vec!["portfolio-app-1700000000".to_string()]
    );
    provider
        .put_object("portfolio-app-1700000000", "uploads/avatar.png", b"png")
        .await
        .unwrap();

    let report = Teardown::new(&provider, &project.config, &store, TEARDOWN_TIMESTAMP)
        .run(&AssumeYes)
        .await
        .unwrap();

    assert!(report.is_success(), "{:?}", report.failed());
    assert!(report.skipped().is_empty());
    assert!(provider.is_empty().await);
    assert_eq!(provider.call_count("delete_bucket").await, 1);
    assert!(
        provider
            .calls()
            .await
            .contains(&"delete_bucket:portfolio-app-1700000000".to_string())
    );

    // Record retired, backup named by the teardown time
    assert!(!store.exists());
    let backup = report.backup.unwrap();
    assert!(backup.ends_with("deployment.env.1700003600.backup"));
    let content = std::fs::read_to_string(backup).unwrap();
    assert!(content.contains("S3_BUCKET=portfolio-app-1700000000"));
}

#[tokio::test]
async fn test_security_groups_deleted_db_first() {
    let project = TestProject::new();
    let provider = MemoryProvider::new("us-east-1");
    let store = provisioned(&project, &provider).await;
    let record = store.load().await.unwrap();
    let web = record.get(RecordKey::WebSecurityGroup).unwrap().to_string();
    let db = record.get(RecordKey::DbSecurityGroup).unwrap().to_string();

    Teardown::new(&provider, &project.config, &store, TEARDOWN_TIMESTAMP)
        .run(&AssumeYes)
        .await
        .unwrap();

    let calls = provider.calls().await;
    let position = |call: String| calls.iter().position(|c| *c == call).unwrap();
    assert!(
        position(format!("delete_security_group:{}", db))
            < position(format!("delete_security_group:{}", web))
    );
}

#[tokio::test]
async fn test_missing_keys_are_skipped() {
    let project = TestProject::new();
    let provider = MemoryProvider::with_behavior(
        "us-east-1",
        MemoryBehavior {
            database_ready_after: None,
            ..Default::default()
        },
    );
    let store = project.store();

    // Provisioning stops at the database; no endpoint, instance or address
    let err = Provisioner::new(&provider, &project.config, &store, TIMESTAMP)
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::StageFailed { .. }));

    let report = Teardown::new(&provider, &project.config, &store, TEARDOWN_TIMESTAMP)
        .run(&AssumeYes)
        .await
        .unwrap();

    assert!(report.is_success(), "{:?}", report.failed());
    let skipped: Vec<&str> = report
        .skipped()
        .iter()
        .map(|s| s.step.as_str())
        .collect();
    assert_eq!(skipped, vec!["instance"]);
    assert!(provider.is_empty().await);
    assert!(!store.exists());
    assert!(report.backup.is_some());
}

#[tokio::test]
async fn test_custom_policy_name_is_removed() {
    let project = TestProject::new();
    let provider = MemoryProvider::new("us-east-1");
    let store = project.store();

    let mut provisioning = project.config.clone();
    provisioning.names.policy = Some("custom-policy".to_string());
    let report = Provisioner::new(&provider, &provisioning, &store, TIMESTAMP)
        .run()
        .await
        .unwrap();
    assert_eq!(
        report.record.get(RecordKey::RolePolicy),
        Some("custom-policy")
    );

    // Teardown runs with the default policy name in its config
    let report = Teardown::new(&provider, &project.config, &store, TEARDOWN_TIMESTAMP)
        .run(&AssumeYes)
        .await
        .unwrap();

    assert!(report.is_success(), "{:?}", report.failed());
    let policy_step = report
        .steps
        .iter()
        .find(|s| s.step == "role-policy")
        .unwrap();
    assert!(matches!(policy_step.result, StepResult::Success(_)));
    assert_eq!(
        policy_step.result.message(),
        "inline policies of role portfolio-app-ec2-role deleted"
    );
    assert!(
        provider
            .calls()
            .await
            .contains(&"delete_role_policy:portfolio-app-ec2-role".to_string())
    );
    assert!(provider.is_empty().await);
    assert!(!store.exists());
}

#[tokio::test]
async fn test_record_without_policy_key_still_tears_down() {
    let project = TestProject::new();
    let provider = MemoryProvider::new("us-east-1");
    let store = provisioned(&project, &provider).await;

    // Run interrupted between the role and its policy key, or a hand edit
    let contents = std::fs::read_to_string(store.record_path()).unwrap();
    let trimmed: String = contents
        .lines()
        .filter(|line| !line.starts_with("IAM_POLICY="))
        .map(|line| format!("{}\n", line))
        .collect();
    assert_ne!(contents, trimmed);
    std::fs::write(store.record_path(), trimmed).unwrap();

    let report = Teardown::new(&provider, &project.config, &store, TEARDOWN_TIMESTAMP)
        .run(&AssumeYes)
        .await
        .unwrap();

    assert!(report.is_success(), "{:?}", report.failed());
    let policy_step = report
        .steps
        .iter()
        .find(|s| s.step == "role-policy")
        .unwrap();
    assert!(matches!(policy_step.result, StepResult::Success(_)));
    let role_step = report.steps.iter().find(|s| s.step == "role").unwrap();
    assert!(matches!(role_step.result, StepResult::Success(_)));
    assert!(provider.role_names().await.is_empty());
    assert!(provider.is_empty().await);
    assert!(!store.exists());
    assert!(report.backup.is_some());
}

#[tokio::test]
async fn test_record_with_only_bucket() {
    let project = TestProject::new();
    let provider = MemoryProvider::new("us-east-1");
    let store = project.store();

    store.begin("us-east-1", TIMESTAMP).await.unwrap();
    store
        .save(RecordKey::Bucket, "portfolio-app-1700000000")
        .await
        .unwrap();
    // Gone already, e.g. removed by hand
    let report = Teardown::new(&provider, &project.config, &store, TEARDOWN_TIMESTAMP)
        .run(&AssumeYes)
        .await
        .unwrap();

    assert!(report.is_success());
    let bucket = report.steps.iter().find(|s| s.step == "bucket").unwrap();
    assert!(matches!(bucket.result, StepResult::Skipped(_)));
    assert_eq!(report.skipped().len(), report.steps.len());
    assert!(!store.exists());
}

#[tokio::test]
async fn test_declined_confirmation_changes_nothing() {
    let project = TestProject::new();
    let provider = MemoryProvider::new("us-east-1");
    let store = provisioned(&project, &provider).await;
    let before = provider.calls().await.len();
    let prompt = Decline::default();

    let err = Teardown::new(&provider, &project.config, &store, TEARDOWN_TIMESTAMP)
        .run(&prompt)
        .await
        .unwrap_err();

    assert!(matches!(err, CloudError::ConfirmationDeclined));
    assert!(store.exists());
    assert_eq!(provider.calls().await.len(), before);

    let plan = prompt.shown.lock().unwrap().clone().unwrap();
    assert!(plan.has_changes);
    assert_eq!(plan.summary().delete, plan.actions.len());
}

#[tokio::test]
async fn test_failing_step_does_not_stop_later_steps() {
    let project = TestProject::new();
    let provider = MemoryProvider::with_behavior(
        "us-east-1",
        MemoryBehavior::default().failing("delete_bucket"),
    );
    let store = provisioned(&project, &provider).await;
    let observer = RecordingObserver::default();

    let report = Teardown::new(&provider, &project.config, &store, TEARDOWN_TIMESTAMP)
        .with_observer(&observer)
        .run(&AssumeYes)
        .await
        .unwrap();

    assert!(!report.is_success());
    let failed: Vec<&str> = report.failed().iter().map(|s| s.step.as_str()).collect();
    assert_eq!(failed, vec!["bucket"]);

    // Everything after the bucket still ran
    assert!(provider.role_names().await.is_empty());
    assert!(provider.security_group_ids().await.is_empty());
    assert_eq!(
        provider.bucket_names().await,
        vec!["portfolio-app-1700000000".to_string()]
    );
    assert!(
        observer
            .events()
            .contains(&"failed:bucket".to_string())
    );

    // The record stays for a retry
    assert!(store.exists());
    assert!(report.backup.is_none());
}

#[tokio::test]
async fn test_retry_after_failure_completes() {
    let project = TestProject::new();
    let failing = MemoryProvider::with_behavior(
        "us-east-1",
        MemoryBehavior::default().failing("delete_role"),
    );
    let store = provisioned(&project, &failing).await;

    let first = Teardown::new(&failing, &project.config, &store, TEARDOWN_TIMESTAMP)
        .run(&AssumeYes)
        .await
        .unwrap();
    assert!(!first.is_success());
    assert!(store.exists());

    // Second run against a provider where everything is gone already
    let empty = MemoryProvider::new("us-east-1");
    let second = Teardown::new(&empty, &project.config, &store, TEARDOWN_TIMESTAMP + 60)
        .run(&AssumeYes)
        .await
        .unwrap();
    assert!(second.is_success());
    assert!(!store.exists());
}

#[tokio::test]
async fn test_no_record_is_an_error() {
    let project = TestProject::new();
    let provider = MemoryProvider::new("us-east-1");
    let store = project.store();

    let err = Teardown::new(&provider, &project.config, &store, TEARDOWN_TIMESTAMP)
        .run(&AssumeYes)
        .await
        .unwrap_err();

    assert!(matches!(err, CloudError::StateStoreMissing(_)));
    assert!(provider.calls().await.is_empty());
}
