mod common;

use common::{RecordingObserver, TIMESTAMP, TestProject};
use stackflow_cloud::{
    BootstrapTemplate, CloudError, MemoryBehavior, MemoryProvider, Provisioner, RecordKey, Stage,
    StepResult,
};

#[tokio::test]
async fn test_provision_records_every_key() {
    let project = TestProject::new();
    let store = project.store();
    let provider = MemoryProvider::new("us-east-1");

    let report = Provisioner::new(&provider, &project.config, &store, TIMESTAMP)
        .run()
        .await
        .unwrap();

    for key in RecordKey::ALL {
        assert!(report.record.contains(key), "missing {}", key);
    }
    assert_eq!(
        report.record.get(RecordKey::Bucket),
        Some("portfolio-app-1700000000")
    );
    assert_eq!(
        report.record.get(RecordKey::DbInstance),
        Some("portfolio-app-db-1700000000")
    );
    assert_eq!(report.record.get(RecordKey::Timestamp), Some("1700000000"));
    assert_eq!(report.app_url.as_deref(), Some("http://203.0.113.10"));
    assert!(report.warnings.is_empty());
    assert!(report.steps.iter().all(|s| !s.result.is_failed()));

    // The record on disk matches what the report says
    assert_eq!(store.load().await.unwrap(), report.record);
}

#[tokio::test]
async fn test_bootstrap_payload_carries_database_endpoint() {
    let project = TestProject::new();
    let store = project.store();
    let provider = MemoryProvider::new("us-east-1");

    let report = Provisioner::new(&provider, &project.config, &store, TIMESTAMP)
        .run()
        .await
        .unwrap();

    let instance_id = report.record.get(RecordKey::Instance).unwrap();
    let user_data = provider.instance_user_data(instance_id).await.unwrap();
    assert!(user_data.contains("DB_HOST=portfolio-app-db-1700000000.memory.rds.local"));
    assert!(user_data.contains("S3_BUCKET=portfolio-app-1700000000"));
    assert!(user_data.contains("git clone 'https://github.com/example/portfolio'"));
    assert!(!user_data.contains("@@"));
}

#[tokio::test]
async fn test_custom_template_and_fixed_names() {
    let project = TestProject::new();
    let store = project.store();
    let provider = MemoryProvider::new("us-east-1");
    let template =
        BootstrapTemplate::parse("#!/bin/bash\necho @@S3_BUCKET@@ @@DB_PORT@@\n").unwrap();

    let report = Provisioner::new(&provider, &project.config, &store, TIMESTAMP)
        .with_template(template)
        .run()
        .await
        .unwrap();

    let instance_id = report.record.get(RecordKey::Instance).unwrap();
    assert_eq!(
        provider.instance_user_data(instance_id).await.unwrap(),
        "#!/bin/bash\necho portfolio-app-1700000000 5432\n"
    );

    assert_eq!(
        provider.profile_names().await,
        vec!["portfolio-app-ec2-profile".to_string()]
    );
    assert_eq!(
        provider.subnet_group_names().await,
        vec![report.record.get(RecordKey::DbSubnetGroup).unwrap().to_string()]
    );
    assert_eq!(
        provider.database_ids().await,
        vec!["portfolio-app-db-1700000000".to_string()]
    );
}

#[tokio::test]
async fn test_security_group_rules() {
    let project = TestProject::new();
    let store = project.store();
    let provider = MemoryProvider::new("us-east-1");

    let report = Provisioner::new(&provider, &project.config, &store, TIMESTAMP)
        .run()
        .await
        .unwrap();

    let web = report.record.get(RecordKey::WebSecurityGroup).unwrap();
    let db = report.record.get(RecordKey::DbSecurityGroup).unwrap();

    let web_ports: Vec<u16> = provider
        .ingress_rules(web)
        .await
        .iter()
        .map(|r| r.port)
        .collect();
    assert_eq!(web_ports, vec![22, 80, 3000]);

    let db_rules = provider.ingress_rules(db).await;
    assert_eq!(db_rules.len(), 1);
    assert_eq!(db_rules[0].port, 5432);
    assert_eq!(
        db_rules[0].source,
        stackflow_cloud::provider::IngressSource::SecurityGroup(web.to_string())
    );
}

#[tokio::test]
async fn test_role_already_exists_does_not_stop_pipeline() {
    let project = TestProject::new();
    let store = project.store();
    let provider = MemoryProvider::with_behavior(
        "us-east-1",
        MemoryBehavior {
            role_already_exists_on_create: true,
            ..Default::default()
        },
    );

    let report = Provisioner::new(&provider, &project.config, &store, TIMESTAMP)
        .run()
        .await
        .unwrap();

    assert_eq!(
        report.record.get(RecordKey::Role),
        Some("portfolio-app-ec2-role")
    );
    assert!(report.record.contains(RecordKey::PublicIp));
}

#[tokio::test]
async fn test_database_timeout_aborts_before_instance() {
    let project = TestProject::new();
    let store = project.store();
    let provider = MemoryProvider::with_behavior(
        "us-east-1",
        MemoryBehavior {
            database_ready_after: None,
            ..Default::default()
        },
    );

    let err = Provisioner::new(&provider, &project.config, &store, TIMESTAMP)
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Database));
    assert_eq!(Stage::Database.number(), 4);
    match &err {
        CloudError::StageFailed {
            resource, source, ..
        } => {
            assert_eq!(resource.as_deref(), Some("portfolio-app-db-1700000000"));
            assert!(matches!(**source, CloudError::Timeout { .. }));
        }
        other => panic!("unexpected error: {}", other),
    }

    // Stages 1-3 and the database identifier survive for cleanup
    let record = store.load().await.unwrap();
    for key in [
        RecordKey::Bucket,
        RecordKey::Role,
        RecordKey::InstanceProfile,
        RecordKey::WebSecurityGroup,
        RecordKey::DbSecurityGroup,
        RecordKey::DbSubnetGroup,
        RecordKey::DbInstance,
    ] {
        assert!(record.contains(key), "missing {}", key);
    }
    assert!(!record.contains(RecordKey::DbEndpoint));
    assert!(!record.contains(RecordKey::Instance));

    assert_eq!(provider.call_count("run_instance").await, 0);
    assert!(provider.live_instance_ids().await.is_empty());
}

#[tokio::test]
async fn test_rejected_bucket_policy_is_a_warning() {
    let project = TestProject::new();
    let store = project.store();
    let provider = MemoryProvider::with_behavior(
        "us-east-1",
        MemoryBehavior {
            reject_public_bucket_policy: true,
            ..Default::default()
        },
    );
    let observer = RecordingObserver::default();

    let report = Provisioner::new(&provider, &project.config, &store, TIMESTAMP)
        .with_observer(&observer)
        .run()
        .await
        .unwrap();

    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("portfolio-app-1700000000"));
    assert!(report.record.contains(RecordKey::PublicIp));
    assert!(
        observer
            .events()
            .iter()
            .any(|e| e.starts_with("warning:"))
    );
}

#[tokio::test]
async fn test_unauthenticated_fails_preflight_without_touching_anything() {
    let project = TestProject::new();
    let store = project.store();
    let provider = MemoryProvider::with_behavior(
        "us-east-1",
        MemoryBehavior {
            authenticated: false,
            ..Default::default()
        },
    );

    let err = Provisioner::new(&provider, &project.config, &store, TIMESTAMP)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, CloudError::Preflight(_)));
    assert!(!store.exists());
    assert_eq!(provider.calls().await, vec!["check_auth:us-east-1".to_string()]);
}

#[tokio::test]
async fn test_missing_password_fails_preflight() {
    let mut project = TestProject::new();
    project.config.database.password = None;
    let store = project.store();
    let provider = MemoryProvider::new("us-east-1");

    let err = Provisioner::new(&provider, &project.config, &store, TIMESTAMP)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, CloudError::Preflight(_)));
    assert!(provider.calls().await.is_empty());
}

#[tokio::test]
async fn test_existing_record_refuses_to_start() {
    let project = TestProject::new();
    let store = project.store();
    let provider = MemoryProvider::new("us-east-1");

    store.begin("us-east-1", TIMESTAMP - 100).await.unwrap();

    let err = Provisioner::new(&provider, &project.config, &store, TIMESTAMP)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, CloudError::RecordExists(_)));
    assert!(provider.bucket_names().await.is_empty());
}

#[tokio::test]
async fn test_stage_events_in_order() {
    let project = TestProject::new();
    let store = project.store();
    let provider = MemoryProvider::new("us-east-1");
    let observer = RecordingObserver::default();

    let report = Provisioner::new(&provider, &project.config, &store, TIMESTAMP)
        .with_observer(&observer)
        .run()
        .await
        .unwrap();

    let started: Vec<String> = observer
        .events()
        .into_iter()
        .filter_map(|e| e.strip_prefix("started:").map(str::to_string))
        .collect();
    let expected: Vec<String> = Stage::ALL.iter().map(|s| s.id().to_string()).collect();
    assert_eq!(started, expected);

    let step_ids: Vec<&str> = report.steps.iter().map(|s| s.step.as_str()).collect();
    assert_eq!(
        step_ids,
        vec![
            "preflight",
            "bucket",
            "identity-role",
            "security-groups",
            "database",
            "compute-instance"
        ]
    );
    assert!(matches!(report.steps[0].result, StepResult::Success(_)));
}
