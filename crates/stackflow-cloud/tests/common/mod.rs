use stackflow_cloud::{StateStore, StepObserver};
use stackflow_config::{DeployConfig, WaitConfig};
use std::sync::Mutex;
use tempfile::TempDir;

pub const TIMESTAMP: u64 = 1700000000;
pub const TEARDOWN_TIMESTAMP: u64 = 1700003600;

pub struct TestProject {
    pub root: TempDir,
    pub config: DeployConfig,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();

        let mut config = DeployConfig {
            repo_url: "https://github.com/example/portfolio".to_string(),
            state_dir: root.path().join(".stackflow"),
            ..Default::default()
        };
        config.database.password = Some("s3cretpassword".to_string());
        config.waits.database = WaitConfig::new(5, 1);
        config.waits.instance = WaitConfig::new(5, 1);
        config.waits.deletion = WaitConfig::new(5, 1);
        config.delays.iam_propagation_ms = 0;
        config.delays.security_group_grace_ms = 0;

        Self { root, config }
    }

    pub fn store(&self) -> StateStore {
        StateStore::new(&self.config.state_dir)
    }
}

/// Observer that keeps every event as `kind:step`
#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    #[allow(dead_code)]
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, kind: &str, step: &str) {
        self.events.lock().unwrap().push(format!("{}:{}", kind, step));
    }
}

impl StepObserver for RecordingObserver {
    fn step_started(&self, step: &str, _description: &str) {
        self.push("started", step);
    }

    fn step_succeeded(&self, step: &str, _message: &str) {
        self.push("succeeded", step);
    }

    fn step_skipped(&self, step: &str, _reason: &str) {
        self.push("skipped", step);
    }

    fn step_failed(&self, step: &str, _error: &str) {
        self.push("failed", step);
    }

    fn warning(&self, message: &str) {
        self.push("warning", message);
    }
}
