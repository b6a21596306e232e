//! Test configuration helpers for creating orchestrators that write into temp directories

use std::path::PathBuf;
use std::time::Duration;

use bundle_dl::{Config, TransferOrchestrator};
use tempfile::TempDir;

/// Config writing into `<temp>/downloads` with fast retries
pub fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.persist.output_dir = temp_dir.path().join("downloads");
    config.fetch.timeout = Duration::from_secs(10);
    config.retry.max_attempts = 1;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.jitter = false;
    config
}

/// Orchestrator over HTTP and disk persistence, with its temp directory
pub fn create_test_orchestrator() -> (TransferOrchestrator, TempDir) {
    create_test_orchestrator_with(|_| {})
}

/// Like [`create_test_orchestrator`], adjusting the config first
pub fn create_test_orchestrator_with(
    adjust: impl FnOnce(&mut Config),
) -> (TransferOrchestrator, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = test_config(&temp_dir);
    adjust(&mut config);
    let orchestrator =
        TransferOrchestrator::from_config(config).expect("Failed to create orchestrator");
    (orchestrator, temp_dir)
}

/// Directory the orchestrator writes into
pub fn output_dir(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("downloads")
}
