//! Shared fixtures for integration tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use veritas::config::VeritasConfig;
use veritas::llm::{ChatCompleter, ChatRequest, LlmError, ScriptedCompleter};
use veritas::pipeline::{DecisionPipeline, Services};
use vt_fuji::policy::FujiPolicy;

/// A pipeline over a fresh temp data dir with a completer that always
/// returns an empty JSON object.
pub fn bootstrap_pipeline() -> (DecisionPipeline, TempDir) {
    bootstrap_with_completer(Arc::new(ScriptedCompleter::always("{}")))
}

/// A pipeline over a fresh temp data dir with the given completer.
pub fn bootstrap_with_completer(
    completer: Arc<dyn ChatCompleter>,
) -> (DecisionPipeline, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let config = VeritasConfig::for_data_dir(dir.path());
    let services = Services::bootstrap(config, completer).expect("bootstrap");
    (DecisionPipeline::new(Arc::new(services)), dir)
}

/// Like [`bootstrap_pipeline`], but with a caller-tweaked config.
pub fn bootstrap_with_config(
    configure: impl FnOnce(&mut VeritasConfig),
) -> (DecisionPipeline, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let mut config = VeritasConfig::for_data_dir(dir.path());
    configure(&mut config);
    let services = Services::bootstrap(config, Arc::new(ScriptedCompleter::always("{}")))
        .expect("bootstrap");
    (DecisionPipeline::new(Arc::new(services)), dir)
}

/// Rewrite the pipeline's policy file with `edit` applied to the current
/// baseline, then force a reload so the next decide observes it.
pub fn update_policy(pipeline: &DecisionPipeline, edit: impl FnOnce(&mut FujiPolicy)) {
    let store = pipeline.services().gate.policy_store();
    let mut policy = (*store.snapshot()).clone();
    edit(&mut policy);
    std::fs::write(store.path(), policy.to_json_string().expect("serialize"))
        .expect("write policy");
    store.try_reload().expect("reload");
}

/// A completer that sleeps long enough to trip any short deadline.
pub struct StallingCompleter;

#[async_trait]
impl ChatCompleter for StallingCompleter {
    async fn complete(&self, _request: &ChatRequest) -> Result<String, LlmError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("{}".to_string())
    }
}
