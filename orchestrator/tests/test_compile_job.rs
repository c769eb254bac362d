//! Compile job manager tests

mod common;

use std::sync::Arc;

use sketchdeploy::compile::job::{CommandType, CompileJobManager, CompilePayload};
use sketchdeploy::errors::OrchestratorError;
use sketchdeploy::session::cache::{MemorySessionStore, SessionCache, SessionStore};

use common::{FakeBuilder, UNO};

fn payload(command_type: CommandType, should_cache: bool) -> CompilePayload {
    CompilePayload {
        fqbn: UNO.to_string(),
        board_type: None,
        sketch_id: "sk-1".to_string(),
        sketch_name: "Blink".to_string(),
        command_type,
        should_cache,
        verbose: false,
        ota: false,
        secrets_include_injected: false,
    }
}

fn manager(builder: Arc<FakeBuilder>) -> (Arc<CompileJobManager>, Arc<MemorySessionStore>) {
    let store = Arc::new(MemorySessionStore::default());
    let cache = Arc::new(SessionCache::new(store.clone()));
    (Arc::new(CompileJobManager::new(builder, cache)), store)
}

#[tokio::test]
async fn test_create_caches_handle() {
    let builder = Arc::new(FakeBuilder::default());
    let (jobs, store) = manager(builder.clone());

    let job = jobs.create(payload(CommandType::Upload, true)).await.unwrap();

    assert_eq!(job.id, "C1");
    assert_eq!(jobs.current().map(|j| j.id), Some("C1".to_string()));
    assert_eq!(store.load().await.unwrap(), Some(format!("C1|upload|{UNO}")));
}

#[tokio::test]
async fn test_uncached_job_leaves_store_alone() {
    let builder = Arc::new(FakeBuilder::default());
    let (jobs, store) = manager(builder);

    jobs.create(payload(CommandType::Verify, false)).await.unwrap();

    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_second_create_while_pending_is_rejected() {
    let builder = Arc::new(FakeBuilder::default());
    let gate = builder.gate_creation();
    let (jobs, _store) = manager(builder.clone());

    let first = {
        let jobs = jobs.clone();
        tokio::spawn(async move { jobs.create(payload(CommandType::Verify, true)).await })
    };
    while !jobs.is_creating() {
        tokio::task::yield_now().await;
    }

    let second = jobs.create(payload(CommandType::Verify, true)).await;
    assert!(matches!(second, Err(OrchestratorError::CreationInFlight)));

    // the rejected call never reached the build service
    gate.notify_one();
    assert!(first.await.unwrap().is_ok());
    assert_eq!(builder.count("create:"), 1);
}

#[tokio::test]
async fn test_cancel_during_creation() {
    let builder = Arc::new(FakeBuilder::default());
    let _gate = builder.gate_creation();
    let (jobs, _store) = manager(builder.clone());

    let pending = {
        let jobs = jobs.clone();
        tokio::spawn(async move { jobs.create(payload(CommandType::Upload, true)).await })
    };
    while !jobs.is_creating() {
        tokio::task::yield_now().await;
    }

    jobs.cancel().await.unwrap();

    assert!(matches!(pending.await.unwrap(), Err(OrchestratorError::Cancelled)));
    assert!(jobs.current().is_none());
    assert!(!jobs.is_creating());
}

#[tokio::test]
async fn test_cancel_created_job_clears_cache() {
    let builder = Arc::new(FakeBuilder::default());
    let (jobs, store) = manager(builder.clone());
    jobs.create(payload(CommandType::Upload, true)).await.unwrap();

    jobs.cancel().await.unwrap();

    assert_eq!(builder.position("cancel:C1"), Some(1));
    assert!(jobs.current().is_none());
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_remote_cancel_failure_still_clears_locally() {
    let builder = Arc::new(FakeBuilder::default());
    builder.fail_cancel(500);
    let (jobs, store) = manager(builder);
    jobs.create(payload(CommandType::Upload, true)).await.unwrap();

    let result = jobs.cancel().await;

    assert_eq!(result.unwrap_err().status(), Some(500));
    assert!(jobs.current().is_none());
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_creation_is_not_retried() {
    let builder = Arc::new(FakeBuilder::default());
    builder.fail_creation(503);
    let (jobs, store) = manager(builder.clone());

    let result = jobs.create(payload(CommandType::Verify, true)).await;

    assert_eq!(result.unwrap_err().status(), Some(503));
    assert_eq!(builder.count("create:"), 1);
    assert!(!jobs.is_creating());
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_complete_forgets_job() {
    let builder = Arc::new(FakeBuilder::default());
    let (jobs, store) = manager(builder.clone());
    jobs.create(payload(CommandType::Verify, true)).await.unwrap();

    jobs.complete().await.unwrap();

    assert!(jobs.current().is_none());
    assert!(store.load().await.unwrap().is_none());
    assert_eq!(builder.count("cancel:"), 0);
}
