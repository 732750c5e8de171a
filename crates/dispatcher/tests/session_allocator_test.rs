use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use renderfarm_core::models::{SessionState, Workspace};
use renderfarm_core::{RenderFarmError, SessionEvent};
use renderfarm_dispatcher::{SessionAllocator, SessionAllocatorConfig};
use renderfarm_testing_utils::{
    TestDatabase, WorkerBuilder, WorkspaceBuilder, TEST_API_KEY, TEST_WORKGROUP,
};

fn live_since() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now() - chrono::Duration::seconds(3)
}

async fn setup() -> Result<(TestDatabase, Arc<SessionAllocator>, Workspace)> {
    let db = TestDatabase::new().await?;
    let workspace = db.seed_workspace().await?;
    let allocator = Arc::new(SessionAllocator::new(
        SessionAllocatorConfig::default(),
        db.workers.clone(),
        db.sessions.clone(),
        db.workspaces.clone(),
    ));
    Ok((db, allocator, workspace))
}

#[tokio::test]
async fn test_concurrent_creates_never_share_a_worker() -> Result<()> {
    let (db, allocator, workspace) = setup().await?;
    db.seed_workers(&[0.2, 0.4, 0.6]).await?;

    let attempts = (0..4).map(|_| {
        let allocator = allocator.clone();
        let workspace_guid = workspace.guid.clone();
        tokio::spawn(async move {
            allocator
                .create_session(TEST_API_KEY, &workspace_guid, None)
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("任务不应panic"))
        .collect();

    let sessions: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(RenderFarmError::AllWorkersBusy)))
        .count();

    assert_eq!(sessions.len(), 3);
    assert_eq!(busy, 1);

    let claimed: HashSet<&str> = sessions.iter().map(|s| s.worker_guid.as_str()).collect();
    assert_eq!(claimed.len(), 3);

    for session in sessions {
        let worker = db.workers.get_by_guid(&session.worker_guid).await?.unwrap();
        assert_eq!(worker.session_guid.as_deref(), Some(session.guid.as_str()));
    }
    Ok(())
}

#[tokio::test]
async fn test_sessions_claim_least_loaded_worker_first() -> Result<()> {
    let (db, allocator, workspace) = setup().await?;
    db.seed_workers(&[0.9, 0.1, 0.3, 0.5]).await?;

    let mut claimed_cpus = Vec::new();
    for _ in 0..4 {
        let session = allocator
            .create_session(TEST_API_KEY, &workspace.guid, None)
            .await?;
        let worker = db.workers.get_by_guid(&session.worker_guid).await?.unwrap();
        claimed_cpus.push(worker.cpu_usage);
    }

    assert_eq!(claimed_cpus, vec![0.1, 0.3, 0.5, 0.9]);
    Ok(())
}

#[tokio::test]
async fn test_close_releases_worker_for_next_session() -> Result<()> {
    let (db, allocator, workspace) = setup().await?;
    let workers = db.seed_workers(&[0.3]).await?;

    let first = allocator
        .create_session(TEST_API_KEY, &workspace.guid, Some("scene.max".into()))
        .await?;
    assert_eq!(first.worker_guid, workers[0].guid);
    assert_eq!(first.scene_filename.as_deref(), Some("scene.max"));
    assert!(first.workspace_ref.is_some());

    let busy = allocator
        .create_session(TEST_API_KEY, &workspace.guid, None)
        .await;
    assert!(matches!(busy, Err(RenderFarmError::AllWorkersBusy)));

    let closed = allocator.close_session(&first.guid).await?;
    assert_eq!(closed.state(), SessionState::Closed);
    assert!(closed.closed_at.is_some());

    let worker = db.workers.get_by_guid(&workers[0].guid).await?.unwrap();
    assert!(worker.session_guid.is_none());

    let second = allocator
        .create_session(TEST_API_KEY, &workspace.guid, None)
        .await?;
    assert_eq!(second.worker_guid, workers[0].guid);
    Ok(())
}

#[tokio::test]
async fn test_second_close_is_rejected() -> Result<()> {
    let (db, allocator, workspace) = setup().await?;
    db.seed_workers(&[0.3]).await?;

    let session = allocator
        .create_session(TEST_API_KEY, &workspace.guid, None)
        .await?;

    allocator.close_session(&session.guid).await?;
    let again = allocator.close_session(&session.guid).await;

    assert!(matches!(again, Err(RenderFarmError::SessionNotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn test_expire_all_open_sessions_once() -> Result<()> {
    let (db, allocator, workspace) = setup().await?;
    db.seed_workers(&[0.1, 0.2, 0.3]).await?;
    let mut events = allocator.event_stream();

    for _ in 0..3 {
        allocator
            .create_session(TEST_API_KEY, &workspace.guid, None)
            .await?;
    }

    let expired = allocator.expire_sessions(0).await?;
    assert_eq!(expired.len(), 3);
    assert!(expired.iter().all(|s| s.state() == SessionState::Expired));

    let again = allocator.expire_sessions(0).await?;
    assert!(again.is_empty());

    let released = db.workers.get_available_workers(TEST_WORKGROUP, live_since()).await?;
    assert_eq!(released.len(), 3);

    let mut expired_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::Expired(_)) {
            expired_events += 1;
        }
    }
    assert_eq!(expired_events, 3);
    Ok(())
}

#[tokio::test]
async fn test_expire_keeps_recent_sessions() -> Result<()> {
    let (db, allocator, workspace) = setup().await?;
    db.seed_workers(&[0.1]).await?;

    let session = allocator
        .create_session(TEST_API_KEY, &workspace.guid, None)
        .await?;

    let expired = allocator.expire_sessions(30).await?;
    assert!(expired.is_empty());

    let still_open = allocator.get_session(&session.guid, false, false).await?;
    assert!(still_open.is_open());
    Ok(())
}

#[tokio::test]
async fn test_stale_worker_is_never_claimed() -> Result<()> {
    let (db, allocator, workspace) = setup().await?;
    db.seed_worker(WorkerBuilder::new().with_cpu(0.01).seen_seconds_ago(10).build())
        .await?;

    let result = allocator
        .create_session(TEST_API_KEY, &workspace.guid, None)
        .await;
    assert!(matches!(result, Err(RenderFarmError::AllWorkersBusy)));

    let fresh = db
        .seed_worker(WorkerBuilder::new().with_port(40100).with_cpu(0.8).build())
        .await?;
    let session = allocator
        .create_session(TEST_API_KEY, &workspace.guid, None)
        .await?;
    assert_eq!(session.worker_guid, fresh.guid);
    Ok(())
}

#[tokio::test]
async fn test_workspace_must_belong_to_caller() -> Result<()> {
    let (db, allocator, _) = setup().await?;
    db.seed_workers(&[0.1]).await?;

    let foreign = WorkspaceBuilder::new().with_api_key("someone-else").build();
    db.workspaces.insert(&foreign).await?;

    let mismatch = allocator
        .create_session(TEST_API_KEY, &foreign.guid, None)
        .await;
    assert!(matches!(
        mismatch,
        Err(RenderFarmError::WorkspaceMismatch { .. })
    ));

    let missing = allocator
        .create_session(TEST_API_KEY, "no-such-workspace", None)
        .await;
    assert!(matches!(
        missing,
        Err(RenderFarmError::WorkspaceNotFound { .. })
    ));

    // 失败的请求不会占用Worker
    let available = db.workers.get_available_workers(TEST_WORKGROUP, live_since()).await?;
    assert_eq!(available.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_fail_session_records_reason_and_releases() -> Result<()> {
    let (db, allocator, workspace) = setup().await?;
    let workers = db.seed_workers(&[0.1]).await?;
    let mut events = allocator.event_stream();

    let session = allocator
        .create_session(TEST_API_KEY, &workspace.guid, None)
        .await?;
    let failed = allocator
        .fail_session(&session.guid, "scene load failed")
        .await?;

    assert_eq!(failed.state(), SessionState::Failed);
    assert_eq!(failed.fail_reason.as_deref(), Some("scene load failed"));

    let worker = db.workers.get_by_guid(&workers[0].guid).await?.unwrap();
    assert!(worker.session_guid.is_none());

    assert!(matches!(events.try_recv()?, SessionEvent::Created(_)));
    assert!(matches!(events.try_recv()?, SessionEvent::Failed(_)));

    let again = allocator.fail_session(&session.guid, "again").await;
    assert!(matches!(again, Err(RenderFarmError::SessionNotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn test_get_session_touch_and_closed_visibility() -> Result<()> {
    let (db, allocator, workspace) = setup().await?;
    db.seed_workers(&[0.1]).await?;

    let session = allocator
        .create_session(TEST_API_KEY, &workspace.guid, None)
        .await?;
    let mut events = allocator.event_stream();

    let touched = allocator.keep_session_alive(&session.guid).await?;
    assert!(touched.last_seen >= session.last_seen);
    assert!(touched.worker_ref.is_some());
    assert!(matches!(events.try_recv()?, SessionEvent::Updated(_)));

    allocator.close_session(&session.guid).await?;

    let hidden = allocator.get_session(&session.guid, false, false).await;
    assert!(matches!(hidden, Err(RenderFarmError::SessionNotFound { .. })));

    let visible = allocator.get_session(&session.guid, true, true).await?;
    assert_eq!(visible.state(), SessionState::Closed);

    let unknown = allocator.get_session("missing", true, false).await;
    assert!(matches!(unknown, Err(RenderFarmError::SessionNotFound { .. })));
    Ok(())
}
