use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use renderfarm_core::models::{
    Heartbeat, Job, JobState, RenderParams, Session, Worker, Workspace,
};
use renderfarm_core::traits::{JobStore, SessionStore, WorkerStore, WorkspaceStore};
use renderfarm_core::RenderFarmError;
use renderfarm_infrastructure::DatabaseManager;

const WORKGROUP: &str = "default";

fn heartbeat(port: u16, cpu: f64) -> Heartbeat {
    Heartbeat::worker("001122334455", port, cpu, 0.2, 32.0)
}

async fn seed_worker(store: &Arc<dyn WorkerStore>, port: u16, cpu: f64) -> Result<Worker> {
    let worker = Worker::from_heartbeat(&heartbeat(port, cpu), "10.0.0.5", WORKGROUP);
    store.upsert_heartbeat(&worker).await?;
    Ok(worker)
}

fn workspace() -> Workspace {
    Workspace {
        guid: "ws-1".to_string(),
        api_key: "key-1".to_string(),
        workgroup: WORKGROUP.to_string(),
        home_dir: "C:\\Farm".to_string(),
        name: "demo".to_string(),
        last_seen: Utc::now(),
    }
}

fn live_since() -> chrono::DateTime<Utc> {
    Utc::now() - Duration::seconds(3)
}

fn render_params() -> RenderParams {
    RenderParams {
        camera_name: "Camera001".to_string(),
        width: 640,
        height: 480,
    }
}

/// 写入Worker，并以 `guid` 打开认领该Worker的会话
async fn open_session(db: &DatabaseManager, guid: &str, port: u16) -> Result<Session> {
    let worker = seed_worker(&db.worker_store(), port, 0.1).await?;
    let session = Session::open(guid.to_string(), "key-1", &worker.guid, "ws-1", None);
    let created = db
        .session_store()
        .create_with_claim(&session, WORKGROUP, live_since())
        .await?
        .ok_or_else(|| anyhow::anyhow!("认领Worker失败"))?;
    Ok(created)
}

#[tokio::test]
async fn test_available_workers_sorted_by_cpu() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let workers = db.worker_store();

    for (port, cpu) in [(1001, 0.9), (1002, 0.1), (1003, 0.3), (1004, 0.5)] {
        seed_worker(&workers, port, cpu).await?;
    }

    let available = workers.get_available_workers(WORKGROUP, live_since()).await?;
    let cpus: Vec<f64> = available.iter().map(|w| w.cpu_usage).collect();
    assert_eq!(cpus, vec![0.1, 0.3, 0.5, 0.9]);

    Ok(())
}

#[tokio::test]
async fn test_claim_is_exclusive() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let workers = db.worker_store();
    let worker = seed_worker(&workers, 1001, 0.1).await?;

    let first = workers
        .try_claim(&worker.guid, "s1", WORKGROUP, live_since())
        .await?;
    let second = workers
        .try_claim(&worker.guid, "s2", WORKGROUP, live_since())
        .await?;

    assert_eq!(first.unwrap().session_guid.as_deref(), Some("s1"));
    assert!(second.is_none());

    // 只有持有者能释放
    assert!(workers.release(&worker.guid, "s2").await?.is_none());
    let released = workers.release(&worker.guid, "s1").await?.unwrap();
    assert!(released.session_guid.is_none());

    Ok(())
}

#[tokio::test]
async fn test_stale_worker_cannot_be_claimed() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let workers = db.worker_store();

    let mut worker = Worker::from_heartbeat(&heartbeat(1001, 0.1), "10.0.0.5", WORKGROUP);
    worker.last_seen = Utc::now() - Duration::seconds(10);
    workers.upsert_heartbeat(&worker).await?;

    assert!(workers
        .get_available_workers(WORKGROUP, live_since())
        .await?
        .is_empty());
    assert!(workers
        .try_claim(&worker.guid, "s1", WORKGROUP, live_since())
        .await?
        .is_none());

    Ok(())
}

#[tokio::test]
async fn test_heartbeat_upsert_keeps_claim() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let workers = db.worker_store();
    let mut worker = seed_worker(&workers, 1001, 0.1).await?;

    workers
        .try_claim(&worker.guid, "s1", WORKGROUP, live_since())
        .await?;

    worker.apply_heartbeat(&heartbeat(1001, 0.7));
    workers.upsert_heartbeat(&worker).await?;

    let stored = workers.get_by_guid(&worker.guid).await?.unwrap();
    assert_eq!(stored.session_guid.as_deref(), Some("s1"));
    assert_eq!(stored.cpu_usage, 0.7);

    Ok(())
}

#[tokio::test]
async fn test_delete_dead_workers_skips_claimed() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let workers = db.worker_store();

    let mut idle = Worker::from_heartbeat(&heartbeat(1001, 0.1), "10.0.0.5", WORKGROUP);
    idle.last_seen = Utc::now() - Duration::seconds(60);
    workers.upsert_heartbeat(&idle).await?;

    let claimed = seed_worker(&workers, 1002, 0.1).await?;
    workers
        .try_claim(&claimed.guid, "s1", WORKGROUP, live_since())
        .await?;

    let deleted = workers
        .delete_dead_workers(Utc::now() - Duration::seconds(30))
        .await?;
    assert_eq!(deleted, 1);
    assert!(workers.get_by_guid(&idle.guid).await?.is_none());
    assert!(workers.get_by_guid(&claimed.guid).await?.is_some());

    Ok(())
}

#[tokio::test]
async fn test_session_create_close_releases_worker() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let workers = db.worker_store();
    let sessions = db.session_store();
    db.workspace_store().insert(&workspace()).await?;
    let worker = seed_worker(&workers, 1001, 0.1).await?;

    let session = Session::open("s1".to_string(), "key-1", &worker.guid, "ws-1", None);
    let created = sessions
        .create_with_claim(&session, WORKGROUP, live_since())
        .await?
        .unwrap();
    assert_eq!(created.worker_ref.unwrap().session_guid.as_deref(), Some("s1"));

    let fetched = sessions.get("s1", false, true).await?.unwrap();
    assert_eq!(fetched.workspace_ref.unwrap().name, "demo");

    let closed = sessions.close("s1").await?.unwrap();
    assert!(closed.closed);
    assert!(closed.closed_at.is_some());
    assert!(closed.worker_ref.unwrap().session_guid.is_none());

    // 第二次关闭不产生任何变化
    assert!(sessions.close("s1").await?.is_none());
    assert!(sessions.get("s1", false, false).await?.is_none());
    assert!(sessions.get("s1", true, false).await?.is_some());

    Ok(())
}

#[tokio::test]
async fn test_create_fails_without_claim() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let workers = db.worker_store();
    let sessions = db.session_store();
    let worker = seed_worker(&workers, 1001, 0.1).await?;

    let first = Session::open("s1".to_string(), "key-1", &worker.guid, "ws-1", None);
    let second = Session::open("s2".to_string(), "key-1", &worker.guid, "ws-1", None);

    assert!(sessions
        .create_with_claim(&first, WORKGROUP, live_since())
        .await?
        .is_some());
    assert!(sessions
        .create_with_claim(&second, WORKGROUP, live_since())
        .await?
        .is_none());

    // 失败的创建不留下会话记录
    assert!(sessions.get("s2", true, false).await?.is_none());
    assert_eq!(sessions.list_open().await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_expire_is_idempotent() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let workers = db.worker_store();
    let sessions = db.session_store();
    let worker = seed_worker(&workers, 1001, 0.1).await?;

    let session = Session::open("s1".to_string(), "key-1", &worker.guid, "ws-1", None);
    sessions
        .create_with_claim(&session, WORKGROUP, live_since())
        .await?;

    let expired = sessions.expire(Utc::now() + Duration::seconds(1)).await?;
    assert_eq!(expired.len(), 1);
    assert!(expired[0].expired);
    assert!(expired[0].closed);

    let again = sessions.expire(Utc::now() + Duration::seconds(1)).await?;
    assert!(again.is_empty());

    let worker = workers.get_by_guid(&worker.guid).await?.unwrap();
    assert!(worker.session_guid.is_none());

    Ok(())
}

#[tokio::test]
async fn test_fail_records_reason() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let workers = db.worker_store();
    let sessions = db.session_store();
    let worker = seed_worker(&workers, 1001, 0.1).await?;

    let session = Session::open("s1".to_string(), "key-1", &worker.guid, "ws-1", None);
    sessions
        .create_with_claim(&session, WORKGROUP, live_since())
        .await?;

    let failed = sessions.fail("s1", "scene load failed").await?.unwrap();
    assert!(failed.failed);
    assert_eq!(failed.fail_reason.as_deref(), Some("scene load failed"));
    assert!(sessions.close("s1").await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_one_active_job_per_worker() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let jobs = db.job_store();
    let session = open_session(&db, "s1", 1001).await?;
    let params = render_params();

    let first = Job::new("key-1", &session, &params);
    let second = Job::new("key-1", &session, &params);

    assert!(jobs.create_if_worker_idle(&first).await?.is_some());
    assert!(jobs.create_if_worker_idle(&second).await?.is_none());

    jobs.update_state(&first.guid, JobState::Connected).await?;
    jobs.update_state(&first.guid, JobState::Rendering).await?;
    let urls = vec!["https://farm/v1/renderoutput/x.png".to_string()];
    let completed = jobs.complete(&first.guid, &urls).await?.unwrap();
    assert_eq!(completed.state, JobState::Completed);
    assert_eq!(completed.urls, urls);
    assert!(completed.closed_at.is_some());

    // 完成后Worker空闲，可以创建新作业
    assert!(jobs.create_if_worker_idle(&second).await?.is_some());
    assert_eq!(jobs.get_active_jobs(&session.worker_guid).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_canceled_job_ignores_late_completion() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let jobs = db.job_store();
    let session = open_session(&db, "s1", 1001).await?;
    let job = Job::new("key-1", &session, &render_params());
    assert!(jobs.create_if_worker_idle(&job).await?.is_some());

    let canceled = jobs.cancel(&job.guid).await?.unwrap();
    assert_eq!(canceled.state, JobState::Canceled);

    assert!(jobs.complete(&job.guid, &[]).await?.is_none());
    assert!(jobs
        .update_state(&job.guid, JobState::Rendering)
        .await?
        .is_none());
    assert_eq!(
        jobs.get(&job.guid).await?.unwrap().state,
        JobState::Canceled
    );

    Ok(())
}

#[tokio::test]
async fn test_job_requires_open_session_holding_worker() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let jobs = db.job_store();
    let session = open_session(&db, "s1", 1001).await?;

    db.session_store().close("s1").await?;

    // 关闭前取得的会话副本仍标记为打开
    assert!(session.is_open());
    let job = Job::new("key-1", &session, &render_params());
    let result = jobs.create_if_worker_idle(&job).await;
    assert!(matches!(
        result,
        Err(RenderFarmError::SessionNotFound { ref guid }) if guid == "s1"
    ));
    assert!(jobs.get(&job.guid).await?.is_none());

    // 打开的会话不能在别的Worker上创建作业
    open_session(&db, "s2", 1002).await?;
    let mismatched = Session::open("s2".to_string(), "key-1", &session.worker_guid, "ws-1", None);
    let job = Job::new("key-1", &mismatched, &render_params());
    assert!(jobs.create_if_worker_idle(&job).await.is_err());
    assert!(jobs.get_active_jobs(&session.worker_guid).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_workspace_lookup_is_scoped_to_workgroup() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let store = db.workspace_store();
    store.insert(&workspace()).await?;

    assert!(store.get("ws-1", WORKGROUP).await?.is_some());
    assert!(store.get("ws-1", "other").await?.is_none());
    assert!(store.get("missing", WORKGROUP).await?.is_none());

    Ok(())
}
