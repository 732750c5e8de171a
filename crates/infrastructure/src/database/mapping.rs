//! 行到领域模型的映射

use renderfarm_core::models::{Job, JobState, Session, Worker, Workspace};
use renderfarm_core::{RenderFarmError, RenderFarmResult};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub const WORKER_COLUMNS: &str =
    "guid, mac, ip, port, workgroup, first_seen, last_seen, cpu_usage, ram_usage, total_ram, session_guid";

pub const SESSION_COLUMNS: &str = "guid, api_key, worker_guid, workspace_guid, scene_filename, first_seen, last_seen, closed, closed_at, expired, failed, fail_reason";

pub const JOB_COLUMNS: &str = "guid, api_key, session_guid, worker_guid, created_at, updated_at, closed_at, state, closed, canceled, failed, error, urls, camera_name, render_width, render_height";

pub const WORKSPACE_COLUMNS: &str = "guid, api_key, workgroup, home_dir, name, last_seen";

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn row_to_worker(row: &SqliteRow) -> RenderFarmResult<Worker> {
        let port: i64 = row.try_get("port")?;
        let port = u16::try_from(port)
            .map_err(|_| RenderFarmError::Internal(format!("无效的端口值: {port}")))?;

        Ok(Worker {
            guid: row.try_get("guid")?,
            mac: row.try_get("mac")?,
            ip: row.try_get("ip")?,
            port,
            workgroup: row.try_get("workgroup")?,
            first_seen: row.try_get("first_seen")?,
            last_seen: row.try_get("last_seen")?,
            cpu_usage: row.try_get("cpu_usage")?,
            ram_usage: row.try_get("ram_usage")?,
            total_ram: row.try_get("total_ram")?,
            session_guid: row.try_get("session_guid")?,
        })
    }

    /// 引用字段由存储按需补全
    pub fn row_to_session(row: &SqliteRow) -> RenderFarmResult<Session> {
        Ok(Session {
            guid: row.try_get("guid")?,
            api_key: row.try_get("api_key")?,
            worker_guid: row.try_get("worker_guid")?,
            workspace_guid: row.try_get("workspace_guid")?,
            scene_filename: row.try_get("scene_filename")?,
            first_seen: row.try_get("first_seen")?,
            last_seen: row.try_get("last_seen")?,
            closed: row.try_get("closed")?,
            closed_at: row.try_get("closed_at")?,
            expired: row.try_get("expired")?,
            failed: row.try_get("failed")?,
            fail_reason: row.try_get("fail_reason")?,
            worker_ref: None,
            workspace_ref: None,
        })
    }

    pub fn row_to_job(row: &SqliteRow) -> RenderFarmResult<Job> {
        let state: String = row.try_get("state")?;
        let state = state.parse::<JobState>().map_err(RenderFarmError::Internal)?;

        let urls: String = row.try_get("urls")?;
        let urls: Vec<String> = serde_json::from_str(&urls)
            .map_err(|e| RenderFarmError::Serialization(format!("解析作业URL列表失败: {e}")))?;

        let render_width: i64 = row.try_get("render_width")?;
        let render_height: i64 = row.try_get("render_height")?;

        Ok(Job {
            guid: row.try_get("guid")?,
            api_key: row.try_get("api_key")?,
            session_guid: row.try_get("session_guid")?,
            worker_guid: row.try_get("worker_guid")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            closed_at: row.try_get("closed_at")?,
            state,
            closed: row.try_get("closed")?,
            canceled: row.try_get("canceled")?,
            failed: row.try_get("failed")?,
            error: row.try_get("error")?,
            urls,
            camera_name: row.try_get("camera_name")?,
            render_width: Self::dimension(render_width)?,
            render_height: Self::dimension(render_height)?,
        })
    }

    pub fn row_to_workspace(row: &SqliteRow) -> RenderFarmResult<Workspace> {
        Ok(Workspace {
            guid: row.try_get("guid")?,
            api_key: row.try_get("api_key")?,
            workgroup: row.try_get("workgroup")?,
            home_dir: row.try_get("home_dir")?,
            name: row.try_get("name")?,
            last_seen: row.try_get("last_seen")?,
        })
    }

    fn dimension(value: i64) -> RenderFarmResult<u32> {
        u32::try_from(value)
            .map_err(|_| RenderFarmError::Internal(format!("无效的分辨率值: {value}")))
    }
}
