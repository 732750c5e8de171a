/// 表结构
///
/// 时间列以RFC3339文本存储，UTC下字典序与时间序一致，可直接用于范围比较。
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workers (
    guid          TEXT PRIMARY KEY,
    mac           TEXT NOT NULL,
    ip            TEXT NOT NULL,
    port          INTEGER NOT NULL,
    workgroup     TEXT NOT NULL,
    first_seen    TEXT NOT NULL,
    last_seen     TEXT NOT NULL,
    cpu_usage     REAL NOT NULL DEFAULT 0,
    ram_usage     REAL NOT NULL DEFAULT 0,
    total_ram     REAL NOT NULL DEFAULT 0,
    session_guid  TEXT
);

CREATE INDEX IF NOT EXISTS idx_workers_available
    ON workers (workgroup, session_guid, last_seen);

CREATE TABLE IF NOT EXISTS workspaces (
    guid       TEXT PRIMARY KEY,
    api_key    TEXT NOT NULL,
    workgroup  TEXT NOT NULL,
    home_dir   TEXT NOT NULL,
    name       TEXT NOT NULL,
    last_seen  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    guid            TEXT PRIMARY KEY,
    api_key         TEXT NOT NULL,
    worker_guid     TEXT NOT NULL,
    workspace_guid  TEXT NOT NULL,
    scene_filename  TEXT,
    first_seen      TEXT NOT NULL,
    last_seen       TEXT NOT NULL,
    closed          INTEGER NOT NULL DEFAULT 0,
    closed_at       TEXT,
    expired         INTEGER NOT NULL DEFAULT 0,
    failed          INTEGER NOT NULL DEFAULT 0,
    fail_reason     TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_open
    ON sessions (closed, last_seen);

CREATE TABLE IF NOT EXISTS jobs (
    guid           TEXT PRIMARY KEY,
    api_key        TEXT NOT NULL,
    session_guid   TEXT NOT NULL,
    worker_guid    TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    closed_at      TEXT,
    state          TEXT NOT NULL,
    closed         INTEGER NOT NULL DEFAULT 0,
    canceled       INTEGER NOT NULL DEFAULT 0,
    failed         INTEGER NOT NULL DEFAULT 0,
    error          TEXT,
    urls           TEXT NOT NULL DEFAULT '[]',
    camera_name    TEXT NOT NULL,
    render_width   INTEGER NOT NULL,
    render_height  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_worker_active
    ON jobs (worker_guid, closed, canceled, failed);
"#;
