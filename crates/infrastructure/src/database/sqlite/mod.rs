pub mod sqlite_job_store;
pub mod sqlite_session_store;
pub mod sqlite_worker_store;
pub mod sqlite_workspace_store;

pub use sqlite_job_store::SqliteJobStore;
pub use sqlite_session_store::SqliteSessionStore;
pub use sqlite_worker_store::SqliteWorkerStore;
pub use sqlite_workspace_store::SqliteWorkspaceStore;
