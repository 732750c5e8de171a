//! 具体的会话资源池：远程连接与场景对象缓存

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use renderfarm_core::models::Session;
use renderfarm_core::traits::{RemoteClient, RemoteClientFactory};
use renderfarm_core::{RenderFarmError, RenderFarmResult};
use renderfarm_infrastructure::remote::RemoteCommands;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::session_pool::{SessionResourceHooks, SessionScopedResourcePool};

pub type ConnectionPool = SessionScopedResourcePool<Arc<dyn RemoteClient>>;

/// 场景根节点名称
const SCENE_ROOT: &str = "root";

/// 远程连接钩子
///
/// 创建时连接会话所认领的Worker，接纳前初始化远端会话上下文，驱逐时断开。
pub struct ConnectionHooks {
    factory: Arc<dyn RemoteClientFactory>,
}

impl ConnectionHooks {
    pub fn new(factory: Arc<dyn RemoteClientFactory>) -> Self {
        Self { factory }
    }

    async fn prepare(&self, session: &Session, client: &dyn RemoteClient) -> RenderFarmResult<()> {
        client
            .execute(&RemoteCommands::set_session(&session.guid))
            .await?;

        if let Some(workspace) = &session.workspace_ref {
            client
                .execute(&RemoteCommands::set_workspace(workspace))
                .await?;

            if let Some(scene) = &session.scene_filename {
                client
                    .execute(&RemoteCommands::open_scene(SCENE_ROOT, scene, workspace))
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SessionResourceHooks<Arc<dyn RemoteClient>> for ConnectionHooks {
    async fn create(&self, session: &Session) -> RenderFarmResult<Arc<dyn RemoteClient>> {
        let worker = session
            .worker_ref
            .as_ref()
            .ok_or_else(|| RenderFarmError::WorkerNotFound {
                guid: session.worker_guid.clone(),
            })?;

        let client = self.factory.create();
        client.connect(&worker.ip, worker.port).await?;
        info!("会话 {} 已连接Worker {}", session.guid, worker.endpoint());
        Ok(client)
    }

    async fn on_before_admit(&self, session: &Session, client: &Arc<dyn RemoteClient>) -> bool {
        match self.prepare(session, client.as_ref()).await {
            Ok(()) => true,
            Err(e) => {
                warn!("初始化会话 {} 的远端上下文失败: {}", session.guid, e);
                client.disconnect().await;
                false
            }
        }
    }

    async fn on_before_evict(&self, session: &Session, client: &Arc<dyn RemoteClient>) {
        debug!("断开会话 {} 的远程连接", session.guid);
        client.disconnect().await;
    }
}

pub fn connection_pool(factory: Arc<dyn RemoteClientFactory>) -> ConnectionPool {
    SessionScopedResourcePool::new("connections", Arc::new(ConnectionHooks::new(factory)))
}

/// 场景对象uuid到远端绑定名的映射
#[derive(Debug)]
pub struct BindingCache {
    kind: &'static str,
    bindings: RwLock<HashMap<String, String>>,
}

impl BindingCache {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            bindings: RwLock::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub async fn get(&self, uuid: &str) -> Option<String> {
        self.bindings.read().await.get(uuid).cloned()
    }

    /// 返回被替换的旧绑定
    pub async fn insert(&self, uuid: &str, binding: &str) -> Option<String> {
        self.bindings
            .write()
            .await
            .insert(uuid.to_string(), binding.to_string())
    }

    pub async fn remove(&self, uuid: &str) -> Option<String> {
        self.bindings.write().await.remove(uuid)
    }

    pub async fn contains(&self, uuid: &str) -> bool {
        self.bindings.read().await.contains_key(uuid)
    }

    pub async fn len(&self) -> usize {
        self.bindings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.bindings.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.bindings.write().await.clear();
    }
}

pub type BindingCachePool = SessionScopedResourcePool<Arc<BindingCache>>;

struct BindingCacheHooks {
    kind: &'static str,
}

#[async_trait]
impl SessionResourceHooks<Arc<BindingCache>> for BindingCacheHooks {
    async fn create(&self, _session: &Session) -> RenderFarmResult<Arc<BindingCache>> {
        Ok(Arc::new(BindingCache::new(self.kind)))
    }

    async fn on_before_evict(&self, session: &Session, cache: &Arc<BindingCache>) {
        debug!(
            "清理会话 {} 的{}缓存 ({} 条)",
            session.guid,
            self.kind,
            cache.len().await
        );
        cache.clear().await;
    }
}

pub fn geometry_cache_pool() -> BindingCachePool {
    SessionScopedResourcePool::new("geometry", Arc::new(BindingCacheHooks { kind: "geometry" }))
}

pub fn material_cache_pool() -> BindingCachePool {
    SessionScopedResourcePool::new("material", Arc::new(BindingCacheHooks { kind: "material" }))
}
