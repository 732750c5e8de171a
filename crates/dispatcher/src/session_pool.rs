//! 会话作用域资源池
//!
//! 每个会话最多缓存一个资源，首次 [`SessionScopedResourcePool::get`] 时创建，
//! 会话关闭、过期或失败时随会话事件一起销毁。池自身没有定时过期。
//!
//! 同一会话的并发 `get` 共享一次创建（`OnceCell` 单飞），创建失败不留缓存，
//! 下一次调用会重新创建。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use renderfarm_core::models::Session;
use renderfarm_core::{EventBus, EventHandler, RenderFarmError, RenderFarmResult, SessionEvent};
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

/// 资源的创建、接纳与销毁钩子
#[async_trait]
pub trait SessionResourceHooks<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    async fn create(&self, session: &Session) -> RenderFarmResult<T>;

    /// 返回 false 时资源不会被缓存，`get` 返回 `PoolAdmissionRejected`
    async fn on_before_admit(&self, _session: &Session, _item: &T) -> bool {
        true
    }

    async fn on_before_evict(&self, _session: &Session, _item: &T) {}
}

struct Slot<T> {
    cell: OnceCell<T>,
    evicted: AtomicBool,
    torn_down: AtomicBool,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            evicted: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }
    }

    /// 保证每个资源只销毁一次
    fn claim_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::SeqCst)
    }
}

pub struct SessionScopedResourcePool<T> {
    name: &'static str,
    hooks: Arc<dyn SessionResourceHooks<T>>,
    items: Mutex<HashMap<String, Arc<Slot<T>>>>,
}

impl<T> SessionScopedResourcePool<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, hooks: Arc<dyn SessionResourceHooks<T>>) -> Self {
        Self {
            name,
            hooks,
            items: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 订阅会话终止事件
    pub async fn bind_to(self: &Arc<Self>, events: &EventBus<SessionEvent>) {
        events.subscribe(self.clone()).await;
    }

    /// 获取会话的资源，不存在时创建
    pub async fn get(&self, session: &Session) -> RenderFarmResult<T> {
        if !session.is_open() {
            return Err(RenderFarmError::session_not_found(&session.guid));
        }

        let slot = {
            let mut items = self.items.lock().await;
            items
                .entry(session.guid.clone())
                .or_insert_with(|| Arc::new(Slot::new()))
                .clone()
        };

        let result = slot
            .cell
            .get_or_try_init(|| async {
                debug!("资源池 {} 为会话 {} 创建资源", self.name, session.guid);
                let item = self.hooks.create(session).await?;
                if !self.hooks.on_before_admit(session, &item).await {
                    return Err(RenderFarmError::PoolAdmissionRejected {
                        session_guid: session.guid.clone(),
                    });
                }
                Ok(item)
            })
            .await
            .cloned();

        match result {
            Ok(item) => {
                // 与 evict 在同一把锁下判定
                let evicted = {
                    let _items = self.items.lock().await;
                    slot.evicted.load(Ordering::SeqCst)
                };
                if evicted {
                    // 创建期间会话已终止
                    if slot.claim_teardown() {
                        self.hooks.on_before_evict(session, &item).await;
                    }
                    return Err(RenderFarmError::session_not_found(&session.guid));
                }
                Ok(item)
            }
            Err(e) => {
                let mut items = self.items.lock().await;
                if let Some(current) = items.get(&session.guid) {
                    if Arc::ptr_eq(current, &slot) && !slot.cell.initialized() {
                        items.remove(&session.guid);
                    }
                }
                Err(e)
            }
        }
    }

    /// 驱逐会话的资源，返回是否有条目被移除
    pub async fn evict(&self, session: &Session) -> bool {
        let removed = {
            let mut items = self.items.lock().await;
            items.remove(&session.guid).map(|slot| {
                slot.evicted.store(true, Ordering::SeqCst);
                let item = slot.cell.get().cloned();
                (slot, item)
            })
        };

        match removed {
            Some((slot, Some(item))) => {
                if slot.claim_teardown() {
                    self.hooks.on_before_evict(session, &item).await;
                }
                debug!("资源池 {} 已驱逐会话 {}", self.name, session.guid);
                true
            }
            Some((_, None)) => {
                debug!("资源池 {} 驱逐了创建中的会话 {}", self.name, session.guid);
                true
            }
            None => false,
        }
    }

    /// 第一个满足条件的已创建资源
    pub async fn find_one<F>(&self, predicate: F) -> Option<T>
    where
        F: Fn(&str, &T) -> bool,
    {
        let items = self.items.lock().await;
        items.iter().find_map(|(guid, slot)| {
            slot.cell
                .get()
                .filter(|item| predicate(guid, item))
                .cloned()
        })
    }

    pub async fn find_all<F>(&self, predicate: F) -> Vec<T>
    where
        F: Fn(&str, &T) -> bool,
    {
        let items = self.items.lock().await;
        items
            .iter()
            .filter_map(|(guid, slot)| {
                slot.cell
                    .get()
                    .filter(|item| predicate(guid, item))
                    .cloned()
            })
            .collect()
    }

    pub async fn contains(&self, session_guid: &str) -> bool {
        let items = self.items.lock().await;
        items
            .get(session_guid)
            .is_some_and(|slot| slot.cell.initialized())
    }

    pub async fn len(&self) -> usize {
        let items = self.items.lock().await;
        items.values().filter(|slot| slot.cell.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl<T> EventHandler<SessionEvent> for SessionScopedResourcePool<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn handle(&self, event: &SessionEvent) {
        if !event.is_termination() {
            return;
        }
        let session = event.session();
        if self.evict(session).await {
            debug!("会话 {} 终止，资源池 {} 已清理", session.guid, self.name);
        }
    }
}
