//! 领域事件
//!
//! 每个服务内部组合一个 [`EventBus`]，而不是继承事件发射器。
//! 订阅方式有两种：
//!
//! - [`EventBus::subscribe`]：注册类型化的异步处理器，`emit` 会依次等待所有处理器完成。
//!   资源池的清理依赖这一点，会话关闭返回时池中条目已被驱逐。
//! - [`EventBus::stream`]：`tokio::sync::broadcast` 扇出，适合HTTP层等慢速消费者，
//!   消费过慢时可能收到 `Lagged`。

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

use crate::models::{Job, Session, Spawner, Worker};

/// 领域事件基础trait
pub trait DomainEvent: Clone + Send + Sync + 'static {
    fn event_type(&self) -> &'static str;
    fn aggregate_id(&self) -> String;
}

/// 会话生命周期事件
#[derive(Debug, Clone, Serialize)]
pub enum SessionEvent {
    Created(Session),
    Updated(Session),
    Closed(Session),
    Expired(Session),
    Failed(Session),
}

impl SessionEvent {
    pub fn session(&self) -> &Session {
        match self {
            SessionEvent::Created(s)
            | SessionEvent::Updated(s)
            | SessionEvent::Closed(s)
            | SessionEvent::Expired(s)
            | SessionEvent::Failed(s) => s,
        }
    }

    /// 关闭、过期、失败
    pub fn is_termination(&self) -> bool {
        matches!(
            self,
            SessionEvent::Closed(_) | SessionEvent::Expired(_) | SessionEvent::Failed(_)
        )
    }
}

impl DomainEvent for SessionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::Created(_) => "session:created",
            SessionEvent::Updated(_) => "session:updated",
            SessionEvent::Closed(_) => "session:closed",
            SessionEvent::Expired(_) => "session:expired",
            SessionEvent::Failed(_) => "session:failed",
        }
    }

    fn aggregate_id(&self) -> String {
        self.session().guid.clone()
    }
}

/// Worker与Spawner事件
#[derive(Debug, Clone, Serialize)]
pub enum WorkerEvent {
    Added(Worker),
    Updated(Worker),
    Offline(Worker),
    SpawnerAdded(Spawner),
    SpawnerUpdated(Spawner),
}

impl DomainEvent for WorkerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WorkerEvent::Added(_) => "worker:added",
            WorkerEvent::Updated(_) => "worker:updated",
            WorkerEvent::Offline(_) => "worker:offline",
            WorkerEvent::SpawnerAdded(_) => "spawner:added",
            WorkerEvent::SpawnerUpdated(_) => "spawner:updated",
        }
    }

    fn aggregate_id(&self) -> String {
        match self {
            WorkerEvent::Added(w) | WorkerEvent::Updated(w) | WorkerEvent::Offline(w) => {
                w.guid.clone()
            }
            WorkerEvent::SpawnerAdded(s) | WorkerEvent::SpawnerUpdated(s) => {
                format!("{}{}", s.ip, s.mac)
            }
        }
    }
}

/// 作业事件
#[derive(Debug, Clone, Serialize)]
pub enum JobEvent {
    Added(Job),
    Updated(Job),
    Completed(Job),
    Failed(Job),
    Canceled(Job),
}

impl JobEvent {
    pub fn job(&self) -> &Job {
        match self {
            JobEvent::Added(j)
            | JobEvent::Updated(j)
            | JobEvent::Completed(j)
            | JobEvent::Failed(j)
            | JobEvent::Canceled(j) => j,
        }
    }
}

impl DomainEvent for JobEvent {
    fn event_type(&self) -> &'static str {
        match self {
            JobEvent::Added(_) => "job:added",
            JobEvent::Updated(_) => "job:updated",
            JobEvent::Completed(_) => "job:completed",
            JobEvent::Failed(_) => "job:failed",
            JobEvent::Canceled(_) => "job:canceled",
        }
    }

    fn aggregate_id(&self) -> String {
        self.job().guid.clone()
    }
}

/// 类型化事件处理器
#[async_trait]
pub trait EventHandler<E>: Send + Sync {
    async fn handle(&self, event: &E);
}

struct FnEventHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<E, F, Fut> EventHandler<E> for FnEventHandler<F, Fut>
where
    E: Clone + Send + Sync + 'static,
    F: Fn(E) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, event: &E) {
        (self.f)(event.clone()).await
    }
}

/// 用闭包构造事件处理器
pub fn handler_fn<E, F, Fut>(f: F) -> Arc<dyn EventHandler<E>>
where
    E: Clone + Send + Sync + 'static,
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnEventHandler {
        f,
        _marker: PhantomData,
    })
}

/// 进程内事件总线
pub struct EventBus<E: DomainEvent> {
    handlers: RwLock<Vec<Arc<dyn EventHandler<E>>>>,
    sender: broadcast::Sender<E>,
}

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

impl<E: DomainEvent> EventBus<E> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            handlers: RwLock::new(Vec::new()),
            sender,
        }
    }

    pub async fn subscribe(&self, handler: Arc<dyn EventHandler<E>>) {
        self.handlers.write().await.push(handler);
    }

    pub fn stream(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// 依次调用所有处理器，然后广播
    pub async fn emit(&self, event: E) {
        let handlers = self.handlers.read().await.clone();
        tracing::trace!(
            event_type = event.event_type(),
            aggregate_id = %event.aggregate_id(),
            handlers = handlers.len(),
            "emit"
        );
        for handler in handlers {
            handler.handle(&event).await;
        }
        // 没有接收者时send返回错误，忽略
        let _ = self.sender.send(event);
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl<E: DomainEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
