use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use renderfarm_core::config::AppConfig;
use renderfarm_core::{handler_fn, DomainEvent, RenderFarmResult, SessionEvent, WorkerEvent};
use renderfarm_dispatcher::{
    connection_pool, geometry_cache_pool, material_cache_pool, BindingCachePool, ConnectionPool,
    ExpirationWatchdog, ExpirationWatchdogConfig, JobScheduler, SessionAllocator,
    SessionAllocatorConfig, WorkerRegistry, WorkerRegistryConfig,
};
use renderfarm_infrastructure::{DatabaseManager, TcpRemoteClientFactory};
use renderfarm_worker::SimulatedFleet;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 调度服务：心跳监听、会话分配、作业执行
    Serve,
    /// 仅运行模拟节点
    Simulate,
    /// 调度服务加模拟节点
    All,
}

impl AppMode {
    fn serves(&self) -> bool {
        matches!(self, AppMode::Serve | AppMode::All)
    }

    fn simulates(&self) -> bool {
        matches!(self, AppMode::Simulate | AppMode::All)
    }
}

/// 调度端的全部服务及其依赖
pub struct FleetServices {
    pub database: DatabaseManager,
    pub registry: Arc<WorkerRegistry>,
    pub allocator: Arc<SessionAllocator>,
    pub connections: Arc<ConnectionPool>,
    pub geometry: Arc<BindingCachePool>,
    pub materials: Arc<BindingCachePool>,
    pub scheduler: Arc<JobScheduler>,
    pub watchdog: Arc<ExpirationWatchdog>,
}

impl FleetServices {
    /// 打开数据库并组装服务，资源池订阅会话终止事件
    pub async fn build(config: &AppConfig) -> Result<Self> {
        let database = DatabaseManager::new(&config.database)
            .await
            .context("创建数据库连接池失败")?;
        database.migrate().await.context("初始化数据库表结构失败")?;

        let registry = Arc::new(WorkerRegistry::new(
            WorkerRegistryConfig::from(&config.fleet),
            database.worker_store(),
        ));

        let allocator = Arc::new(SessionAllocator::new(
            SessionAllocatorConfig::from(config),
            database.worker_store(),
            database.session_store(),
            database.workspace_store(),
        ));

        let factory = Arc::new(TcpRemoteClientFactory::new(Duration::from_secs(
            config.render.connect_timeout_seconds,
        )));
        let connections = Arc::new(connection_pool(factory));
        let geometry = Arc::new(geometry_cache_pool());
        let materials = Arc::new(material_cache_pool());
        for pool in [&geometry, &materials] {
            pool.bind_to(allocator.events()).await;
        }
        connections.bind_to(allocator.events()).await;

        let scheduler = Arc::new(JobScheduler::new(
            config.render.clone(),
            database.job_store(),
            database.session_store(),
            Arc::clone(&connections),
        ));

        let watchdog = Arc::new(ExpirationWatchdog::new(
            Arc::clone(&allocator),
            ExpirationWatchdogConfig::from(&config.sessions),
        ));

        allocator
            .subscribe(handler_fn(|event: SessionEvent| async move {
                debug!(event = event.event_type(), session = %event.aggregate_id(), "会话事件");
            }))
            .await;
        registry
            .subscribe(handler_fn(|event: WorkerEvent| async move {
                if matches!(event, WorkerEvent::Offline(_)) {
                    warn!(worker = %event.aggregate_id(), "Worker离线");
                }
            }))
            .await;

        Ok(Self {
            database,
            registry,
            allocator,
            connections,
            geometry,
            materials,
            scheduler,
            watchdog,
        })
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    services: Option<FleetServices>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let services = if mode.serves() {
            Some(FleetServices::build(&config).await?)
        } else {
            None
        };

        Ok(Self {
            config,
            mode,
            services,
        })
    }

    pub fn services(&self) -> Option<&FleetServices> {
        self.services.as_ref()
    }

    /// 运行直到收到关闭信号；心跳端口无法绑定时返回错误
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        let fleet = if self.mode.simulates() {
            let fleet = SimulatedFleet::new(
                self.config.simulation.clone(),
                self.config.fleet.heartbeat_port,
            );
            fleet.start().await.context("启动模拟节点失败")?;
            Some(fleet)
        } else {
            None
        };

        let result = match &self.services {
            Some(services) => self.run_broker(services, shutdown_rx).await,
            None => {
                wait_for(shutdown_rx).await;
                Ok(())
            }
        };

        if let Some(fleet) = fleet {
            fleet.stop().await;
        }
        result
    }

    async fn run_broker(
        &self,
        services: &FleetServices,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!("启动调度服务，工作组: {}", self.config.fleet.workgroup);

        let mut listener: Option<JoinHandle<RenderFarmResult<()>>> =
            if self.config.fleet.listener_enabled() {
                let registry = Arc::clone(&services.registry);
                let rx = shutdown_rx.resubscribe();
                Some(tokio::spawn(async move { registry.listen(rx).await }))
            } else {
                warn!("心跳端口为0，不启动心跳监听");
                None
            };

        let watchdog_handle = {
            let watchdog = Arc::clone(&services.watchdog);
            let rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { watchdog.run(rx).await })
        };

        let (outcome, listener_finished) = tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("调度服务收到关闭信号");
                (Ok(()), false)
            }
            joined = async {
                match listener.as_mut() {
                    Some(handle) => handle.await,
                    None => std::future::pending().await,
                }
            } => {
                let outcome = match joined {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(anyhow::Error::new(e).context("心跳监听启动失败")),
                    Err(e) => Err(anyhow::Error::new(e).context("心跳监听任务异常退出")),
                };
                (outcome, true)
            }
        };

        if let Some(handle) = listener.filter(|_| !listener_finished) {
            if let Ok(Err(e)) = handle.await {
                warn!("心跳监听退出时出错: {}", e);
            }
        }
        if outcome.is_err() {
            watchdog_handle.abort();
        }
        let _ = watchdog_handle.await;

        services.database.close().await;
        info!("调度服务已停止");
        outcome
    }
}

async fn wait_for(mut shutdown_rx: broadcast::Receiver<()>) {
    let _ = shutdown_rx.recv().await;
    info!("收到关闭信号");
}
