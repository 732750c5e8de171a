use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use renderfarm::{AppMode, Application, ShutdownManager};
use renderfarm_core::config::AppConfig;
use renderfarm_testing_utils::{TestEnv, WorkspaceBuilder, TEST_API_KEY, TEST_WORKGROUP};
use tempfile::{NamedTempFile, TempDir};

fn free_udp_port() -> Result<u16> {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0")?;
    Ok(socket.local_addr()?.port())
}

fn test_config(heartbeat_port: u16) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = "sqlite::memory:".to_string();
    config.fleet.heartbeat_bind_address = "127.0.0.1".to_string();
    config.fleet.heartbeat_port = heartbeat_port;
    config.fleet.listener_retry_count = 1;
    config.fleet.listener_retry_delay_ms = 10;
    config.simulation.target_host = "127.0.0.1".to_string();
    config.simulation.worker_count = 2;
    config.simulation.heartbeat_interval_ms = 50;
    config
}

#[tokio::test]
async fn test_simulated_workers_become_claimable() -> Result<()> {
    let config = test_config(free_udp_port()?);
    let app = std::sync::Arc::new(Application::new(config, AppMode::All).await?);
    let shutdown = ShutdownManager::new();

    let runner = {
        let app = app.clone();
        let shutdown_rx = shutdown.subscribe().await;
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    let services = app.services().expect("All模式应包含调度服务");
    let registry = services.registry.clone();
    let registered = TestEnv::wait_for(
        || {
            let registry = registry.clone();
            async move { registry.live_workers().await.len() == 2 }
        },
        Duration::from_secs(3),
    )
    .await;
    assert!(registered);
    assert_eq!(services.registry.available_workers().await?.len(), 2);

    let workspace = WorkspaceBuilder::new().build();
    services.database.workspace_store().insert(&workspace).await?;
    let session = services
        .allocator
        .create_session(TEST_API_KEY, &workspace.guid, None)
        .await?;
    assert_eq!(services.registry.available_workers().await?.len(), 1);

    services.allocator.close_session(&session.guid).await?;
    assert_eq!(services.registry.available_workers().await?.len(), 2);

    shutdown.shutdown().await;
    tokio::time::timeout(Duration::from_secs(5), runner).await???;
    Ok(())
}

#[tokio::test]
async fn test_disabled_listener_still_serves_until_shutdown() -> Result<()> {
    let app = Application::new(test_config(0), AppMode::Serve).await?;
    let shutdown = ShutdownManager::new();
    let shutdown_rx = shutdown.subscribe().await;

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.shutdown().await;
    });

    tokio::time::timeout(Duration::from_secs(2), app.run(shutdown_rx)).await??;
    stopper.await?;
    Ok(())
}

#[tokio::test]
async fn test_occupied_heartbeat_port_is_fatal() -> Result<()> {
    let occupied = std::net::UdpSocket::bind("127.0.0.1:0")?;
    let port = occupied.local_addr()?.port();

    let app = Application::new(test_config(port), AppMode::Serve).await?;
    let shutdown = ShutdownManager::new();

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        app.run(shutdown.subscribe().await),
    )
    .await?;

    assert!(result.is_err());
    Ok(())
}

#[tokio::test]
async fn test_simulate_mode_has_no_broker() -> Result<()> {
    let app = Application::new(test_config(free_udp_port()?), AppMode::Simulate).await?;
    assert!(app.services().is_none());
    Ok(())
}

#[tokio::test]
async fn test_file_database_survives_restart() -> Result<()> {
    let dir = TempDir::new()?;
    let db_path = dir.path().join("farm.db");

    let mut file = NamedTempFile::new_in(dir.path())?;
    writeln!(
        file,
        "[database]\nurl = 'sqlite://{}'\n\n[fleet]\nheartbeat_port = 0",
        db_path.display()
    )?;
    let config_path = file.path().to_string_lossy().to_string();

    let workspace = WorkspaceBuilder::new().build();
    {
        let config = AppConfig::load(Some(&config_path))?;
        assert!(!config.fleet.listener_enabled());

        let app = Application::new(config, AppMode::Serve).await?;
        let services = app.services().expect("Serve模式应包含调度服务");
        services.database.workspace_store().insert(&workspace).await?;
        services.database.close().await;
    }
    assert!(db_path.exists());

    let app = Application::new(AppConfig::load(Some(&config_path))?, AppMode::Serve).await?;
    let services = app.services().expect("Serve模式应包含调度服务");
    let restored = services
        .database
        .workspace_store()
        .get(&workspace.guid, TEST_WORKGROUP)
        .await?;
    assert_eq!(restored.map(|w| w.api_key), Some(workspace.api_key));
    services.database.close().await;
    Ok(())
}
