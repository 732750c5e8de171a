use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use renderfarm_core::config::SimulationConfig;
use renderfarm_core::models::{Heartbeat, HeartbeatSender};
use renderfarm_worker::{
    FixedLoad, HeartbeatEmitter, LoadSample, SimulatedFleet, SIMULATED_BASE_PORT,
};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::timeout;

const LOAD: LoadSample = LoadSample {
    cpu_usage: 0.25,
    ram_usage: 0.5,
    total_ram: 16.0,
};

async fn receive(socket: &UdpSocket) -> Result<Heartbeat> {
    let mut buf = vec![0u8; 4096];
    let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await??;
    Ok(Heartbeat::parse(&buf[..len])?)
}

#[tokio::test]
async fn test_send_once_uses_worker_wire_format() -> Result<()> {
    let receiver = UdpSocket::bind("127.0.0.1:0").await?;
    let emitter = HeartbeatEmitter::new(
        "001122334455",
        34092,
        receiver.local_addr()?,
        Duration::from_secs(1),
        Arc::new(FixedLoad(LOAD)),
    );

    let sender = UdpSocket::bind("127.0.0.1:0").await?;
    emitter.send_once(&sender).await?;

    let heartbeat = receive(&receiver).await?;
    assert_eq!(heartbeat.kind, "heartbeat");
    assert_eq!(heartbeat.sender, HeartbeatSender::RemoteWorker);
    assert_eq!(heartbeat.mac, "001122334455");
    assert_eq!(heartbeat.port, 34092);
    assert_eq!(heartbeat.cpu_usage, 0.25);
    assert_eq!(heartbeat.total_ram, 16.0);
    Ok(())
}

#[tokio::test]
async fn test_run_repeats_until_shutdown() -> Result<()> {
    let receiver = UdpSocket::bind("127.0.0.1:0").await?;
    let emitter = HeartbeatEmitter::new(
        "001122334455",
        34092,
        receiver.local_addr()?,
        Duration::from_millis(20),
        Arc::new(FixedLoad(LOAD)),
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let runner = tokio::spawn(async move { emitter.run(shutdown_rx).await });

    receive(&receiver).await?;
    receive(&receiver).await?;

    shutdown_tx.send(())?;
    timeout(Duration::from_secs(1), runner).await???;
    Ok(())
}

#[tokio::test]
async fn test_fleet_emits_one_identity_per_worker() -> Result<()> {
    let receiver = UdpSocket::bind("127.0.0.1:0").await?;
    let config = SimulationConfig {
        target_host: "127.0.0.1".to_string(),
        worker_count: 3,
        heartbeat_interval_ms: 50,
        ..Default::default()
    };
    let fleet = SimulatedFleet::with_sampler(
        config,
        receiver.local_addr()?.port(),
        Arc::new(FixedLoad(LOAD)),
    );

    fleet.start().await?;
    assert!(fleet.is_running().await);
    assert!(fleet.start().await.is_err());

    let mut ports = HashSet::new();
    while ports.len() < 3 {
        ports.insert(receive(&receiver).await?.port);
    }
    let expected: HashSet<u16> = (0..3).map(|i| SIMULATED_BASE_PORT + i).collect();
    assert_eq!(ports, expected);

    fleet.stop().await;
    assert!(!fleet.is_running().await);
    Ok(())
}
