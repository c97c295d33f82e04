use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::configs::{Device, OpenCap, Settings, Transport};
use crate::services::link::{DoorLink, SimulatedLink};
use crate::services::transport::UnixTransport;
use crate::services::{ConnectionService, StateCache};

pub mod configs;
pub mod errors;
pub mod services;

const WORKER_DRAIN: Duration = Duration::from_secs(10);

pub async fn run(settings: &Arc<Settings>) -> anyhow::Result<()> {
    let link = build_link(&settings.device)?;
    let cap = OpenCap::File(settings.paths.automation.clone().into());

    let service = ConnectionService::new(link, settings.device.clone(), settings.link.clone(), cap)
        .with_cache(StateCache::new(&settings.paths.state_dir))
        .await;
    let (channel, worker) = service.spawn(settings.channel.queue_depth);

    let transport = UnixTransport::new(&settings.channel.socket_path, channel);
    let stop = transport
        .start()
        .await
        .with_context(|| format!("failed to serve {}", transport.path().display()))?;

    shutdown_signal().await;
    tracing::info!("shutdown requested");

    // the accept loop and the transport hold the last channel handles
    let _ = stop.send(());
    drop(transport);

    if tokio::time::timeout(WORKER_DRAIN, worker).await.is_err() {
        tracing::warn!("connection worker did not stop in time");
    }

    Ok(())
}

fn build_link(device: &Device) -> anyhow::Result<Box<dyn DoorLink>> {
    match device.transport {
        Transport::Simulated => {
            tracing::warn!("using the simulated door controller");
            Ok(Box::new(SimulatedLink::new()))
        }
        #[cfg(feature = "ble")]
        Transport::Ble => Ok(Box::new(services::link::BleLink::new(
            &device.mac,
            &device.adapter,
        ))),
        #[cfg(not(feature = "ble"))]
        Transport::Ble => {
            anyhow::bail!("built without the `ble` feature; set device.transport = \"simulated\" or rebuild with it")
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
