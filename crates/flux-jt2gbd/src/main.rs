use clap::Parser;
use flux_gb28181::sip::{SignalingClient, SipTransport, UdpSipTransport};
use flux_gb28181::{SessionOrchestrator, StreamAdapterFactory};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod hooks;

use config::GatewayConfig;
use hooks::GatewayHooks;

#[derive(Parser, Debug)]
#[command(author, version, about = "FLUX JT/T 1078 to GB28181 gateway")]
struct Args {
    #[arg(long, default_value = "./config/jt2gbd.toml")]
    config: PathBuf,

    /// 覆盖配置中的 log.json
    #[arg(long)]
    log_json: bool,
}

fn init_logging(config: &GatewayConfig, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    if json || config.log.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(target: "jt2gbd", "Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!(target: "jt2gbd", "Received SIGTERM"),
        _ = tokio::signal::ctrl_c() => tracing::info!(target: "jt2gbd", "Received Ctrl+C"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!(target: "jt2gbd", "Received Ctrl+C");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = GatewayConfig::load(&args.config)?;
    init_logging(&config, args.log_json);

    let device = config.device_identity();
    let platform = config.platform_identity();

    let transport = UdpSipTransport::bind(&config.sip_bind_addr(), &platform.address()).await?;
    let receiver = transport.spawn_receiver();

    let hooks = Arc::new(GatewayHooks::from_config(&config)?);
    let factory = Arc::new(StreamAdapterFactory::new(config.stream_config()));
    let sessions = SessionOrchestrator::spawn(factory, hooks);

    let client = SignalingClient::new(
        device,
        platform,
        config.signaling_config(),
        transport.clone() as Arc<dyn SipTransport>,
        sessions.clone(),
    );
    client.start().await;

    let mut status_rx = client.subscribe_status();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            tracing::info!(
                target: "jt2gbd",
                phase = ?status.phase,
                online = status.online,
                keepalive_failures = status.keepalive_failures,
                "Registration status changed",
            );
        }
    });

    tracing::info!(
        target: "jt2gbd",
        sip = %transport.local_addr()?,
        device_id = %config.device.id,
        channels = config.channels.len(),
        ports = %format!("{}..={}", config.stream.port_start, config.stream.port_end),
        "jt2gbd started",
    );

    wait_for_shutdown().await;

    // 先注销，再停所有推流会话，最后关闭 SIP 套接字
    client.stop().await;
    sessions.shutdown().await;
    transport.stop();
    let _ = receiver.await;

    tracing::info!(target: "jt2gbd", "jt2gbd stopped");
    Ok(())
}
