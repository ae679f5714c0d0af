//! # realm-gameserver
//!
//! Runs one world instance over NATS.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use realm_gameserver::services::{InMemoryDirectory, WorldServices};
use realm_gameserver::startup::{self, Pipeline, Stage};
use realm_gameserver::{GameServer, ServerConfig, event_channel, nats};
use realm_net::NatsConnection;
use realm_net::subjects::PEER_WILDCARD;

#[derive(Parser)]
#[command(name = "realm-gameserver", about = "Realtime world-state gameserver over NATS")]
struct Args {
    /// JSON config file; missing fields take their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// NATS server URL (overrides the config file and NATS_URL)
    #[arg(short, long)]
    nats_url: Option<String>,

    /// Simulation ticks per second
    #[arg(long)]
    tick_rate: Option<f64>,

    /// Slug of the location this instance serves
    #[arg(long)]
    location: Option<String>,

    /// Disconnect sessions silent for this long
    #[arg(long)]
    heartbeat_timeout_secs: Option<u64>,

    /// JSON user/avatar directory
    #[arg(long)]
    users: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(url) = self.nats_url {
            config.nats_url = Some(url);
        }
        if let Some(rate) = self.tick_rate {
            anyhow::ensure!(
                rate.is_finite() && rate > 0.0,
                "--tick-rate must be a positive finite number, got {rate}"
            );
            config.tick_rate = rate;
        }
        if let Some(location) = self.location {
            config.location = Some(location);
        }
        if let Some(timeout) = self.heartbeat_timeout_secs {
            config.heartbeat_timeout_secs = Some(timeout);
        }
        if let Some(users) = self.users {
            config.users_file = Some(users);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("realm_gameserver=info".parse()?))
        .init();

    let config = Args::parse().into_config()?;
    info!(instance = %config.instance_id, tick_rate = config.tick_rate, "gameserver starting");

    let directory = match &config.users_file {
        Some(path) => InMemoryDirectory::from_json_file(path)?,
        None => InMemoryDirectory::new(),
    };
    info!(users = directory.user_count(), "user directory loaded");
    let services: Arc<dyn WorldServices> = Arc::new(directory);

    let (handle, events) = event_channel();
    let mut server = GameServer::new(config.clone(), services, handle.clone());
    let mut pipeline = Pipeline::new();

    let conn = pipeline
        .run_async(Stage::ConnectTransport, async {
            let conn = match &config.nats_url {
                Some(url) => NatsConnection::connect_to(url).await?,
                None => NatsConnection::connect().await?,
            };
            Ok::<_, anyhow::Error>(conn)
        })
        .await?;
    let (sink, outbound) = mpsc::unbounded_channel();
    server.attach_transport(sink);
    let _publisher = nats::spawn_outbound(conn.clone(), outbound);

    startup::prepare(&mut server, &mut pipeline)?;
    startup::preload_location(&mut server, &mut pipeline).await?;
    let _timers = startup::start_timers(&config, &handle, &mut pipeline)?;

    let subscriber = pipeline
        .run_async(Stage::Listen, async {
            Ok::<_, anyhow::Error>(conn.subscribe(PEER_WILDCARD).await?)
        })
        .await?;
    let _listener = nats::spawn_inbound(conn.clone(), subscriber, handle.clone());

    let shutdown = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.shutdown();
        }
    });

    server.run(events).await;
    info!("gameserver shut down");
    Ok(())
}
