//! Gameserver configuration.
//!
//! Loaded from an optional JSON file and overlaid with command-line flags in
//! `main.rs`. Every field has a default so an empty file (or none) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Fastest tick rate the tick interval honours.
pub const MAX_TICK_RATE: f64 = 1000.0;

/// Media-plane settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Number of media workers routers are spread across.
    pub workers: usize,
    /// Routers serving the world instance. The outgoing data producer is
    /// piped to all of them.
    pub instance_routers: usize,
    /// Address announced in ICE candidates.
    pub announced_ip: String,
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            instance_routers: 1,
            announced_ip: "127.0.0.1".to_string(),
            rtc_min_port: 40000,
            rtc_max_port: 49999,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Overrides `NATS_URL` when set.
    pub nats_url: Option<String>,
    /// Id of the instance record this server creates at startup.
    pub instance_id: String,
    /// Slug of the location this instance serves. Without one the instance
    /// is registered with no location or scene.
    pub location: Option<String>,
    /// Simulation ticks per second.
    pub tick_rate: f64,
    /// Period of the network-object sweep.
    pub sweep_interval_secs: u64,
    /// Evict sessions whose last heartbeat is older than this. Off when unset.
    pub heartbeat_timeout_secs: Option<u64>,
    /// Where avatars appear on join.
    pub spawn_position: Vec3,
    /// Radius used by nearby-user discovery.
    pub nearby_radius: f32,
    /// Static user/avatar directory for standalone runs.
    pub users_file: Option<PathBuf>,
    pub media: MediaConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            nats_url: None,
            instance_id: uuid::Uuid::new_v4().to_string(),
            location: None,
            tick_rate: 60.0,
            sweep_interval_secs: 5,
            heartbeat_timeout_secs: None,
            spawn_position: Vec3::ZERO,
            nearby_radius: 12.0,
            users_file: None,
            media: MediaConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Period of one tick. Rates below 1 Hz, NaN and infinity fall back
    /// to the nearest usable period so the interval is never zero.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        let rate = if self.tick_rate.is_finite() {
            self.tick_rate.clamp(1.0, MAX_TICK_RATE)
        } else if self.tick_rate == f64::INFINITY {
            MAX_TICK_RATE
        } else {
            1.0
        };
        Duration::from_secs_f64(1.0 / rate)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    #[must_use]
    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        self.heartbeat_timeout_secs.map(Duration::from_secs)
    }
}
