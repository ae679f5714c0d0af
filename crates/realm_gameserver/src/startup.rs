//! Ordered server startup.
//!
//! ```text
//! ConnectTransport → StartMedia → OutgoingDataPath → PreloadLocation → StartTimers → Listen
//! ```
//!
//! Snapshots need the outgoing data producer, which needs the instance
//! routers, which need the media workers. User counts are reported to the
//! instance record created by `PreloadLocation`, so it precedes the timers
//! and the listener. [`Pipeline`] refuses to run a stage before its
//! predecessors and names the stage that failed.

use std::future::Future;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::server::{GameServer, ServerEvent, ServerHandle};
use crate::services::InstanceRecord;
use crate::tick::spawn_interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    ConnectTransport,
    StartMedia,
    OutgoingDataPath,
    PreloadLocation,
    StartTimers,
    Listen,
}

impl Stage {
    pub const ORDER: [Self; 6] = [
        Self::ConnectTransport,
        Self::StartMedia,
        Self::OutgoingDataPath,
        Self::PreloadLocation,
        Self::StartTimers,
        Self::Listen,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectTransport => "connect-transport",
            Self::StartMedia => "start-media",
            Self::OutgoingDataPath => "outgoing-data-path",
            Self::PreloadLocation => "preload-location",
            Self::StartTimers => "start-timers",
            Self::Listen => "listen",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("startup stage {stage} failed: {source:#}")]
    Failed {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("startup stage {stage} cannot run yet, {expected} comes first")]
    OutOfOrder { stage: Stage, expected: Stage },

    #[error("startup already finished, nothing left to run {stage}")]
    Finished { stage: Stage },
}

impl StartupError {
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Failed { stage, .. }
            | Self::OutOfOrder { stage, .. }
            | Self::Finished { stage } => *stage,
        }
    }
}

/// Tracks which startup stages have completed.
#[derive(Debug, Default)]
pub struct Pipeline {
    completed: Vec<Stage>,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The stage allowed to run next, if any.
    #[must_use]
    pub fn next_stage(&self) -> Option<Stage> {
        Stage::ORDER.get(self.completed.len()).copied()
    }

    #[must_use]
    pub fn completed(&self) -> &[Stage] {
        &self.completed
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.next_stage().is_none()
    }

    fn check(&self, stage: Stage) -> Result<(), StartupError> {
        match self.next_stage() {
            Some(expected) if expected == stage => Ok(()),
            Some(expected) => Err(StartupError::OutOfOrder { stage, expected }),
            None => Err(StartupError::Finished { stage }),
        }
    }

    fn finish<T>(&mut self, stage: Stage, started: Instant, result: anyhow::Result<T>) -> Result<T, StartupError> {
        match result {
            Ok(value) => {
                info!(%stage, elapsed_ms = started.elapsed().as_millis() as u64, "startup stage complete");
                self.completed.push(stage);
                Ok(value)
            }
            Err(source) => {
                error!(%stage, error = ?source, "startup stage failed");
                Err(StartupError::Failed { stage, source })
            }
        }
    }

    /// Run `stage` if it is next in order.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::OutOfOrder`] or [`StartupError::Finished`]
    /// without running `step`, or [`StartupError::Failed`] if `step` fails.
    pub fn run<T>(
        &mut self,
        stage: Stage,
        step: impl FnOnce() -> anyhow::Result<T>,
    ) -> Result<T, StartupError> {
        self.check(stage)?;
        info!(%stage, "startup stage begin");
        let started = Instant::now();
        let result = step();
        self.finish(stage, started, result)
    }

    /// Async variant of [`Pipeline::run`].
    ///
    /// # Errors
    ///
    /// See [`Pipeline::run`].
    pub async fn run_async<T>(
        &mut self,
        stage: Stage,
        step: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, StartupError> {
        self.check(stage)?;
        info!(%stage, "startup stage begin");
        let started = Instant::now();
        let result = step.await;
        self.finish(stage, started, result)
    }
}

/// Bring up the media plane and the outgoing data path. The transport must
/// already be connected.
///
/// # Errors
///
/// Returns the first failing stage.
pub fn prepare(server: &mut GameServer, pipeline: &mut Pipeline) -> Result<(), StartupError> {
    pipeline.run(Stage::StartMedia, || Ok(server.start_media()?))?;
    pipeline.run(Stage::OutgoingDataPath, || {
        Ok(server.init_outgoing_data_path()?)
    })?;
    Ok(())
}

/// Register this server's instance record; see
/// [`GameServer::preload_location`].
///
/// # Errors
///
/// Returns [`StartupError::Failed`] naming `preload-location` if a lookup
/// fails or the configured location does not exist.
pub async fn preload_location(
    server: &mut GameServer,
    pipeline: &mut Pipeline,
) -> Result<InstanceRecord, StartupError> {
    pipeline
        .run_async(Stage::PreloadLocation, server.preload_location())
        .await
}

/// Spawn the tick and sweep timers.
///
/// # Errors
///
/// Returns [`StartupError::OutOfOrder`] if the data path is not ready.
pub fn start_timers(
    config: &ServerConfig,
    events: &ServerHandle,
    pipeline: &mut Pipeline,
) -> Result<Vec<JoinHandle<()>>, StartupError> {
    pipeline.run(Stage::StartTimers, || {
        Ok(vec![
            spawn_interval("tick", config.tick_interval(), events.sender(), || {
                ServerEvent::Tick
            }),
            spawn_interval("sweep", config.sweep_interval(), events.sender(), || {
                ServerEvent::Sweep
            }),
        ])
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::config::MediaConfig;
    use crate::server::event_channel;
    use crate::services::{InMemoryDirectory, LocationRecord};

    fn server(config: ServerConfig) -> GameServer {
        let (handle, _rx) = event_channel();
        GameServer::new(config, Arc::new(InMemoryDirectory::new()), handle)
    }

    /// A pipeline with everything before `PreloadLocation` done.
    fn ready_for_preload(server: &mut GameServer) -> Pipeline {
        let mut pipeline = Pipeline::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        pipeline
            .run(Stage::ConnectTransport, || {
                server.attach_transport(tx);
                Ok(())
            })
            .unwrap();
        prepare(server, &mut pipeline).unwrap();
        pipeline
    }

    #[test]
    fn test_stages_must_run_in_order() {
        let mut pipeline = Pipeline::new();
        let err = pipeline
            .run(Stage::StartMedia, || Ok(()))
            .unwrap_err();
        assert!(matches!(
            err,
            StartupError::OutOfOrder {
                stage: Stage::StartMedia,
                expected: Stage::ConnectTransport
            }
        ));
        assert!(pipeline.completed().is_empty());

        pipeline.run(Stage::ConnectTransport, || Ok(())).unwrap();
        assert_eq!(pipeline.next_stage(), Some(Stage::StartMedia));
    }

    #[test]
    fn test_failed_stage_is_named_and_not_completed() {
        let mut pipeline = Pipeline::new();
        let err = pipeline
            .run(Stage::ConnectTransport, || -> anyhow::Result<()> {
                anyhow::bail!("connection refused")
            })
            .unwrap_err();
        assert_eq!(err.stage(), Stage::ConnectTransport);
        assert!(err.to_string().contains("connect-transport"));
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(pipeline.next_stage(), Some(Stage::ConnectTransport));
    }

    #[test]
    fn test_prepare_reports_media_failure() {
        let mut config = ServerConfig::default();
        config.media = MediaConfig {
            workers: 0,
            ..MediaConfig::default()
        };
        let mut server = server(config);
        let mut pipeline = Pipeline::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        pipeline
            .run(Stage::ConnectTransport, || {
                server.attach_transport(tx);
                Ok(())
            })
            .unwrap();
        let err = prepare(&mut server, &mut pipeline).unwrap_err();
        assert_eq!(err.stage(), Stage::StartMedia);
        assert!(server.media().outgoing().is_none());
    }

    #[tokio::test]
    async fn test_preload_creates_instance_for_location() {
        let directory = InMemoryDirectory::new();
        directory.insert_location(LocationRecord {
            id: "loc-1".into(),
            slug: "plaza".into(),
            name: "The Plaza".into(),
            scene_id: "scene-9".into(),
        });
        let config = ServerConfig {
            instance_id: "i-new".into(),
            location: Some("plaza".into()),
            ..ServerConfig::default()
        };
        directory.insert_instance(InstanceRecord {
            id: "i-old".into(),
            location_id: Some("loc-1".into()),
            scene_id: Some("scene-9".into()),
            address: config.media.announced_ip.clone(),
            current_users: 2,
            ended: false,
        });
        let (handle, _rx) = event_channel();
        let mut server = GameServer::new(config, Arc::new(directory.clone()), handle);
        let mut pipeline = ready_for_preload(&mut server);

        let instance = preload_location(&mut server, &mut pipeline).await.unwrap();
        assert_eq!(instance.id, "i-new");
        assert_eq!(instance.location_id.as_deref(), Some("loc-1"));
        assert_eq!(instance.scene_id.as_deref(), Some("scene-9"));
        assert_eq!(server.instance(), Some(&instance));
        assert!(directory.instance("i-old").unwrap().ended);
        assert_eq!(pipeline.next_stage(), Some(Stage::StartTimers));
    }

    #[tokio::test]
    async fn test_preload_reports_unknown_location() {
        let mut server = server(ServerConfig {
            location: Some("nowhere".into()),
            ..ServerConfig::default()
        });
        let mut pipeline = ready_for_preload(&mut server);

        let err = preload_location(&mut server, &mut pipeline)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Stage::PreloadLocation);
        assert!(err.to_string().contains("nowhere"));
        assert!(server.instance().is_none());
        assert_eq!(pipeline.next_stage(), Some(Stage::PreloadLocation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_pipeline() {
        let config = ServerConfig::default();
        let (handle, mut rx) = event_channel();
        let mut server = GameServer::new(config.clone(), Arc::new(InMemoryDirectory::new()), handle.clone());
        let mut pipeline = ready_for_preload(&mut server);
        assert!(server.media().outgoing().is_some());
        assert!(matches!(
            start_timers(&config, &handle, &mut pipeline),
            Err(StartupError::OutOfOrder {
                expected: Stage::PreloadLocation,
                ..
            })
        ));
        let instance = preload_location(&mut server, &mut pipeline).await.unwrap();
        assert_eq!(instance.location_id, None);

        let timers = start_timers(&config, &handle, &mut pipeline).unwrap();
        assert_eq!(timers.len(), 2);
        assert!(matches!(rx.recv().await, Some(ServerEvent::Tick | ServerEvent::Sweep)));

        pipeline.run(Stage::Listen, || Ok(())).unwrap();
        assert!(pipeline.is_finished());
        assert!(matches!(
            pipeline.run(Stage::Listen, || Ok(())),
            Err(StartupError::Finished { .. })
        ));
        for timer in timers {
            timer.abort();
        }
    }
}
