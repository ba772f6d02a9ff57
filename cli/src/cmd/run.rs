use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fleetguard_control::{ControlEndpoint, ControlServer};
use fleetguard_core::platform::{LocalPlatform, PlatformFixture};
use fleetguard_core::{BotInstance, ControlInstance, WorkerFactory, WorkerSupervisor};
use fleetguard_relay::ShardId;
use fleetguard_util::cli::logger::{init_logger, set_abort_with_tracing};
use fleetguard_util::cli::signal;
use fleetguard_util::futures::JoinTask;

use crate::config::CliConfig;

/// Run the control process and its worker shards.
#[derive(Parser)]
pub struct CmdRun {
    /// Path to the fleet config.
    #[clap(long)]
    config: PathBuf,

    /// Path to the logger targets config.
    #[clap(long)]
    logger_config: Option<PathBuf>,

    /// Path to the control socket. Overrides `control_socket` from the config.
    #[clap(long)]
    control_socket: Option<PathBuf>,
}

impl CmdRun {
    pub fn run(self) -> Result<()> {
        let config = CliConfig::from_file(&self.config).context("failed to load fleet config")?;

        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(async move {
                let run_fut = JoinTask::new(self.run_impl(config));
                let stop_fut = signal::any_signal(signal::TERMINATION_SIGNALS);
                tokio::select! {
                    res = run_fut => res,
                    signal = stop_fut => match signal {
                        Ok(signal) => {
                            tracing::info!(?signal, "received termination signal");
                            Ok(())
                        }
                        Err(e) => Err(e.into()),
                    }
                }
            })
    }

    async fn run_impl(self, config: CliConfig) -> Result<()> {
        init_logger(&config.logger, self.logger_config)?;
        set_abort_with_tracing();

        let mut fleet = config.fleet;
        if let Some(path) = self.control_socket {
            fleet.control_socket = Some(path);
        }
        if fleet.development_mode {
            tracing::warn!("development mode is enabled, moderation actions are not applied");
        }

        let fixture = match &config.platform_fixture {
            Some(path) => {
                PlatformFixture::load_from(path).context("failed to load platform fixture")?
            }
            None => PlatformFixture::default(),
        };

        let storage = fleet.storage.open().context("failed to open storage")?;
        let stale = storage.clear_cooldown_processing_flags()?;
        if stale > 0 {
            tracing::warn!(stale, "cleared cooldowns left in processing state");
        }

        let factory: WorkerFactory = {
            let fleet = fleet.clone();
            let storage = storage.clone();
            let fixture = fixture.clone();
            Arc::new(move |shard_id: ShardId| -> Result<BotInstance> {
                let platform = Arc::new(LocalPlatform::from_fixture(&fixture, shard_id));
                Ok(BotInstance::builder(shard_id, fleet.clone(), storage.clone(), platform).build())
            })
        };
        let supervisor = Arc::new(WorkerSupervisor::new(fleet.worker_shards.clone(), factory));

        let control_shard_id = fleet.control_shard_id;
        let platform = Arc::new(LocalPlatform::from_fixture(&fixture, control_shard_id));
        let bot = BotInstance::builder(control_shard_id, fleet.clone(), storage, platform).build();
        let control = ControlInstance::new(bot, supervisor)?;

        let relay_address = control.bind_relay().await?;
        tracing::info!(
            shard_id = control_shard_id,
            workers = ?fleet.worker_shards,
            %relay_address,
            "control process started"
        );

        let _jobs = control.spawn_periodic_jobs();

        let _endpoint = match &fleet.control_socket {
            Some(socket_path) => {
                let endpoint = ControlEndpoint::bind(
                    &config.control_endpoint,
                    ControlServer::new(control.clone()),
                    socket_path,
                )
                .await
                .context("failed to bind control endpoint")?;
                Some(JoinTask::new(endpoint.serve()))
            }
            None => None,
        };

        control.run().await
    }
}
