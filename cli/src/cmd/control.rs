use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fleetguard_control::{ControlClient, ModeratorInfo};
use fleetguard_util::cli::logger::init_logger_simple;
use fleetguard_util::cli::signal;
use fleetguard_util::futures::JoinTask;

use crate::util::print_json;

/// Operator commands of a running control process.
#[derive(Subcommand)]
pub enum CmdControl {
    Ping(CmdPing),
    Status(CmdStatus),
    Ban(CmdBan),
    Unban(CmdUnban),
    Lookup(CmdLookup),
    ReprocessServer(CmdReprocessServer),
    ReprocessInstance(CmdReprocessInstance),
    Leave(CmdLeave),
    Activate(CmdActivate),
    Deactivate(CmdDeactivate),
    Cooldowns(CmdCooldowns),
    Sweep(CmdSweep),
    Cleanup(CmdCleanup),
}

impl CmdControl {
    pub fn run(self) -> Result<()> {
        match self {
            Self::Ping(cmd) => cmd.run(),
            Self::Status(cmd) => cmd.run(),
            Self::Ban(cmd) => cmd.run(),
            Self::Unban(cmd) => cmd.run(),
            Self::Lookup(cmd) => cmd.run(),
            Self::ReprocessServer(cmd) => cmd.run(),
            Self::ReprocessInstance(cmd) => cmd.run(),
            Self::Leave(cmd) => cmd.run(),
            Self::Activate(cmd) => cmd.run(),
            Self::Deactivate(cmd) => cmd.run(),
            Self::Cooldowns(cmd) => cmd.run(),
            Self::Sweep(cmd) => cmd.run(),
            Self::Cleanup(cmd) => cmd.run(),
        }
    }
}

/// Ping the control process.
#[derive(Parser)]
pub struct CmdPing {
    #[clap(flatten)]
    args: ControlArgs,
}

impl CmdPing {
    pub fn run(self) -> Result<()> {
        self.args.rt(|client| async move {
            let timestamp = client.ping().await?;
            print_json(serde_json::json!({ "timestamp": timestamp }))
        })
    }
}

/// Get relay, shard and storage counters.
#[derive(Parser)]
pub struct CmdStatus {
    #[clap(flatten)]
    args: ControlArgs,
}

impl CmdStatus {
    pub fn run(self) -> Result<()> {
        self.args.rt(|client| async move {
            let status = client.get_status().await?;
            print_json(status)
        })
    }
}

#[derive(Args)]
struct ModeratorArgs {
    /// Id of the moderator performing the action.
    #[clap(long)]
    moderator_id: u64,

    /// Name of the moderator performing the action.
    #[clap(long)]
    moderator_name: String,
}

impl From<ModeratorArgs> for ModeratorInfo {
    fn from(value: ModeratorArgs) -> Self {
        Self {
            id: value.moderator_id,
            name: value.moderator_name,
        }
    }
}

/// Add a user to the ban list and ban them in every activated server.
#[derive(Parser)]
pub struct CmdBan {
    user_id: u64,

    #[clap(flatten)]
    moderator: ModeratorArgs,

    /// Thread with the evidence.
    #[clap(long)]
    evidence_thread: Option<u64>,

    #[clap(flatten)]
    args: ControlArgs,
}

impl CmdBan {
    pub fn run(self) -> Result<()> {
        let moderator = ModeratorInfo::from(self.moderator);
        let (user_id, evidence_thread) = (self.user_id, self.evidence_thread);
        self.args.rt(move |client| async move {
            let action = client.ban_user(user_id, moderator, evidence_thread).await?;
            print_json(serde_json::json!({ "user_id": user_id, "action": action }))
        })
    }
}

/// Remove a user from the ban list and unban them in every activated server.
#[derive(Parser)]
pub struct CmdUnban {
    user_id: u64,

    #[clap(flatten)]
    moderator: ModeratorArgs,

    #[clap(flatten)]
    args: ControlArgs,
}

impl CmdUnban {
    pub fn run(self) -> Result<()> {
        let moderator = ModeratorInfo::from(self.moderator);
        let user_id = self.user_id;
        self.args.rt(move |client| async move {
            let action = client.unban_user(user_id, moderator).await?;
            print_json(serde_json::json!({ "user_id": user_id, "action": action }))
        })
    }
}

/// Show the ban list entry of a user.
#[derive(Parser)]
pub struct CmdLookup {
    user_id: u64,

    #[clap(flatten)]
    args: ControlArgs,
}

impl CmdLookup {
    pub fn run(self) -> Result<()> {
        let user_id = self.user_id;
        self.args.rt(move |client| async move {
            let ban = client.lookup_ban(user_id).await?;
            print_json(serde_json::json!({ "user_id": user_id, "ban": ban }))
        })
    }
}

/// Replay bans in one server.
#[derive(Parser)]
pub struct CmdReprocessServer {
    server_id: u64,

    /// Replay only this many of the newest bans. All bans when zero.
    #[clap(long, default_value_t = 0)]
    last: u64,

    #[clap(flatten)]
    args: ControlArgs,
}

impl CmdReprocessServer {
    pub fn run(self) -> Result<()> {
        let (server_id, last) = (self.server_id, self.last);
        self.args.rt(move |client| async move {
            let result = client.reprocess_server(server_id, last).await?;
            print_json(serde_json::json!({ "server_id": server_id, "result": result }))
        })
    }
}

/// Replay the newest bans in every server of a shard.
#[derive(Parser)]
pub struct CmdReprocessInstance {
    shard_id: i32,

    /// Number of the newest bans to replay.
    #[clap(long)]
    last: u64,

    #[clap(flatten)]
    args: ControlArgs,
}

impl CmdReprocessInstance {
    pub fn run(self) -> Result<()> {
        let (shard_id, last) = (self.shard_id, self.last);
        self.args.rt(move |client| async move {
            let delivered = client.reprocess_instance(shard_id, last).await?;
            print_json(serde_json::json!({ "shard_id": shard_id, "delivered": delivered }))
        })
    }
}

/// Leave a server through the shard which owns it.
#[derive(Parser)]
pub struct CmdLeave {
    server_id: u64,

    #[clap(flatten)]
    args: ControlArgs,
}

impl CmdLeave {
    pub fn run(self) -> Result<()> {
        let server_id = self.server_id;
        self.args.rt(move |client| async move {
            let accepted = client.leave_server(server_id).await?;
            print_json(serde_json::json!({ "server_id": server_id, "accepted": accepted }))
        })
    }
}

/// Activate the fleet in servers where the user has elevated permissions.
#[derive(Parser)]
pub struct CmdActivate {
    user_id: u64,

    /// Activate only this server.
    #[clap(long)]
    server: Option<u64>,

    #[clap(flatten)]
    args: ControlArgs,
}

impl CmdActivate {
    pub fn run(self) -> Result<()> {
        let (user_id, server) = (self.user_id, self.server);
        self.args.rt(move |client| async move {
            match server {
                Some(server_id) => {
                    let activated = client.activate_server(user_id, server_id).await?;
                    print_json(serde_json::json!({
                        "user_id": user_id,
                        "server_id": server_id,
                        "activated": activated,
                    }))
                }
                None => {
                    let activated = client.activate_user(user_id).await?;
                    print_json(serde_json::json!({ "user_id": user_id, "activated": activated }))
                }
            }
        })
    }
}

/// Deactivate the fleet in servers where the user has elevated permissions.
#[derive(Parser)]
pub struct CmdDeactivate {
    user_id: u64,

    #[clap(flatten)]
    args: ControlArgs,
}

impl CmdDeactivate {
    pub fn run(self) -> Result<()> {
        let user_id = self.user_id;
        self.args.rt(move |client| async move {
            let deactivated = client.deactivate_user(user_id).await?;
            print_json(serde_json::json!({ "user_id": user_id, "deactivated": deactivated }))
        })
    }
}

/// List servers in cooldown.
#[derive(Parser)]
pub struct CmdCooldowns {
    #[clap(flatten)]
    args: ControlArgs,
}

impl CmdCooldowns {
    pub fn run(self) -> Result<()> {
        self.args.rt(|client| async move {
            let cooldowns = client.list_cooldowns().await?;
            print_json(cooldowns)
        })
    }
}

/// Retry every server in cooldown now.
#[derive(Parser)]
pub struct CmdSweep {
    #[clap(flatten)]
    args: ControlArgs,
}

impl CmdSweep {
    pub fn run(self) -> Result<()> {
        self.args.rt(|client| async move {
            let queued = client.run_cooldown_sweep().await?;
            print_json(serde_json::json!({ "queued": queued }))
        })
    }
}

/// Leave servers which were never activated within the inactive window.
#[derive(Parser)]
pub struct CmdCleanup {
    /// Only report the servers which would be left.
    #[clap(long)]
    dry_run: bool,

    #[clap(flatten)]
    args: ControlArgs,
}

impl CmdCleanup {
    pub fn run(self) -> Result<()> {
        let dry_run = self.dry_run;
        self.args.rt(move |client| async move {
            let report = client.run_inactive_cleanup(dry_run).await?;
            print_json(report)
        })
    }
}

#[derive(Args)]
struct ControlArgs {
    /// Path to the control socket.
    #[clap(long, default_value = "control.sock")]
    control_socket: PathBuf,
}

impl ControlArgs {
    fn rt<F, FT>(self, f: F) -> Result<()>
    where
        F: FnOnce(ControlClient) -> FT + Send + 'static,
        FT: Future<Output = Result<()>> + Send + 'static,
    {
        init_logger_simple("info,tarpc=error");

        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(async move {
                let run_fut = JoinTask::new(async move {
                    let client = ControlClient::connect(&self.control_socket)
                        .await
                        .context("failed to connect to control server")?;
                    f(client).await
                });
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
}
