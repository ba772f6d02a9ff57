use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd {
    pub mod control;
    pub mod run;
}

mod config;
mod util;

fn main() -> ExitCode {
    if std::env::var("RUST_BACKTRACE").is_err() {
        // SAFETY: no other threads are running yet.
        unsafe { std::env::set_var("RUST_BACKTRACE", "1") };
    }

    match App::parse().run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

/// Moderation bot fleet
#[derive(Parser)]
#[clap(name = "fleetguard", version)]
#[clap(subcommand_required = true, arg_required_else_help = true)]
struct App {
    #[clap(subcommand)]
    cmd: Cmd,
}

impl App {
    fn run(self) -> Result<()> {
        match self.cmd {
            Cmd::Run(cmd) => cmd.run(),
            Cmd::Control(cmd) => cmd.run(),
        }
    }
}

#[derive(Subcommand)]
enum Cmd {
    Run(cmd::run::CmdRun),

    #[clap(subcommand)]
    Control(cmd::control::CmdControl),
}
