//! CLI surface
//!
//! One subcommand per verb; state-affecting flags mirror the reconciler's
//! inputs. Exit codes: 0 on success, non-zero on failure; `exec`/`shell`/
//! `run` exit with the command's own code (signal deaths as 128+signum).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;

#[derive(Parser, Debug)]
#[command(
    name = "dcx",
    version,
    about = "Reproducible per-workspace development containers",
    propagate_version = true
)]
pub struct Cli {
    /// Workspace directory (defaults to the current directory)
    #[arg(short = 'w', long, global = true, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bring the workspace container up (create, start, run hooks)
    Up {
        /// Remove and recreate the container even if it is current
        #[arg(long)]
        recreate: bool,
        /// Rebuild the image before creating
        #[arg(long)]
        rebuild: bool,
        /// Re-fetch feature sources and pull base images
        #[arg(long)]
        pull: bool,
        /// Disable authentication-agent forwarding for lifecycle hooks
        #[arg(long)]
        no_agent: bool,
        /// Print the SSH bridge configuration after the container is up
        #[arg(long)]
        ssh: bool,
    },

    /// Start an existing (created) container without reconciling
    Start,

    /// Stop the workspace container
    Stop {
        /// Stop even when the configuration says shutdownAction=none
        #[arg(long)]
        force: bool,
    },

    /// Remove the workspace container(s)
    Down {
        /// Also remove volumes
        #[arg(long)]
        volumes: bool,
        /// Remove containers for services not in the configuration
        #[arg(long)]
        remove_orphans: bool,
    },

    /// Stop and start the container
    Restart {
        /// Stop even when the configuration says shutdownAction=none
        #[arg(long)]
        force: bool,
        /// Rebuild the image while restarting
        #[arg(long)]
        rebuild: bool,
    },

    /// Run a command in the running container
    Exec {
        /// Disable authentication-agent forwarding
        #[arg(long)]
        no_agent: bool,
        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true)]
        argv: Vec<String>,
    },

    /// Open an interactive login shell in the running container
    Shell,

    /// Run a named shortcut from the sidecar document
    Run {
        /// Shortcut name
        shortcut: String,
        /// Extra arguments (appended when the shortcut passes args)
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Stream logs from the primary container
    Logs {
        /// Follow log output
        #[arg(short = 'f', long)]
        follow: bool,
        /// Number of lines from the end
        #[arg(long, value_name = "N")]
        tail: Option<u32>,
        /// Show timestamps
        #[arg(short = 't', long)]
        timestamps: bool,
    },

    /// Show the workspace's container state
    Status {
        /// Include labels and hashes
        #[arg(short = 'd', long)]
        detailed: bool,
    },

    /// List managed containers across workspaces
    List {
        /// Include stopped containers
        #[arg(long)]
        all: bool,
    },

    /// Print the engine's inspect output for the primary container
    Inspect,

    /// Show what `up` would do without doing it
    Plan,

    /// Dump identity, hashes, and observed state for debugging
    Debug,

    /// Show the resolved configuration
    Config {
        /// Print the raw document bytes
        #[arg(long, conflicts_with = "validate")]
        raw: bool,
        /// Validate and report instead of printing
        #[arg(long)]
        validate: bool,
    },

    /// Diagnose the host and workspace setup
    Doctor {
        /// Only system checks (engine, compose, disk)
        #[arg(long, conflicts_with = "config")]
        system: bool,
        /// Only configuration checks
        #[arg(long)]
        config: bool,
    },

    /// Remove dcx-managed containers and images
    Clean {
        /// Remove running containers and derived images too
        #[arg(long, conflicts_with = "dangling")]
        all: bool,
        /// Only remove derived images not referenced by a container
        #[arg(long)]
        dangling: bool,
        /// Print what would be removed without removing
        #[arg(long)]
        dry_run: bool,
    },

    /// Resolve features and write the lockfile
    Lock {
        /// Compare the lockfile against a fresh resolve and report drift
        #[arg(long, conflicts_with = "frozen")]
        verify: bool,
        /// Fail if anything diverges from the lockfile
        #[arg(long)]
        frozen: bool,
    },

    /// SSH bridge: stdio proxy and client configuration
    Ssh {
        /// Act as a ProxyCommand for the named container (stdio mode)
        #[arg(long, value_name = "CONTAINER")]
        stdio: Option<String>,
        /// Print the ssh_config stanza for this workspace
        #[arg(long)]
        connect: bool,
    },
}

impl Cli {
    pub async fn dispatch(self) -> Result<i32> {
        let workspace = self.workspace.clone();
        match self.command {
            Commands::Up {
                recreate,
                rebuild,
                pull,
                no_agent,
                ssh,
            } => {
                commands::up::execute(
                    workspace.as_deref(),
                    commands::up::UpArgs {
                        recreate,
                        rebuild,
                        pull,
                        no_agent,
                        ssh,
                    },
                )
                .await
            }
            Commands::Start => commands::start::execute(workspace.as_deref()).await,
            Commands::Stop { force } => commands::stop::execute(workspace.as_deref(), force).await,
            Commands::Down {
                volumes,
                remove_orphans,
            } => commands::down::execute(workspace.as_deref(), volumes, remove_orphans).await,
            Commands::Restart { force, rebuild } => {
                commands::restart::execute(workspace.as_deref(), force, rebuild).await
            }
            Commands::Exec { no_agent, argv } => {
                commands::exec::execute(workspace.as_deref(), &argv, no_agent).await
            }
            Commands::Shell => commands::shell::execute(workspace.as_deref()).await,
            Commands::Run { shortcut, args } => {
                commands::run::execute(workspace.as_deref(), &shortcut, &args).await
            }
            Commands::Logs {
                follow,
                tail,
                timestamps,
            } => commands::logs::execute(workspace.as_deref(), follow, tail, timestamps).await,
            Commands::Status { detailed } => {
                commands::status::execute(workspace.as_deref(), detailed).await
            }
            Commands::List { all } => commands::list::execute(all).await,
            Commands::Inspect => commands::inspect::execute(workspace.as_deref()).await,
            Commands::Plan => commands::plan::execute(workspace.as_deref()).await,
            Commands::Debug => commands::debug::execute(workspace.as_deref()).await,
            Commands::Config { raw, validate } => {
                commands::config::execute(workspace.as_deref(), raw, validate).await
            }
            Commands::Doctor { system, config } => {
                commands::doctor::execute(workspace.as_deref(), system, config).await
            }
            Commands::Clean {
                all,
                dangling,
                dry_run,
            } => commands::clean::execute(all, dangling, dry_run).await,
            Commands::Lock { verify, frozen } => {
                commands::lock::execute(workspace.as_deref(), verify, frozen).await
            }
            Commands::Ssh { stdio, connect } => {
                commands::ssh::execute(workspace.as_deref(), stdio.as_deref(), connect).await
            }
        }
    }
}
