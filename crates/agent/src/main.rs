//! dcx-agent: the helper binary deployed into containers.
//!
//! Two subcommands, both speaking over stdio so the engine's exec transport
//! is the only channel needed:
//!
//! - `ssh-stdio` — an SSH server over stdin/stdout, used as the remote end
//!   of the host's ProxyCommand.
//! - `agent-proxy` — a per-session authentication-agent socket proxy that
//!   relays agent-protocol messages between a container-local Unix socket
//!   and stdio.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod proxy;
mod ssh_stdio;

#[derive(Parser, Debug)]
#[command(name = "dcx-agent", version, about = "dcx in-container helper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve SSH over stdin/stdout
    SshStdio {
        /// Login user for spawned shells
        #[arg(long)]
        user: Option<String>,
        /// Working directory for spawned shells
        #[arg(long)]
        workdir: Option<String>,
        /// Login shell (defaults to $SHELL, then /bin/sh)
        #[arg(long)]
        shell: Option<String>,
    },
    /// Proxy an authentication-agent socket to stdio
    AgentProxy {
        /// Unix socket path to create
        #[arg(long)]
        socket: PathBuf,
        /// Owner uid for the socket
        #[arg(long, default_value_t = 0)]
        uid: u32,
        /// Owner gid for the socket
        #[arg(long, default_value_t = 0)]
        gid: u32,
    },
}

fn main() -> Result<()> {
    // Diagnostics must stay off stdout: stdout is the protocol channel.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::SshStdio {
            user,
            workdir,
            shell,
        } => runtime.block_on(ssh_stdio::serve(user, workdir, shell)),
        Commands::AgentProxy { socket, uid, gid } => {
            runtime.block_on(proxy::serve(socket, uid, gid))
        }
    }
}
