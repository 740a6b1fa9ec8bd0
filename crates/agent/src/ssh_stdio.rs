//! SSH server over stdio.
//!
//! Speaks the SSH protocol on stdin/stdout (no TCP listener): key exchange
//! happens on the pipes, session channels spawn the configured login shell
//! or requested command. The host key is ephemeral, generated per process;
//! the ProxyCommand boundary is the trust anchor, so clients connect with
//! host-key checking disabled.

use anyhow::{Context, Result};
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::{Algorithm, PrivateKey};
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, warn};

pub async fn serve(
    user: Option<String>,
    workdir: Option<String>,
    shell: Option<String>,
) -> Result<()> {
    let host_key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
        .context("generating ephemeral host key")?;
    let config = Arc::new(russh::server::Config {
        keys: vec![host_key],
        ..Default::default()
    });

    let handler = StdioSession {
        login_user: user,
        workdir,
        shell: shell
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/sh".to_string()),
        children: HashMap::new(),
    };

    let stream = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
    let session = russh::server::run_stream(config, stream, handler)
        .await
        .context("ssh handshake failed")?;
    session.await.context("ssh session failed")?;
    Ok(())
}

struct StdioSession {
    login_user: Option<String>,
    workdir: Option<String>,
    shell: String,
    /// stdin handles of spawned processes, keyed by channel
    children: HashMap<ChannelId, ChildStdin>,
}

impl StdioSession {
    fn spawn_command(&self, command: Option<&str>) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.shell);
        match command {
            Some(command) => {
                cmd.arg("-c").arg(command);
            }
            None => {
                // Interactive login shell.
                cmd.arg("-l");
            }
        }
        if let Some(workdir) = &self.workdir {
            cmd.current_dir(workdir);
        }
        if let Some(user) = &self.login_user {
            cmd.env("USER", user);
        }
        cmd.stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        cmd.spawn()
    }

    async fn run_on_channel(
        &mut self,
        channel: ChannelId,
        command: Option<&str>,
        session: &mut Session,
    ) -> Result<(), russh::Error> {
        let mut child = match self.spawn_command(command) {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "Could not spawn session process");
                session.handle().close(channel).await.ok();
                return Ok(());
            }
        };

        if let Some(stdin) = child.stdin.take() {
            self.children.insert(channel, stdin);
        }
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let handle = session.handle();

        tokio::spawn(async move {
            let mut out_buf = [0u8; 8192];
            let mut err_buf = [0u8; 8192];
            loop {
                tokio::select! {
                    read = read_some(&mut stdout, &mut out_buf) => match read {
                        Some(n) => {
                            let _ = handle.data(channel, bytes::Bytes::copy_from_slice(&out_buf[..n])).await;
                        }
                        None => break,
                    },
                    read = read_some(&mut stderr, &mut err_buf) => match read {
                        Some(n) => {
                            let _ = handle
                                .extended_data(channel, 1, bytes::Bytes::copy_from_slice(&err_buf[..n]))
                                .await;
                        }
                        None => break,
                    },
                }
            }
            let code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(1) as u32,
                Err(_) => 1,
            };
            let _ = handle.exit_status_request(channel, code).await;
            let _ = handle.eof(channel).await;
            let _ = handle.close(channel).await;

            async fn read_some<R: tokio::io::AsyncRead + Unpin>(
                reader: &mut Option<R>,
                buf: &mut [u8],
            ) -> Option<usize> {
                use tokio::io::AsyncReadExt;
                match reader {
                    Some(r) => match r.read(buf).await {
                        Ok(0) | Err(_) => None,
                        Ok(n) => Some(n),
                    },
                    None => std::future::pending().await,
                }
            }
        });
        Ok(())
    }
}

impl Handler for StdioSession {
    type Error = russh::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        debug!(user = %user, "Accepting session (trust is the ProxyCommand boundary)");
        Ok(Auth::Accept)
    }

    async fn auth_password(&mut self, _user: &str, _password: &str) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn auth_publickey(
        &mut self,
        _user: &str,
        _key: &russh::keys::PublicKey,
    ) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.run_on_channel(channel, None, session).await?;
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).into_owned();
        self.run_on_channel(channel, Some(&command), session).await?;
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Sessions run over pipes; the request is acknowledged so clients
        // proceed, without a kernel pty behind it.
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(stdin) = self.children.get_mut(&channel) {
            if stdin.write_all(data).await.is_err() {
                self.children.remove(&channel);
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Dropping the stdin handle closes the child's input.
        self.children.remove(&channel);
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.children.remove(&channel);
        Ok(())
    }
}
