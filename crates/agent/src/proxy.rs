//! Authentication-agent socket proxy.
//!
//! Creates a Unix socket, hands ownership to the target user, writes a
//! `<socket>.ready` marker, and relays SSH-agent protocol messages between
//! accepted connections and stdio. Agent messages are length-prefixed
//! (4-byte big-endian length, then payload), and every request produces
//! exactly one response, so relaying whole messages under a lock keeps
//! concurrent connections correct without any extra framing.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Stdin, Stdout};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Largest agent message we are willing to relay. The agent protocol's
/// messages are small; anything larger indicates a desynchronized stream.
const MAX_MESSAGE: u32 = 1024 * 1024;

pub async fn serve(socket: PathBuf, uid: u32, gid: u32) -> Result<()> {
    // A stale socket from a crashed session must not block binding.
    let _ = std::fs::remove_file(&socket);
    let listener = UnixListener::bind(&socket)
        .with_context(|| format!("binding {}", socket.display()))?;

    std::os::unix::fs::chown(&socket, Some(uid), Some(gid))
        .with_context(|| format!("chowning {} to {}:{}", socket.display(), uid, gid))?;

    let ready = ready_path(&socket);
    std::fs::write(&ready, b"").with_context(|| format!("writing {}", ready.display()))?;
    debug!(socket = %socket.display(), "Agent proxy ready");

    // stdio is the single upstream channel; one in-flight request at a time.
    let upstream = Arc::new(Mutex::new((tokio::io::stdin(), tokio::io::stdout())));

    loop {
        let (conn, _) = listener.accept().await?;
        let upstream = upstream.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(conn, upstream).await {
                warn!(error = %e, "Agent connection ended with error");
            }
        });
    }
}

fn ready_path(socket: &Path) -> PathBuf {
    PathBuf::from(format!("{}.ready", socket.display()))
}

async fn handle_connection(
    mut conn: UnixStream,
    upstream: Arc<Mutex<(Stdin, Stdout)>>,
) -> Result<()> {
    loop {
        let Some(request) = read_message(&mut conn).await? else {
            return Ok(()); // client closed its connection
        };

        let response = {
            let mut guard = upstream.lock().await;
            let (stdin, stdout) = &mut *guard;
            write_message(stdout, &request).await?;
            stdout.flush().await?;
            match read_message(stdin).await? {
                Some(response) => response,
                None => anyhow::bail!("upstream tunnel closed"),
            }
        };

        write_message(&mut conn, &response).await?;
    }
}

/// Read one length-prefixed agent message; `None` on clean EOF.
async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut length_bytes = [0u8; 4];
    match reader.read_exact(&mut length_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let length = u32::from_be_bytes(length_bytes);
    if length == 0 || length > MAX_MESSAGE {
        anyhow::bail!("implausible agent message length {}", length);
    }
    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    writer
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await?;
    writer.write_all(payload).await?;
    Ok(())
}
