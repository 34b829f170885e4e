//! Command channels feeding the dispatch queue.
//!
//! The stdio channel is the primary stream: requests in on stdin, replies
//! out on stdout, correlated by id. Socket connections are out-of-band
//! channels: every command is submitted with a single-resolution reply
//! slot and its reply is written back to that connection only.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use drover::{CommandSender, ReplySink};

/// Pumps stdin lines into the dispatcher until EOF or until the
/// dispatcher stops accepting (shutdown).
pub async fn run_stdio(sender: CommandSender) {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                warn!(target = "drover.channel", "stdout closed; stopping writer");
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if sender.submit_line(line, ReplySink::stream(out_tx.clone())).is_err() {
                    debug!(target = "drover.channel", "dispatcher stopped; closing stdio channel");
                    break;
                }
            }
            Ok(None) => {
                debug!(target = "drover.channel", "stdin closed");
                break;
            }
            Err(err) => {
                warn!(target = "drover.channel", error = %err, "stdin read failed");
                break;
            }
        }
    }

    // Let queued replies drain before the writer stops.
    drop(out_tx);
    let _ = writer.await;
}

#[cfg(unix)]
pub use socket::{bind_socket, serve_connections};

#[cfg(unix)]
mod socket {
    use super::*;

    use std::path::Path;

    use tokio::net::{UnixListener, UnixStream};
    use tokio::sync::oneshot;
    use tokio_stream::StreamExt;
    use tokio_stream::wrappers::UnixListenerStream;
    use tracing::info;

    use crate::error::{CliError, Result};

    /// Binds the out-of-band socket. Binding happens eagerly so an
    /// unusable path fails startup instead of surfacing mid-run.
    pub fn bind_socket(path: &Path) -> Result<UnixListener> {
        // A previous run may have left the socket file behind.
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path).map_err(|source| CliError::Socket {
            path: path.to_path_buf(),
            source,
        })?;
        info!(target = "drover.channel", path = %path.display(), "listening for out-of-band connections");
        Ok(listener)
    }

    /// Accept loop; one task per connection.
    pub async fn serve_connections(listener: UnixListener, sender: CommandSender) {
        let mut incoming = UnixListenerStream::new(listener);
        while let Some(stream) = incoming.next().await {
            match stream {
                Ok(stream) => {
                    tokio::spawn(handle_connection(stream, sender.clone()));
                }
                Err(err) => {
                    warn!(target = "drover.channel", error = %err, "socket accept failed");
                }
            }
        }
    }

    async fn handle_connection(stream: UnixStream, sender: CommandSender) {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }

            let (slot, reply_rx) = oneshot::channel();
            if sender.submit_line(line, ReplySink::pending(slot)).is_err() {
                debug!(target = "drover.channel", "dispatcher stopped; dropping connection");
                break;
            }

            // Direct synchronous reply on this connection, in request order.
            let Ok(reply) = reply_rx.await else {
                debug!(target = "drover.channel", "reply slot dropped; closing connection");
                break;
            };
            let mut payload = reply.to_line();
            payload.push('\n');
            if write_half.write_all(payload.as_bytes()).await.is_err() {
                break;
            }
        }
    }
}
