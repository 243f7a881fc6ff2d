//! Bidirectional byte pipe for CONNECT sessions

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Bytes moved in each direction
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipeStats {
    pub client_to_tunnel: u64,
    pub tunnel_to_client: u64,
}

/// Copy bytes both ways between `client` and `tunnel` until either side ends
///
/// The first direction to reach EOF or an I/O error shuts down its
/// destination's write half and stops the other direction, so a peer that
/// goes away releases both streams even if the other peer stays idle.
/// Cancelling `cancel` stops both. Both streams are dropped on return.
pub async fn pipe<C, T>(client: C, tunnel: T, cancel: CancellationToken) -> PipeStats
where
    C: AsyncRead + AsyncWrite,
    T: AsyncRead + AsyncWrite,
{
    let session = cancel.child_token();
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut tunnel_rd, mut tunnel_wr) = tokio::io::split(tunnel);

    let (upstream, downstream) = tokio::join!(
        copy_half(&mut client_rd, &mut tunnel_wr, &session),
        copy_half(&mut tunnel_rd, &mut client_wr, &session),
    );

    let stats = PipeStats {
        client_to_tunnel: upstream.total,
        tunnel_to_client: downstream.total,
    };

    match (upstream.error, downstream.error) {
        (None, None) => debug!(
            client_to_tunnel = stats.client_to_tunnel,
            tunnel_to_client = stats.tunnel_to_client,
            "Pipe closed"
        ),
        (Some(e), _) | (_, Some(e)) => debug!(
            client_to_tunnel = stats.client_to_tunnel,
            tunnel_to_client = stats.tunnel_to_client,
            "Pipe terminated: {}",
            e
        ),
    }

    stats
}

struct HalfOutcome {
    total: u64,
    error: Option<io::Error>,
}

/// Copy `src` into `dst` until EOF, an error, or `session` is cancelled.
///
/// Ending on its own (EOF or error) cancels `session` for the other half.
async fn copy_half<R, W>(src: &mut R, dst: &mut W, session: &CancellationToken) -> HalfOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 16 * 1024];
    let mut total = 0u64;

    let error = loop {
        let n = tokio::select! {
            _ = session.cancelled() => return HalfOutcome { total, error: None },
            read = src.read(&mut buf) => match read {
                Ok(n) => n,
                Err(e) => break Some(e),
            },
        };

        if n == 0 {
            let _ = dst.shutdown().await;
            break None;
        }

        let written = tokio::select! {
            _ = session.cancelled() => return HalfOutcome { total, error: None },
            written = dst.write_all(&buf[..n]) => written,
        };
        if let Err(e) = written {
            break Some(e);
        }
        total += n as u64;
    };

    session.cancel();
    HalfOutcome { total, error }
}
