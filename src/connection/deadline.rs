//! Drain deadline for connection reads
//!
//! While the server runs, reads wait as long as the client needs. Once
//! shutdown starts, a read that stays pending for longer than the grace
//! period fails with [`io::ErrorKind::TimedOut`]. A client that stops halfway
//! through a request therefore cannot hold up the drain, while data that is
//! already arriving is still read normally.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

/// How long a read may stall after shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// An [`AsyncRead`] that gives up on a stalled peer once shutdown has begun.
pub struct DrainDeadline<R> {
    inner: R,
    /// Completes `grace` after the token is cancelled
    deadline: Pin<Box<dyn Future<Output = ()> + Send>>,
    expired: bool,
}

impl<R> DrainDeadline<R> {
    pub fn new(inner: R, shutdown: CancellationToken, grace: Duration) -> Self {
        Self {
            inner,
            deadline: Box::pin(async move {
                shutdown.cancelled().await;
                tokio::time::sleep(grace).await;
            }),
            expired: false,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}

impl<R> std::fmt::Debug for DrainDeadline<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainDeadline")
            .field("expired", &self.expired)
            .finish_non_exhaustive()
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DrainDeadline<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        if let Poll::Ready(result) = Pin::new(&mut this.inner).poll_read(cx, buf) {
            return Poll::Ready(result);
        }

        // The deadline future must not be polled again once it completed
        if !this.expired && this.deadline.as_mut().poll(cx).is_ready() {
            this.expired = true;
        }
        if this.expired {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "client stalled while the server was shutting down",
            )));
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const GRACE: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_reads_wait_while_running() {
        let (_client, server) = tokio::io::duplex(64);
        let mut reader = DrainDeadline::new(server, CancellationToken::new(), GRACE);

        let mut buf = [0u8; 8];
        let result = tokio::time::timeout(Duration::from_millis(200), reader.read(&mut buf)).await;
        assert!(result.is_err(), "read should still be waiting");
    }

    #[tokio::test]
    async fn test_stalled_read_fails_after_grace() {
        let (_client, server) = tokio::io::duplex(64);
        let shutdown = CancellationToken::new();
        let mut reader = DrainDeadline::new(server, shutdown.clone(), GRACE);

        shutdown.cancel();
        let mut buf = [0u8; 8];
        let err = tokio::time::timeout(Duration::from_secs(2), reader.read(&mut buf))
            .await
            .expect("read was not cut off")
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        // Later stalls fail at once
        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_available_data_is_read_during_shutdown() {
        let (mut client, server) = tokio::io::duplex(64);
        let shutdown = CancellationToken::new();
        let mut reader = DrainDeadline::new(server, shutdown.clone(), GRACE);

        shutdown.cancel();
        client.write_all(b"GET k\r\n").await.unwrap();

        let mut buf = [0u8; 7];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"GET k\r\n");
    }

    #[tokio::test]
    async fn test_stall_that_started_before_shutdown_is_cut_off() {
        let (_client, server) = tokio::io::duplex(64);
        let shutdown = CancellationToken::new();
        let mut reader = DrainDeadline::new(server, shutdown.clone(), GRACE);

        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let mut buf = [0u8; 8];
        let err = tokio::time::timeout(Duration::from_secs(2), reader.read(&mut buf))
            .await
            .expect("read was not cut off")
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
