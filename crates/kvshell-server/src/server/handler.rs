//! Byte-transparent connection handler.
//!
//! [`EchoHandler`] writes every byte it reads back to the peer until the peer
//! closes its side or shutdown begins. It stands in for a protocol engine and
//! exercises the full [`Handler`] contract.

use kvshell::{BoxError, CancellationToken, Handler};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

#[derive(Debug)]
pub struct EchoHandler {
    buffer_size: usize,
    ready: AtomicBool,
    connections: AtomicU64,
    bytes_echoed: AtomicU64,
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl EchoHandler {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            ready: AtomicBool::new(false),
            connections: AtomicU64::new(0),
            bytes_echoed: AtomicU64::new(0),
        }
    }

    /// Connections handled so far.
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Bytes written back to peers so far.
    pub fn bytes_echoed(&self) -> u64 {
        self.bytes_echoed.load(Ordering::Relaxed)
    }

    async fn echo<C>(&self, token: &CancellationToken, conn: &mut C) -> std::io::Result<()>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = vec![0_u8; self.buffer_size];

        loop {
            let n = tokio::select! {
                () = token.cancelled() => return Ok(()),
                read = conn.read(&mut buf) => read?,
            };
            if n == 0 {
                return Ok(());
            }

            conn.write_all(&buf[..n]).await?;
            self.bytes_echoed.fetch_add(n as u64, Ordering::Relaxed);
        }
    }
}

impl<C> Handler<C> for EchoHandler
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn start(&self) -> Result<(), BoxError> {
        if self.ready.swap(true, Ordering::AcqRel) {
            return Err("echo handler already started".into());
        }
        tracing::debug!("Echo handler ready ({} byte buffer)", self.buffer_size);
        Ok(())
    }

    async fn handle(&self, token: CancellationToken, mut conn: C) {
        self.connections.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.echo(&token, &mut conn).await {
            tracing::debug!("Connection ended with error: {e}");
        }
        if let Err(e) = conn.shutdown().await {
            tracing::trace!("Failed to shut down connection: {e}");
        }
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.ready.store(false, Ordering::Release);
        tracing::info!(
            "Echo handler closed after {} connections ({} bytes)",
            self.connections(),
            self.bytes_echoed()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, duplex};

    #[tokio::test]
    async fn echoes_until_eof() {
        let handler = EchoHandler::new(4);
        let (mut client, server) = duplex(64);

        let task = tokio::spawn(async move {
            handler.handle(CancellationToken::new(), server).await;
            handler
        });

        client.write_all(b"PING\r\nhello world").await.unwrap();
        client.shutdown().await.unwrap();

        let mut echoed = Vec::new();
        client.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, b"PING\r\nhello world");

        let handler = task.await.unwrap();
        assert_eq!(handler.connections(), 1);
        assert_eq!(handler.bytes_echoed(), 17);
    }

    #[tokio::test]
    async fn stops_when_the_token_is_cancelled() {
        let handler = EchoHandler::default();
        let token = CancellationToken::new();
        let (mut client, server) = duplex(64);

        let task = tokio::spawn({
            let token = token.clone();
            async move { handler.handle(token, server).await }
        });

        client.write_all(b"a").await.unwrap();
        let mut byte = [0_u8; 1];
        client.read_exact(&mut byte).await.unwrap();
        assert_eq!(&byte, b"a");

        token.cancel();
        task.await.unwrap();

        // The handler shut down its write half, so the client sees EOF.
        assert_eq!(client.read(&mut byte).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn start_is_rejected_twice_until_closed() {
        let handler = EchoHandler::default();
        <EchoHandler as Handler<DuplexStream>>::start(&handler)
            .await
            .unwrap();
        assert!(
            <EchoHandler as Handler<DuplexStream>>::start(&handler)
                .await
                .is_err()
        );

        <EchoHandler as Handler<DuplexStream>>::close(&handler)
            .await
            .unwrap();
        <EchoHandler as Handler<DuplexStream>>::start(&handler)
            .await
            .unwrap();
    }
}
