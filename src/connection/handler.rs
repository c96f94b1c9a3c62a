//! Connection Handler Module
//!
//! Each client gets its own handler task that runs in a loop, reading
//! commands and sending replies.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Decode buffered frames  │◄┼──┐
//!    │  └───────────┬─────────────┘ │  │
//!    │              ▼               │  │
//!    │  ┌─────────────────────────┐ │  │
//!    │  │ Execute, queue reply    │ │  │
//!    │  └───────────┬─────────────┘ │  │
//!    │              ▼               │  │
//!    │  ┌─────────────────────────┐ │  │
//!    │  │ Flush, read more bytes  │─┼──┘
//!    │  └─────────────────────────┘ │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Peer closes / malformed frame / buffer limit
//!        │
//!        ▼
//! 5. Handler task ends
//! ```
//!
//! ## Buffer Management
//!
//! Bytes are read straight into the decoder's `BytesMut`. TCP is a stream,
//! so one read may end halfway through a frame or carry several frames; a
//! half frame simply stays buffered until the next read completes it.
//! Replies to everything decoded from one read are flushed together before
//! the socket is read again.

use crate::commands::CommandHandler;
use crate::protocol::parser::MAX_BULK_SIZE;
use crate::protocol::{DecodeResult, ParseError, RespParser, RespValue};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, trace, warn};

/// Default cap on bytes buffered for a single connection.
///
/// Room for the largest bulk string the decoder accepts plus its framing
/// and the other arguments of the command, so any well-formed frame fits.
pub const MAX_BUFFER_SIZE: usize = MAX_BULK_SIZE + FRAME_HEADROOM;

/// Space reserved beyond one maximal bulk payload
const FRAME_HEADROOM: usize = 1024 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
///
/// Owns everything that is per-connection: the stream, the decoder and its
/// accumulation buffer. Only the store (behind the command handler) and the
/// stats are shared.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    parser: RespParser,

    command_handler: CommandHandler,

    stats: Arc<ConnectionStats>,

    buffer_limit: usize,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            parser: RespParser::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            stats,
            buffer_limit: MAX_BUFFER_SIZE,
        }
    }

    /// Overrides the per-connection buffer cap.
    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = limit;
        self
    }

    /// Runs the connection until the peer leaves or the connection fails.
    ///
    /// A clean close between frames is `Ok(())`.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = match self.main_loop().await {
            Err(ConnectionError::ClientDisconnected) => {
                info!(client = %self.addr, "Client disconnected");
                Ok(())
            }
            Err(ConnectionError::Io(ref e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client");
                Ok(())
            }
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Closing connection");
                Err(e)
            }
            Ok(()) => Ok(()),
        };

        self.stats.connection_closed();
        result
    }

    /// The read-decode-execute-reply loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let mut replied = false;
            loop {
                match self.parser.try_decode() {
                    DecodeResult::Complete(command) => {
                        trace!(
                            client = %self.addr,
                            args = command.len(),
                            remaining = self.parser.buffered(),
                            "Decoded command"
                        );
                        let response = self.command_handler.execute(command);
                        self.stats.command_processed();
                        self.write_response(&response).await?;
                        replied = true;
                    }
                    DecodeResult::Incomplete => break,
                    DecodeResult::Malformed(e) => return Err(ConnectionError::Protocol(e)),
                }
            }

            if replied {
                self.stream.flush().await?;
            }

            self.read_more_data().await?;
        }
    }

    /// Reads more data from the socket into the decoder's buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        let buffered = self.parser.buffered();
        if buffered >= self.buffer_limit {
            error!(
                client = %self.addr,
                size = buffered,
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        let buffer = self.parser.buffer_mut();
        if buffer.capacity() - buffer.len() < 1024 {
            buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(buffer).await?;

        if n == 0 {
            return if buffered == 0 {
                Err(ConnectionError::ClientDisconnected)
            } else {
                // Peer left in the middle of a frame
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Queues a reply; it goes out with the next flush.
    async fn write_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.stream.write_all(&bytes).await?;
        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            "Queued response"
        );
        Ok(())
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame; no reply is sent
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// Peer closed between frames
    #[error("client disconnected")]
    ClientDisconnected,

    /// Peer closed partway through a frame
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("buffer size limit exceeded")]
    BufferFull,
}

/// Creates a [`ConnectionHandler`] and runs it to completion.
///
/// Failures are already logged by the handler, so the task just ends.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    if let Err(e) = handler.run().await {
        debug!(client = %addr, error = %e, "Connection ended with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::storage::StorageEngine;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_test::io::Builder;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn command_handler() -> CommandHandler {
        CommandHandler::new(
            Arc::new(StorageEngine::new()),
            Arc::new(ServerConfig::default()),
        )
    }

    async fn create_test_server() -> (SocketAddr, Arc<StorageEngine>, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(StorageEngine::new());
        let stats = Arc::new(ConnectionStats::new());

        let storage_clone = Arc::clone(&storage);
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = CommandHandler::new(
                    Arc::clone(&storage_clone),
                    Arc::new(ServerConfig::default()),
                );
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, handler, stats));
            }
        });

        (addr, storage, stats)
    }

    #[tokio::test]
    async fn test_fragmented_frame() {
        let mock = Builder::new()
            .read(b"*1\r\n$4\r")
            .read(b"\nPI")
            .read(b"NG\r\n")
            .write(b"+PONG\r\n")
            .build();

        let stats = Arc::new(ConnectionStats::new());
        let handler = ConnectionHandler::new(mock, test_addr(), command_handler(), Arc::clone(&stats));
        assert!(handler.run().await.is_ok());

        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_read.load(Ordering::Relaxed), 14);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 7);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_one_byte_at_a_time() {
        let request = b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";
        let mut builder = Builder::new();
        for byte in request.chunks(1) {
            builder.read(byte);
        }
        builder.write(b"+OK\r\n");
        builder.read(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
        builder.write(b"$3\r\nbar\r\n");

        let handler = ConnectionHandler::new(
            builder.build(),
            test_addr(),
            command_handler(),
            Arc::new(ConnectionStats::new()),
        );
        assert!(handler.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_pipelined_replies_in_order() {
        let mock = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n*2\r\n$3\r\nGET\r\n$1\r\na\r\n*1\r\n$4\r\nPING\r\n")
            .write(b"+OK\r\n$1\r\n1\r\n+PONG\r\n")
            .build();

        let handler = ConnectionHandler::new(
            mock,
            test_addr(),
            command_handler(),
            Arc::new(ConnectionStats::new()),
        );
        assert!(handler.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_application_error_keeps_connection() {
        let mock = Builder::new()
            .read(b"*1\r\n$7\r\nUNKNOWN\r\n")
            .write(b"-ERR unknown command 'UNKNOWN'\r\n")
            .read(b"*1\r\n$4\r\nECHO\r\n")
            .write(b"-ERR wrong number of arguments for 'echo' command\r\n")
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();

        let handler = ConnectionHandler::new(
            mock,
            test_addr(),
            command_handler(),
            Arc::new(ConnectionStats::new()),
        );
        assert!(handler.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_without_reply() {
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .read(b"!oops\r\n")
            .build();

        let handler = ConnectionHandler::new(
            mock,
            test_addr(),
            command_handler(),
            Arc::new(ConnectionStats::new()),
        );
        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::Protocol(ParseError::UnknownPrefix(b'!')))
        ));
    }

    #[tokio::test]
    async fn test_eof_mid_frame() {
        let mock = Builder::new().read(b"*2\r\n$3\r\nGET\r\n").build();

        let handler = ConnectionHandler::new(
            mock,
            test_addr(),
            command_handler(),
            Arc::new(ConnectionStats::new()),
        );
        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_buffer_limit() {
        let mock = Builder::new()
            .read(b"*1\r\n$100\r\n01234567890123456789")
            .build();

        let handler = ConnectionHandler::new(
            mock,
            test_addr(),
            command_handler(),
            Arc::new(ConnectionStats::new()),
        )
        .with_buffer_limit(16);
        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::BufferFull)
        ));
    }

    #[test]
    fn test_default_limit_fits_largest_bulk_frame() {
        // SET, a short key and a maximal value, with all their headers
        let framing = b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n".len()
            + format!("${}\r\n\r\n", MAX_BULK_SIZE).len();
        assert!(MAX_BUFFER_SIZE >= MAX_BULK_SIZE + framing);
    }

    #[tokio::test]
    async fn test_large_value_under_limit_is_accepted() {
        let value = vec![b'v'; 256 * 1024];
        let mut request = b"*3\r\n$3\r\nSET\r\n$3\r\nbig\r\n".to_vec();
        request.extend_from_slice(format!("${}\r\n", value.len()).as_bytes());
        request.extend_from_slice(&value);
        request.extend_from_slice(b"\r\n");

        let mut builder = Builder::new();
        for chunk in request.chunks(16 * 1024) {
            builder.read(chunk);
        }
        builder.write(b"+OK\r\n");

        let storage = Arc::new(StorageEngine::new());
        let handler = ConnectionHandler::new(
            builder.build(),
            test_addr(),
            CommandHandler::new(Arc::clone(&storage), Arc::new(ServerConfig::default())),
            Arc::new(ConnectionStats::new()),
        );
        assert!(handler.run().await.is_ok());
        assert_eq!(storage.get(b"big").map(|v| v.len()), Some(value.len()));
    }

    #[tokio::test]
    async fn test_set_get_over_tcp() {
        let (addr, storage, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n")
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");
        assert!(storage.exists(b"name"));

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .await
            .unwrap();

        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"$4\r\nAriz\r\n");
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, _, stats) = create_test_server().await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();

        // Give the server time to accept the connection
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let _ = client.read(&mut buf).await.unwrap();

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
