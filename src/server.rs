//! Listener
//!
//! Accepts connections forever and hands each one to its own task. An
//! accept failure only loses that one connection attempt.

use crate::commands::CommandHandler;
use crate::config::ServerConfig;
use crate::connection::{handle_connection, ConnectionStats};
use crate::storage::StorageEngine;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, trace};

/// Main loop that accepts incoming connections. Never returns; stop it by
/// dropping the future.
pub async fn serve(
    listener: TcpListener,
    storage: Arc<StorageEngine>,
    config: Arc<ServerConfig>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                trace!(client = %addr, "Accepted connection");
                if let Err(e) = stream.set_nodelay(true) {
                    trace!(client = %addr, error = %e, "Could not set TCP_NODELAY");
                }

                let handler = CommandHandler::new(Arc::clone(&storage), Arc::clone(&config));
                let stats = Arc::clone(&stats);

                tokio::spawn(handle_connection(stream, addr, handler, stats));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_serves_concurrent_clients() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(StorageEngine::new());
        let stats = Arc::new(ConnectionStats::new());

        tokio::spawn(serve(
            listener,
            Arc::clone(&storage),
            Arc::new(ServerConfig::default()),
            Arc::clone(&stats),
        ));

        let mut tasks = Vec::new();
        for i in 0..8 {
            tasks.push(tokio::spawn(async move {
                let mut client = TcpStream::connect(addr).await.unwrap();
                let key = format!("k{}", i);
                let request = format!("*3\r\n$3\r\nSET\r\n$2\r\n{}\r\n$1\r\nv\r\n", key);
                client.write_all(request.as_bytes()).await.unwrap();

                let mut buf = [0u8; 16];
                client.read_exact(&mut buf[..5]).await.unwrap();
                assert_eq!(&buf[..5], b"+OK\r\n");
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(storage.len(), 8);
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 8);
    }
}
