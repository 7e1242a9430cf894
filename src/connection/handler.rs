//! Connection Handler Module
//!
//! This module handles individual client connections.
//! Each client gets its own handler task that runs in a loop,
//! reading requests and sending responses.
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
//!    │  │ Parse one request       │◄┼──┐
//!    │  └───────────┬─────────────┘ │  │
//!    │              │ incomplete?   │  │
//!    │              ├──────────────►┼──┤ read more bytes
//!    │              ▼               │  │
//!    │  ┌─────────────────────────┐ │  │
//!    │  │ Dispatch                │ │  │
//!    │  └───────────┬─────────────┘ │  │
//!    │              ▼               │  │
//!    │  ┌─────────────────────────┐ │  │
//!    │  │ Write + flush reply     │─┼──┘
//!    │  └─────────────────────────┘ │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects / decode error / I/O error
//!        │
//!        ▼
//! 5. Handler task ends
//! ```
//!
//! ## Buffer Management
//!
//! We use a BytesMut buffer to accumulate incoming data. TCP is a stream
//! protocol, so a read may hold part of a request or several requests.
//! Buffered requests are still answered strictly one at a time: a reply is
//! flushed before the next request is parsed. While a request is incomplete
//! the parser picks up where the previous read left off.

use crate::commands::CommandHandler;
use crate::config::DEFAULT_MAX_BUFFER_SIZE;
use crate::protocol::{ParseError, RespParser, RespValue};
use bytes::BytesMut;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, trace, warn};

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

/// Per-connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Largest amount of unparsed request data kept for one client
    pub max_buffer_size: usize,
    /// Close the connection if no bytes arrive for this long
    pub idle_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            idle_timeout: None,
        }
    }
}

/// Handles a single client connection.
///
/// This struct manages the read buffer, parsing, and response sending
/// for one connected client. Any bidirectional byte stream works; the
/// server uses `TcpStream`.
pub struct ConnectionHandler<S> {
    /// The byte stream for this connection
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// Reused for encoding replies
    response: Vec<u8>,

    /// The command handler (shared across connections)
    command_handler: CommandHandler,

    /// RESP parser
    parser: RespParser,

    options: ConnectionOptions,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The byte stream for this connection
    /// * `addr` - The client's socket address
    /// * `command_handler` - The command handler for executing commands
    /// * `options` - Buffer and timeout limits
    /// * `stats` - Shared connection statistics
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        options: ConnectionOptions,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            response: Vec::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            parser: RespParser::new(),
            options,
            stats,
        }
    }

    /// Runs the main connection loop.
    ///
    /// This method reads requests from the client, executes them, and sends
    /// back responses until the client disconnects or an error occurs. It
    /// always ends with an error saying why the connection closed;
    /// [`ConnectionError::ClientDisconnected`] is the normal case.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let e = match self.main_loop().await {
            Ok(never) => match never {},
            Err(e) => e,
        };

        match &e {
            ConnectionError::ClientDisconnected => {
                info!(client = %self.addr, "Client disconnected")
            }
            ConnectionError::IoError(io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            _ => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        Err(e)
    }

    /// The main read-execute-respond loop. Only returns on error.
    async fn main_loop(&mut self) -> Result<Infallible, ConnectionError> {
    /// Attempts to parse a request from the buffer.
    fn try_parse_request(&mut self) -> Result<Option<RespValue>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((value, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed request"
                );
                Ok(Some(value))
            }
            Ok(None) => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete request, need more data"
                );
                Ok(None)
            }
            Err(e) => {
                // Framing is lost; no reply is sent
                warn!(client = %self.addr, error = %e, "Parse error");
                Err(ConnectionError::ParseError(e))
            }
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= self.options.max_buffer_size {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        // Ensure we have some capacity
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let read = self.stream.get_mut().read_buf(&mut self.buffer);
        let n = match self.options.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| ConnectionError::IdleTimeout)??,
            None => read.await?,
        };

        if n == 0 {
            // Connection closed by client
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                // Partial request in buffer
                return Err(ConnectionError::ParseError(ParseError::Truncated));
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Sends a response to the client.
    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        self.response.clear();
        response.serialize_into(&mut self.response);
        self.stream.write_all(&self.response).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(self.response.len());
        trace!(
            client = %self.addr,
            bytes = self.response.len(),
            "Sent response"
        );
        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// RESP parse error, including a request cut off by end of stream
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,

    /// No data arrived within the idle timeout
    #[error("Idle timeout")]
    IdleTimeout,
}

/// Handles a client connection.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it to completion.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    options: ConnectionOptions,
    stats: Arc<ConnectionStats>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, command_handler, options, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MAX_NESTING_DEPTH;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_test::io::Builder;

    fn test_addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    async fn run_with<S>(stream: S, options: ConnectionOptions) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let stats = Arc::new(ConnectionStats::new());
        ConnectionHandler::new(stream, test_addr(), CommandHandler::new(), options, stats)
            .run()
            .await
    }

    async fn create_test_server() -> (SocketAddr, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(ConnectionStats::new());

        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(
                    stream,
                    client_addr,
                    CommandHandler::new(),
                    ConnectionOptions::default(),
                    stats,
                ));
            }
        });

        (addr, stats)
    }

    async fn read_reply(client: &mut TcpStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn test_requests_answered_in_order() {
        let stream = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .read(b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n")
            .write(b"$5\r\nhello\r\n")
            .build();

        let result = run_with(stream, ConnectionOptions::default()).await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_buffered_requests() {
        let stream = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n*1\r\n$3\r\nFOO\r\n*1\r\n$4\r\nECHO\r\n")
            .write(b"+PONG\r\n")
            .write(b"-ERR unknown command\r\n")
            .write(b"-ERR wrong number of arguments\r\n")
            .build();

        let result = run_with(stream, ConnectionOptions::default()).await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_request_split_across_reads() {
        let stream = Builder::new()
            .read(b"*2\r\n$4\r\nEC")
            .read(b"HO\r\n$2\r")
            .read(b"\nhi\r\n")
            .write(b"$2\r\nhi\r\n")
            .build();

        let result = run_with(stream, ConnectionOptions::default()).await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_non_command_request_keeps_connection_open() {
        let stream = Builder::new()
            .read(b"+PING\r\n")
            .write(b"-ERR unknown command\r\n")
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();

        let result = run_with(stream, ConnectionOptions::default()).await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_malformed_request_closes_without_reply() {
        let stream = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .read(b"?garbage\r\n")
            .build();

        let result = run_with(stream, ConnectionOptions::default()).await;
        assert!(matches!(
            result,
            Err(ConnectionError::ParseError(ParseError::InvalidTypeTag(b'?')))
        ));
    }

    #[tokio::test]
    async fn test_eof_mid_request_is_truncated() {
        let stream = Builder::new().read(b"*1\r\n$5\r\nfoo\r\n").build();

        let result = run_with(stream, ConnectionOptions::default()).await;
        assert!(matches!(
            result,
            Err(ConnectionError::ParseError(ParseError::Truncated))
        ));
    }

    #[tokio::test]
    async fn test_buffer_limit() {
        let stream = Builder::new().read(b"$100\r\n0123456789abcdef").build();
        let options = ConnectionOptions {
            max_buffer_size: 16,
            idle_timeout: None,
        };

        let result = run_with(stream, options).await;
        assert!(matches!(result, Err(ConnectionError::BufferFull)));
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        // Keep the client half alive but silent.
        let (_client, server) = tokio::io::duplex(64);
        let options = ConnectionOptions {
            idle_timeout: Some(Duration::from_millis(50)),
            ..ConnectionOptions::default()
        };

        let result = run_with(server, options).await;
        assert!(matches!(result, Err(ConnectionError::IdleTimeout)));
    }

    /// `depth` single-element arrays wrapped around `innermost`.
    fn nested(depth: usize, innermost: &[u8]) -> Vec<u8> {
        let mut out = b"*1\r\n".repeat(depth);
        out.extend_from_slice(innermost);
        out
    }

    fn echo_request(argument: &[u8]) -> Vec<u8> {
        let mut out = b"*2\r\n$4\r\nECHO\r\n".to_vec();
        out.extend_from_slice(argument);
        out
    }

    /// Sends `request` in one write to a handler running on a worker thread
    /// and returns everything it wrote back before closing.
    async fn exchange_until_closed(
        request: Vec<u8>,
        options: ConnectionOptions,
    ) -> (Vec<u8>, Result<(), ConnectionError>) {
        let (mut client, server) = tokio::io::duplex(request.len() + 1024);
        let server = tokio::spawn(run_with(server, options));

        // The handler may hang up before reading everything.
        let _ = client.write_all(&request).await;

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        (reply, server.await.unwrap())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_echo_of_nested_value_near_buffer_limit() {
        let payload = vec![b'x'; 60 * 1024];
        let mut bulk = format!("${}\r\n", payload.len()).into_bytes();
        bulk.extend_from_slice(&payload);
        bulk.extend_from_slice(b"\r\n");

        let argument = nested(MAX_NESTING_DEPTH - 1, &bulk);
        let request = echo_request(&argument);
        assert!(request.len() < DEFAULT_MAX_BUFFER_SIZE);

        let (mut client, server) = tokio::io::duplex(2 * DEFAULT_MAX_BUFFER_SIZE);
        let server = tokio::spawn(run_with(server, ConnectionOptions::default()));

        client.write_all(&request).await.unwrap();
        let mut reply = vec![0u8; argument.len()];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, argument);

        drop(client);
        assert!(matches!(
            server.await.unwrap(),
            Err(ConnectionError::ClientDisconnected)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_echo_nested_too_deep_closes_connection() {
        let request = echo_request(&nested(16_000, b":1\r\n"));
        assert!(request.len() < DEFAULT_MAX_BUFFER_SIZE);

        let (reply, result) = exchange_until_closed(request, ConnectionOptions::default()).await;
        assert!(reply.is_empty());
        assert!(matches!(
            result,
            Err(ConnectionError::ParseError(ParseError::NestingTooDeep { .. }))
        ));

        // A larger buffer does not raise the depth limit.
        let request = echo_request(&nested(250_000, b":1\r\n"));
        let options = ConnectionOptions {
            max_buffer_size: 2 << 20,
            idle_timeout: None,
        };
        let (reply, result) = exchange_until_closed(request, options).await;
        assert!(reply.is_empty());
        assert!(matches!(
            result,
            Err(ConnectionError::ParseError(ParseError::NestingTooDeep { .. }))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_nested_non_command_too_deep_closes_connection() {
        let request = nested(16_000, b":1\r\n");
        assert!(request.len() < DEFAULT_MAX_BUFFER_SIZE);

        let (reply, result) = exchange_until_closed(request, ConnectionOptions::default()).await;
        assert!(reply.is_empty());
        assert!(matches!(
            result,
            Err(ConnectionError::ParseError(ParseError::NestingTooDeep { .. }))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_nested_non_command_at_depth_limit_is_dropped() {
        let request = nested(MAX_NESTING_DEPTH, b":1\r\n");
        let (mut client, server) = tokio::io::duplex(DEFAULT_MAX_BUFFER_SIZE);
        let server = tokio::spawn(run_with(server, ConnectionOptions::default()));

        client.write_all(&request).await.unwrap();
        let mut reply = vec![0u8; b"-ERR unknown command\r\n".len()];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, b"-ERR unknown command\r\n");

        // Still serving after the dropped request
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let mut reply = [0u8; 7];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"+PONG\r\n");

        drop(client);
        assert!(matches!(
            server.await.unwrap(),
            Err(ConnectionError::ClientDisconnected)
        ));
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        read_reply(&mut client, b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_sequential_requests_over_tcp() {
        let (addr, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        // Pipelined in one write, answered one by one in order
        client
            .write_all(
                b"*2\r\n$4\r\nPING\r\n$1\r\nx\r\n*2\r\n$4\r\nECHO\r\n$-1\r\n*2\r\n$4\r\nECHO\r\n*1\r\n:7\r\n*1\r\n$3\r\nGET\r\n",
            )
            .await
            .unwrap();

        read_reply(
            &mut client,
            b"+PONG\r\n$-1\r\n*1\r\n:7\r\n-ERR unknown command\r\n",
        )
        .await;

        // Connection is still usable after a dispatch error
        client
            .write_all(b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n")
            .await
            .unwrap();
        read_reply(&mut client, b"$5\r\nhello\r\n").await;
    }

    #[tokio::test]
    async fn test_malformed_input_drops_tcp_connection() {
        let (addr, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"!oops\r\n").await.unwrap();

        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_connections_are_independent() {
        let (addr, _) = create_test_server().await;

        let mut bad = TcpStream::connect(addr).await.unwrap();
        let mut good = TcpStream::connect(addr).await.unwrap();

        bad.write_all(b"%1\r\n").await.unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(bad.read(&mut buf).await.unwrap(), 0);

        good.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        read_reply(&mut good, b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, stats) = create_test_server().await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();

        // Give the server time to accept the connection
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        read_reply(&mut client, b"+PONG\r\n").await;

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_read.load(Ordering::Relaxed), 14);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 7);

        drop(client);

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
