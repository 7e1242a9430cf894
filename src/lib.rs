//! # resplite - A Minimal RESP Server
//!
//! resplite speaks the Redis Serialization Protocol (RESP): it decodes
//! RESP-framed requests from a byte stream, dispatches a small command set,
//! and encodes RESP-framed replies.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                            resplite                               │
//! │                                                                   │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐            │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │            │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │            │
//! │  └─────────────┘    └──────┬──────┘    └─────────────┘            │
//! │                            │                                      │
//! │                            ▼                                      │
//! │                     ┌─────────────┐                               │
//! │                     │ RESP Parser │                               │
//! │                     │ + Encoder   │                               │
//! │                     └─────────────┘                               │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Data flows bytes → parser → `RespValue` → command handler → `RespValue`
//! → encoder → bytes.
//!
//! ## Quick Start
//!
//! ```ignore
//! use resplite::commands::CommandHandler;
//! use resplite::connection::{handle_connection, ConnectionOptions, ConnectionStats};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let stats = Arc::new(ConnectionStats::new());
//!     let listener = TcpListener::bind("127.0.0.1:6379").await.unwrap();
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await.unwrap();
//!         tokio::spawn(handle_connection(
//!             stream,
//!             addr,
//!             CommandHandler::new(),
//!             ConnectionOptions::default(),
//!             Arc::clone(&stats),
//!         ));
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `ECHO message`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP value model, parser and encoder
//! - [`commands`]: Command dispatch
//! - [`connection`]: Client connection management
//! - [`config`]: Command-line and environment configuration

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;

// Re-export commonly used types for convenience
pub use commands::{dispatch, CommandError, CommandHandler};
pub use config::Config;
pub use connection::{handle_connection, ConnectionOptions, ConnectionStats};
pub use protocol::{decode, ParseError, RespParser, RespValue};

/// The default port resplite listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host resplite binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of resplite
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
