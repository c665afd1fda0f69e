//! # line_server: a multithreaded TCP line server
//!
//! The crate has two halves. The first is a small socket layer over raw OS
//! descriptors: move-only sockets, an IPv4 address descriptor, TCP/UDP
//! operations that report expected conditions as status codes, and a
//! `poll(2)` multiplexer. The second is a fixed-size worker pool fed by a
//! supervisor thread that queues tasks and hands them out in submission
//! order.
//!
//! The `line-server` binary ties them together: it accepts connections,
//! submits one [`LineTask`](server::LineTask) per connection, and each task
//! reads one message and appends it to a log file.
//!
//! # Key Components
//!
//! - **`net`**: [`Endpoint`], [`Socket`](net::Socket), [`TcpClient`],
//!   [`TcpServer`], [`UdpSocket`](net::UdpSocket), [`Multiplexer`](net::Multiplexer).
//! - **`task`**: the [`Task`] trait, [`StopToken`], [`TaskHandle`] and [`TaskStatus`].
//! - **`worker`**: the [`WorkerPool`](worker::WorkerPool), one task slot per thread.
//! - **`manager`**: the [`PoolManager`] supervisor and its builder.
//! - **`server`**: the accept loop and the per-connection task.
//!
//! # Example
//!
//! ```no_run
//! use line_server::{LogSink, Server, ServerConfig};
//! use std::sync::Arc;
//!
//! let config = ServerConfig::new("127.0.0.1", 7878)?;
//! let sink = Arc::new(LogSink::open("log.txt", false)?);
//! let server = Server::bind(&config, sink)?;
//! server.serve();
//! # Ok::<(), line_server::ServerError>(())
//! ```

pub mod config;
pub mod error;
pub mod logsink;
pub mod manager;
pub mod net;
pub mod server;
pub mod signals;
pub mod task;
pub mod worker;

// Re-exports for the public API.
pub use config::{Cli, ServerConfig};
pub use error::{AddressError, PoolError, ServerError};
pub use logsink::LogSink;
pub use manager::{PoolManager, PoolManagerBuilder, ShutdownPolicy};
pub use net::{Endpoint, IoStatus, MessageEnd, TcpClient, TcpServer};
pub use server::{LineTask, Server};
pub use task::{StopToken, Task, TaskHandle, TaskStatus};
