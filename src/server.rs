// src/server.rs

//! The line server: accept connections and hand each one to the pool as a
//! [`LineTask`] that reads a single message and logs it.

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::logsink::LogSink;
use crate::manager::PoolManager;
use crate::net::{
    AcceptStatus, Endpoint, IoStatus, MessageEnd, Multiplexer, TcpClient, TcpServer,
};
use crate::task::{StopToken, Task, TaskHandle};
use std::sync::Arc;

/// Longest a [`LineTask`] waits for data before rechecking its stop token.
pub const STOP_CHECK_MS: i32 = 50;

// --- LineTask ---
/// Reads one message from an accepted connection and writes it to the log.
pub struct LineTask {
    client: TcpClient,
    message_end: MessageEnd,
    sink: Arc<LogSink>,
    buffer: Vec<u8>,
}

impl LineTask {
    /// Takes the connection out of `incoming`, leaving it empty for the next
    /// accept.
    pub fn new(incoming: &mut TcpClient, message_end: MessageEnd, sink: Arc<LogSink>) -> Self {
        let mut client = TcpClient::new();
        client.take_from(incoming);
        Self {
            client,
            message_end,
            sink,
            buffer: Vec::new(),
        }
    }

    pub fn peer(&self) -> &Endpoint {
        self.client.peer_endpoint()
    }
}

impl Task for LineTask {
    /// Waits for the message in short polls so a raised stop token is seen
    /// within [`STOP_CHECK_MS`] even when the client sends nothing.
    fn work(&mut self, stop: &StopToken) {
        self.buffer.clear();
        let mut mux = Multiplexer::new();
        if !mux.add_reader(&mut self.client) {
            tracing::debug!("connection from {} is not readable", self.peer());
            self.client.close();
            return;
        }

        let once = MessageEnd::any_read();
        let mut chunk = Vec::new();
        loop {
            if stop.is_stopped() {
                tracing::debug!(
                    discarded = self.buffer.len(),
                    "stopping, connection from {} not read",
                    self.peer()
                );
                break;
            }
            match mux.poll(STOP_CHECK_MS) {
                Ok(0) => continue,
                Ok(_) => {}
                Err(_) => break,
            }
            match self.client.receive(&mut chunk, &once) {
                IoStatus::Complete | IoStatus::Partial(_) => {
                    self.buffer.extend_from_slice(&chunk);
                    if self.message_end.is_satisfied(&self.buffer) {
                        self.sink.log(&String::from_utf8_lossy(&self.buffer), None);
                        break;
                    }
                }
                IoStatus::WouldBlock => {}
                IoStatus::PeerClosed => {
                    tracing::debug!(
                        discarded = self.buffer.len(),
                        "{} closed before a complete message",
                        self.peer()
                    );
                    break;
                }
                status => {
                    tracing::debug!(?status, "no message from {}", self.peer());
                    break;
                }
            }
        }
        mux.delete_reader(&self.client);
        self.client.close();
    }
}

// --- Server ---
/// A listening socket plus the pool that serves its connections.
pub struct Server {
    listener: TcpServer,
    manager: PoolManager,
    sink: Arc<LogSink>,
    message_end: MessageEnd,
}

impl Server {
    /// Binds the listener and starts the worker pool.
    ///
    /// # Errors
    ///
    /// [`ServerError::Listen`] if the address cannot be bound, or
    /// [`ServerError::Pool`] if the workers cannot be started.
    pub fn bind(config: &ServerConfig, sink: Arc<LogSink>) -> Result<Self> {
        let listener = TcpServer::bind_endpoint(&config.endpoint);
        if !listener.is_valid() {
            return Err(ServerError::Listen(config.endpoint.to_string()));
        }
        let manager = PoolManager::builder()
            .with_workers(config.workers)
            .with_shutdown_policy(config.shutdown_policy)
            .build()?;
        Ok(Self {
            listener,
            manager,
            sink,
            message_end: config.message_end.clone(),
        })
    }

    /// The address actually bound (the real port when 0 was requested).
    pub fn local_endpoint(&self) -> &Endpoint {
        self.listener.local_endpoint()
    }

    /// Accepts one connection and queues a [`LineTask`] for it.
    pub fn accept_one(&self) -> std::result::Result<TaskHandle, AcceptStatus> {
        let mut incoming = TcpClient::new();
        match self.listener.add_client(&mut incoming) {
            AcceptStatus::Accepted => {
                let task = LineTask::new(&mut incoming, self.message_end.clone(), Arc::clone(&self.sink));
                let peer = task.peer().clone();
                let handle = self.manager.submit(task);
                tracing::debug!("{handle} queued for {peer}");
                Ok(handle)
            }
            status => Err(status),
        }
    }

    /// Accepts connections until an accept fails, and returns that status.
    pub fn serve(&self) -> AcceptStatus {
        tracing::info!("serving on {}", self.local_endpoint());
        loop {
            if let Err(status) = self.accept_one() {
                tracing::warn!(code = status.code(), "accept loop stopped: {status:?}");
                return status;
            }
        }
    }

    pub fn manager(&self) -> &PoolManager {
        &self.manager
    }

    /// Stops the pool according to the configured shutdown policy.
    pub fn shutdown(&mut self) {
        self.manager.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;
    use std::fs;
    use std::thread;
    use std::time::{Duration, Instant};

    fn config() -> ServerConfig {
        ServerConfig::new("127.0.0.1", 0).unwrap()
    }

    #[test]
    fn bind_failure_is_listen_error() {
        let first = Server::bind(&config(), Arc::new(LogSink::console_only())).unwrap();
        let mut taken = config();
        taken.endpoint = first.local_endpoint().clone();
        // SO_REUSEADDR does not allow two listeners on one port.
        let err = Server::bind(&taken, Arc::new(LogSink::console_only())).err();
        assert!(matches!(err, Some(ServerError::Listen(_))));
    }

    #[test]
    fn one_message_per_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let sink = Arc::new(LogSink::open(&path, false).unwrap());
        let server = Server::bind(&config(), sink).unwrap();
        let target = server.local_endpoint().clone();

        let client = thread::spawn(move || {
            let mut client = TcpClient::connect_to(&target);
            assert_eq!(client.send(b"ping"), IoStatus::Complete);
            client
        });
        let handle = server.accept_one().unwrap();
        let _client = client.join().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while server.manager().status(handle) != TaskStatus::Completed {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(2));
        }
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.trim_end().ends_with("] ping"));
    }

    #[test]
    fn raised_stop_token_skips_the_read() {
        let sink = Arc::new(LogSink::console_only());
        let mut empty = TcpClient::new();
        let mut task = LineTask::new(&mut empty, MessageEnd::any_read(), sink);
        let stop = StopToken::new();
        stop.raise();
        task.work(&stop);
        assert!(task.buffer.is_empty());
    }

    #[test]
    fn idle_connection_returns_after_stop() {
        let listener = TcpServer::bind("127.0.0.1", 0);
        let client = TcpClient::connect_to(listener.local_endpoint());
        let mut accepted = TcpClient::new();
        assert_eq!(listener.add_client(&mut accepted), AcceptStatus::Accepted);

        let sink = Arc::new(LogSink::console_only());
        let mut task = LineTask::new(&mut accepted, MessageEnd::any_read(), sink);
        let stop = StopToken::new();
        let worker = {
            let stop = stop.clone();
            thread::spawn(move || {
                task.work(&stop);
                task
            })
        };

        thread::sleep(Duration::from_millis(3 * STOP_CHECK_MS as u64));
        assert!(!worker.is_finished());
        let raised = Instant::now();
        stop.raise();
        let task = worker.join().unwrap();
        assert!(raised.elapsed() < Duration::from_secs(2));
        assert!(task.buffer.is_empty());
        assert!(!task.client.is_valid());
        drop(client);
    }

    #[test]
    fn message_split_across_reads_is_joined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let sink = Arc::new(LogSink::open(&path, false).unwrap());
        let listener = TcpServer::bind("127.0.0.1", 0);
        let mut client = TcpClient::connect_to(listener.local_endpoint());
        let mut accepted = TcpClient::new();
        assert_eq!(listener.add_client(&mut accepted), AcceptStatus::Accepted);

        let mut task = LineTask::new(&mut accepted, MessageEnd::terminated_by("\r\n"), sink);
        let worker = thread::spawn(move || task.work(&StopToken::new()));
        assert_eq!(client.send(b"first half, "), IoStatus::Complete);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(client.send(b"second half\r\n"), IoStatus::Complete);
        worker.join().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.trim_end().ends_with("] first half, second half"));
    }
}
