//! Command-line interface and the validated server configuration built
//! from it.

use crate::error::{Result, ServerError};
use crate::manager::ShutdownPolicy;
use crate::net::{Endpoint, MessageEnd};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Accepts TCP connections and logs one message from each", long_about = None)]
pub struct Cli {
    /// TCP port to listen on (1-65535)
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// IPv4 address to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,

    /// Number of worker threads
    #[arg(short, long, default_value_t = 3)]
    pub workers: usize,

    /// File that receives the logged messages
    #[arg(long, default_value = "log.txt")]
    pub log_file: PathBuf,

    /// Echo log records to the console
    #[arg(long)]
    pub console: bool,

    /// Message terminator (e.g. "\n"); by default one read is one message
    #[arg(long)]
    pub terminator: Option<String>,

    /// Message size in bytes that completes a message
    #[arg(long)]
    pub message_size: Option<usize>,

    /// Finish queued connections before exiting instead of dropping them
    #[arg(long)]
    pub drain: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Validates the arguments into a [`ServerConfig`].
    pub fn into_config(self) -> Result<ServerConfig> {
        if self.workers == 0 {
            return Err(ServerError::Config("--workers must be at least 1".to_string()));
        }
        let endpoint = Endpoint::from_text(&self.bind, self.port)?;

        let mut message_end = match self.terminator {
            Some(terminator) => MessageEnd::terminated_by(unescape(&terminator)),
            None => MessageEnd::any_read(),
        };
        if let Some(size) = self.message_size {
            message_end = message_end.with_expected_size(size);
        }

        Ok(ServerConfig {
            endpoint,
            workers: self.workers,
            log_file: self.log_file,
            console: self.console,
            message_end,
            shutdown_policy: if self.drain {
                ShutdownPolicy::Drain
            } else {
                ShutdownPolicy::Drop
            },
            verbose: self.verbose,
        })
    }
}

/// Runtime settings for [`Server`](crate::server::Server).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub endpoint: Endpoint,
    pub workers: usize,
    pub log_file: PathBuf,
    pub console: bool,
    pub message_end: MessageEnd,
    pub shutdown_policy: ShutdownPolicy,
    pub verbose: bool,
}

impl ServerConfig {
    /// Defaults for `ip:port`: three workers, `log.txt`, one read per message.
    pub fn new(ip: &str, port: u16) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::from_text(ip, port)?,
            workers: crate::manager::builder::DEFAULT_WORKERS,
            log_file: PathBuf::from("log.txt"),
            console: false,
            message_end: MessageEnd::any_read(),
            shutdown_policy: ShutdownPolicy::default(),
            verbose: false,
        })
    }
}

/// Expands `\n`, `\r`, `\t`, `\0` and `\\` so terminators can be typed on a
/// shell command line.
fn unescape(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => out.push(b'\n'),
            Some('r') => out.push(b'\r'),
            Some('t') => out.push(b'\t'),
            Some('0') => out.push(0),
            Some('\\') => out.push(b'\\'),
            Some(other) => {
                out.push(b'\\');
                let mut buf = [0u8; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => out.push(b'\\'),
        }
    }
    out
}
