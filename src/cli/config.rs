//! CLI configuration module
//!
//! Turns parsed arguments into the settings the session and download loop use.

use std::time::Duration;

use anyhow::Result;

use crate::cli::args::CliArgs;
use crate::error::TorrentError;
use crate::peer::SessionConfig;
use crate::protocol::Handshake;
use crate::storage::DownloadOptions;

/// Configuration for the client
#[derive(Debug, Clone)]
pub struct Config {
    /// Our peer ID
    pub peer_id: [u8; 20],
    /// Port reported to the tracker
    pub port: u16,
    /// TCP connect deadline
    pub connect_timeout: Duration,
    /// Deadline for each read or write
    pub io_timeout: Duration,
    /// Outstanding block requests
    pub pipeline_depth: usize,
    /// Re-fetches allowed per piece after a hash mismatch
    pub max_piece_retries: u32,
    /// Suppress status lines on stdout
    pub quiet: bool,
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let peer_id = match &args.peer_id {
            Some(id) => parse_peer_id(id)?,
            None => Handshake::generate_peer_id(),
        };

        let config = Self {
            peer_id,
            port: args.port,
            connect_timeout: Duration::from_secs(args.connect_timeout),
            io_timeout: Duration::from_secs(args.io_timeout),
            pipeline_depth: args.pipeline_depth,
            max_piece_retries: args.piece_retries,
            quiet: args.quiet,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(TorrentError::config_error_with_field("Port cannot be 0", "port").into());
        }

        if self.connect_timeout.is_zero() {
            return Err(TorrentError::config_error_with_field("connect timeout must be at least 1s", "connect_timeout").into());
        }

        if self.io_timeout.is_zero() {
            return Err(TorrentError::config_error_with_field("I/O timeout must be at least 1s", "io_timeout").into());
        }

        if self.pipeline_depth == 0 {
            return Err(TorrentError::config_error_with_field("pipeline depth must be at least 1", "pipeline_depth").into());
        }

        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            peer_id: self.peer_id,
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
        }
    }

    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            pipeline_depth: self.pipeline_depth,
            max_piece_retries: self.max_piece_retries,
        }
    }

    /// Deadline for a whole tracker announce
    pub fn tracker_timeout(&self) -> Duration {
        self.connect_timeout + self.io_timeout
    }
}

/// Accept a peer ID as 20 raw characters or 40 hex digits
fn parse_peer_id(id: &str) -> Result<[u8; 20]> {
    let bytes = if id.len() == 40 {
        hex::decode(id).map_err(|e| TorrentError::config_error_with_field(format!("invalid hex peer ID: {}", e), "peer_id"))?
    } else {
        id.as_bytes().to_vec()
    };

    <[u8; 20]>::try_from(bytes.as_slice()).map_err(|_| {
        TorrentError::config_error_with_field(format!("peer ID must be 20 bytes, got {}", bytes.len()), "peer_id").into()
    })
}
