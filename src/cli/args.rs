//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for the client
#[derive(Debug, Parser)]
#[command(name = "mini-bittorrent")]
#[command(about = "A minimal single-peer BitTorrent client", long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Peer ID to present (20 bytes, or 40 hex digits); random when omitted
    #[arg(long, global = true, value_name = "ID")]
    pub peer_id: Option<String>,

    /// Port reported to the tracker
    #[arg(short, long, global = true, default_value_t = 6881)]
    pub port: u16,

    /// TCP connect timeout in seconds
    #[arg(long, global = true, default_value_t = 10, value_name = "SECS")]
    pub connect_timeout: u64,

    /// Per read/write timeout in seconds
    #[arg(long, global = true, default_value_t = 30, value_name = "SECS")]
    pub io_timeout: u64,

    /// Block requests kept in flight
    #[arg(long, global = true, default_value_t = 1, value_name = "N")]
    pub pipeline_depth: usize,

    /// Times a piece is re-fetched after failing verification
    #[arg(long, global = true, default_value_t = 2, value_name = "N")]
    pub piece_retries: u32,
}

/// Client subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decode a bencoded value and print it as JSON
    Decode {
        /// Bencoded input, e.g. `d3:cow3:mooe`
        value: String,
    },

    /// Show the metainfo of a .torrent file
    Info {
        /// Path to the .torrent file
        torrent: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask the tracker for peers
    Peers {
        /// Path to the .torrent file
        torrent: PathBuf,
    },

    /// Handshake with a peer and print its peer ID
    Handshake {
        /// Path to the .torrent file
        torrent: PathBuf,

        /// Peer address, `<ip>:<port>`
        peer: String,
    },

    /// Download and verify a single piece
    #[command(alias = "download_piece")]
    DownloadPiece {
        /// Where to write the piece
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Path to the .torrent file
        torrent: PathBuf,

        /// Zero-based piece index
        piece: u32,

        /// Use this peer instead of asking the tracker
        #[arg(long, value_name = "ADDR")]
        peer: Option<String>,
    },

    /// Download the whole file
    Download {
        /// Where to write the file
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Path to the .torrent file
        torrent: PathBuf,

        /// Use this peer instead of asking the tracker
        #[arg(long, value_name = "ADDR")]
        peer: Option<String>,
    },
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let args = CliArgs::try_parse_from(["mini-bittorrent", "info", "test.torrent"]).unwrap();

        assert_eq!(args.port, 6881);
        assert_eq!(args.connect_timeout, 10);
        assert_eq!(args.io_timeout, 30);
        assert_eq!(args.pipeline_depth, 1);
        assert_eq!(args.piece_retries, 2);
        assert!(args.peer_id.is_none());
        assert_eq!(args.log_level(), tracing::Level::INFO);
        assert!(matches!(args.command, Command::Info { json: false, .. }));
    }

    #[test]
    fn test_download_piece_args() {
        let args = CliArgs::try_parse_from([
            "mini-bittorrent",
            "download_piece",
            "-o",
            "/tmp/piece-0",
            "sample.torrent",
            "0",
        ])
        .unwrap();

        match args.command {
            Command::DownloadPiece { output, torrent, piece, peer } => {
                assert_eq!(output, PathBuf::from("/tmp/piece-0"));
                assert_eq!(torrent, PathBuf::from("sample.torrent"));
                assert_eq!(piece, 0);
                assert!(peer.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let args = CliArgs::try_parse_from([
            "mini-bittorrent",
            "download",
            "-o",
            "out.bin",
            "sample.torrent",
            "--peer",
            "127.0.0.1:6881",
            "--pipeline-depth",
            "5",
            "-v",
        ])
        .unwrap();

        assert_eq!(args.pipeline_depth, 5);
        assert_eq!(args.log_level(), tracing::Level::DEBUG);
        assert!(matches!(args.command, Command::Download { peer: Some(_), .. }));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(CliArgs::try_parse_from(["mini-bittorrent", "-v", "-q", "decode", "i1e"]).is_err());
    }

    #[test]
    fn test_decode_accepts_negative_integer_value() {
        let args = CliArgs::try_parse_from(["mini-bittorrent", "decode", "i-42e"]).unwrap();
        assert!(matches!(args.command, Command::Decode { value } if value == "i-42e"));
    }
}
