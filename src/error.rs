//! Error types for the torrent client
//!
//! This module defines the error taxonomy shared by the codec, the metainfo
//! model, the peer session and the download pipeline.

use std::fmt;

/// Error type for torrent operations
#[derive(Debug, Clone)]
pub enum TorrentError {
    /// Bencode grammar violation
    MalformedEncoding {
        message: String,
        offset: Option<usize>,
    },

    /// Missing or mis-typed torrent field
    InvalidMetainfo {
        message: String,
        field: Option<String>,
    },

    /// Handshake rejected or malformed
    HandshakeFailed {
        message: String,
        peer: Option<String>,
        source: Option<String>,
    },

    /// Socket I/O or wire protocol failure during a session
    TransferError {
        message: String,
        peer: Option<String>,
        source: Option<String>,
    },

    /// A reassembled piece failed SHA-1 verification
    HashMismatch {
        piece: u32,
        expected: [u8; 20],
        actual: [u8; 20],
    },

    /// A caller broke a contract the API documents
    InvariantViolation {
        message: String,
    },

    /// Output file errors
    StorageError {
        message: String,
        path: Option<String>,
        source: Option<String>,
    },

    /// Tracker announce errors
    TrackerError {
        message: String,
        url: Option<String>,
        source: Option<String>,
    },

    /// Configuration errors
    ConfigError {
        message: String,
        field: Option<String>,
    },
}

impl TorrentError {
    /// Create a new MalformedEncoding error
    pub fn malformed(message: impl Into<String>) -> Self {
        TorrentError::MalformedEncoding {
            message: message.into(),
            offset: None,
        }
    }

    /// Create a new MalformedEncoding error at a byte offset
    pub fn malformed_at(message: impl Into<String>, offset: usize) -> Self {
        TorrentError::MalformedEncoding {
            message: message.into(),
            offset: Some(offset),
        }
    }

    /// Create a new InvalidMetainfo error
    pub fn invalid_metainfo(message: impl Into<String>) -> Self {
        TorrentError::InvalidMetainfo {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new InvalidMetainfo error naming the offending field
    pub fn invalid_metainfo_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        TorrentError::InvalidMetainfo {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new HandshakeFailed error
    pub fn handshake_failed(message: impl Into<String>) -> Self {
        TorrentError::HandshakeFailed {
            message: message.into(),
            peer: None,
            source: None,
        }
    }

    /// Create a new HandshakeFailed error with peer and source
    pub fn handshake_failed_full(message: impl Into<String>, peer: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::HandshakeFailed {
            message: message.into(),
            peer: Some(peer.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new TransferError
    pub fn transfer_error(message: impl Into<String>) -> Self {
        TorrentError::TransferError {
            message: message.into(),
            peer: None,
            source: None,
        }
    }

    /// Create a new TransferError with source
    pub fn transfer_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::TransferError {
            message: message.into(),
            peer: None,
            source: Some(source.into()),
        }
    }

    /// Create a new TransferError with peer and source
    pub fn transfer_error_full(message: impl Into<String>, peer: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::TransferError {
            message: message.into(),
            peer: Some(peer.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new HashMismatch error
    pub fn hash_mismatch(piece: u32, expected: [u8; 20], actual: [u8; 20]) -> Self {
        TorrentError::HashMismatch { piece, expected, actual }
    }

    /// Create a new InvariantViolation error
    pub fn invariant_violation(message: impl Into<String>) -> Self {
        TorrentError::InvariantViolation {
            message: message.into(),
        }
    }

    /// Create a new StorageError with path and source
    pub fn storage_error_full(message: impl Into<String>, path: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::StorageError {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new StorageError with path
    pub fn storage_error_with_path(message: impl Into<String>, path: impl Into<String>) -> Self {
        TorrentError::StorageError {
            message: message.into(),
            path: Some(path.into()),
            source: None,
        }
    }

    /// Create a new TrackerError
    pub fn tracker_error(message: impl Into<String>) -> Self {
        TorrentError::TrackerError {
            message: message.into(),
            url: None,
            source: None,
        }
    }

    /// Create a new TrackerError with url and source
    pub fn tracker_error_full(message: impl Into<String>, url: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::TrackerError {
            message: message.into(),
            url: Some(url.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        TorrentError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Attach the remote peer address to session errors
    pub fn with_peer(mut self, addr: impl Into<String>) -> Self {
        match &mut self {
            TorrentError::HandshakeFailed { peer, .. } | TorrentError::TransferError { peer, .. } => {
                *peer = Some(addr.into());
            }
            _ => {}
        }
        self
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let ctx = context.into();
        match &mut self {
            TorrentError::HandshakeFailed { source, .. }
            | TorrentError::TransferError { source, .. }
            | TorrentError::StorageError { source, .. }
            | TorrentError::TrackerError { source, .. } => {
                *source = Some(source.as_ref().map_or_else(|| ctx.clone(), |s| format!("{}: {}", s, ctx)));
            }
            TorrentError::MalformedEncoding { message, .. }
            | TorrentError::InvalidMetainfo { message, .. }
            | TorrentError::InvariantViolation { message }
            | TorrentError::ConfigError { message, .. } => {
                *message = format!("{} ({})", message, ctx);
            }
            TorrentError::HashMismatch { .. } => {}
        }
        self
    }

    /// Whether the failure concerns a single piece's content and may be retried
    pub fn is_hash_mismatch(&self) -> bool {
        matches!(self, TorrentError::HashMismatch { .. })
    }
}

fn write_with_context(
    f: &mut fmt::Formatter<'_>,
    kind: &str,
    message: &str,
    label: &str,
    subject: &Option<String>,
    source: &Option<String>,
) -> fmt::Result {
    match (subject, source) {
        (Some(s), Some(src)) => write!(f, "{}: {} ({}: {}, source: {})", kind, message, label, s, src),
        (Some(s), None) => write!(f, "{}: {} ({}: {})", kind, message, label, s),
        (None, Some(src)) => write!(f, "{}: {} (source: {})", kind, message, src),
        (None, None) => write!(f, "{}: {}", kind, message),
    }
}

impl fmt::Display for TorrentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TorrentError::MalformedEncoding { message, offset } => {
                if let Some(offset) = offset {
                    write!(f, "Malformed encoding: {} (offset: {})", message, offset)
                } else {
                    write!(f, "Malformed encoding: {}", message)
                }
            }
            TorrentError::InvalidMetainfo { message, field } => {
                if let Some(field) = field {
                    write!(f, "Invalid metainfo: {} (field: {})", message, field)
                } else {
                    write!(f, "Invalid metainfo: {}", message)
                }
            }
            TorrentError::HandshakeFailed { message, peer, source } => {
                write_with_context(f, "Handshake failed", message, "peer", peer, source)
            }
            TorrentError::TransferError { message, peer, source } => {
                write_with_context(f, "Transfer error", message, "peer", peer, source)
            }
            TorrentError::HashMismatch { piece, expected, actual } => {
                write!(
                    f,
                    "Hash mismatch: piece {} (expected: {}, got: {})",
                    piece,
                    hex::encode(expected),
                    hex::encode(actual)
                )
            }
            TorrentError::InvariantViolation { message } => {
                write!(f, "Invariant violation: {}", message)
            }
            TorrentError::StorageError { message, path, source } => {
                write_with_context(f, "Storage error", message, "path", path, source)
            }
            TorrentError::TrackerError { message, url, source } => {
                write_with_context(f, "Tracker error", message, "url", url, source)
            }
            TorrentError::ConfigError { message, field } => {
                if let Some(field) = field {
                    write!(f, "Config error: {} (field: {})", message, field)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for TorrentError {}

impl From<std::io::Error> for TorrentError {
    fn from(err: std::io::Error) -> Self {
        TorrentError::transfer_error_with_source(err.to_string(), err.kind().to_string())
    }
}

impl From<std::net::AddrParseError> for TorrentError {
    fn from(err: std::net::AddrParseError) -> Self {
        TorrentError::config_error_with_field(format!("Failed to parse address: {}", err), "peer")
    }
}

impl From<tokio::time::error::Elapsed> for TorrentError {
    fn from(_err: tokio::time::error::Elapsed) -> Self {
        TorrentError::transfer_error("Operation timed out")
    }
}
