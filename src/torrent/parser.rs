//! Torrent file parser
//!
//! Turns a decoded bencode dictionary into a [`TorrentMetainfo`], rejecting
//! missing or mis-typed fields.

use anyhow::Result;
use tracing::{debug, error, info, trace};

use crate::bencode::{self, BencodeDict, BencodeValue};
use crate::error::TorrentError;
use crate::torrent::info::TorrentMetainfo;

/// Parser for .torrent files
pub struct TorrentParser;

impl TorrentParser {
    /// Parse a .torrent file from bytes
    pub fn parse_bytes(data: &[u8]) -> Result<TorrentMetainfo> {
        info!("Parsing torrent file from {} bytes", data.len());
        trace!("Torrent data (first 100 bytes): {:?}", &data[..data.len().min(100)]);

        let root = bencode::decode_all(data)?;
        Self::parse(&root)
    }

    /// Parse a .torrent file from a file path
    pub async fn parse_file(path: &std::path::Path) -> Result<TorrentMetainfo> {
        info!("Loading torrent file from: {}", path.display());

        let data = tokio::fs::read(path).await.map_err(|e| {
            error!("Failed to read torrent file '{}': {}", path.display(), e);
            TorrentError::storage_error_full("Failed to read torrent file", path.display().to_string(), e.to_string())
        })?;

        debug!("Read {} bytes from torrent file", data.len());
        Self::parse_bytes(&data)
    }

    /// Extract metainfo from a decoded root dictionary
    pub fn parse(root: &BencodeValue) -> Result<TorrentMetainfo> {
        let root_dict = root
            .as_dict()
            .ok_or_else(|| TorrentError::invalid_metainfo(format!("root must be a dictionary, got {}", root.kind())))?;

        let announce = required_string(root_dict, "announce", "announce")?;

        let info_value = root_dict
            .get(b"info".as_slice())
            .ok_or_else(|| TorrentError::invalid_metainfo_field("missing field", "info"))?;
        let info_dict = info_value
            .as_dict()
            .ok_or_else(|| type_error("info", "dictionary", info_value))?;

        if info_dict.contains_key(b"files".as_slice()) && !info_dict.contains_key(b"length".as_slice()) {
            return Err(TorrentError::invalid_metainfo_field(
                "multi-file torrents are not supported",
                "info.files",
            )
            .into());
        }

        let name = required_string(info_dict, "name", "info.name")?;
        let piece_length = required_int(info_dict, "piece length", "info.piece length")?;
        let total_length = required_int(info_dict, "length", "info.length")?;
        let pieces = required_bytes(info_dict, "pieces", "info.pieces")?;

        if piece_length <= 0 || piece_length > i64::from(u32::MAX) {
            return Err(TorrentError::invalid_metainfo_field(
                format!("piece length out of range: {}", piece_length),
                "info.piece length",
            )
            .into());
        }
        if total_length <= 0 {
            return Err(TorrentError::invalid_metainfo_field(
                format!("length must be positive, got {}", total_length),
                "info.length",
            )
            .into());
        }
        let piece_length = piece_length as u32;
        let total_length = total_length as u64;

        let piece_hashes = TorrentMetainfo::parse_piece_hashes(pieces)?;
        let expected = TorrentMetainfo::expected_piece_count(total_length, piece_length);
        if piece_hashes.len() as u64 != expected {
            return Err(TorrentError::invalid_metainfo_field(
                format!("expected {} piece hashes, found {}", expected, piece_hashes.len()),
                "info.pieces",
            )
            .into());
        }

        let info_hash = TorrentMetainfo::compute_info_hash(info_value);
        debug!("Computed info hash: {}", hex::encode(info_hash));

        info!(
            "Parsed torrent '{}': {} bytes in {} pieces of {} bytes",
            name,
            total_length,
            piece_hashes.len(),
            piece_length
        );
        Ok(TorrentMetainfo {
            announce,
            name,
            piece_length,
            total_length,
            piece_hashes,
            info_hash,
        })
    }
}

fn type_error(field: &str, expected: &str, found: &BencodeValue) -> TorrentError {
    TorrentError::invalid_metainfo_field(format!("expected {}, found {}", expected, found.kind()), field)
}

fn required<'a>(dict: &'a BencodeDict, key: &str, field: &str) -> Result<&'a BencodeValue> {
    dict.get(key.as_bytes())
        .ok_or_else(|| TorrentError::invalid_metainfo_field("missing field", field).into())
}

fn required_bytes<'a>(dict: &'a BencodeDict, key: &str, field: &str) -> Result<&'a [u8]> {
    match required(dict, key, field)? {
        BencodeValue::ByteString(bytes) => Ok(bytes),
        other => Err(type_error(field, "byte string", other).into()),
    }
}

fn required_string(dict: &BencodeDict, key: &str, field: &str) -> Result<String> {
    let bytes = required_bytes(dict, key, field)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| TorrentError::invalid_metainfo_field("not valid UTF-8", field).into())
}

fn required_int(dict: &BencodeDict, key: &str, field: &str) -> Result<i64> {
    match required(dict, key, field)? {
        BencodeValue::Integer(i) => Ok(*i),
        other => Err(type_error(field, "integer", other).into()),
    }
}
