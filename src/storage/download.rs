//! Download manager module
//!
//! Downloads pieces from one unchoked peer session: splits each piece into
//! blocks, keeps a bounded number of requests in flight, reassembles and
//! verifies the piece before anything is handed on.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, trace, warn};

use crate::error::TorrentError;
use crate::peer::PeerSession;
use crate::protocol::{BlockRequest, Message};
use crate::storage::backend::PieceSink;
use crate::storage::piece::PieceBuffer;
use crate::torrent::TorrentMetainfo;

/// Requests kept in flight by default
pub const DEFAULT_PIPELINE_DEPTH: usize = 1;

/// Extra attempts for a piece that fails verification
pub const DEFAULT_MAX_PIECE_RETRIES: u32 = 2;

/// Tuning for the download loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Maximum outstanding block requests
    pub pipeline_depth: usize,
    /// How many times a piece is re-fetched after a hash mismatch
    pub max_piece_retries: u32,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            max_piece_retries: DEFAULT_MAX_PIECE_RETRIES,
        }
    }
}

/// Download statistics
#[derive(Debug, Clone, Default)]
pub struct DownloadStats {
    /// Block bytes accepted into piece buffers
    pub downloaded_bytes: u64,
    /// Pieces that passed verification
    pub pieces_verified: u32,
    /// Verification failures (each one discarded the piece)
    pub pieces_failed: u32,
    /// Requests re-sent after the peer choked us
    pub requests_resent: u32,
    /// Piece messages that matched no outstanding request
    pub blocks_ignored: u32,
    /// Time spent downloading
    pub elapsed: Duration,
}

impl DownloadStats {
    /// Average download speed in bytes per second
    pub fn download_speed(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.downloaded_bytes as f64 / secs
        }
    }
}

/// Downloads and verifies pieces over one peer session
pub struct PieceDownloader<'a, S> {
    session: &'a mut PeerSession<S>,
    metainfo: &'a TorrentMetainfo,
    options: DownloadOptions,
    stats: DownloadStats,
}

impl<'a, S> PieceDownloader<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a downloader; the session should already be unchoked
    pub fn new(session: &'a mut PeerSession<S>, metainfo: &'a TorrentMetainfo, options: DownloadOptions) -> Self {
        Self {
            session,
            metainfo,
            options,
            stats: DownloadStats::default(),
        }
    }

    pub fn stats(&self) -> &DownloadStats {
        &self.stats
    }

    /// Download one piece and return its verified bytes.
    ///
    /// A piece that fails verification is discarded and fetched again from
    /// its first block, up to `max_piece_retries` times, before the
    /// `HashMismatch` is returned.
    pub async fn download_piece(&mut self, index: u32) -> Result<Vec<u8>> {
        let started = Instant::now();
        let result = self.download_with_retries(index).await;
        self.stats.elapsed += started.elapsed();
        result
    }

    async fn download_with_retries(&mut self, index: u32) -> Result<Vec<u8>> {
        let mut attempt = 0;

        loop {
            match self.fetch_piece(index).await {
                Ok(data) => {
                    self.stats.pieces_verified += 1;
                    self.session.record_piece();
                    info!("Piece {} verified ({} bytes)", index, data.len());
                    return Ok(data);
                }
                Err(e) if is_hash_mismatch(&e) => {
                    self.stats.pieces_failed += 1;
                    if attempt >= self.options.max_piece_retries {
                        warn!("Piece {} failed verification {} times, giving up", index, attempt + 1);
                        return Err(e);
                    }
                    attempt += 1;
                    warn!(
                        "Piece {} failed verification, re-requesting ({}/{})",
                        index, attempt, self.options.max_piece_retries
                    );
                }
                Err(e) => {
                    return Err(match e.downcast::<TorrentError>() {
                        Ok(err) => err.with_context(format!("downloading piece {}", index)).into(),
                        Err(other) => other,
                    });
                }
            }
        }
    }

    /// One attempt at a piece: request every block, collect the responses
    async fn fetch_piece(&mut self, index: u32) -> Result<Vec<u8>> {
        let mut piece = PieceBuffer::for_piece(self.metainfo, index)?;
        let peer = self.session.peer_addr();

        if self.session.status().has_piece(index) == Some(false) {
            warn!("Peer {} did not advertise piece {}, requesting anyway", peer, index);
        }
        debug!(
            "Downloading piece {} ({} bytes, {} blocks) from {}",
            index,
            piece.len(),
            piece.block_count(),
            peer
        );

        let mut pending: VecDeque<BlockRequest> = piece.block_requests().into();
        let mut outstanding: Vec<BlockRequest> = Vec::with_capacity(self.options.pipeline_depth);
        let depth = self.options.pipeline_depth.max(1);

        while !piece.is_complete() {
            while !self.session.peer_choking() && outstanding.len() < depth {
                let Some(request) = pending.pop_front() else {
                    break;
                };
                self.session.request_block(request).await?;
                outstanding.push(request);
            }

            match self.session.receive_message().await? {
                Message::Piece { index: got_index, begin, block } => {
                    let Some(pos) = outstanding
                        .iter()
                        .position(|r| r.index == got_index && r.begin == begin)
                    else {
                        debug!("Ignoring unrequested block (piece {}, offset {}) from {}", got_index, begin, peer);
                        self.stats.blocks_ignored += 1;
                        continue;
                    };

                    let request = outstanding.remove(pos);
                    trace!("Block {} of piece {} received ({} bytes)", begin, index, block.len());
                    piece.fill(request.begin, &block).map_err(|e| tag_peer(e, peer))?;
                    self.stats.downloaded_bytes += block.len() as u64;
                }
                Message::Choke => {
                    // the peer discards queued requests when it chokes
                    if !outstanding.is_empty() {
                        info!(
                            "Choked by {} during piece {}, {} requests will be re-sent",
                            peer,
                            index,
                            outstanding.len()
                        );
                        self.stats.requests_resent += outstanding.len() as u32;
                        for request in outstanding.drain(..).rev() {
                            pending.push_front(request);
                        }
                    }
                }
                Message::Unchoke => debug!("Unchoked by {}, resuming piece {}", peer, index),
                other => trace!("Ignoring {:?} during piece download", other.message_id()),
            }
        }

        piece.verify()
    }

    /// Lazily download every piece in index order
    pub fn pieces(self) -> PieceStream<'a, S> {
        PieceStream {
            downloader: self,
            next_index: 0,
            done: false,
        }
    }

    /// Download every piece and write each one to `sink` once verified
    pub async fn download_to<P>(self, sink: &mut P) -> Result<DownloadStats>
    where
        P: PieceSink + ?Sized,
    {
        let count = self.metainfo.piece_count();
        info!("Downloading {} pieces ({} bytes)", count, self.metainfo.total_length);

        let mut pieces = self.pieces();
        while let Some(result) = pieces.next().await {
            let (index, data) = result?;
            sink.write_piece(index, &data).await?;
            info!("Progress: {}/{} pieces", index + 1, count);
        }
        sink.finish().await?;

        let stats = pieces.stats().clone();
        info!(
            "Download complete: {} bytes, {} hash failures, {:.1} KiB/s",
            stats.downloaded_bytes,
            stats.pieces_failed,
            stats.download_speed() / 1024.0
        );
        Ok(stats)
    }
}

/// Finite, non-restartable sequence of verified pieces
pub struct PieceStream<'a, S> {
    downloader: PieceDownloader<'a, S>,
    next_index: u32,
    done: bool,
}

impl<'a, S> PieceStream<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Download the next piece; `None` once every piece was yielded or after an error
    pub async fn next(&mut self) -> Option<Result<(u32, Vec<u8>)>> {
        if self.done || self.next_index >= self.downloader.metainfo.piece_count() {
            return None;
        }

        let index = self.next_index;
        match self.downloader.download_piece(index).await {
            Ok(data) => {
                self.next_index += 1;
                Some(Ok((index, data)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }

    /// Pieces not yet yielded
    pub fn remaining(&self) -> u32 {
        if self.done {
            0
        } else {
            self.downloader.metainfo.piece_count() - self.next_index
        }
    }

    pub fn stats(&self) -> &DownloadStats {
        self.downloader.stats()
    }
}

/// Download a single piece with default options
pub async fn download_piece<S>(session: &mut PeerSession<S>, metainfo: &TorrentMetainfo, index: u32) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    PieceDownloader::new(session, metainfo, DownloadOptions::default())
        .download_piece(index)
        .await
}

/// Lazily download the whole file with default options
pub fn download_file<'a, S>(session: &'a mut PeerSession<S>, metainfo: &'a TorrentMetainfo) -> PieceStream<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    PieceDownloader::new(session, metainfo, DownloadOptions::default()).pieces()
}

fn is_hash_mismatch(err: &anyhow::Error) -> bool {
    err.downcast_ref::<TorrentError>()
        .is_some_and(TorrentError::is_hash_mismatch)
}

fn tag_peer(err: anyhow::Error, peer: SocketAddr) -> anyhow::Error {
    match err.downcast::<TorrentError>() {
        Ok(e) => e.with_peer(peer.to_string()).into(),
        Err(other) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use bytes::Bytes;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;

    use crate::peer::{SessionConfig, SessionState};
    use crate::protocol::{Handshake, PeerWire};
    use crate::storage::backend::MemorySink;
    use crate::storage::file::FileAssembler;
    use crate::torrent::info::sha1_digest;

    const PIECE_LENGTH: u32 = 32768;
    const INFO_HASH: [u8; 20] = [3u8; 20];

    /// Behaviour of the fake peer
    #[derive(Debug, Clone, Default)]
    struct Script {
        /// piece index -> number of corrupted responses to send for it
        corrupt: HashMap<u32, usize>,
        /// choke (dropping the request) when this many requests have arrived
        choke_at_request: Option<usize>,
        /// send a block nobody asked for before the first answer
        stray_block: bool,
    }

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn metainfo_for(data: &[u8]) -> TorrentMetainfo {
        TorrentMetainfo {
            announce: "http://tracker.test/announce".to_string(),
            name: "content.bin".to_string(),
            piece_length: PIECE_LENGTH,
            total_length: data.len() as u64,
            piece_hashes: data.chunks(PIECE_LENGTH as usize).map(sha1_digest).collect(),
            info_hash: INFO_HASH,
        }
    }

    /// Serve requests from `data` until the client hangs up; returns the requests seen
    async fn fake_peer(stream: DuplexStream, data: Vec<u8>, mut script: Script) -> Vec<BlockRequest> {
        let mut wire = PeerWire::new(stream);
        let theirs = wire.read_handshake().await.unwrap();
        wire.write_handshake(&Handshake::new(theirs.info_hash, *b"-FP0001-fakepeer0000"))
            .await
            .unwrap();
        wire.write_message(&Message::Bitfield { bitfield: Bytes::from_static(&[0xe0]) })
            .await
            .unwrap();
        assert_eq!(wire.read_message().await.unwrap(), Message::Interested);
        wire.write_message(&Message::Unchoke).await.unwrap();

        let mut requests = Vec::new();
        while let Ok(message) = wire.read_message().await {
            let Message::Request(request) = message else {
                continue;
            };
            requests.push(request);

            if script.choke_at_request == Some(requests.len()) {
                wire.write_message(&Message::Choke).await.unwrap();
                wire.write_message(&Message::Unchoke).await.unwrap();
                continue;
            }
            if script.stray_block {
                script.stray_block = false;
                wire.write_message(&Message::Piece {
                    index: 99,
                    begin: 0,
                    block: Bytes::from_static(b"stray"),
                })
                .await
                .unwrap();
            }

            let start = (request.index * PIECE_LENGTH + request.begin) as usize;
            let mut block = data[start..start + request.length as usize].to_vec();
            if let Some(remaining) = script.corrupt.get_mut(&request.index) {
                if *remaining > 0 && request.begin == 0 {
                    *remaining -= 1;
                    block[0] ^= 0xff;
                }
            }
            wire.write_message(&Message::Piece {
                index: request.index,
                begin: request.begin,
                block: Bytes::from(block),
            })
            .await
            .unwrap();
        }
        requests
    }

    async fn unchoked_session(
        data: &[u8],
        script: Script,
    ) -> (PeerSession<DuplexStream>, JoinHandle<Vec<BlockRequest>>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let peer = tokio::spawn(fake_peer(server, data.to_vec(), script));

        let config = SessionConfig {
            peer_id: *b"-MB0001-testtesttest",
            connect_timeout: Duration::from_secs(1),
            io_timeout: Duration::from_secs(5),
        };
        let mut session = PeerSession::from_stream(client, "10.0.0.1:6881".parse().unwrap(), INFO_HASH, config);
        session.handshake().await.unwrap();
        session.prepare_download().await.unwrap();
        assert_eq!(session.state(), SessionState::Unchoked);
        (session, peer)
    }

    #[tokio::test]
    async fn test_download_piece_single_request_at_a_time() {
        let data = content(2 * PIECE_LENGTH as usize + 1000);
        let metainfo = metainfo_for(&data);
        let (mut session, peer) = unchoked_session(&data, Script::default()).await;

        let piece = download_piece(&mut session, &metainfo, 1).await.unwrap();
        assert_eq!(piece, &data[PIECE_LENGTH as usize..2 * PIECE_LENGTH as usize]);

        let last = download_piece(&mut session, &metainfo, 2).await.unwrap();
        assert_eq!(last.len(), 1000);
        assert_eq!(last, &data[2 * PIECE_LENGTH as usize..]);

        session.close().await.unwrap();
        let requests = peer.await.unwrap();
        assert_eq!(
            requests,
            vec![
                BlockRequest::new(1, 0, 16384),
                BlockRequest::new(1, 16384, 16384),
                BlockRequest::new(2, 0, 1000),
            ]
        );
    }

    #[tokio::test]
    async fn test_download_file_yields_pieces_in_order() {
        let data = content(2 * PIECE_LENGTH as usize + 1000);
        let metainfo = metainfo_for(&data);
        let (mut session, peer) = unchoked_session(&data, Script::default()).await;

        let mut pieces = download_file(&mut session, &metainfo);
        assert_eq!(pieces.remaining(), 3);
        let mut assembled = Vec::new();
        let mut indices = Vec::new();
        while let Some(result) = pieces.next().await {
            let (index, piece) = result.unwrap();
            indices.push(index);
            assembled.extend_from_slice(&piece);
        }
        assert!(pieces.next().await.is_none());
        assert_eq!(pieces.remaining(), 0);
        drop(pieces);

        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(assembled, data);
        session.close().await.unwrap();
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_pipelined_download_to_sink() {
        let data = content(3 * PIECE_LENGTH as usize + 5);
        let metainfo = metainfo_for(&data);
        let (mut session, peer) = unchoked_session(&data, Script::default()).await;

        let options = DownloadOptions {
            pipeline_depth: 4,
            max_piece_retries: 0,
        };
        let mut sink = MemorySink::new(&metainfo).unwrap();
        let stats = PieceDownloader::new(&mut session, &metainfo, options)
            .download_to(&mut sink)
            .await
            .unwrap();

        assert_eq!(sink.content(), &data[..]);
        assert_eq!(stats.pieces_verified, 4);
        assert_eq!(stats.downloaded_bytes, data.len() as u64);
        session.close().await.unwrap();
        assert_eq!(peer.await.unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_download_to_file_assembler() {
        let data = content(2 * PIECE_LENGTH as usize + 1000);
        let metainfo = Arc::new(metainfo_for(&data));
        let path = std::env::temp_dir().join(format!("mini-bittorrent-{}-download.bin", std::process::id()));
        let (mut session, peer) = unchoked_session(&data, Script::default()).await;

        let options = DownloadOptions {
            pipeline_depth: 2,
            max_piece_retries: 0,
        };
        let mut assembler = FileAssembler::create(&path, metainfo.clone()).await.unwrap();
        let stats = PieceDownloader::new(&mut session, &metainfo, options)
            .download_to(&mut assembler)
            .await
            .unwrap();
        drop(assembler);

        assert_eq!(stats.pieces_verified, 3);
        assert_eq!(session.status().pieces_downloaded, 3);
        session.close().await.unwrap();
        peer.await.unwrap();

        let written = tokio::fs::read(&path).await.unwrap();
        assert_eq!(written.len() as u64, metainfo.total_length);
        assert_eq!(written, data);
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_hash_mismatch_is_retried() {
        let data = content(2 * PIECE_LENGTH as usize);
        let metainfo = metainfo_for(&data);
        let script = Script {
            corrupt: HashMap::from([(1, 1)]),
            ..Script::default()
        };
        let (mut session, peer) = unchoked_session(&data, script).await;

        let mut sink = MemorySink::new(&metainfo).unwrap();
        let stats = PieceDownloader::new(&mut session, &metainfo, DownloadOptions::default())
            .download_to(&mut sink)
            .await
            .unwrap();

        assert_eq!(sink.content(), &data[..]);
        assert_eq!(stats.pieces_failed, 1);
        assert_eq!(stats.pieces_verified, 2);
        session.close().await.unwrap();

        let piece_one_requests = peer.await.unwrap().iter().filter(|r| r.index == 1).count();
        assert_eq!(piece_one_requests, 4);
    }

    #[tokio::test]
    async fn test_hash_mismatch_never_reaches_sink() {
        let data = content(2 * PIECE_LENGTH as usize);
        let metainfo = metainfo_for(&data);
        let script = Script {
            corrupt: HashMap::from([(1, usize::MAX)]),
            ..Script::default()
        };
        let (mut session, peer) = unchoked_session(&data, script).await;

        let options = DownloadOptions {
            pipeline_depth: 1,
            max_piece_retries: 1,
        };
        let mut sink = MemorySink::new(&metainfo).unwrap();
        let err = PieceDownloader::new(&mut session, &metainfo, options)
            .download_to(&mut sink)
            .await
            .unwrap_err();

        match err.downcast_ref::<TorrentError>() {
            Some(TorrentError::HashMismatch { piece, .. }) => assert_eq!(*piece, 1),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(sink.has_piece(0));
        assert!(!sink.has_piece(1));
        assert_eq!(sink.pieces_written(), 1);
        session.close().await.unwrap();
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_choke_mid_piece_resends_outstanding_requests() {
        let data = content(PIECE_LENGTH as usize);
        let metainfo = metainfo_for(&data);
        let script = Script {
            choke_at_request: Some(1),
            ..Script::default()
        };
        let (mut session, peer) = unchoked_session(&data, script).await;

        let mut downloader = PieceDownloader::new(&mut session, &metainfo, DownloadOptions::default());
        let piece = downloader.download_piece(0).await.unwrap();
        assert_eq!(piece, data);
        assert_eq!(downloader.stats().requests_resent, 1);
        drop(downloader);

        session.close().await.unwrap();
        let requests = peer.await.unwrap();
        assert_eq!(requests[0], requests[1]);
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn test_unrequested_block_is_ignored() {
        let data = content(PIECE_LENGTH as usize);
        let metainfo = metainfo_for(&data);
        let script = Script {
            stray_block: true,
            ..Script::default()
        };
        let (mut session, peer) = unchoked_session(&data, script).await;

        let mut downloader = PieceDownloader::new(&mut session, &metainfo, DownloadOptions::default());
        assert_eq!(downloader.download_piece(0).await.unwrap(), data);
        assert_eq!(downloader.stats().blocks_ignored, 1);
        drop(downloader);

        session.close().await.unwrap();
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_disconnect_mid_piece() {
        let data = content(PIECE_LENGTH as usize);
        let metainfo = metainfo_for(&data);
        let (client, server) = tokio::io::duplex(64 * 1024);

        let peer = tokio::spawn(async move {
            let mut wire = PeerWire::new(server);
            let theirs = wire.read_handshake().await.unwrap();
            wire.write_handshake(&Handshake::new(theirs.info_hash, [1u8; 20])).await.unwrap();
            wire.write_message(&Message::Unchoke).await.unwrap();
            wire.read_message().await.unwrap();
            wire.read_message().await.unwrap();
        });

        let mut session = PeerSession::from_stream(
            client,
            "10.0.0.2:6881".parse().unwrap(),
            INFO_HASH,
            SessionConfig::default(),
        );
        session.handshake().await.unwrap();
        session.prepare_download().await.unwrap();

        let err = download_piece(&mut session, &metainfo, 0).await.unwrap_err();
        peer.await.unwrap();

        match err.downcast_ref::<TorrentError>() {
            Some(TorrentError::TransferError { peer, source, .. }) => {
                assert_eq!(peer.as_deref(), Some("10.0.0.2:6881"));
                assert!(source.as_deref().unwrap_or_default().contains("piece 0"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Failed);
    }
}
