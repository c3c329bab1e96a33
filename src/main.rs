//! mini-bittorrent - Main entry point
//!
//! A minimal single-peer BitTorrent client.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use mini_bittorrent::bencode;
use mini_bittorrent::cli::{CliArgs, Command, Config};
use mini_bittorrent::peer::PeerSession;
use mini_bittorrent::storage::{FileAssembler, PieceDownloader};
use mini_bittorrent::torrent::{TorrentMetainfo, TorrentParser};
use mini_bittorrent::TorrentError;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        match panic_info.location() {
            Some(location) => error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            ),
            None => error!("PANIC occurred at an unknown location"),
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = CliArgs::parse_args();
    init_logging(&args);
    debug!("CLI arguments: {:?}", args);

    let config = Config::from_args(&args).context("Invalid configuration")?;

    match args.command {
        Command::Decode { value } => run_decode(&value),
        Command::Info { torrent, json } => run_info(&torrent, json).await,
        Command::Peers { torrent } => run_peers(&torrent, &config).await,
        Command::Handshake { torrent, peer } => run_handshake(&torrent, &peer, &config).await,
        Command::DownloadPiece {
            output,
            torrent,
            piece,
            peer,
        } => run_download_piece(&torrent, piece, &output, peer.as_deref(), &config).await,
        Command::Download { output, torrent, peer } => {
            run_download(&torrent, &output, peer.as_deref(), &config).await
        }
    }
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let level = args.log_level();

    // Command output goes to stdout, so logs go to stderr
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }

    debug!("Logging initialized with level: {:?}", level);
}

/// Load and parse the torrent file
async fn load_torrent_file(path: &Path) -> Result<TorrentMetainfo> {
    let metainfo = TorrentParser::parse_file(path)
        .await
        .with_context(|| format!("Failed to load torrent file '{}'", path.display()))?;

    info!("Loaded torrent '{}' ({} pieces)", metainfo.name, metainfo.piece_count());
    Ok(metainfo)
}

fn run_decode(value: &str) -> Result<()> {
    let (decoded, consumed) = bencode::decode(value.as_bytes(), 0).context("Failed to decode value")?;
    if consumed < value.len() {
        warn!("Ignoring {} trailing bytes after the value", value.len() - consumed);
    }

    println!("{}", decoded.to_json());
    Ok(())
}

/// Torrent summary printed by `info --json`
#[derive(Debug, Serialize)]
struct InfoReport<'a> {
    tracker_url: &'a str,
    name: &'a str,
    length: u64,
    info_hash: String,
    piece_length: u32,
    piece_hashes: Vec<String>,
}

impl<'a> InfoReport<'a> {
    fn new(metainfo: &'a TorrentMetainfo) -> Self {
        Self {
            tracker_url: &metainfo.announce,
            name: &metainfo.name,
            length: metainfo.total_length,
            info_hash: metainfo.info_hash_hex(),
            piece_length: metainfo.piece_length,
            piece_hashes: metainfo.piece_hashes.iter().map(hex::encode).collect(),
        }
    }
}

async fn run_info(torrent: &Path, json: bool) -> Result<()> {
    let metainfo = load_torrent_file(torrent).await?;
    let report = InfoReport::new(&metainfo);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Tracker URL: {}", report.tracker_url);
    println!("Length: {}", report.length);
    println!("Info Hash: {}", report.info_hash);
    println!("Piece Length: {}", report.piece_length);
    println!("Piece Hashes:");
    for hash in &report.piece_hashes {
        println!("{}", hash);
    }
    Ok(())
}

async fn run_peers(torrent: &Path, config: &Config) -> Result<()> {
    let metainfo = load_torrent_file(torrent).await?;
    for peer in discover_peers(&metainfo, config).await? {
        println!("{}", peer);
    }
    Ok(())
}

async fn run_handshake(torrent: &Path, peer: &str, config: &Config) -> Result<()> {
    let metainfo = load_torrent_file(torrent).await?;
    let addr = parse_peer_addr(peer)?;

    let mut session = PeerSession::connect(addr, metainfo.info_hash, config.session_config()).await?;
    let peer_id = session
        .remote_peer_id()
        .ok_or_else(|| TorrentError::invariant_violation("handshake finished without a peer ID"))?;
    println!("Peer ID: {}", hex::encode(peer_id));

    session.close().await
}

async fn run_download_piece(
    torrent: &Path,
    index: u32,
    output: &Path,
    peer: Option<&str>,
    config: &Config,
) -> Result<()> {
    let metainfo = load_torrent_file(torrent).await?;
    if index >= metainfo.piece_count() {
        return Err(TorrentError::config_error_with_field(
            format!("piece {} out of range, torrent has {} pieces", index, metainfo.piece_count()),
            "piece",
        )
        .into());
    }

    let mut session = open_session(&metainfo, peer, config).await?;
    let data = PieceDownloader::new(&mut session, &metainfo, config.download_options())
        .download_piece(index)
        .await?;
    session.close().await?;

    tokio::fs::write(output, &data).await.map_err(|e| {
        TorrentError::storage_error_full("Failed to write piece", output.display().to_string(), e.to_string())
    })?;
    if !config.quiet {
        println!("Piece {} downloaded to {}.", index, output.display());
    }
    Ok(())
}

async fn run_download(torrent: &Path, output: &Path, peer: Option<&str>, config: &Config) -> Result<()> {
    let metainfo = Arc::new(load_torrent_file(torrent).await?);

    let mut session = open_session(&metainfo, peer, config).await?;
    let mut assembler = FileAssembler::create(output, metainfo.clone()).await?;
    let stats = PieceDownloader::new(&mut session, &metainfo, config.download_options())
        .download_to(&mut assembler)
        .await?;
    info!(
        "Received {} verified pieces from {}",
        session.status().pieces_downloaded,
        session.peer_addr()
    );
    session.close().await?;

    debug!("Download stats: {:?}", stats);
    if !config.quiet {
        println!("Downloaded {} to {}.", torrent.display(), output.display());
    }
    Ok(())
}

/// Connect to the chosen peer and wait until it unchokes us
async fn open_session(metainfo: &TorrentMetainfo, peer: Option<&str>, config: &Config) -> Result<PeerSession> {
    let addr = match peer {
        Some(peer) => parse_peer_addr(peer)?,
        None => discover_peers(metainfo, config)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TorrentError::transfer_error("Tracker returned no peers"))?,
    };

    let mut session = PeerSession::connect(addr, metainfo.info_hash, config.session_config()).await?;
    session.prepare_download().await?;
    Ok(session)
}

#[cfg(feature = "download")]
async fn discover_peers(metainfo: &TorrentMetainfo, config: &Config) -> Result<Vec<SocketAddr>> {
    use mini_bittorrent::tracker::TrackerClient;

    let client = TrackerClient::new(config.peer_id, config.port, config.tracker_timeout())?;
    let response = client.announce(metainfo).await?;
    Ok(response.peers)
}

#[cfg(not(feature = "download"))]
async fn discover_peers(_metainfo: &TorrentMetainfo, _config: &Config) -> Result<Vec<SocketAddr>> {
    Err(TorrentError::config_error_with_field("built without tracker support, pass --peer", "peer").into())
}

fn parse_peer_addr(peer: &str) -> Result<SocketAddr> {
    peer.parse::<SocketAddr>()
        .map_err(|e| TorrentError::config_error_with_field(format!("invalid peer address '{}': {}", peer, e), "peer").into())
}
