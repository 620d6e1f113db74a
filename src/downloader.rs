use crate::constants::{NO_NEW_BLOCKS_DELAY_SECS, TRACKER_REFRESH_SECS};
use crate::endpoint::{PeerEndpoint, TrackerEndpoint};
use crate::error::{Error, Result};
use crate::peer_connection::{PeerConnection, TrackerConnection};
use crate::shutdown;
use crate::transfer::FileTransfer;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::time::{interval, sleep};
use tracing::{debug, info, instrument, warn};

/// Blocking metadata bootstrap: ask the trackers for peers, then ask each
/// peer in turn until one hands over the file's metadata and local storage
/// can be allocated.
#[instrument(skip_all, fields(file = %transfer.filename()))]
pub async fn fetch_metadata(transfer: &FileTransfer) -> Result<()> {
    if transfer.has_metadata() {
        return Ok(());
    }

    refresh_seed_list(transfer).await;

    for peer in transfer.seed_snapshot() {
        match probe_metadata(&peer, transfer.filename()).await {
            Ok((file_size, block_size)) => {
                transfer.allocate_local(file_size, block_size).await?;
                info!(
                    "metadata from {}: {}B in blocks of {}B",
                    peer, file_size, block_size
                );
                return Ok(());
            }
            Err(e) => debug!("no metadata from {}: {}", peer, e),
        }
    }

    warn!("could not fetch metadata for {}", transfer.filename());

    Err(Error::NoMetadata)
}

async fn probe_metadata(peer: &PeerEndpoint, filename: &str) -> Result<(u64, u32)> {
    PeerConnection::connect(peer)
        .await?
        .metadata(filename)
        .await
}

/// Contacts every known tracker, re-announcing our seeder when one is
/// running (a restarted tracker has forgotten us) and merging the returned
/// peers into the seed set. An unreachable tracker is logged and skipped.
pub async fn refresh_seed_list(transfer: &FileTransfer) {
    for tracker in transfer.tracker_snapshot() {
        match query_tracker(transfer, &tracker).await {
            Ok(peers) => {
                let new_peers = transfer.merge_seeds(peers);

                if new_peers > 0 {
                    debug!("{} new peers from {}", new_peers, tracker);
                }
            }
            Err(e) => warn!("tracker {} unreachable: {}", tracker, e),
        }
    }
}

async fn query_tracker(
    transfer: &FileTransfer,
    tracker: &TrackerEndpoint,
) -> Result<Vec<PeerEndpoint>> {
    let mut conn = TrackerConnection::connect(tracker).await?;

    if let Some(data_port) = transfer.seeder_port() {
        conn.register(transfer.filename(), data_port).await?;
    }

    conn.peer_list(transfer.filename()).await
}

/// Starts the block pump: one worker task per known peer plus the periodic
/// tracker refresh. Returns once spawned; completion is observable through
/// the transfer. At most one downloader runs per transfer.
pub fn start_download(transfer: Arc<FileTransfer>, shutdown_rx: shutdown::Receiver) -> Result<()> {
    if !transfer.has_metadata() {
        return Err(Error::RequestFailed(format!(
            "no metadata for {}",
            transfer.filename()
        )));
    }

    if !transfer.start_downloading() {
        return Err(Error::RequestFailed(format!(
            "already downloading {}",
            transfer.filename()
        )));
    }

    tokio::spawn(async move { manage_download(transfer, shutdown_rx).await });

    Ok(())
}

#[instrument(skip_all, fields(file = %transfer.filename()))]
async fn manage_download(transfer: Arc<FileTransfer>, mut shutdown_rx: shutdown::Receiver) {
    let mut refresh = interval(Duration::from_secs(TRACKER_REFRESH_SECS));

    loop {
        select! {
            _ = shutdown_rx.recv() => {
                debug!("shutdown");
                return;
            },
            _ = transfer.completed() => {
                info!("download complete: {}", transfer);
                return;
            },
            _ = refresh.tick() => {},
        }

        refresh_seed_list(&transfer).await;
        spawn_workers(&transfer, &shutdown_rx);
    }
}

fn spawn_workers(transfer: &Arc<FileTransfer>, shutdown_rx: &shutdown::Receiver) {
    for peer in transfer.claim_idle_seeds() {
        debug!("starting worker for {}", peer);

        let transfer = transfer.clone();
        let shutdown_rx = shutdown_rx.clone();

        tokio::spawn(async move { manage_worker(transfer, peer, shutdown_rx).await });
    }
}

#[instrument(skip_all, fields(file = %transfer.filename(), peer = %peer))]
async fn manage_worker(
    transfer: Arc<FileTransfer>,
    peer: PeerEndpoint,
    mut shutdown_rx: shutdown::Receiver,
) {
    match pump_blocks(&transfer, &peer, &mut shutdown_rx).await {
        Err(Error::DownloadComplete) => {
            transfer.signal_complete();
            debug!("complete");
        }
        Err(e) => warn!("abandoning peer: {}", e),
        Ok(()) => (),
    }

    transfer.release_worker(&peer);
}

async fn pump_blocks(
    transfer: &FileTransfer,
    peer: &PeerEndpoint,
    shutdown_rx: &mut shutdown::Receiver,
) -> Result<()> {
    let mut conn = PeerConnection::connect(peer).await?;
    let mut peer_map = conn.block_map(transfer.filename()).await?;

    loop {
        if shutdown_rx.is_triggered() {
            return Ok(());
        }

        let pick = match transfer.next_block(&peer_map) {
            Ok(pick) => pick,
            Err(Error::NoNewBlocks) => {
                select! {
                    _ = shutdown_rx.recv() => return Ok(()),
                    _ = sleep(Duration::from_secs(NO_NEW_BLOCKS_DELAY_SECS)) => {},
                }

                peer_map = conn.block_map(transfer.filename()).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        if pick.endgame {
            debug!("endgame fetch of block {}", pick.index);
        }

        if let Err(e) = fetch_block(&mut conn, transfer, pick.index).await {
            transfer.release_block(pick.index);
            return Err(e);
        }
    }
}

async fn fetch_block(
    conn: &mut PeerConnection,
    transfer: &FileTransfer,
    index: usize,
) -> Result<()> {
    let data = conn.block(transfer.filename(), index).await?;

    if transfer.record_block(index, &data).await? {
        debug!("recorded block {} of {}", index, transfer.count_blocks());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::fetch_metadata;
    use crate::endpoint::TrackerEndpoint;
    use crate::error::Error;
    use crate::seeder::start_seeder;
    use crate::shutdown;
    use crate::tracker::{spawn_tracker_server, TrackerRegistry};
    use crate::transfer::FileTransfer;
    use std::sync::Arc;
    use tokio::fs::{remove_dir_all, DirBuilder};
    use tokio::net::TcpListener;
    use tracing_test::traced_test;

    async fn start_tracker(
        registry: TrackerRegistry,
        shutdown_rx: shutdown::Receiver,
    ) -> TrackerEndpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        spawn_tracker_server(listener, registry, shutdown_rx);

        TrackerEndpoint::new("127.0.0.1", port)
    }

    #[traced_test]
    #[tokio::test]
    async fn empty_swarm_surfaces_no_metadata() {
        let (_shutdown_tx, shutdown_rx) = shutdown::channel();
        let tracker = start_tracker(TrackerRegistry::new(), shutdown_rx).await;

        let transfer = FileTransfer::new("ghost.bin", "unused", vec![tracker]);

        match fetch_metadata(&transfer).await {
            Err(Error::NoMetadata) => (),
            other => panic!("expected NoMetadata, got {:?}", other),
        }
    }

    #[traced_test]
    #[tokio::test]
    async fn bootstrap_takes_metadata_from_the_first_live_seeder() {
        const PATH: &str = "downloader_test_bootstrap";

        DirBuilder::new()
            .recursive(true)
            .create(PATH)
            .await
            .unwrap();

        let (_shutdown_tx, shutdown_rx) = shutdown::channel();
        let tracker = start_tracker(TrackerRegistry::new(), shutdown_rx.clone()).await;

        let seed_path = format!("{}/seed.bin", PATH);
        tokio::fs::write(&seed_path, vec![7u8; 20]).await.unwrap();

        let seeding = Arc::new(FileTransfer::new(
            "seed.bin",
            &seed_path,
            vec![tracker.clone()],
        ));
        seeding.load_from_disk(8).await.unwrap();
        start_seeder(seeding, 0, shutdown_rx).await.unwrap();

        let downloading = FileTransfer::new(
            "seed.bin",
            format!("{}/copy.bin", PATH),
            vec![tracker],
        );

        fetch_metadata(&downloading).await.unwrap();

        assert_eq!(Some((20, 8)), downloading.metadata());
        assert_eq!(3, downloading.count_blocks());
        // metadata bootstrap is idempotent
        fetch_metadata(&downloading).await.unwrap();

        remove_dir_all(PATH).await.unwrap();
    }
}
