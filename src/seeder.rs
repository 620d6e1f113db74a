use crate::endpoint::TrackerEndpoint;
use crate::error::{Error, Result};
use crate::peer_connection::TrackerConnection;
use crate::protocol::{read_frame, write_frame, PeerRequest, PeerResponse};
use crate::shutdown;
use crate::transfer::FileTransfer;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tracing::{debug, info, instrument, warn};

/// Binds the data port, announces it to every configured tracker and starts
/// serving this transfer's blocks. Returns the bound port (`port` 0 picks an
/// ephemeral one). At most one seeder runs per transfer.
pub async fn start_seeder(
    transfer: Arc<FileTransfer>,
    port: u16,
    shutdown_rx: shutdown::Receiver,
) -> Result<u16> {
    if !transfer.has_metadata() {
        return Err(Error::RequestFailed(format!(
            "no metadata for {}",
            transfer.filename()
        )));
    }

    if !transfer.start_seeding() {
        return Err(Error::RequestFailed(format!(
            "already seeding {}",
            transfer.filename()
        )));
    }

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    let data_port = listener.local_addr()?.port();

    transfer.set_seeder_port(data_port);
    info!("seeding {} on port {}", transfer.filename(), data_port);

    register_with_trackers(&transfer, data_port).await;

    tokio::spawn({
        let transfer = transfer.clone();
        async move { accept_peers(listener, transfer, shutdown_rx).await }
    });

    Ok(data_port)
}

/// A tracker that cannot be reached is logged and skipped; the rest still
/// learn about us.
pub async fn register_with_trackers(transfer: &FileTransfer, data_port: u16) {
    for tracker in transfer.tracker_snapshot() {
        if let Err(e) = register_with(&tracker, transfer.filename(), data_port).await {
            warn!("failed to register with tracker {}: {}", tracker, e);
        }
    }
}

async fn register_with(tracker: &TrackerEndpoint, filename: &str, data_port: u16) -> Result<()> {
    TrackerConnection::connect(tracker)
        .await?
        .register(filename, data_port)
        .await
}

async fn accept_peers(
    listener: TcpListener,
    transfer: Arc<FileTransfer>,
    mut shutdown_rx: shutdown::Receiver,
) {
    loop {
        select! {
            _ = shutdown_rx.recv() => {
                debug!("seeder for {} shutting down", transfer.filename());
                return;
            },
            accepted = listener.accept() => {
                let Ok((stream, addr)) = accepted else {
                    continue;
                };

                let transfer = transfer.clone();
                let shutdown_rx = shutdown_rx.clone();

                tokio::spawn(async move {
                    serve_peer(stream, addr, transfer, shutdown_rx).await;
                });
            },
        }
    }
}

#[instrument(skip_all, fields(peer = %addr, file = %transfer.filename()))]
async fn serve_peer(
    mut stream: TcpStream,
    addr: SocketAddr,
    transfer: Arc<FileTransfer>,
    mut shutdown_rx: shutdown::Receiver,
) {
    loop {
        let request = select! {
            _ = shutdown_rx.recv() => { return },
            request = read_frame::<_, PeerRequest>(&mut stream) => {
                match request {
                    Ok(request) => request,
                    Err(e) => {
                        debug!("closing: {}", e);
                        return;
                    }
                }
            },
        };

        debug!(?request);

        let response = answer(&transfer, request).await;

        if let Err(e) = write_frame(&mut stream, &response).await {
            debug!("closing: {}", e);
            return;
        }
    }
}

async fn answer(transfer: &FileTransfer, request: PeerRequest) -> PeerResponse {
    let refuse = |reason: &str| PeerResponse::Error {
        reason: reason.to_string(),
    };

    match request {
        PeerRequest::Metadata { filename } => {
            if filename != transfer.filename() {
                return refuse("unknown file");
            }

            match transfer.metadata() {
                Some((file_size, block_size)) => PeerResponse::Metadata {
                    file_size,
                    block_size,
                },
                None => refuse("no metadata"),
            }
        }
        PeerRequest::Bitmap { filename } => {
            if filename != transfer.filename() {
                return refuse("unknown file");
            }

            PeerResponse::Bitmap(transfer.block_map())
        }
        PeerRequest::Block { filename, index } => {
            if filename != transfer.filename() {
                return refuse("unknown file");
            }

            match transfer.read_block(index as usize).await {
                Ok(data) => PeerResponse::Block { index, data },
                Err(e) => {
                    debug!("block {} refused: {}", index, e);
                    refuse("not available")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::start_seeder;
    use crate::data_structures::Bitmap;
    use crate::endpoint::PeerEndpoint;
    use crate::error::Error;
    use crate::peer_connection::PeerConnection;
    use crate::shutdown;
    use crate::transfer::FileTransfer;
    use std::sync::Arc;
    use tokio::fs::{remove_dir_all, DirBuilder};
    use tracing_test::traced_test;

    async fn seeded_transfer(dir: &str) -> Arc<FileTransfer> {
        DirBuilder::new().recursive(true).create(dir).await.unwrap();

        let path = format!("{}/file.bin", dir);
        tokio::fs::write(&path, (0..10u8).collect::<Vec<u8>>())
            .await
            .unwrap();

        let transfer = Arc::new(FileTransfer::new("file.bin", &path, Vec::new()));
        transfer.load_from_disk(3).await.unwrap();

        transfer
    }

    #[traced_test]
    #[tokio::test]
    async fn serves_metadata_bitmap_and_blocks() {
        const PATH: &str = "seeder_test_serve";

        let transfer = seeded_transfer(PATH).await;

        let (_shutdown_tx, shutdown_rx) = shutdown::channel();
        let port = start_seeder(transfer, 0, shutdown_rx).await.unwrap();

        let peer = PeerEndpoint::new("127.0.0.1".parse().unwrap(), port);
        let mut conn = PeerConnection::connect(&peer).await.unwrap();

        assert_eq!((10, 3), conn.metadata("file.bin").await.unwrap());

        let mut expected_map = Bitmap::new(4);
        expected_map.set_all();
        assert_eq!(expected_map, conn.block_map("file.bin").await.unwrap());

        assert_eq!(vec![0, 1, 2], conn.block("file.bin", 0).await.unwrap());
        // short last block
        assert_eq!(vec![9], conn.block("file.bin", 3).await.unwrap());

        remove_dir_all(PATH).await.unwrap();
    }

    #[traced_test]
    #[tokio::test]
    async fn refuses_unknown_files_and_missing_blocks() {
        const PATH: &str = "seeder_test_refuse";

        DirBuilder::new()
            .recursive(true)
            .create(PATH)
            .await
            .unwrap();

        let path = format!("{}/file.bin", PATH);
        let transfer = Arc::new(FileTransfer::new("file.bin", &path, Vec::new()));
        transfer.allocate_local(10, 3).await.unwrap();
        transfer.record_block(1, &[3, 4, 5]).await.unwrap();

        let (_shutdown_tx, shutdown_rx) = shutdown::channel();
        let port = start_seeder(transfer.clone(), 0, shutdown_rx).await.unwrap();

        let peer = PeerEndpoint::new("127.0.0.1".parse().unwrap(), port);
        let mut conn = PeerConnection::connect(&peer).await.unwrap();

        match conn.metadata("other.bin").await {
            Err(Error::RequestFailed(reason)) => assert_eq!("unknown file", reason),
            other => panic!("expected unknown file, got {:?}", other),
        }

        match conn.block("file.bin", 0).await {
            Err(Error::RequestFailed(reason)) => assert_eq!("not available", reason),
            other => panic!("expected not available, got {:?}", other),
        }

        assert_eq!(vec![3, 4, 5], conn.block("file.bin", 1).await.unwrap());

        // a second seeder on the same transfer is refused
        let (_shutdown_tx2, shutdown_rx2) = shutdown::channel();
        assert!(start_seeder(transfer, 0, shutdown_rx2).await.is_err());

        remove_dir_all(PATH).await.unwrap();
    }
}
