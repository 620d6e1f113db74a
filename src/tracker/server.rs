use super::TrackerRegistry;
use crate::protocol::{read_frame, write_frame, TrackerRequest, TrackerResponse};
use crate::shutdown;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tracing::{debug, info, instrument};

pub fn spawn_tracker_server(
    listener: TcpListener,
    registry: TrackerRegistry,
    shutdown_rx: shutdown::Receiver,
) {
    tokio::spawn(async move {
        accept_clients(listener, registry, shutdown_rx).await;
    });
}

async fn accept_clients(
    listener: TcpListener,
    registry: TrackerRegistry,
    mut shutdown_rx: shutdown::Receiver,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("tracker listening on {}", addr);
    }

    loop {
        select! {
            _ = shutdown_rx.recv() => {
                debug!("tracker shutting down");
                return;
            },
            accepted = listener.accept() => {
                let Ok((stream, addr)) = accepted else {
                    continue;
                };

                let registry = registry.clone();
                let shutdown_rx = shutdown_rx.clone();

                tokio::spawn(async move {
                    handle_client(stream, addr, registry, shutdown_rx).await;
                });
            },
        }
    }
}

/// Services one client until it disconnects or sends garbage. Errors end
/// this handler silently; other connections are unaffected.
#[instrument(skip_all, fields(client = %addr))]
async fn handle_client(
    mut stream: TcpStream,
    addr: SocketAddr,
    registry: TrackerRegistry,
    mut shutdown_rx: shutdown::Receiver,
) {
    loop {
        let request = select! {
            _ = shutdown_rx.recv() => { return },
            request = read_frame::<_, TrackerRequest>(&mut stream) => {
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

        let response = dispatch(request, addr, &registry);

        if let Err(e) = write_frame(&mut stream, &response).await {
            debug!("closing: {}", e);
            return;
        }
    }
}

fn dispatch(
    request: TrackerRequest,
    addr: SocketAddr,
    registry: &TrackerRegistry,
) -> TrackerResponse {
    match request {
        TrackerRequest::Register {
            filename,
            data_port,
        } => {
            // the host is whatever address the connection came from;
            // clients do not get to claim one
            let peer = SocketAddr::new(addr.ip(), data_port).into();

            info!("register {} for {}", peer, filename);
            registry.add_peer(&filename, peer);

            TrackerResponse::Success
        }
        TrackerRequest::PeerList { filename } => TrackerResponse::PeerList {
            peers: registry.peers_of(&filename),
        },
    }
}
