use crate::constants::IO_TIMEOUT_SECS;
use crate::data_structures::Bitmap;
use crate::endpoint::{PeerEndpoint, TrackerEndpoint};
use crate::error::{Error, Result};
use crate::protocol::{
    read_frame, write_frame, PeerRequest, PeerResponse, TrackerRequest, TrackerResponse,
};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

async fn with_timeout<F, T>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    timeout(Duration::from_secs(IO_TIMEOUT_SECS), fut)
        .await
        .map_err(|_| Error::Timeout)?
}

/// One request/response exchange. Requests on a single connection are
/// strictly paired in issue order; on any failure the connection is
/// poisoned and the caller opens a new one.
async fn exchange<Req, Resp>(stream: &mut TcpStream, request: &Req) -> Result<Resp>
where
    Req: serde::Serialize,
    Resp: serde::de::DeserializeOwned,
{
    with_timeout(async {
        write_frame(stream, request).await?;
        read_frame(stream).await
    })
    .await
}

pub struct TrackerConnection {
    stream: TcpStream,
}

impl TrackerConnection {
    pub async fn connect(tracker: &TrackerEndpoint) -> Result<Self> {
        let stream = with_timeout(async {
            Ok(TcpStream::connect((tracker.host.as_str(), tracker.port)).await?)
        })
        .await?;

        Ok(Self { stream })
    }

    pub async fn request(&mut self, request: &TrackerRequest) -> Result<TrackerResponse> {
        exchange(&mut self.stream, request).await
    }

    pub async fn register(&mut self, filename: &str, data_port: u16) -> Result<()> {
        let request = TrackerRequest::Register {
            filename: filename.to_string(),
            data_port,
        };

        match self.request(&request).await? {
            TrackerResponse::Success => Ok(()),
            TrackerResponse::Error { reason } => Err(Error::RequestFailed(reason)),
            other => Err(Error::Protocol(format!(
                "unexpected tracker response {:?}",
                other
            ))),
        }
    }

    pub async fn peer_list(&mut self, filename: &str) -> Result<Vec<PeerEndpoint>> {
        let request = TrackerRequest::PeerList {
            filename: filename.to_string(),
        };

        match self.request(&request).await? {
            TrackerResponse::PeerList { peers } => Ok(peers),
            TrackerResponse::Error { reason } => Err(Error::RequestFailed(reason)),
            other => Err(Error::Protocol(format!(
                "unexpected tracker response {:?}",
                other
            ))),
        }
    }
}

pub struct PeerConnection {
    stream: TcpStream,
}

impl PeerConnection {
    pub async fn connect(peer: &PeerEndpoint) -> Result<Self> {
        let stream =
            with_timeout(async { Ok(TcpStream::connect(peer.socket_addr()).await?) }).await?;

        Ok(Self { stream })
    }

    pub async fn request(&mut self, request: &PeerRequest) -> Result<PeerResponse> {
        exchange(&mut self.stream, request).await
    }

    pub async fn metadata(&mut self, filename: &str) -> Result<(u64, u32)> {
        let request = PeerRequest::Metadata {
            filename: filename.to_string(),
        };

        match self.request(&request).await? {
            PeerResponse::Metadata {
                file_size,
                block_size,
            } => Ok((file_size, block_size)),
            PeerResponse::Error { reason } => Err(Error::RequestFailed(reason)),
            other => Err(Error::Protocol(format!(
                "unexpected peer response {:?}",
                other
            ))),
        }
    }

    pub async fn block_map(&mut self, filename: &str) -> Result<Bitmap> {
        let request = PeerRequest::Bitmap {
            filename: filename.to_string(),
        };

        match self.request(&request).await? {
            PeerResponse::Bitmap(map) => Ok(map),
            PeerResponse::Error { reason } => Err(Error::RequestFailed(reason)),
            other => Err(Error::Protocol(format!(
                "unexpected peer response {:?}",
                other
            ))),
        }
    }

    pub async fn block(&mut self, filename: &str, index: usize) -> Result<Vec<u8>> {
        let request = PeerRequest::Block {
            filename: filename.to_string(),
            index: index as u32,
        };

        match self.request(&request).await? {
            PeerResponse::Block {
                index: got,
                data,
            } => {
                if got as usize != index {
                    return Err(Error::Protocol(format!(
                        "asked for block {}, got {}",
                        index, got
                    )));
                }

                Ok(data)
            }
            PeerResponse::Error { reason } => Err(Error::RequestFailed(reason)),
            other => Err(Error::Protocol(format!(
                "unexpected peer response {:?}",
                other
            ))),
        }
    }
}
