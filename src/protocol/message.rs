use crate::data_structures::Bitmap;
use crate::endpoint::PeerEndpoint;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerRequest {
    Register { filename: String, data_port: u16 },
    PeerList { filename: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerResponse {
    Success,
    PeerList { peers: Vec<PeerEndpoint> },
    Error { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerRequest {
    Metadata { filename: String },
    Bitmap { filename: String },
    Block { filename: String, index: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerResponse {
    Metadata { file_size: u64, block_size: u32 },
    Bitmap(Bitmap),
    Block { index: u32, data: Vec<u8> },
    Error { reason: String },
}
