mod codec;
mod message;

pub use codec::{read_frame, write_frame};
pub use message::{PeerRequest, PeerResponse, TrackerRequest, TrackerResponse};
