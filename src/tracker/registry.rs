use crate::endpoint::PeerEndpoint;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

/// Process-wide map from filename to the peers claiming to serve it. Keys
/// appear on first registration and never disappear; peer sets only grow.
#[derive(Debug, Clone, Default)]
pub struct TrackerRegistry {
    files: Arc<StdMutex<HashMap<String, HashSet<PeerEndpoint>>>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_peer(&self, filename: &str, peer: PeerEndpoint) {
        let mut files = self.files.lock().unwrap();

        files
            .entry(filename.to_string())
            .or_default()
            .insert(peer);
    }

    /// Stable snapshot of a file's swarm; empty for unknown filenames.
    pub fn peers_of(&self, filename: &str) -> Vec<PeerEndpoint> {
        let files = self.files.lock().unwrap();

        files
            .get(filename)
            .map(|peers| peers.iter().cloned().collect())
            .unwrap_or_default()
    }
}
