use crate::constants::DEFAULT_BLOCK_SIZE;
use crate::downloader;
use crate::endpoint::TrackerEndpoint;
use crate::error::{Error, Result};
use crate::seeder;
use crate::shutdown;
use crate::transfer::FileTransfer;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use tracing::info;

/// Owns every active transfer and translates user commands into their
/// lifecycle actions. One filename maps to at most one transfer.
pub struct Client {
    transfers: StdMutex<HashMap<String, Arc<FileTransfer>>>,
    shutdown_rx: shutdown::Receiver,
}

impl Client {
    pub fn new(shutdown_rx: shutdown::Receiver) -> Self {
        Self {
            transfers: StdMutex::new(HashMap::new()),
            shutdown_rx,
        }
    }

    /// Shares an existing local file: metadata comes from disk, then the
    /// seeder announces us to the trackers and serves blocks.
    pub async fn seed(
        &self,
        filename: &str,
        path: &Path,
        trackers: Vec<TrackerEndpoint>,
        data_port: u16,
    ) -> Result<Arc<FileTransfer>> {
        let transfer = self.register_transfer(filename, path, trackers)?;

        transfer.load_from_disk(DEFAULT_BLOCK_SIZE).await?;
        seeder::start_seeder(transfer.clone(), data_port, self.shutdown_rx.clone()).await?;

        info!("{}", transfer);

        Ok(transfer)
    }

    /// Joins a swarm: metadata comes from whichever peer answers first,
    /// then we download while seeding the blocks we already hold.
    pub async fn download(
        &self,
        filename: &str,
        path: &Path,
        trackers: Vec<TrackerEndpoint>,
        data_port: u16,
    ) -> Result<Arc<FileTransfer>> {
        let transfer = self.register_transfer(filename, path, trackers)?;

        downloader::fetch_metadata(&transfer).await?;
        seeder::start_seeder(transfer.clone(), data_port, self.shutdown_rx.clone()).await?;
        downloader::start_download(transfer.clone(), self.shutdown_rx.clone())?;

        info!("{}", transfer);

        Ok(transfer)
    }

    pub fn transfer(&self, filename: &str) -> Option<Arc<FileTransfer>> {
        self.transfers.lock().unwrap().get(filename).cloned()
    }

    fn register_transfer(
        &self,
        filename: &str,
        path: &Path,
        trackers: Vec<TrackerEndpoint>,
    ) -> Result<Arc<FileTransfer>> {
        let mut transfers = self.transfers.lock().unwrap();

        if transfers.contains_key(filename) {
            return Err(Error::RequestFailed(format!(
                "{} is already registered",
                filename
            )));
        }

        let transfer = Arc::new(FileTransfer::new(filename, path, trackers));
        transfers.insert(filename.to_string(), transfer.clone());

        Ok(transfer)
    }
}
