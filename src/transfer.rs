use crate::data_structures::Bitmap;
use crate::endpoint::{PeerEndpoint, TrackerEndpoint};
use crate::error::{Error, Result};
use crate::fs::{count_blocks, BlockFile};
use crate::scheduler::{self, Decision};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex as StdMutex, OnceLock};
use tokio::sync::broadcast;

/// One shared file: metadata, block bookkeeping, and the peer/tracker sets.
/// Everything mutable lives behind a single guard; the local file itself is
/// guarded separately inside BlockFile so I/O never holds the state lock.
pub struct FileTransfer {
    filename: String,
    local_path: PathBuf,
    state: StdMutex<TransferState>,
    file: OnceLock<BlockFile>,
    completed_tx: broadcast::Sender<()>,
}

struct TransferState {
    metadata: Option<Metadata>,
    blocks_present: Bitmap,
    blocks_assigned: Bitmap,
    trackers: HashSet<TrackerEndpoint>,
    seeds: HashSet<PeerEndpoint>,
    workers: HashSet<PeerEndpoint>,
    seeding: bool,
    seeder_port: Option<u16>,
    downloading: bool,
}

#[derive(Debug, Clone, Copy)]
struct Metadata {
    file_size: u64,
    block_size: u32,
}

/// A scheduling decision that names a block to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPick {
    pub index: usize,
    pub endgame: bool,
}

impl FileTransfer {
    pub fn new(
        filename: impl Into<String>,
        local_path: impl Into<PathBuf>,
        trackers: impl IntoIterator<Item = TrackerEndpoint>,
    ) -> Self {
        let (completed_tx, _) = broadcast::channel(1);

        Self {
            filename: filename.into(),
            local_path: local_path.into(),
            state: StdMutex::new(TransferState {
                metadata: None,
                blocks_present: Bitmap::new(0),
                blocks_assigned: Bitmap::new(0),
                trackers: trackers.into_iter().collect(),
                seeds: HashSet::new(),
                workers: HashSet::new(),
                seeding: false,
                seeder_port: None,
                downloading: false,
            }),
            file: OnceLock::new(),
            completed_tx,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn has_metadata(&self) -> bool {
        self.state.lock().unwrap().metadata.is_some()
    }

    /// (file_size, block_size) once metadata is loaded.
    pub fn metadata(&self) -> Option<(u64, u32)> {
        self.state
            .lock()
            .unwrap()
            .metadata
            .map(|m| (m.file_size, m.block_size))
    }

    /// First call wins; later calls leave state untouched and return the
    /// values that are already set.
    pub fn set_metadata(&self, file_size: u64, block_size: u32) -> Result<(u64, u32)> {
        if block_size == 0 {
            return Err(Error::Protocol("block size of zero".to_string()));
        }

        let mut state = self.state.lock().unwrap();

        if let Some(meta) = state.metadata {
            return Ok((meta.file_size, meta.block_size));
        }

        let num_blocks = count_blocks(file_size, block_size);

        state.metadata = Some(Metadata {
            file_size,
            block_size,
        });
        state.blocks_present = Bitmap::new(num_blocks);
        state.blocks_assigned = Bitmap::new(num_blocks);

        Ok((file_size, block_size))
    }

    /// Seeding an existing file: metadata comes from the file's length and
    /// every block is immediately present. Idempotent.
    pub async fn load_from_disk(&self, block_size: u32) -> Result<()> {
        if self.has_metadata() {
            return Ok(());
        }

        let file = BlockFile::open(&self.local_path, block_size).await?;

        self.set_metadata(file.file_size(), block_size)?;
        let _ = self.file.set(file);

        self.state.lock().unwrap().blocks_present.set_all();

        Ok(())
    }

    /// Joining a swarm: metadata came from a peer, storage of the declared
    /// size is created locally.
    pub async fn allocate_local(&self, file_size: u64, block_size: u32) -> Result<()> {
        let (file_size, block_size) = self.set_metadata(file_size, block_size)?;

        let file = BlockFile::allocate(&self.local_path, file_size, block_size).await?;
        let _ = self.file.set(file);

        Ok(())
    }

    pub fn count_blocks(&self) -> usize {
        self.state.lock().unwrap().blocks_present.len()
    }

    pub fn is_complete(&self) -> bool {
        let state = self.state.lock().unwrap();

        state.metadata.is_some() && state.blocks_present.is_full()
    }

    pub fn has_block(&self, index: usize) -> bool {
        let state = self.state.lock().unwrap();

        index < state.blocks_present.len() && state.blocks_present.get(index)
    }

    pub fn block_map(&self) -> Bitmap {
        self.state.lock().unwrap().blocks_present.clone()
    }

    /// Writes a block and publishes its bit. A block that is already
    /// present is left alone; returns whether this call recorded it.
    pub async fn record_block(&self, index: usize, data: &[u8]) -> Result<bool> {
        {
            let state = self.state.lock().unwrap();

            if index >= state.blocks_present.len() {
                return Err(Error::Protocol(format!("block {} out of range", index)));
            }

            if state.blocks_present.get(index) {
                return Ok(false);
            }
        }

        self.block_file()?.write_block(index, data).await?;

        let newly_recorded = !self.state.lock().unwrap().blocks_present.set(index);

        Ok(newly_recorded)
    }

    pub async fn read_block(&self, index: usize) -> Result<Vec<u8>> {
        if !self.has_block(index) {
            return Err(Error::RequestFailed(format!(
                "block {} not available",
                index
            )));
        }

        self.block_file()?.read_block(index).await
    }

    /// Runs the scheduler against this transfer's maps under the state
    /// guard, so assignment is atomic with the decision.
    pub fn next_block(&self, peer_map: &Bitmap) -> Result<BlockPick> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;

        if peer_map.len() != state.blocks_present.len() {
            return Err(Error::Protocol(format!(
                "peer advertises {} blocks, file has {}",
                peer_map.len(),
                state.blocks_present.len()
            )));
        }

        match scheduler::select_block(&state.blocks_present, peer_map, &mut state.blocks_assigned)
        {
            Decision::Complete => Err(Error::DownloadComplete),
            Decision::PeerHasNothing => Err(Error::NoNewBlocks),
            Decision::Assigned(index) => Ok(BlockPick {
                index,
                endgame: false,
            }),
            Decision::Endgame(index) => Ok(BlockPick {
                index,
                endgame: true,
            }),
        }
    }

    /// Returns a failed block to the pool so another worker may pick it up.
    pub fn release_block(&self, index: usize) {
        let mut state = self.state.lock().unwrap();

        if index < state.blocks_assigned.len() {
            state.blocks_assigned.clear(index);
        }
    }

    pub fn tracker_snapshot(&self) -> Vec<TrackerEndpoint> {
        self.state.lock().unwrap().trackers.iter().cloned().collect()
    }

    /// Merges freshly discovered peers into the seed set; returns how many
    /// were new.
    pub fn merge_seeds(&self, peers: impl IntoIterator<Item = PeerEndpoint>) -> usize {
        let mut state = self.state.lock().unwrap();

        peers
            .into_iter()
            .filter(|peer| state.seeds.insert(*peer))
            .count()
    }

    pub fn seed_snapshot(&self) -> Vec<PeerEndpoint> {
        self.state.lock().unwrap().seeds.iter().cloned().collect()
    }

    /// Seeds without a running worker, claimed for the caller in one step.
    pub fn claim_idle_seeds(&self) -> Vec<PeerEndpoint> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;

        let idle: Vec<PeerEndpoint> = state
            .seeds
            .iter()
            .filter(|peer| !state.workers.contains(*peer))
            .cloned()
            .collect();

        state.workers.extend(idle.iter().cloned());

        idle
    }

    pub fn release_worker(&self, peer: &PeerEndpoint) {
        self.state.lock().unwrap().workers.remove(peer);
    }

    /// Marks the seeder as started; false when it already was.
    pub fn start_seeding(&self) -> bool {
        let mut state = self.state.lock().unwrap();

        !std::mem::replace(&mut state.seeding, true)
    }

    pub fn set_seeder_port(&self, data_port: u16) {
        self.state.lock().unwrap().seeder_port = Some(data_port);
    }

    /// The bound data port, once the seeder is up.
    pub fn seeder_port(&self) -> Option<u16> {
        self.state.lock().unwrap().seeder_port
    }

    /// Marks the downloader as started; false when it already was.
    pub fn start_downloading(&self) -> bool {
        let mut state = self.state.lock().unwrap();

        !std::mem::replace(&mut state.downloading, true)
    }

    pub fn signal_complete(&self) {
        let _ = self.completed_tx.send(());
    }

    /// Resolves once every block is present.
    pub async fn completed(&self) {
        let mut completed_rx = self.completed_tx.subscribe();

        if self.is_complete() {
            return;
        }

        let _ = completed_rx.recv().await;
    }

    fn block_file(&self) -> Result<&BlockFile> {
        self.file
            .get()
            .ok_or_else(|| Error::RequestFailed("metadata not loaded".to_string()))
    }
}

impl fmt::Display for FileTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();

        match state.metadata {
            Some(meta) => write!(
                f,
                "{}: {}B in {} blocks of {}B, {} present, {} trackers, {} seeds",
                self.filename,
                meta.file_size,
                state.blocks_present.len(),
                meta.block_size,
                state.blocks_present.weight(),
                state.trackers.len(),
                state.seeds.len(),
            ),
            None => write!(f, "{}: no metadata", self.filename),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FileTransfer;
    use crate::data_structures::Bitmap;
    use crate::error::Error;
    use tokio::fs::{remove_dir_all, DirBuilder};

    fn transfer(path: &str) -> FileTransfer {
        FileTransfer::new("file.bin", path, Vec::new())
    }

    #[test]
    fn first_metadata_wins() {
        let transfer = transfer("unused");

        assert_eq!((10, 3), transfer.set_metadata(10, 3).unwrap());
        assert_eq!((10, 3), transfer.set_metadata(999, 7).unwrap());
        assert_eq!(Some((10, 3)), transfer.metadata());
        assert_eq!(4, transfer.count_blocks());
    }

    #[test]
    fn zero_block_size_is_rejected() {
        assert!(transfer("unused").set_metadata(10, 0).is_err());
    }

    #[test]
    fn empty_file_is_complete_once_metadata_loads() {
        let transfer = transfer("unused");

        assert!(!transfer.is_complete());
        transfer.set_metadata(0, 3).unwrap();
        assert!(transfer.is_complete());
        assert_eq!(0, transfer.count_blocks());
    }

    #[test]
    fn next_block_maps_scheduler_decisions() {
        let transfer = transfer("unused");
        transfer.set_metadata(10, 3).unwrap();

        let mut peer_map = Bitmap::new(4);
        peer_map.set(2);
        peer_map.set(3);

        let first = transfer.next_block(&peer_map).unwrap();
        assert_eq!((2, false), (first.index, first.endgame));

        let second = transfer.next_block(&peer_map).unwrap();
        assert_eq!((3, false), (second.index, second.endgame));

        // all wanted blocks assigned: endgame duplicates
        let third = transfer.next_block(&peer_map).unwrap();
        assert_eq!((2, true), (third.index, third.endgame));

        transfer.release_block(2);
        let fourth = transfer.next_block(&peer_map).unwrap();
        assert_eq!((2, false), (fourth.index, fourth.endgame));

        match transfer.next_block(&Bitmap::new(4)) {
            Err(Error::NoNewBlocks) => (),
            other => panic!("expected NoNewBlocks, got {:?}", other),
        }

        match transfer.next_block(&Bitmap::new(7)) {
            Err(Error::Protocol(_)) => (),
            other => panic!("expected length mismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn record_block_is_idempotent_at_the_byte_level() {
        const PATH: &str = "transfer_test_record";

        DirBuilder::new()
            .recursive(true)
            .create(PATH)
            .await
            .unwrap();

        let transfer = FileTransfer::new("file.bin", format!("{}/file.bin", PATH), Vec::new());
        transfer.allocate_local(7, 3).await.unwrap();

        assert!(transfer.record_block(1, &[4, 5, 6]).await.unwrap());
        assert!(!transfer.record_block(1, &[9, 9, 9]).await.unwrap());

        assert_eq!(vec![4, 5, 6], transfer.read_block(1).await.unwrap());

        remove_dir_all(PATH).await.unwrap();
    }

    #[tokio::test]
    async fn short_last_block_round_trips() {
        const PATH: &str = "transfer_test_short";

        DirBuilder::new()
            .recursive(true)
            .create(PATH)
            .await
            .unwrap();

        let transfer = FileTransfer::new("file.bin", format!("{}/file.bin", PATH), Vec::new());
        transfer.allocate_local(10, 3).await.unwrap();

        transfer.record_block(3, &[42]).await.unwrap();

        assert_eq!(vec![42], transfer.read_block(3).await.unwrap());

        match transfer.read_block(0).await {
            Err(Error::RequestFailed(_)) => (),
            other => panic!("expected not available, got {:?}", other),
        }

        remove_dir_all(PATH).await.unwrap();
    }

    #[tokio::test]
    async fn load_from_disk_marks_every_block_present() {
        const PATH: &str = "transfer_test_disk";

        DirBuilder::new()
            .recursive(true)
            .create(PATH)
            .await
            .unwrap();

        let path = format!("{}/seeded.bin", PATH);
        tokio::fs::write(&path, (0..10u8).collect::<Vec<u8>>())
            .await
            .unwrap();

        let transfer = FileTransfer::new("seeded.bin", &path, Vec::new());
        transfer.load_from_disk(3).await.unwrap();
        transfer.load_from_disk(5).await.unwrap(); // no-op

        assert_eq!(Some((10, 3)), transfer.metadata());
        assert!(transfer.is_complete());
        assert_eq!(vec![9], transfer.read_block(3).await.unwrap());

        remove_dir_all(PATH).await.unwrap();
    }

    #[test]
    fn worker_claims_are_exclusive() {
        let transfer = transfer("unused");

        let peers: Vec<crate::endpoint::PeerEndpoint> = vec![
            "10.0.0.1:6881".parse::<std::net::SocketAddr>().unwrap().into(),
            "10.0.0.2:6881".parse::<std::net::SocketAddr>().unwrap().into(),
        ];

        assert_eq!(2, transfer.merge_seeds(peers.clone()));
        assert_eq!(0, transfer.merge_seeds(peers.clone()));

        assert_eq!(2, transfer.claim_idle_seeds().len());
        assert!(transfer.claim_idle_seeds().is_empty());

        transfer.release_worker(&peers[0]);
        assert_eq!(vec![peers[0]], transfer.claim_idle_seeds());
    }
}
