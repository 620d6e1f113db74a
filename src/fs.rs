use crate::ceil_div;
use crate::error::{Error, Result};
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

pub fn count_blocks(file_size: u64, block_size: u32) -> usize {
    ceil_div!(file_size, block_size as u64) as usize
}

/// Block-granular access to one local file. The handle is guarded so that a
/// positional read never interleaves with a write on the same byte range.
pub struct BlockFile {
    file: Mutex<File>,
    file_size: u64,
    block_size: u32,
}

impl BlockFile {
    /// Creates (or truncates to size) the local file backing a download.
    pub async fn allocate(path: &Path, file_size: u64, block_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .await?;

        file.set_len(file_size).await?;

        Ok(Self {
            file: Mutex::new(file),
            file_size,
            block_size,
        })
    }

    /// Opens an existing file for seeding; its length becomes the file size.
    pub async fn open(path: &Path, block_size: u32) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path).await?;
        let file_size = file.metadata().await?.len();

        Ok(Self {
            file: Mutex::new(file),
            file_size,
            block_size,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn count_blocks(&self) -> usize {
        count_blocks(self.file_size, self.block_size)
    }

    /// Length of block `index`; the last block may be short.
    pub fn block_len(&self, index: usize) -> usize {
        let offset = index as u64 * self.block_size as u64;

        std::cmp::min(self.block_size as u64, self.file_size - offset) as usize
    }

    pub async fn read_block(&self, index: usize) -> Result<Vec<u8>> {
        self.check_range(index)?;

        let mut data = vec![0u8; self.block_len(index)];

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(index as u64 * self.block_size as u64))
            .await?;
        file.read_exact(&mut data).await?;

        Ok(data)
    }

    pub async fn write_block(&self, index: usize, data: &[u8]) -> Result<()> {
        self.check_range(index)?;

        if data.len() != self.block_len(index) {
            return Err(Error::Protocol(format!(
                "block {} has {} bytes, expected {}",
                index,
                data.len(),
                self.block_len(index)
            )));
        }

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(index as u64 * self.block_size as u64))
            .await?;
        file.write_all(data).await?;
        file.flush().await?;

        Ok(())
    }

    fn check_range(&self, index: usize) -> Result<()> {
        if index >= self.count_blocks() {
            return Err(Error::Protocol(format!(
                "block {} out of range {}",
                index,
                self.count_blocks()
            )));
        }

        Ok(())
    }
}
