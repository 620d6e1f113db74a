pub const DEFAULT_BLOCK_SIZE: u32 = 1 << 14;
pub const DEFAULT_TRACKER_PORT: u16 = 6969;
pub const TRACKER_REFRESH_SECS: u64 = 30;
pub const IO_TIMEOUT_SECS: u64 = 30;
pub const NO_NEW_BLOCKS_DELAY_SECS: u64 = 2;
pub const MAX_FRAME_BYTES: usize = 1 << 22;
