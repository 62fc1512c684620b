/// Block-device addressing unit.
pub const SECTOR_SIZE: u64 = 512;

/// Default filesystem block size reported by extent listings.
pub const DEFAULT_BLOCK_SIZE: u64 = 4096;

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Highest sector end accepted from any input: byte offsets up to it fit in
/// an `i64`, which is what the batch engine stores.
pub const MAX_SECTOR: u64 = i64::MAX as u64 / SECTOR_SIZE;

strong_type!(
    /// Absolute sector index on the traced device.
    SectorNo,
    u64
);

strong_type!(
    /// Generation step the tensor trace attributes an operation to.
    TokenId,
    u32
);

strong_type!(
    /// Allocation id from buffer lifecycle telemetry.
    BufferId,
    u64
);

impl SectorNo {
    pub fn to_bytes(self) -> u64 {
        sectors_to_bytes(self.0)
    }

    /// Saturates at `u64::MAX` instead of wrapping.
    pub fn offset(self, sectors: u64) -> SectorNo {
        SectorNo(self.0.saturating_add(sectors))
    }
}

/// Number of sectors per filesystem block, or `None` when the block size is
/// not a positive multiple of the sector size.
pub fn sectors_per_block(block_size: u64) -> Option<u64> {
    if block_size == 0 || block_size % SECTOR_SIZE != 0 {
        return None;
    }
    Some(block_size / SECTOR_SIZE)
}

/// Saturates at `u64::MAX`; parsed inputs are bounded by `MAX_SECTOR` and
/// never reach it.
pub fn sectors_to_bytes(sectors: u64) -> u64 {
    sectors.saturating_mul(SECTOR_SIZE)
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}
