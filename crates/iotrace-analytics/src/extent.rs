//! Physical layout of a reference file, from `filefrag -v` output.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use iotrace_types::units::{sectors_per_block, sectors_to_bytes, MAX_SECTOR};
use iotrace_types::{make_error_msg, Result, SectorNo, StatusCode, TraceCode};

/// Physical block run, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockExtent {
    pub start_block: u64,
    pub end_block: u64,
}

/// Half-open sector range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorRange {
    pub start: SectorNo,
    pub end: SectorNo,
}

impl SectorRange {
    pub fn contains(&self, sector: SectorNo) -> bool {
        self.start <= sector && sector < self.end
    }

    pub fn len(&self) -> u64 {
        self.end.get() - self.start.get()
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

fn extent_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // "   0:        0..    4095:  128862208.. 128866303:   4096:"
        Regex::new(r"^\s*\d+:\s+\d+\.\.\s*\d+:\s+(\d+)\.\.\s*(\d+):\s+\d+:")
            .expect("extent line pattern is valid")
    })
}

/// Extracts physical block runs from `filefrag -v` output.
///
/// Lines that do not look like extent rows are ignored. Finding no extent at
/// all is an error: without a layout every downstream filter is meaningless.
pub fn parse_filefrag(text: &str) -> Result<Vec<BlockExtent>> {
    let re = extent_line_regex();
    let mut extents = Vec::new();
    for line in text.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let (Ok(start_block), Ok(end_block)) = (caps[1].parse::<u64>(), caps[2].parse::<u64>())
        else {
            tracing::warn!(line, "extent row with out-of-range block numbers");
            continue;
        };
        if end_block < start_block {
            tracing::warn!(start_block, end_block, "extent row ends before it starts");
            continue;
        }
        extents.push(BlockExtent {
            start_block,
            end_block,
        });
    }

    if extents.is_empty() {
        return make_error_msg(TraceCode::NO_EXTENTS, "no extents found in filefrag output");
    }
    Ok(extents)
}

/// Merged, sorted extents of one file in device sectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtentMap {
    block_size: u64,
    sectors_per_block: u64,
    /// Merged block runs, ascending, non-overlapping, not adjacent.
    merged: Vec<BlockExtent>,
}

impl ExtentMap {
    /// Sorts and merges runs that overlap or touch (`start <= end + 1`).
    ///
    /// Runs whose last sector would lie past `MAX_SECTOR` at this block size
    /// are logged and dropped; if none is left the map is `NO_EXTENTS`.
    pub fn from_blocks(mut extents: Vec<BlockExtent>, block_size: u64) -> Result<ExtentMap> {
        let Some(ratio) = sectors_per_block(block_size) else {
            return make_error_msg(
                StatusCode::INVALID_ARG,
                format!("block size {} is not a multiple of the sector size", block_size),
            );
        };
        extents.retain(|ext| {
            let end = ext
                .end_block
                .checked_add(1)
                .and_then(|blocks| blocks.checked_mul(ratio));
            let fits = end.is_some_and(|end| end <= MAX_SECTOR);
            if !fits {
                tracing::warn!(
                    start_block = ext.start_block,
                    end_block = ext.end_block,
                    block_size,
                    "dropping extent beyond the addressable sector range"
                );
            }
            fits
        });
        if extents.is_empty() {
            return make_error_msg(TraceCode::NO_EXTENTS, "extent list is empty");
        }

        extents.sort_unstable();
        let mut merged: Vec<BlockExtent> = Vec::with_capacity(extents.len());
        for ext in extents {
            match merged.last_mut() {
                Some(cur) if ext.start_block <= cur.end_block.saturating_add(1) => {
                    cur.end_block = cur.end_block.max(ext.end_block);
                }
                _ => merged.push(ext),
            }
        }

        Ok(ExtentMap {
            block_size,
            sectors_per_block: ratio,
            merged,
        })
    }

    pub fn from_filefrag(text: &str, block_size: u64) -> Result<ExtentMap> {
        let map = Self::from_blocks(parse_filefrag(text)?, block_size)?;
        tracing::info!(
            extents = map.extent_count(),
            start_sector = %map.bound().start,
            end_sector = %map.bound().end,
            "extent map built"
        );
        Ok(map)
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn extent_count(&self) -> usize {
        self.merged.len()
    }

    pub fn block_extents(&self) -> &[BlockExtent] {
        &self.merged
    }

    fn to_sectors(&self, ext: &BlockExtent) -> SectorRange {
        SectorRange {
            start: SectorNo(ext.start_block * self.sectors_per_block),
            end: SectorNo((ext.end_block + 1) * self.sectors_per_block),
        }
    }

    pub fn sector_ranges(&self) -> Vec<SectorRange> {
        self.merged.iter().map(|e| self.to_sectors(e)).collect()
    }

    /// Coarse `[min_sector, max_sector)` bound over all extents. Anything
    /// outside it cannot belong to the file.
    pub fn bound(&self) -> SectorRange {
        // `merged` is never empty once constructed.
        let first = self.merged[0];
        let last = self.merged[self.merged.len() - 1];
        SectorRange {
            start: SectorNo(first.start_block * self.sectors_per_block),
            end: SectorNo((last.end_block + 1) * self.sectors_per_block),
        }
    }

    /// Fine-grained membership against the individual extents.
    pub fn contains_sector(&self, sector: SectorNo) -> bool {
        let block = sector.get() / self.sectors_per_block;
        let idx = self.merged.partition_point(|e| e.end_block < block);
        self.merged
            .get(idx)
            .is_some_and(|e| e.start_block <= block)
    }

    /// Bytes covered by the merged extents.
    pub fn total_bytes(&self) -> u64 {
        self.merged
            .iter()
            .map(|e| sectors_to_bytes(self.to_sectors(e).len()))
            .sum()
    }
}
