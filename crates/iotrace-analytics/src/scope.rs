//! Scoping block events to one workload and one reference file.

use serde::Serialize;

use iotrace_config::{BlkSection, ExtentSection};

use crate::blk::IoEvent;
use crate::extent::{ExtentMap, SectorRange};

/// Why events were kept or dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScopeStats {
    pub admitted: u64,
    /// Not a read, or not a dispatch when only dispatches count.
    pub rejected_kind: u64,
    pub rejected_pid: u64,
    pub rejected_range: u64,
}

impl ScopeStats {
    pub fn seen(&self) -> u64 {
        self.admitted + self.rejected_kind + self.rejected_pid + self.rejected_range
    }
}

/// Filter applied before any analysis: read direction, process, and
/// position relative to the reference file's extents.
#[derive(Debug, Clone)]
pub struct EventScope {
    dispatched_reads_only: bool,
    pid: Option<u32>,
    bound: Option<SectorRange>,
    fine: Option<ExtentMap>,
    stats: ScopeStats,
}

impl EventScope {
    pub fn new(dispatched_reads_only: bool) -> Self {
        Self {
            dispatched_reads_only,
            pid: None,
            bound: None,
            fine: None,
            stats: ScopeStats::default(),
        }
    }

    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    /// Restricts to the coarse bound of `map`, and to its individual extents
    /// when `fine_grained` is set.
    pub fn with_extents(mut self, map: ExtentMap, fine_grained: bool) -> Self {
        self.bound = Some(map.bound());
        self.fine = fine_grained.then_some(map);
        self
    }

    pub fn from_config(blk: &BlkSection, extents: &ExtentSection, map: Option<ExtentMap>) -> Self {
        let scope = Self::new(blk.dispatched_reads_only).with_pid(blk.pid);
        match map {
            Some(map) => scope.with_extents(map, extents.fine_grained),
            None => scope,
        }
    }

    pub fn bound(&self) -> Option<SectorRange> {
        self.bound
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn stats(&self) -> ScopeStats {
        self.stats
    }

    /// Classifies an event by its start sector and counts the decision.
    pub fn admits(&mut self, event: &IoEvent) -> bool {
        if !event.is_read() || (self.dispatched_reads_only && !event.is_dispatch()) {
            self.stats.rejected_kind += 1;
            return false;
        }
        if self.pid.is_some_and(|pid| pid != event.pid) {
            self.stats.rejected_pid += 1;
            return false;
        }
        let in_bound = self
            .bound
            .map_or(true, |b| b.contains(event.start_sector));
        let in_extent = in_bound
            && self
                .fine
                .as_ref()
                .map_or(true, |m| m.contains_sector(event.start_sector));
        if !in_extent {
            self.stats.rejected_range += 1;
            return false;
        }
        self.stats.admitted += 1;
        true
    }
}
