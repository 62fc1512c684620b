use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use iotrace_analytics::{ExtentMap, SectorRange};

use crate::env::{read_input_to_string, AnalysisEnv};
use crate::output::{format_bytes, kv_row, table_with_header, CommandOutput};

#[derive(Debug, Args)]
pub struct ExtentsArgs {
    /// `filefrag -v` output, or `-` for stdin.
    pub input: PathBuf,

    /// Filesystem block size in bytes; overrides the config.
    #[arg(long)]
    pub block_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtentsReport {
    pub block_size: u64,
    pub extent_count: usize,
    pub bound: SectorRange,
    pub total_bytes: u64,
    pub sector_ranges: Vec<SectorRange>,
}

impl ExtentsReport {
    pub fn from_map(map: &ExtentMap) -> Self {
        Self {
            block_size: map.block_size(),
            extent_count: map.extent_count(),
            bound: map.bound(),
            total_bytes: map.total_bytes(),
            sector_ranges: map.sector_ranges(),
        }
    }
}

impl ExtentsArgs {
    pub fn execute(&self, env: &AnalysisEnv) -> anyhow::Result<CommandOutput> {
        let block_size = self.block_size.unwrap_or(env.config.extents.block_size);
        let text = read_input_to_string(&self.input)?;
        let report = ExtentsReport::from_map(&ExtentMap::from_filefrag(&text, block_size)?);

        let mut table = vec![
            kv_row("Block size", report.block_size),
            kv_row("Merged extents", report.extent_count),
            kv_row("Bound (sectors)", format!("[{}, {})", report.bound.start, report.bound.end)),
            kv_row("Total", format_bytes(report.total_bytes)),
        ];
        table.extend(table_with_header(&["start_sector", "end_sector", "sectors"]));
        for range in &report.sector_ranges {
            table.push(vec![
                range.start.to_string(),
                range.end.to_string(),
                range.len().to_string(),
            ]);
        }
        Ok(CommandOutput::new(table).with_document(&report)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testutil::{cell, scratch};
    use iotrace_types::{Status, StatusCode, TraceCode};

    const LISTING: &str = "\
 ext:     logical_offset:        physical_offset: length:   expected: flags:
   0:        0..       1:       2000..      2001:      2:
   1:        2..       3:        100..       101:      2:       2002:
   2:        4..       5:       2002..      2004:      3:        102: last,eof
";

    fn write(name: &str, text: &str) -> (PathBuf, PathBuf) {
        let dir = scratch(name);
        let path = dir.join("filefrag.txt");
        std::fs::write(&path, text).unwrap();
        (dir, path)
    }

    #[test]
    fn test_extents_report() {
        let (dir, input) = write("extents", LISTING);
        let out = ExtentsArgs {
            input,
            block_size: None,
        }
        .execute(&AnalysisEnv::default())
        .unwrap();

        let doc = out.document.unwrap();
        assert_eq!(doc["extent_count"], 2);
        assert_eq!(doc["bound"]["start"], 800);
        assert_eq!(doc["bound"]["end"], 16040);
        assert_eq!(doc["sector_ranges"][1]["start"], 16000);
        assert_eq!(doc["total_bytes"], 7 * 4096);
        assert_eq!(cell(&out.table, "Merged extents"), Some("2"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_block_size_override() {
        let (dir, input) = write("extents-bs", LISTING);
        let out = ExtentsArgs {
            input: input.clone(),
            block_size: Some(1024),
        }
        .execute(&AnalysisEnv::default())
        .unwrap();
        assert_eq!(out.document.unwrap()["bound"]["start"], 200);

        let err = ExtentsArgs {
            input,
            block_size: Some(1000),
        }
        .execute(&AnalysisEnv::default())
        .unwrap_err();
        assert_eq!(err.downcast_ref::<Status>().unwrap().code(), StatusCode::INVALID_ARG);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_listing_without_extents_fails() {
        let (dir, input) = write("extents-none", "model.gguf: 0 extents found\n");
        let err = ExtentsArgs {
            input,
            block_size: None,
        }
        .execute(&AnalysisEnv::default())
        .unwrap_err();
        assert_eq!(err.downcast_ref::<Status>().unwrap().code(), TraceCode::NO_EXTENTS);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
