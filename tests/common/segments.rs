#![allow(dead_code)]

use ffseg::engine::synthetic::{MuxedRecord, read_segment};
use std::fs;
use std::path::{Path, PathBuf};

/// Finalized segment files in `dir`, sorted by name
pub fn finalized(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.contains("-tmp."))
        })
        .collect();
    paths.sort();
    paths
}

pub fn file_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

pub fn records(path: &Path) -> Vec<MuxedRecord> {
    read_segment(path).unwrap()
}

/// All records of all segments, in segment order
pub fn all_records(paths: &[PathBuf]) -> Vec<MuxedRecord> {
    paths.iter().flat_map(|p| records(p)).collect()
}
