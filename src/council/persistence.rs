/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A local cache of in-flight proposals, so that a member that restarts mid-height can resume voting
//! with the votes and signatures it already collected.
//!
//! Each proposal is kept in its own file named `{height}_{issuer}_{revision}` holding the Borsh
//! encoding of a [`ProposalRecord`]. Files are written to a temporary name and then renamed into
//! place, so a crash never leaves a partially-written record under a valid name.

use std::{
    fmt::Display,
    fs, io,
    path::{Path, PathBuf},
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::data_types::{BlockHeight, IssuerIndex, Revision};

use super::proposal::ProposalRecord;

const TEMP_SUFFIX: &str = ".tmp";

pub struct ProposalStore {
    dir: PathBuf,
}

impl ProposalStore {
    /// Open the store in `dir`, creating the directory if it does not exist.
    pub fn open(dir: impl AsRef<Path>) -> Result<ProposalStore, ProposalStoreError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(ProposalStore {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `record`, replacing any earlier record of the same proposal.
    pub fn save(&self, record: &ProposalRecord) -> Result<(), ProposalStoreError> {
        let name = file_name(record.height, record.issuer, record.revision);
        let path = self.dir.join(&name);
        let temp_path = self.dir.join(format!("{}{}", name, TEMP_SUFFIX));
        fs::write(&temp_path, record.try_to_vec()?)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// Read every record saved for proposals at `height`, ordered by (issuer, revision).
    pub fn load(&self, height: BlockHeight) -> Result<Vec<ProposalRecord>, ProposalStoreError> {
        let mut entries: Vec<((IssuerIndex, Revision), PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if let Some((entry_height, issuer, revision)) = parse_file_name(&path) {
                if entry_height == height {
                    entries.push(((issuer, revision), path));
                }
            }
        }
        entries.sort_by_key(|(key, _)| *key);

        let mut records = Vec::with_capacity(entries.len());
        for (_, path) in entries {
            let bytes = fs::read(&path)?;
            let record = ProposalRecord::deserialize(&mut bytes.as_slice())
                .map_err(|source| ProposalStoreError::Decode { path, source })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Delete the records of every proposal below `keep_from`, along with leftover temporary files.
    /// Returns how many files were removed.
    pub fn prune(&self, keep_from: BlockHeight) -> Result<usize, ProposalStoreError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_temp = path
                .to_str()
                .map(|path| path.ends_with(TEMP_SUFFIX))
                .unwrap_or(false);
            let is_stale = match parse_file_name(&path) {
                Some((height, _, _)) => height < keep_from,
                None => false,
            };
            if is_temp || is_stale {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn file_name(height: BlockHeight, issuer: IssuerIndex, revision: Revision) -> String {
    format!("{}_{}_{}", height, issuer, revision)
}

fn parse_file_name(path: &Path) -> Option<(BlockHeight, IssuerIndex, Revision)> {
    let name = path.file_name()?.to_str()?;
    let mut parts = name.split('_');
    let height = parts.next()?.parse::<u64>().ok()?;
    let issuer = parts.next()?.parse::<u16>().ok()?;
    let revision = parts.next()?.parse::<u32>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((
        BlockHeight::new(height),
        IssuerIndex::new(issuer),
        Revision::new(revision),
    ))
}

#[derive(Debug)]
pub enum ProposalStoreError {
    Io(io::Error),
    Decode { path: PathBuf, source: io::Error },
}

impl From<io::Error> for ProposalStoreError {
    fn from(value: io::Error) -> Self {
        ProposalStoreError::Io(value)
    }
}

impl Display for ProposalStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProposalStoreError::Io(err) => write!(f, "proposal store I/O error: {}", err),
            ProposalStoreError::Decode { path, source } => {
                write!(f, "failed to decode proposal record {}: {}", path.display(), source)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::types::signatures::BlockSignatures;

    fn record(height: u64, issuer: u16, revision: u32) -> ProposalRecord {
        ProposalRecord {
            height: BlockHeight::new(height),
            revision: Revision::new(revision),
            issuer: IssuerIndex::new(issuer),
            proposed: true,
            block: None,
            votes: Vec::new(),
            signatures: BlockSignatures::default(),
        }
    }

    #[test]
    fn records_are_loaded_by_height_and_pruned() {
        let dir = TempDir::new().unwrap();
        let store = ProposalStore::open(dir.path().join("proposals")).unwrap();
        store.save(&record(4, 1, 0)).unwrap();
        store.save(&record(4, 0, 1)).unwrap();
        store.save(&record(5, 0, 0)).unwrap();
        // Saving again replaces the earlier record.
        store.save(&record(4, 1, 0)).unwrap();

        let loaded = store.load(BlockHeight::new(4)).unwrap();
        assert_eq!(loaded, vec![record(4, 0, 1), record(4, 1, 0)]);

        fs::write(dir.path().join("proposals").join("3_0_0.tmp"), b"partial").unwrap();
        assert_eq!(store.prune(BlockHeight::new(5)).unwrap(), 3);
        assert!(store.load(BlockHeight::new(4)).unwrap().is_empty());
        assert_eq!(store.load(BlockHeight::new(5)).unwrap().len(), 1);
    }

    #[test]
    fn file_names_parse_back() {
        let name = file_name(BlockHeight::new(12), IssuerIndex::new(3), Revision::new(1));
        assert_eq!(name, "12_3_1");
        assert_eq!(
            parse_file_name(Path::new(&name)),
            Some((BlockHeight::new(12), IssuerIndex::new(3), Revision::new(1)))
        );
    }

    #[test]
    fn foreign_file_names_are_ignored() {
        assert_eq!(parse_file_name(Path::new("12_3_1.tmp")), None);
        assert_eq!(parse_file_name(Path::new("12_3")), None);
        assert_eq!(parse_file_name(Path::new("12_3_1_0")), None);
        assert_eq!(parse_file_name(Path::new("README")), None);
    }
}
