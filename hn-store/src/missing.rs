//! Ledger of item ids the upstream API has no object for.
//!
//! Gaps are permanent upstream, so they are remembered across runs in a
//! plain one-id-per-line text file and never fetched again.
use crate::{StoreError, StoreResult};
use log::info;
use std::{
    collections::HashSet,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

pub struct MissingIds {
    path: PathBuf,
    inner: Mutex<HashSet<u64>>,
}

impl MissingIds {
    /// Load the ledger, creating an empty one when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut ids = HashSet::new();

        match File::open(&path) {
            Ok(file) => {
                for line in BufReader::new(file).lines() {
                    let line = line?;
                    let line = line.trim();
                    if let Ok(id) = line.parse::<u64>() {
                        ids.insert(id);
                    }
                }
                info!("Loaded {} missing ids from {path:?}", ids.len());
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
            Err(err) => return Err(err.into()),
        }

        Ok(Self {
            path,
            inner: Mutex::new(ids),
        })
    }

    pub fn contains(&self, id: u64) -> bool {
        self.inner
            .lock()
            .map(|ids| ids.contains(&id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|ids| ids.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record newly discovered gaps, appending them to the ledger file.
    pub fn record(&self, new_ids: impl IntoIterator<Item = u64>) -> StoreResult<()> {
        let mut ids = self.inner.lock().map_err(|_| StoreError::Lock)?;
        let added: Vec<u64> = new_ids.into_iter().filter(|id| ids.insert(*id)).collect();
        if added.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for id in added {
            writeln!(file, "{id}")?;
        }
        Ok(())
    }
}
