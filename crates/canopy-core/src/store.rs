//! Persisted result store: an append-only CSV log with one live row per triple.
//!
//! Every successful unit appends its row and flushes immediately. Superseding a
//! triple appends a newer row; [`ResultStore::compact`] later rewrites the file so
//! only the last row per triple survives. All writes go through one mutex.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{ParamKey, ParamTriple};
use crate::error::StoreError;
use crate::metrics::SweepRow;

/// What to do with a triple that already has a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Leave the existing row; the unit is not run.
    #[default]
    Skip,
    /// Run again and let the new row replace the old one.
    Supersede,
}

/// Outcome of one append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    Written,
    /// Skip mode and the triple was already present.
    AlreadyPresent,
}

struct Inner {
    writer: csv::Writer<File>,
    keys: HashSet<ParamKey>,
}

pub struct ResultStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

fn row_key(row: &SweepRow) -> ParamKey {
    ParamTriple::new(row.radius, row.vres, row.min_points).key()
}

impl ResultStore {
    /// Open or create the store at `path`, indexing the triples already in it.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| StoreError::Io { path: path.to_path_buf(), source })?;
        }
        let keys = load_rows(path)?.iter().map(row_key).collect();
        let writer = open_writer(path)?;
        Ok(Self { path: path.to_path_buf(), inner: Mutex::new(Inner { writer, keys }) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, params: &ParamTriple) -> bool {
        self.inner.lock().keys.contains(&params.key())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append and flush one row. In skip mode the presence check and the write happen
    /// under the same lock, so a triple is never written twice.
    pub fn append(&self, row: &SweepRow, mode: WriteMode) -> Result<Appended, StoreError> {
        let key = row_key(row);
        let mut inner = self.inner.lock();
        if mode == WriteMode::Skip && inner.keys.contains(&key) {
            return Ok(Appended::AlreadyPresent);
        }
        inner
            .writer
            .serialize(row)
            .map_err(|source| StoreError::Csv { path: self.path.clone(), source })?;
        inner
            .writer
            .flush()
            .map_err(|source| StoreError::Io { path: self.path.clone(), source })?;
        inner.keys.insert(key);
        Ok(Appended::Written)
    }

    /// Rewrite the file keeping only the last row per triple, ordered by `it_id`.
    /// Returns the number of rows removed.
    pub fn compact(&self) -> Result<usize, StoreError> {
        let io_err = |source| StoreError::Io { path: self.path.clone(), source };
        let mut inner = self.inner.lock();
        inner.writer.flush().map_err(io_err)?;

        let rows = load_rows(&self.path)?;
        let total = rows.len();
        let mut last: HashMap<ParamKey, usize> = HashMap::new();
        for (i, row) in rows.iter().enumerate() {
            last.insert(row_key(row), i);
        }
        let mut live: Vec<usize> = last.into_values().collect();
        live.sort_by_key(|&i| (rows[i].it_id, i));

        let tmp = self.path.with_extension("csv.compact");
        {
            let mut w = csv::Writer::from_path(&tmp).map_err(|source| StoreError::Csv { path: tmp.clone(), source })?;
            for &i in &live {
                w.serialize(&rows[i]).map_err(|source| StoreError::Csv { path: tmp.clone(), source })?;
            }
            w.flush().map_err(|source| StoreError::Io { path: tmp.clone(), source })?;
        }
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        inner.writer = open_writer(&self.path)?;

        let removed = total - live.len();
        if removed > 0 {
            tracing::info!(path = %self.path.display(), removed, kept = live.len(), "result store compacted");
        }
        Ok(removed)
    }
}

/// Append-mode writer; writes the header only into a new or empty file.
fn open_writer(path: &Path) -> Result<csv::Writer<File>, StoreError> {
    let io_err = |source| StoreError::Io { path: path.to_path_buf(), source };
    let file = OpenOptions::new().create(true).append(true).open(path).map_err(io_err)?;
    let is_empty = file.metadata().map_err(io_err)?.len() == 0;
    Ok(csv::WriterBuilder::new().has_headers(is_empty).from_writer(file))
}

/// Every row in the store file, superseded ones included, in file order.
/// A missing file is an empty store.
pub fn load_rows(path: &Path) -> Result<Vec<SweepRow>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let csv_err = |source| StoreError::Csv { path: path.to_path_buf(), source };
    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    reader.deserialize().map(|r| r.map_err(csv_err)).collect()
}

/// Live rows only: the last row per triple, ordered by `it_id`.
pub fn load_live_rows(path: &Path) -> Result<Vec<SweepRow>, StoreError> {
    let rows = load_rows(path)?;
    let mut last: HashMap<ParamKey, SweepRow> = HashMap::new();
    for row in rows {
        last.insert(row_key(&row), row);
    }
    let mut live: Vec<SweepRow> = last.into_values().collect();
    live.sort_by_key(|r| r.it_id);
    Ok(live)
}
