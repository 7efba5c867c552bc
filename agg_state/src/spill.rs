//! Scratch storage for state batches spilled under memory pressure.
/*
* Copyright 2022-2025 Crown Copyright
*
* Licensed under the Apache License, Version 2.0 (the "License");
* you may not use this file except in compliance with the License.
* You may obtain a copy of the License at
*
*     http://www.apache.org/licenses/LICENSE-2.0
*
* Unless required by applicable law or agreed to in writing, software
* distributed under the License is distributed on an "AS IS" BASIS,
* WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
* See the License for the specific language governing permissions and
* limitations under the License.
*/
use crate::{
    codec::{StateStreamReader, write_state_stream},
    error::{Result, StateError},
};
use arrow::record_batch::RecordBatch;
use log::{debug, info};
use num_format::{Locale, ToFormattedString};
use std::{
    collections::VecDeque,
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

/// One spilled state batch on disk. The file is deleted when this is dropped.
#[derive(Debug)]
pub struct SpillFile {
    path: PathBuf,
    rows: usize,
    bytes: u64,
}

impl SpillFile {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Open the spilled stream for reading.
    ///
    /// # Errors
    /// If the file cannot be opened or its schema is unreadable.
    pub fn open(&self) -> Result<StateStreamReader<BufReader<File>>> {
        StateStreamReader::try_new(BufReader::new(File::open(&self.path)?))
    }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("Spill file {} not removed: {e}", self.path.display());
        }
    }
}

/// Writes state batches to a private temporary directory and hands them back for
/// resumption. The directory and every file in it are removed when the manager
/// is dropped.
#[derive(Debug)]
pub struct SpillManager {
    /// Dropped before `dir` so each file is removed before the directory
    files: VecDeque<SpillFile>,
    batch_size: usize,
    max_spill_bytes: Option<u64>,
    bytes_in_use: u64,
    spill_count: usize,
    dir: TempDir,
}

impl SpillManager {
    /// Create a spill directory under `parent`, or under the system temporary
    /// directory if `parent` is `None`.
    ///
    /// # Errors
    /// If the directory cannot be created or `batch_size` is zero.
    pub fn try_new(
        parent: Option<&Path>,
        batch_size: usize,
        max_spill_bytes: Option<u64>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(StateError::InvalidConfig(
                "spill batch size must be positive".to_owned(),
            ));
        }
        let mut builder = tempfile::Builder::new();
        builder.prefix("agg_state_spill");
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        debug!("Spilling to {}", dir.path().display());
        Ok(Self {
            files: VecDeque::new(),
            batch_size,
            max_spill_bytes,
            bytes_in_use: 0,
            spill_count: 0,
            dir,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Spilled files not yet taken back.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.files.len()
    }

    /// Bytes of spilled files not yet taken back.
    #[must_use]
    pub fn bytes_in_use(&self) -> u64 {
        self.bytes_in_use
    }

    /// Write `batch` to a new spill file.
    ///
    /// # Errors
    /// [`StateError::ResourceExhausted`] if the file would take spill use over the
    /// configured budget. Nothing is written in that case.
    pub fn spill(&mut self, batch: &RecordBatch) -> Result<()> {
        let encoded = write_state_stream(Vec::new(), batch, self.batch_size)?;
        let bytes = encoded.len() as u64;
        if let Some(max) = self.max_spill_bytes {
            if self.bytes_in_use + bytes > max {
                return Err(StateError::ResourceExhausted(format!(
                    "spilling {} bytes would exceed the spill budget of {} bytes ({} in use)",
                    bytes.to_formatted_string(&Locale::en),
                    max.to_formatted_string(&Locale::en),
                    self.bytes_in_use.to_formatted_string(&Locale::en)
                )));
            }
        }
        let path = self
            .dir
            .path()
            .join(format!("spill-{:05}.arrow", self.spill_count));
        fs::write(&path, &encoded)?;
        self.spill_count += 1;
        self.bytes_in_use += bytes;
        info!(
            "Spilled {} groups ({} bytes) to {}",
            batch.num_rows().to_formatted_string(&Locale::en),
            bytes.to_formatted_string(&Locale::en),
            path.display()
        );
        self.files.push_back(SpillFile {
            path,
            rows: batch.num_rows(),
            bytes,
        });
        Ok(())
    }

    /// Take back the oldest pending spill file. Its space is released from the
    /// budget; the file itself is deleted when the returned value is dropped.
    pub fn take_next(&mut self) -> Option<SpillFile> {
        let file = self.files.pop_front()?;
        self.bytes_in_use -= file.bytes;
        Some(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::{
        array::{ArrayRef, Int64Array},
        datatypes::{DataType, Field, Schema},
    };
    use std::sync::Arc;

    fn batch(rows: i64) -> RecordBatch {
        let keys: ArrayRef = Arc::new(Int64Array::from_iter_values(0..rows));
        let schema = Schema::new(vec![Field::new("key", DataType::Int64, true)]);
        RecordBatch::try_new(Arc::new(schema), vec![keys]).unwrap()
    }

    #[test]
    fn should_spill_and_read_back_in_order() -> Result<()> {
        // Given
        let mut spills = SpillManager::try_new(None, 3, None)?;

        // When
        spills.spill(&batch(7))?;
        spills.spill(&batch(2))?;

        // Then
        assert_eq!(spills.pending(), 2);
        let first = spills.take_next().unwrap();
        assert_eq!(first.rows(), 7);
        let sizes = first
            .open()?
            .map(|b| b.map(|b| b.num_rows()))
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(spills.take_next().map(|f| f.rows()), Some(2));
        assert!(spills.take_next().is_none());
        assert_eq!(spills.bytes_in_use(), 0);
        Ok(())
    }

    #[test]
    fn should_delete_file_once_consumed() -> Result<()> {
        // Given
        let mut spills = SpillManager::try_new(None, 10, None)?;
        spills.spill(&batch(5))?;

        // When
        let file = spills.take_next().unwrap();
        let path = file.path().to_owned();
        assert!(path.exists());
        drop(file);

        // Then
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn should_remove_directory_on_drop() -> Result<()> {
        // Given
        let parent = tempfile::tempdir()?;
        let mut spills = SpillManager::try_new(Some(parent.path()), 10, None)?;
        spills.spill(&batch(5))?;
        let dir = spills.dir().to_owned();
        assert!(dir.starts_with(parent.path()));

        // When
        drop(spills);

        // Then
        assert!(!dir.exists());
        Ok(())
    }

    #[test]
    fn should_refuse_spill_over_budget() -> Result<()> {
        // Given
        let mut spills = SpillManager::try_new(None, 10, Some(64))?;

        // When
        let result = spills.spill(&batch(1_000));

        // Then
        assert!(matches!(result, Err(StateError::ResourceExhausted(_))));
        assert_eq!(spills.pending(), 0);
        assert_eq!(fs::read_dir(spills.dir())?.count(), 0);
        Ok(())
    }

    #[test]
    fn should_reject_zero_batch_size() {
        assert!(matches!(
            SpillManager::try_new(None, 0, None),
            Err(StateError::InvalidConfig(_))
        ));
    }
}
