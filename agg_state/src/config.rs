//! Configuration of a spillable hash aggregation.
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
    error::{Result, StateError},
    functions::AggregateExpr,
};
use std::{
    collections::HashSet,
    fmt::{Display, Formatter},
    path::{Path, PathBuf},
};

/// Rows per batch when spilling or emitting, unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 8192;

/// Settings for one [`HashAggregator`](crate::HashAggregator).
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Name of the Int64 grouping column
    key_column: String,
    /// Aggregations, one carrier column each
    aggregates: Vec<AggregateExpr>,
    /// Bytes of state held before spilling; unlimited if `None`
    memory_limit: Option<usize>,
    /// May state be spilled to disk when over the memory limit?
    spill_enabled: bool,
    /// Parent of the spill directory; system temporary directory if `None`
    spill_dir: Option<PathBuf>,
    /// Bytes of spill files allowed at once; unlimited if `None`
    max_spill_bytes: Option<u64>,
    /// Rows per spilled batch
    batch_size: usize,
}

impl AggregatorConfig {
    #[must_use]
    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    #[must_use]
    pub fn aggregates(&self) -> &[AggregateExpr] {
        &self.aggregates
    }

    #[must_use]
    pub fn memory_limit(&self) -> Option<usize> {
        self.memory_limit
    }

    #[must_use]
    pub fn spill_enabled(&self) -> bool {
        self.spill_enabled
    }

    #[must_use]
    pub fn spill_dir(&self) -> Option<&Path> {
        self.spill_dir.as_deref()
    }

    #[must_use]
    pub fn max_spill_bytes(&self) -> Option<u64> {
        self.max_spill_bytes
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl Display for AggregatorConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "group by \"{}\" aggregating {:?}, ",
            self.key_column,
            self.aggregates
                .iter()
                .map(AggregateExpr::output_name)
                .collect::<Vec<_>>()
        )?;
        match (self.memory_limit, self.spill_enabled) {
            (None, _) => write!(f, "no memory limit"),
            (Some(limit), false) => write!(f, "memory limit {limit} bytes, spill disabled"),
            (Some(limit), true) => write!(f, "memory limit {limit} bytes, spill enabled"),
        }
    }
}

/// Builder for [`AggregatorConfig`].
#[derive(Debug)]
pub struct AggregatorConfigBuilder {
    key_column: String,
    aggregates: Vec<AggregateExpr>,
    memory_limit: Option<usize>,
    spill_enabled: bool,
    spill_dir: Option<PathBuf>,
    max_spill_bytes: Option<u64>,
    batch_size: usize,
}

impl Default for AggregatorConfigBuilder {
    fn default() -> Self {
        Self {
            key_column: String::default(),
            aggregates: Vec::default(),
            memory_limit: None,
            spill_enabled: true,
            spill_dir: None,
            max_spill_bytes: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl AggregatorConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn key_column(mut self, key_column: impl Into<String>) -> Self {
        self.key_column = key_column.into();
        self
    }

    #[must_use]
    pub fn aggregates(mut self, aggregates: Vec<AggregateExpr>) -> Self {
        self.aggregates = aggregates;
        self
    }

    #[must_use]
    pub fn memory_limit(mut self, memory_limit: Option<usize>) -> Self {
        self.memory_limit = memory_limit;
        self
    }

    #[must_use]
    pub fn spill_enabled(mut self, spill_enabled: bool) -> Self {
        self.spill_enabled = spill_enabled;
        self
    }

    #[must_use]
    pub fn spill_dir(mut self, spill_dir: Option<PathBuf>) -> Self {
        self.spill_dir = spill_dir;
        self
    }

    #[must_use]
    pub fn max_spill_bytes(mut self, max_spill_bytes: Option<u64>) -> Self {
        self.max_spill_bytes = max_spill_bytes;
        self
    }

    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Build the `AggregatorConfig`, consuming the builder and validating it.
    ///
    /// # Errors
    /// [`StateError::InvalidConfig`] if the key column is empty, there are no
    /// aggregations, an aggregation is repeated or reads the key column, or the batch
    /// size is zero.
    pub fn build(self) -> Result<AggregatorConfig> {
        self.validate()?;
        Ok(AggregatorConfig {
            key_column: self.key_column,
            aggregates: self.aggregates,
            memory_limit: self.memory_limit,
            spill_enabled: self.spill_enabled,
            spill_dir: self.spill_dir,
            max_spill_bytes: self.max_spill_bytes,
            batch_size: self.batch_size,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.key_column.is_empty() {
            return Err(StateError::InvalidConfig("No key column supplied".to_owned()));
        }
        if self.aggregates.is_empty() {
            return Err(StateError::InvalidConfig(
                "No aggregations supplied".to_owned(),
            ));
        }
        if self.batch_size == 0 {
            return Err(StateError::InvalidConfig(
                "Batch size must be positive".to_owned(),
            ));
        }
        let mut dup_check = HashSet::new();
        for aggregate in &self.aggregates {
            if aggregate.column == self.key_column {
                return Err(StateError::InvalidConfig(format!(
                    "Key column \"{}\" cannot be aggregated",
                    self.key_column
                )));
            }
            if !dup_check.insert(aggregate.output_name()) {
                return Err(StateError::InvalidConfig(format!(
                    "Aggregation {} is specified more than once",
                    aggregate.output_name()
                )));
            }
        }
        Ok(())
    }
}
