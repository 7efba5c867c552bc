//! A hash aggregation operator over one Int64 key that can ship its partial state
//! to another operator, and spill it to disk under memory pressure.
//!
//! The state batch exchanged between operators and written to spill files has the
//! key column first, then one carrier column per aggregation, named after it:
//!
//! ```text
//! key: Int64 | sum(price): Float64 | avg(price): Struct<sum, count> | ...
//! ```
//!
//! Spilled state is resumed through the same merge path used for exchanged state.
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
    config::AggregatorConfig,
    error::{Result, StateError, shape_err},
    grouping::GroupKeyIndex,
    manager::GroupedAggregate,
    spill::SpillManager,
};
use arrow::{
    array::{ArrayRef, AsArray, Int64Array},
    datatypes::{DataType, Field, Int64Type, Schema, SchemaRef},
    record_batch::RecordBatch,
};
use datafusion::logical_expr::EmitTo;
use log::{debug, info, warn};
use num_format::{Locale, ToFormattedString};
use std::sync::Arc;

/// Groups rows by key and folds each aggregation's input into per-group state.
#[derive(Debug)]
pub struct HashAggregator {
    config: AggregatorConfig,
    /// Index of the key column in input batches
    key_index: usize,
    /// Index of each aggregation's input column in input batches
    value_indices: Vec<usize>,
    aggregates: Vec<Box<dyn GroupedAggregate>>,
    groups: GroupKeyIndex,
    /// Reused group id buffer
    group_indices: Vec<usize>,
    state_schema: SchemaRef,
    output_schema: SchemaRef,
    /// Created on first spill
    spills: Option<SpillManager>,
}

impl HashAggregator {
    /// Create an aggregator for input batches of `input_schema`.
    ///
    /// # Errors
    /// [`StateError::InvalidConfig`] if a configured column is missing, the key is not
    /// Int64, or an aggregation does not accept its column's type.
    pub fn try_new(config: AggregatorConfig, input_schema: &Schema) -> Result<Self> {
        let key_index = Self::column_index(input_schema, config.key_column())?;
        let key_type = input_schema.field(key_index).data_type();
        if key_type != &DataType::Int64 {
            return Err(StateError::InvalidConfig(format!(
                "Key column \"{}\" must be Int64 but is {key_type}",
                config.key_column()
            )));
        }
        let mut value_indices = Vec::with_capacity(config.aggregates().len());
        let mut aggregates = Vec::with_capacity(config.aggregates().len());
        for aggregate in config.aggregates() {
            let index = Self::column_index(input_schema, &aggregate.column)?;
            aggregates.push(
                aggregate
                    .op
                    .create_aggregate(input_schema.field(index).data_type())?,
            );
            value_indices.push(index);
        }

        let key_field = Field::new(config.key_column(), DataType::Int64, true);
        let mut state_fields = vec![key_field.clone()];
        let mut output_fields = vec![key_field];
        for (expr, aggregate) in config.aggregates().iter().zip(&aggregates) {
            state_fields.push(aggregate.carrier_field(&expr.output_name()));
            output_fields.push(Field::new(
                expr.output_name(),
                aggregate.output_type(),
                true,
            ));
        }
        info!("Hash aggregation: {config}");
        Ok(Self {
            config,
            key_index,
            value_indices,
            aggregates,
            groups: GroupKeyIndex::new(),
            group_indices: Vec::new(),
            state_schema: Arc::new(Schema::new(state_fields)),
            output_schema: Arc::new(Schema::new(output_fields)),
            spills: None,
        })
    }

    fn column_index(schema: &Schema, name: &str) -> Result<usize> {
        schema.index_of(name).map_err(|_| {
            StateError::InvalidConfig(format!("Column \"{name}\" not found in input schema"))
        })
    }

    /// Schema of batches produced by [`emit_state`](Self::emit_state) and accepted by
    /// [`merge`](Self::merge).
    #[must_use]
    pub fn state_schema(&self) -> SchemaRef {
        self.state_schema.clone()
    }

    /// Schema of the batch produced by [`finish`](Self::finish).
    #[must_use]
    pub fn output_schema(&self) -> SchemaRef {
        self.output_schema.clone()
    }

    /// Groups currently held in memory.
    #[must_use]
    pub fn num_groups(&self) -> usize {
        self.groups.num_groups()
    }

    /// Bytes of group keys and state held in memory.
    #[must_use]
    pub fn size(&self) -> usize {
        self.groups.size() + self.aggregates.iter().map(|a| a.size()).sum::<usize>()
    }

    /// Spill files written and not yet resumed.
    #[must_use]
    pub fn pending_spills(&self) -> usize {
        self.spills.as_ref().map_or(0, SpillManager::pending)
    }

    /// Accumulate a batch of raw input rows.
    ///
    /// # Errors
    /// If the batch does not match the input schema, or memory is exhausted and
    /// cannot be relieved by spilling.
    pub fn update(&mut self, batch: &RecordBatch) -> Result<()> {
        let keys = Self::key_column(batch, self.key_index)?;
        self.groups.intern(keys, &mut self.group_indices);
        let total_num_groups = self.groups.num_groups();
        for (aggregate, &index) in self.aggregates.iter_mut().zip(&self.value_indices) {
            let values = batch.columns().get(index).ok_or_else(|| {
                StateError::InvalidConfig(format!("Input batch has no column {index}"))
            })?;
            aggregate.update_batch(values.as_ref(), &self.group_indices, None, total_num_groups)?;
        }
        self.check_memory()
    }

    /// Combine a state batch from another aggregator into this one.
    ///
    /// # Errors
    /// [`StateError::ShapeMismatch`] if the batch was produced with different
    /// aggregations or state formats, [`StateError::DataCorruption`] if a state
    /// cannot be decoded, or a memory error as for [`update`](Self::update).
    pub fn merge(&mut self, state_batch: &RecordBatch) -> Result<()> {
        self.merge_states(state_batch)?;
        self.check_memory()
    }

    /// Resume any spills, then hand over the state of every group, leaving this
    /// aggregator empty.
    ///
    /// # Errors
    /// If a spill cannot be read back or a state cannot be written.
    pub fn emit_state(&mut self) -> Result<RecordBatch> {
        self.resume_spills()?;
        self.take_state_batch()
    }

    /// Resume any spills, then evaluate the final value of every group, leaving this
    /// aggregator empty.
    ///
    /// # Errors
    /// If a spill cannot be read back or a final value cannot be written.
    pub fn finish(&mut self) -> Result<RecordBatch> {
        self.resume_spills()?;
        let mut columns: Vec<ArrayRef> = vec![Arc::new(self.groups.keys())];
        for aggregate in &mut self.aggregates {
            columns.push(aggregate.evaluate(EmitTo::All)?);
        }
        self.groups.clear();
        Ok(RecordBatch::try_new(self.output_schema.clone(), columns)?)
    }

    fn key_column(batch: &RecordBatch, index: usize) -> Result<&Int64Array> {
        batch
            .columns()
            .get(index)
            .and_then(|keys| keys.as_primitive_opt::<Int64Type>())
            .ok_or_else(|| StateError::InvalidConfig(format!("Column {index} is not an Int64 key")))
    }

    fn check_state_schema(&self, schema: &Schema) -> Result<()> {
        let fields = schema.fields();
        if fields.len() != self.aggregates.len() + 1 {
            return shape_err!(
                "state batch has {} columns but {} aggregations are configured",
                fields.len(),
                self.aggregates.len()
            );
        }
        if fields[0].data_type() != &DataType::Int64 {
            return shape_err!(
                "state batch key column has type {} not Int64",
                fields[0].data_type()
            );
        }
        for (field, aggregate) in fields.iter().skip(1).zip(&self.aggregates) {
            aggregate.check_received_field(field)?;
        }
        Ok(())
    }

    fn merge_states(&mut self, state_batch: &RecordBatch) -> Result<()> {
        self.check_state_schema(&state_batch.schema())?;
        let keys = Self::key_column(state_batch, 0)?;
        self.groups.intern(keys, &mut self.group_indices);
        let total_num_groups = self.groups.num_groups();
        debug!(
            "Merging {} partial states",
            state_batch.num_rows().to_formatted_string(&Locale::en)
        );
        for (aggregate, carrier) in self.aggregates.iter_mut().zip(&state_batch.columns()[1..]) {
            aggregate.merge_batch(carrier.as_ref(), &self.group_indices, None, total_num_groups)?;
        }
        Ok(())
    }

    fn take_state_batch(&mut self) -> Result<RecordBatch> {
        let mut columns: Vec<ArrayRef> = vec![Arc::new(self.groups.keys())];
        for aggregate in &mut self.aggregates {
            columns.push(aggregate.take_state(EmitTo::All)?);
        }
        self.groups.clear();
        Ok(RecordBatch::try_new(self.state_schema.clone(), columns)?)
    }

    fn check_memory(&mut self) -> Result<()> {
        let Some(limit) = self.config.memory_limit() else {
            return Ok(());
        };
        let size = self.size();
        if size <= limit {
            return Ok(());
        }
        if !self.config.spill_enabled() {
            return Err(StateError::ResourceExhausted(format!(
                "aggregation state of {} bytes exceeds memory limit of {} bytes and spilling is disabled",
                size.to_formatted_string(&Locale::en),
                limit.to_formatted_string(&Locale::en)
            )));
        }
        self.spill()
    }

    fn spill(&mut self) -> Result<()> {
        if self.groups.num_groups() == 0 {
            return Ok(());
        }
        if self.spills.is_none() {
            self.spills = Some(SpillManager::try_new(
                self.config.spill_dir(),
                self.config.batch_size(),
                self.config.max_spill_bytes(),
            )?);
        }
        let batch = self.take_state_batch()?;
        match &mut self.spills {
            Some(spills) => spills.spill(&batch),
            None => Ok(()),
        }
    }

    fn resume_spills(&mut self) -> Result<()> {
        while let Some(file) = self.spills.as_mut().and_then(SpillManager::take_next) {
            info!(
                "Resuming {} spilled groups from {}",
                file.rows().to_formatted_string(&Locale::en),
                file.path().display()
            );
            for batch in file.open()? {
                self.merge_states(&batch?)?;
            }
        }
        if let Some(limit) = self.config.memory_limit() {
            let size = self.size();
            if size > limit {
                warn!(
                    "Resumed aggregation state of {} bytes exceeds memory limit of {} bytes",
                    size.to_formatted_string(&Locale::en),
                    limit.to_formatted_string(&Locale::en)
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AggregatorConfigBuilder,
        functions::{AggOp, AggregateExpr},
    };
    use arrow::array::{Float64Array, StringArray};
    use test_log::test;

    fn input_schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("price", DataType::Float64, true),
        ])
    }

    fn input(ids: Vec<Option<i64>>, prices: Vec<Option<f64>>) -> RecordBatch {
        RecordBatch::try_new(
            Arc::new(input_schema()),
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(Float64Array::from(prices)),
            ],
        )
        .unwrap()
    }

    fn aggregator(memory_limit: Option<usize>, spill_enabled: bool) -> Result<HashAggregator> {
        let config = AggregatorConfigBuilder::new()
            .key_column("id")
            .aggregates(vec![
                AggregateExpr::new("price", AggOp::Sum),
                AggregateExpr::new("price", AggOp::Avg),
            ])
            .memory_limit(memory_limit)
            .spill_enabled(spill_enabled)
            .build()?;
        HashAggregator::try_new(config, &input_schema())
    }

    #[test]
    fn should_aggregate_by_key_with_null_key_group() -> Result<()> {
        // Given
        let mut aggregator = aggregator(None, false)?;

        // When
        aggregator.update(&input(
            vec![Some(1), None, Some(1), Some(2)],
            vec![Some(1.0), Some(4.0), Some(3.0), None],
        ))?;
        let result = aggregator.finish()?;

        // Then
        assert_eq!(result.schema(), aggregator.output_schema());
        assert_eq!(
            result.column(0).as_primitive::<Int64Type>(),
            &Int64Array::from(vec![Some(1), None, Some(2)])
        );
        assert_eq!(
            result.column(1).as_primitive::<arrow::datatypes::Float64Type>(),
            &Float64Array::from(vec![Some(4.0), Some(4.0), None])
        );
        assert_eq!(
            result.column(2).as_primitive::<arrow::datatypes::Float64Type>(),
            &Float64Array::from(vec![Some(2.0), Some(4.0), None])
        );
        assert_eq!(aggregator.num_groups(), 0);
        Ok(())
    }

    #[test]
    fn should_merge_state_from_partial_aggregators() -> Result<()> {
        // Given
        let mut left = aggregator(None, false)?;
        let mut right = aggregator(None, false)?;
        let mut last = aggregator(None, false)?;
        left.update(&input(vec![Some(1), Some(2)], vec![Some(1.0), Some(2.0)]))?;
        right.update(&input(vec![Some(2), Some(3)], vec![Some(4.0), Some(8.0)]))?;

        // When
        last.merge(&left.emit_state()?)?;
        last.merge(&right.emit_state()?)?;
        let result = last.finish()?;

        // Then
        assert_eq!(
            result.column(1).as_primitive::<arrow::datatypes::Float64Type>(),
            &Float64Array::from(vec![1.0, 6.0, 8.0])
        );
        assert_eq!(
            result.column(2).as_primitive::<arrow::datatypes::Float64Type>(),
            &Float64Array::from(vec![1.0, 3.0, 8.0])
        );
        Ok(())
    }

    #[test]
    fn should_spill_when_over_memory_limit() -> Result<()> {
        // Given
        let mut aggregator = aggregator(Some(1), true)?;

        // When
        aggregator.update(&input(vec![Some(1)], vec![Some(1.0)]))?;
        aggregator.update(&input(vec![Some(1)], vec![Some(2.0)]))?;

        // Then
        assert_eq!(aggregator.pending_spills(), 2);
        assert_eq!(aggregator.num_groups(), 0);
        let result = aggregator.finish()?;
        assert_eq!(
            result.column(1).as_primitive::<arrow::datatypes::Float64Type>(),
            &Float64Array::from(vec![3.0])
        );
        assert_eq!(aggregator.pending_spills(), 0);
        Ok(())
    }

    #[test]
    fn should_fail_over_memory_limit_without_spill() -> Result<()> {
        let mut aggregator = aggregator(Some(1), false)?;
        let result = aggregator.update(&input(vec![Some(1)], vec![Some(1.0)]));
        assert!(matches!(result, Err(StateError::ResourceExhausted(_))));
        Ok(())
    }

    #[test]
    fn should_reject_state_from_other_aggregations() -> Result<()> {
        // Given
        let mut aggregator = aggregator(None, false)?;
        let config = AggregatorConfigBuilder::new()
            .key_column("id")
            .aggregates(vec![
                AggregateExpr::new("price", AggOp::Avg),
                AggregateExpr::new("price", AggOp::Sum),
            ])
            .build()?;
        let mut other = HashAggregator::try_new(config, &input_schema())?;
        other.update(&input(vec![Some(1)], vec![Some(1.0)]))?;

        // When
        let result = aggregator.merge(&other.emit_state()?);

        // Then
        assert!(matches!(result, Err(StateError::ShapeMismatch(_))));
        Ok(())
    }

    #[test]
    fn should_reject_unsupported_configuration() {
        // Given
        let schema = Schema::new(vec![
            Field::new("id", DataType::Utf8, true),
            Field::new("price", DataType::Float64, true),
        ]);
        let config = AggregatorConfigBuilder::new()
            .key_column("id")
            .aggregates(vec![AggregateExpr::new("price", AggOp::Sum)])
            .build()
            .unwrap();

        // Then
        assert!(matches!(
            HashAggregator::try_new(config.clone(), &schema),
            Err(StateError::InvalidConfig(_))
        ));
        assert!(matches!(
            HashAggregator::try_new(config, &Schema::empty()),
            Err(StateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn should_reject_non_integer_key_at_update() -> Result<()> {
        // Given
        let mut aggregator = aggregator(None, false)?;
        let schema = Schema::new(vec![
            Field::new("id", DataType::Utf8, true),
            Field::new("price", DataType::Float64, true),
        ]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(StringArray::from(vec!["a"])),
                Arc::new(Float64Array::from(vec![1.0])),
            ],
        )?;

        // When
        let result = aggregator.update(&batch);

        // Then
        assert!(matches!(result, Err(StateError::InvalidConfig(_))));
        Ok(())
    }
}
