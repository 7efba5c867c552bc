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

use aggregation_helpers::*;
use agg_state::{
    StateError, column::VERSION_METADATA_KEY, decode_state_batches, encode_state_batch,
};
use arrow::{
    array::{ArrayRef, BinaryArray},
    datatypes::{Field, Schema},
    record_batch::RecordBatch,
};
use color_eyre::eyre::Error;
use std::sync::Arc;
use test_log::test;

/// Replace carrier column `index` of a state batch, adjusting its field with `field`.
fn replace_column(
    batch: &RecordBatch,
    index: usize,
    field: impl FnOnce(&Field) -> Field,
    column: Option<ArrayRef>,
) -> Result<RecordBatch, Error> {
    let schema = batch.schema();
    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    fields[index] = field(&fields[index]);
    let mut columns = batch.columns().to_vec();
    if let Some(column) = column {
        columns[index] = column;
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

fn partial_state(start: usize, end: usize) -> Result<RecordBatch, Error> {
    let mut partial = unlimited_aggregator()?;
    partial.update(&input_batch(start, end, 300)?)?;
    Ok(partial.emit_state()?)
}

#[test]
fn should_combine_partial_states_shipped_between_operators() -> Result<(), Error> {
    // Given
    let left = encode_state_batch(&partial_state(0, 2_000)?)?;
    let right = encode_state_batch(&partial_state(2_000, 5_000)?)?;

    // When
    let mut last = unlimited_aggregator()?;
    for payload in [right, left] {
        for batch in decode_state_batches(&payload)? {
            last.merge(&batch)?;
        }
    }

    // Then
    let mut expected = unlimited_aggregator()?;
    expected.update(&input_batch(0, 5_000, 300)?)?;
    assert_eq!(sorted_rows(&last.finish()?), sorted_rows(&expected.finish()?));
    Ok(())
}

#[test]
fn should_keep_absent_groups_absent_across_exchange() -> Result<(), Error> {
    // Given
    let mut partial = unlimited_aggregator()?;
    partial.update(&input_batch(0, 1, 300)?)?;

    // When
    let mut last = unlimited_aggregator()?;
    for batch in decode_state_batches(&encode_state_batch(&partial.emit_state()?)?)? {
        last.merge(&batch)?;
    }

    // Then
    assert_eq!(
        sorted_rows(&last.finish()?),
        vec![(None, None, None, None, None)]
    );
    Ok(())
}

#[test]
fn should_reject_state_written_by_other_version() -> Result<(), Error> {
    // Given
    let state = partial_state(0, 100)?;
    let state = replace_column(
        &state,
        3,
        |field| {
            let mut metadata = field.metadata().clone();
            metadata.insert(VERSION_METADATA_KEY.to_owned(), "2".to_owned());
            field.clone().with_metadata(metadata)
        },
        None,
    )?;

    // When
    let mut last = unlimited_aggregator()?;
    let result = last.merge(&state);

    // Then
    assert!(matches!(result, Err(StateError::ShapeMismatch(_))));
    Ok(())
}

#[test]
fn should_reject_state_without_shape_tags() -> Result<(), Error> {
    // Given
    let state = partial_state(0, 100)?;
    let state = replace_column(
        &state,
        1,
        |field| field.clone().with_metadata(std::collections::HashMap::new()),
        None,
    )?;

    // When
    let mut last = unlimited_aggregator()?;
    let result = last.merge(&state);

    // Then
    assert!(matches!(result, Err(StateError::ShapeMismatch(_))));
    Ok(())
}

#[test]
fn should_reject_corrupt_histogram_frames() -> Result<(), Error> {
    // Given
    let state = partial_state(0, 3)?;
    let garbage: ArrayRef = Arc::new(BinaryArray::from_iter_values(
        (0..state.num_rows()).map(|_| b"H\x01\x05\x00".as_slice()),
    ));
    let state = replace_column(&state, 4, Clone::clone, Some(garbage))?;

    // When
    let mut last = unlimited_aggregator()?;
    let result = last.merge(&state);

    // Then
    assert!(matches!(result, Err(StateError::DataCorruption(_))));
    Ok(())
}

#[test]
fn should_reject_truncated_payload() -> Result<(), Error> {
    // Given
    let payload = encode_state_batch(&partial_state(0, 1_000)?)?;

    // When
    let result = decode_state_batches(&payload[..payload.len() / 2]);

    // Then
    assert!(matches!(result, Err(StateError::DataCorruption(_))));
    Ok(())
}
