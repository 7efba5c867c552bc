//! Tracking of which groups hold a present value, shared by all fields of a
//! struct-of-arrays grouped state, and the row selection helpers that feed it.
//! Adapted from <`https://docs.rs/datafusion/latest/datafusion/physical_expr/struct.NullState.html`>
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
use crate::error::Result;
use arrow::array::{
    Array, ArrowPrimitiveType, BooleanArray, BooleanBufferBuilder, PrimitiveArray,
};

#[derive(Debug)]
pub struct SeenGroups {
    /// Does group `i` hold a present value?
    ///
    /// If `seen_values[i]` is true, group `i` has seen at least one non null
    /// value (or adopted a present state during a merge)
    ///
    /// If `seen_values[i]` is false, group `i` is absent
    seen_values: BooleanBufferBuilder,
}

impl Default for SeenGroups {
    fn default() -> Self {
        Self::new()
    }
}

impl SeenGroups {
    #[must_use]
    pub fn new() -> Self {
        Self {
            seen_values: BooleanBufferBuilder::new(0),
        }
    }

    /// Number of groups tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen_values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen_values.is_empty()
    }

    /// return the size of all buffers allocated by this null state, not including self
    #[must_use]
    pub fn size(&self) -> usize {
        // capacity is in bits, so convert to bytes
        self.seen_values.capacity() / 8
    }

    /// Ensures at least `total_num_groups` are tracked. New groups start "not seen".
    pub fn ensure_groups(&mut self, total_num_groups: usize) {
        if self.seen_values.len() < total_num_groups {
            let new_groups = total_num_groups - self.seen_values.len();
            self.seen_values.append_n(new_groups, false);
        }
    }

    #[must_use]
    pub fn is_seen(&self, group_index: usize) -> bool {
        self.seen_values.get_bit(group_index)
    }

    pub fn set_seen(&mut self, group_index: usize, seen: bool) {
        self.seen_values.set_bit(group_index, seen);
    }

    /// Forget the first `n` groups and shift the remainder down.
    pub fn remove_front(&mut self, n: usize) {
        let seen = self.seen_values.finish();
        // TODO shift the packed bits in place rather than rebuilding bit by bit
        for bit in seen.iter().skip(n) {
            self.seen_values.append(bit);
        }
    }

    pub fn clear(&mut self) {
        self.seen_values = BooleanBufferBuilder::new(0);
    }
}

/// Invokes `value_fn(group_index, value)` for each non null, non
/// filtered value of `values`.
///
/// # Arguments:
///
/// * `group_indices`:  To which groups do the rows in `values` belong, (aka `group_index`)
/// * `values`: the input arguments to the accumulator
/// * `opt_filter`: if present, only rows for which is Some(true) are included
/// * `value_fn`: function invoked for  (`group_index`, value) where value is non null
///
/// # Example
///
/// ```text
///  ┌─────────┐   ┌─────────┐   ┌ ─ ─ ─ ─ ┐
///  │ ┌─────┐ │   │ ┌─────┐ │     ┌─────┐
///  │ │  2  │ │   │ │ 200 │ │   │ │  t  │ │
///  │ ├─────┤ │   │ ├─────┤ │     ├─────┤
///  │ │  2  │ │   │ │ 100 │ │   │ │  f  │ │
///  │ ├─────┤ │   │ ├─────┤ │     ├─────┤
///  │ │  0  │ │   │ │ 200 │ │   │ │  t  │ │
///  │ ├─────┤ │   │ ├─────┤ │     ├─────┤
///  │ │  1  │ │   │ │NULL │ │   │ │  t  │ │
///  │ └─────┘ │   │ └─────┘ │     └─────┘
///  └─────────┘   └─────────┘   └ ─ ─ ─ ─ ┘
///
/// group_indices   values        opt_filter
/// ```
///
/// `value_fn` is invoked as `value_fn(2, 200)` then `value_fn(0, 200)`.
///
/// # Panics
/// If `group_indices` and `values` (or the filter) differ in length.
pub fn accumulate<T, F>(
    group_indices: &[usize],
    values: &PrimitiveArray<T>,
    opt_filter: Option<&BooleanArray>,
    mut value_fn: F,
) where
    T: ArrowPrimitiveType,
    F: FnMut(usize, T::Native),
{
    assert_eq!(values.len(), group_indices.len());

    match (values.null_count() > 0, opt_filter) {
        // no nulls, no filter,
        (false, None) => {
            for (&group_index, &value) in group_indices.iter().zip(values.values().iter()) {
                value_fn(group_index, value);
            }
        }
        // nulls, no filter
        (true, None) => {
            for (&group_index, value) in group_indices.iter().zip(values.iter()) {
                if let Some(value) = value {
                    value_fn(group_index, value);
                }
            }
        }
        // no nulls, but a filter
        (false, Some(filter)) => {
            assert_eq!(filter.len(), group_indices.len());
            group_indices
                .iter()
                .zip(values.values().iter())
                .zip(filter.iter())
                .for_each(|((&group_index, &value), filter_value)| {
                    if let Some(true) = filter_value {
                        value_fn(group_index, value);
                    }
                });
        }
        // both null values and filters
        (true, Some(filter)) => {
            assert_eq!(filter.len(), group_indices.len());
            filter
                .iter()
                .zip(group_indices.iter())
                .zip(values.iter())
                .for_each(|((filter_value, &group_index), value)| {
                    if let (Some(true), Some(value)) = (filter_value, value) {
                        value_fn(group_index, value);
                    }
                });
        }
    }
}

/// Invokes `row_fn(row, group_index)` for every row not removed by `opt_filter`,
/// stopping at the first error.
///
/// Unlike [`accumulate`] null rows are visited: a null carrier row is an absent
/// state, which still has to be combined.
///
/// # Errors
/// The first error returned by `row_fn`.
pub fn for_each_selected_row<F>(
    group_indices: &[usize],
    opt_filter: Option<&BooleanArray>,
    mut row_fn: F,
) -> Result<()>
where
    F: FnMut(usize, usize) -> Result<()>,
{
    match opt_filter {
        None => {
            for (row, &group_index) in group_indices.iter().enumerate() {
                row_fn(row, group_index)?;
            }
        }
        Some(filter) => {
            for (row, (&group_index, filter_value)) in
                group_indices.iter().zip(filter.iter()).enumerate()
            {
                if let Some(true) = filter_value {
                    row_fn(row, group_index)?;
                }
            }
        }
    }
    Ok(())
}
