//! The nullable (sum, count) pair state shape used by `avg`.
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
    column::{ShapeId, downcast_array, downcast_builder},
    error::{Result, StateError},
    factory::StateFactory,
    null_state::SeenGroups,
    serializer::StateSerializer,
    state::{AccumulatorState, GroupedState, grow_to},
};
use arrow::{
    array::{
        Array, ArrayBuilder, AsArray, Float64Builder, Int64Builder, StructArray, StructBuilder,
    },
    datatypes::{DataType, Field, Fields, Float64Type, Int64Type},
};

const SUM_COUNT_VERSION: u32 = 1;

/// A running sum and the number of rows that contributed to it.
#[derive(Debug, Clone, Copy)]
pub struct SumAndCountState {
    is_null: bool,
    sum: f64,
    count: i64,
}

impl SumAndCountState {
    #[must_use]
    pub fn new(sum: f64, count: i64) -> Self {
        Self {
            is_null: false,
            sum,
            count,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.is_null
    }

    /// The `(sum, count)` payload, if present.
    #[must_use]
    pub fn value(&self) -> Option<(f64, i64)> {
        (!self.is_null).then_some((self.sum, self.count))
    }

    /// Add one input row.
    pub fn add(&mut self, value: f64) {
        if self.is_null {
            *self = Self::new(value, 1);
        } else {
            self.sum += value;
            self.count = self.count.wrapping_add(1);
        }
    }

    /// Fold another partial pair into this one.
    pub fn merge_with(&mut self, incoming: &Self) {
        match (self.is_null, incoming.is_null) {
            (_, true) => {}
            (true, false) => *self = *incoming,
            (false, false) => {
                self.sum += incoming.sum;
                self.count = self.count.wrapping_add(incoming.count);
            }
        }
    }
}

impl Default for SumAndCountState {
    fn default() -> Self {
        Self {
            is_null: true,
            sum: 0.0,
            count: 0,
        }
    }
}

impl PartialEq for SumAndCountState {
    fn eq(&self, other: &Self) -> bool {
        match (self.value(), other.value()) {
            (None, None) => true,
            (Some((sum, count)), Some((other_sum, other_count))) => {
                sum.to_bits() == other_sum.to_bits() && count == other_count
            }
            _ => false,
        }
    }
}

impl AccumulatorState for SumAndCountState {
    fn is_absent(&self) -> bool {
        self.is_null
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Struct-of-arrays storage: sums, counts and the shared seen bitmap.
#[derive(Debug, Default)]
pub struct GroupedSumAndCountState {
    sums: Vec<f64>,
    counts: Vec<i64>,
    seen: SeenGroups,
}

impl GroupedSumAndCountState {
    fn load(&self, group_index: usize) -> SumAndCountState {
        if self.seen.is_seen(group_index) {
            SumAndCountState::new(self.sums[group_index], self.counts[group_index])
        } else {
            SumAndCountState::default()
        }
    }

    fn store(&mut self, group_index: usize, state: &SumAndCountState) {
        let (sum, count) = state.value().unwrap_or_default();
        self.seen.set_seen(group_index, !state.is_null);
        self.sums[group_index] = sum;
        self.counts[group_index] = count;
    }
}

impl GroupedState for GroupedSumAndCountState {
    type State = SumAndCountState;

    fn num_groups(&self) -> usize {
        self.sums.len()
    }

    fn ensure_groups(&mut self, total_num_groups: usize) {
        grow_to(&mut self.sums, total_num_groups, 0.0);
        grow_to(&mut self.counts, total_num_groups, 0);
        self.seen.ensure_groups(total_num_groups);
    }

    fn read<R>(&self, group_index: usize, f: impl FnOnce(&Self::State) -> R) -> R {
        f(&self.load(group_index))
    }

    fn modify<R>(&mut self, group_index: usize, f: impl FnOnce(&mut Self::State) -> R) -> R {
        let mut state = self.load(group_index);
        let result = f(&mut state);
        self.store(group_index, &state);
        result
    }

    fn remove_front(&mut self, n: usize) {
        self.sums.drain(..n);
        self.counts.drain(..n);
        self.seen.remove_front(n);
    }

    fn clear(&mut self) {
        self.sums = Vec::new();
        self.counts = Vec::new();
        self.seen.clear();
    }

    fn size(&self) -> usize {
        self.sums.capacity() * size_of::<f64>()
            + self.counts.capacity() * size_of::<i64>()
            + self.seen.size()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SumAndCountStateFactory;

impl StateFactory for SumAndCountStateFactory {
    type State = SumAndCountState;
    type Grouped = GroupedSumAndCountState;

    fn create_grouped_state(&self) -> Self::Grouped {
        GroupedSumAndCountState::default()
    }
}

/// Writes a [`SumAndCountState`] as one row of a nullable `Struct<sum, count>` column.
#[derive(Debug, Default, Clone, Copy)]
pub struct SumAndCountStateSerializer;

impl SumAndCountStateSerializer {
    fn fields() -> Fields {
        Fields::from(vec![
            Field::new("sum", DataType::Float64, false),
            Field::new("count", DataType::Int64, false),
        ])
    }

    fn mismatch(&self, actual: &str) -> StateError {
        StateError::CarrierTypeMismatch {
            expected: self.carrier_type(),
            actual: actual.to_owned(),
        }
    }
}

impl StateSerializer for SumAndCountStateSerializer {
    type State = SumAndCountState;

    fn shape(&self) -> ShapeId {
        ShapeId::new("sum_count", SUM_COUNT_VERSION)
    }

    fn carrier_type(&self) -> DataType {
        DataType::Struct(Self::fields())
    }

    fn serialize(&self, state: &Self::State, out: &mut dyn ArrayBuilder) -> Result<()> {
        let carrier_type = self.carrier_type();
        let out = downcast_builder::<StructBuilder>(out, &carrier_type)?;
        // Check both children before touching either so a failure appends nothing
        if out.num_fields() != 2
            || out.field_builder::<Float64Builder>(0).is_none()
            || out.field_builder::<Int64Builder>(1).is_none()
        {
            return Err(self.mismatch("struct builder with different children"));
        }
        // Struct children must stay aligned with the parent, so null rows still get
        // placeholder child values
        let (sum, count) = state.value().unwrap_or_default();
        if let Some(sums) = out.field_builder::<Float64Builder>(0) {
            sums.append_value(sum);
        }
        if let Some(counts) = out.field_builder::<Int64Builder>(1) {
            counts.append_value(count);
        }
        out.append(!state.is_null);
        Ok(())
    }

    fn deserialize(
        &self,
        input: &dyn Array,
        position: usize,
        state: &mut Self::State,
    ) -> Result<()> {
        let input = downcast_array::<StructArray>(input, position, &self.carrier_type())?;
        if input.num_columns() != 2 {
            return Err(self.mismatch(&input.data_type().to_string()));
        }
        if input.is_null(position) {
            state.reset();
            return Ok(());
        }
        let sums = input
            .column(0)
            .as_primitive_opt::<Float64Type>()
            .ok_or_else(|| self.mismatch(&input.data_type().to_string()))?;
        let counts = input
            .column(1)
            .as_primitive_opt::<Int64Type>()
            .ok_or_else(|| self.mismatch(&input.data_type().to_string()))?;
        *state = SumAndCountState::new(sums.value(position), counts.value(position));
        Ok(())
    }
}
