//! The single nullable scalar state shape, e.g. the running value of `sum` or `max`.
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
        Array, ArrayBuilder, ArrowNativeTypeOp, ArrowPrimitiveType, PrimitiveArray,
        PrimitiveBuilder,
    },
    datatypes::{DataType, Float64Type, Int64Type},
};
use std::{fmt::Debug, marker::PhantomData};

/// Format version of the nullable scalar carrier.
const NULLABLE_VERSION: u32 = 1;

/// A single value that may be absent.
pub struct NullableState<T: ArrowPrimitiveType> {
    is_null: bool,
    value: T::Native,
}

pub type NullableDoubleState = NullableState<Float64Type>;
pub type NullableLongState = NullableState<Int64Type>;

impl<T: ArrowPrimitiveType> NullableState<T> {
    #[must_use]
    pub fn present(value: T::Native) -> Self {
        Self {
            is_null: false,
            value,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.is_null
    }

    /// The payload, if present.
    #[must_use]
    pub fn value(&self) -> Option<T::Native> {
        (!self.is_null).then_some(self.value)
    }

    pub fn set_value(&mut self, value: T::Native) {
        self.is_null = false;
        self.value = value;
    }

    /// Apply `op` to the current value and `other`, or adopt `other` if absent.
    pub fn update_with(
        &mut self,
        other: T::Native,
        op: impl FnOnce(T::Native, T::Native) -> T::Native,
    ) {
        if self.is_null {
            self.set_value(other);
        } else {
            self.value = op(self.value, other);
        }
    }

    /// Combine with another partial state. An absent `incoming` changes nothing; an
    /// absent `self` adopts `incoming`.
    pub fn merge_with(
        &mut self,
        incoming: &Self,
        op: impl FnOnce(T::Native, T::Native) -> T::Native,
    ) {
        if let Some(other) = incoming.value() {
            self.update_with(other, op);
        }
    }
}

impl<T: ArrowPrimitiveType> From<Option<T::Native>> for NullableState<T> {
    fn from(value: Option<T::Native>) -> Self {
        value.map_or_else(Self::default, Self::present)
    }
}

impl<T: ArrowPrimitiveType> Default for NullableState<T> {
    fn default() -> Self {
        Self {
            is_null: true,
            value: T::Native::default(),
        }
    }
}

impl<T: ArrowPrimitiveType> Clone for NullableState<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ArrowPrimitiveType> Copy for NullableState<T> {}

impl<T: ArrowPrimitiveType> Debug for NullableState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullableState")
            .field("is_null", &self.is_null)
            .field("value", &self.value())
            .finish()
    }
}

/// Floating point payloads compare bit for bit.
impl<T: ArrowPrimitiveType> PartialEq for NullableState<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self.value(), other.value()) {
            (None, None) => true,
            (Some(a), Some(b)) => a.is_eq(b),
            _ => false,
        }
    }
}

impl<T: ArrowPrimitiveType> AccumulatorState for NullableState<T> {
    fn is_absent(&self) -> bool {
        self.is_null
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Struct-of-arrays storage: one value array and the shared seen bitmap.
pub struct GroupedNullableState<T: ArrowPrimitiveType> {
    values: Vec<T::Native>,
    seen: SeenGroups,
}

impl<T: ArrowPrimitiveType> GroupedNullableState<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            seen: SeenGroups::new(),
        }
    }

    fn load(&self, group_index: usize) -> NullableState<T> {
        if self.seen.is_seen(group_index) {
            NullableState::present(self.values[group_index])
        } else {
            NullableState::default()
        }
    }

    fn store(&mut self, group_index: usize, state: &NullableState<T>) {
        self.seen.set_seen(group_index, !state.is_null);
        self.values[group_index] = state.value().unwrap_or_default();
    }
}

impl<T: ArrowPrimitiveType> Default for GroupedNullableState<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ArrowPrimitiveType> Debug for GroupedNullableState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupedNullableState")
            .field("data_type", &T::DATA_TYPE)
            .field("num_groups", &self.values.len())
            .finish()
    }
}

impl<T: ArrowPrimitiveType> GroupedState for GroupedNullableState<T> {
    type State = NullableState<T>;

    fn num_groups(&self) -> usize {
        self.values.len()
    }

    fn ensure_groups(&mut self, total_num_groups: usize) {
        grow_to(&mut self.values, total_num_groups, T::Native::default());
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
        self.values.drain(..n);
        self.seen.remove_front(n);
    }

    fn clear(&mut self) {
        self.values = Vec::new();
        self.seen.clear();
    }

    fn size(&self) -> usize {
        self.values.capacity() * size_of::<T::Native>() + self.seen.size()
    }
}

pub struct NullableStateFactory<T: ArrowPrimitiveType> {
    _p: PhantomData<fn() -> T>,
}

impl<T: ArrowPrimitiveType> NullableStateFactory<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { _p: PhantomData }
    }
}

impl<T: ArrowPrimitiveType> Default for NullableStateFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ArrowPrimitiveType> Debug for NullableStateFactory<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NullableStateFactory<{}>", T::DATA_TYPE)
    }
}

impl<T: ArrowPrimitiveType> StateFactory for NullableStateFactory<T> {
    type State = NullableState<T>;
    type Grouped = GroupedNullableState<T>;

    fn create_grouped_state(&self) -> Self::Grouped {
        GroupedNullableState::new()
    }
}

/// Writes a [`NullableState`] as one nullable primitive value.
///
/// The carrier type defaults to `T::DATA_TYPE` but may be any type with the same
/// physical layout, such as a timestamp with a time zone.
pub struct NullableStateSerializer<T: ArrowPrimitiveType> {
    data_type: DataType,
    _p: PhantomData<fn() -> T>,
}

impl<T: ArrowPrimitiveType> NullableStateSerializer<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data_type: T::DATA_TYPE,
            _p: PhantomData,
        }
    }

    /// Use `data_type` as the carrier type.
    ///
    /// # Errors
    /// If `data_type` is not physically a `T`.
    pub fn try_with_type(data_type: DataType) -> Result<Self> {
        if PrimitiveArray::<T>::is_compatible(&data_type) {
            Ok(Self {
                data_type,
                _p: PhantomData,
            })
        } else {
            Err(StateError::CarrierTypeMismatch {
                expected: T::DATA_TYPE,
                actual: data_type.to_string(),
            })
        }
    }
}

impl<T: ArrowPrimitiveType> Default for NullableStateSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ArrowPrimitiveType> Debug for NullableStateSerializer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullableStateSerializer")
            .field("data_type", &self.data_type)
            .finish()
    }
}

impl<T: ArrowPrimitiveType> StateSerializer for NullableStateSerializer<T> {
    type State = NullableState<T>;

    fn shape(&self) -> ShapeId {
        ShapeId::new(
            format!("nullable_{}", T::DATA_TYPE.to_string().to_lowercase()),
            NULLABLE_VERSION,
        )
    }

    fn carrier_type(&self) -> DataType {
        self.data_type.clone()
    }

    fn serialize(&self, state: &Self::State, out: &mut dyn ArrayBuilder) -> Result<()> {
        let out = downcast_builder::<PrimitiveBuilder<T>>(out, &self.data_type)?;
        match state.value() {
            Some(value) => out.append_value(value),
            None => out.append_null(),
        }
        Ok(())
    }

    fn deserialize(
        &self,
        input: &dyn Array,
        position: usize,
        state: &mut Self::State,
    ) -> Result<()> {
        let input = downcast_array::<PrimitiveArray<T>>(input, position, &self.data_type)?;
        if input.is_null(position) {
            state.reset();
        } else {
            state.set_value(input.value(position));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::{
        array::{ArrayRef, Float64Array, Int64Builder},
        datatypes::{TimeUnit, TimestampMillisecondType},
    };

    fn serialize_all<S: StateSerializer>(serializer: &S, states: &[S::State]) -> ArrayRef {
        let mut builder = serializer.new_builder(states.len());
        for state in states {
            serializer.serialize(state, builder.as_mut()).unwrap();
        }
        builder.finish()
    }

    #[test]
    fn should_write_null_and_value_rows() {
        // Given
        let serializer = NullableStateSerializer::<Float64Type>::new();
        let states = [NullableDoubleState::default(), NullableDoubleState::present(3.5)];

        // When
        let carrier = serialize_all(&serializer, &states);

        // Then
        assert_eq!(carrier.data_type(), &DataType::Float64);
        let expected = Float64Array::from(vec![None, Some(3.5)]);
        assert_eq!(carrier.as_any().downcast_ref::<Float64Array>(), Some(&expected));
    }

    #[test]
    fn should_read_back_into_fresh_states() {
        // Given
        let serializer = NullableStateSerializer::<Float64Type>::new();
        let carrier = serialize_all(
            &serializer,
            &[NullableDoubleState::default(), NullableDoubleState::present(3.5)],
        );
        let mut g0 = NullableDoubleState::default();
        let mut g1 = NullableDoubleState::default();

        // When
        serializer.deserialize(&carrier, 0, &mut g0).unwrap();
        serializer.deserialize(&carrier, 1, &mut g1).unwrap();

        // Then
        assert!(g0.is_null());
        assert!(!g1.is_null());
        assert_eq!(g1.value(), Some(3.5));
    }

    #[test]
    fn should_reset_present_target_on_null_row() {
        // Given
        let serializer = NullableStateSerializer::<Int64Type>::new();
        let carrier = serialize_all(&serializer, &[NullableLongState::default()]);
        let mut target = NullableLongState::present(42);

        // When
        serializer.deserialize(&carrier, 0, &mut target).unwrap();

        // Then
        assert!(target.is_absent());
        assert_eq!(target.value(), None);
        assert_eq!(target, NullableLongState::default());
    }

    #[test]
    fn should_keep_float_bits_exactly() {
        // Given
        let serializer = NullableStateSerializer::<Float64Type>::new();
        let payloads = [
            -0.0,
            f64::from_bits(0x7ff8_0000_0000_0001),
            f64::MIN_POSITIVE / 2.0,
            f64::INFINITY,
        ];
        let states = payloads.map(NullableDoubleState::present);
        let carrier = serialize_all(&serializer, &states);

        for (position, expected) in payloads.iter().enumerate() {
            // When
            let mut state = NullableDoubleState::default();
            serializer.deserialize(&carrier, position, &mut state).unwrap();

            // Then
            assert_eq!(state.value().map(f64::to_bits), Some(expected.to_bits()));
        }
    }

    #[test]
    fn should_distinguish_signed_zeros() {
        assert_ne!(
            NullableDoubleState::present(0.0),
            NullableDoubleState::present(-0.0)
        );
    }

    #[test]
    fn should_write_identical_rows_when_serialized_twice() {
        let serializer = NullableStateSerializer::<Int64Type>::new();
        let states = [NullableLongState::present(7), NullableLongState::default()];
        assert_eq!(
            serialize_all(&serializer, &states).to_data(),
            serialize_all(&serializer, &states).to_data()
        );
    }

    #[test]
    fn should_reject_builder_of_other_type() {
        // Given
        let serializer = NullableStateSerializer::<Float64Type>::new();
        let mut builder = Int64Builder::new();

        // When
        let result = serializer.serialize(&NullableDoubleState::present(1.0), &mut builder);

        // Then
        assert!(matches!(result, Err(StateError::CarrierTypeMismatch { .. })));
        assert_eq!(builder.len(), 0);
    }

    #[test]
    fn should_reject_array_of_other_type() {
        let serializer = NullableStateSerializer::<Int64Type>::new();
        let carrier = Float64Array::from(vec![1.0]);
        let mut state = NullableLongState::default();
        assert!(matches!(
            serializer.deserialize(&carrier, 0, &mut state),
            Err(StateError::CarrierTypeMismatch { .. })
        ));
    }

    #[test]
    fn should_accept_compatible_type_override() -> Result<()> {
        // Given
        let zoned = DataType::Timestamp(TimeUnit::Millisecond, Some("+01:00".into()));
        let serializer =
            NullableStateSerializer::<TimestampMillisecondType>::try_with_type(zoned.clone())?;

        // When
        let carrier = serialize_all(&serializer, &[NullableState::present(1_000)]);

        // Then
        assert_eq!(serializer.carrier_type(), zoned);
        let mut state = NullableState::<TimestampMillisecondType>::default();
        serializer.deserialize(&carrier, 0, &mut state)?;
        assert_eq!(state.value(), Some(1_000));
        Ok(())
    }

    #[test]
    fn should_refuse_incompatible_type_override() {
        assert!(matches!(
            NullableStateSerializer::<Int64Type>::try_with_type(DataType::Utf8),
            Err(StateError::CarrierTypeMismatch { .. })
        ));
    }

    #[test]
    fn should_name_shape_after_primitive_type() {
        let shape = NullableStateSerializer::<Float64Type>::new().shape();
        assert_eq!(shape, ShapeId::new("nullable_float64", 1));
    }

    #[test]
    fn should_initialise_grown_groups_absent() {
        // Given
        let mut grouped = NullableStateFactory::<Int64Type>::new().create_grouped_state();

        // When
        grouped.ensure_groups(2);
        grouped.modify(1, |s| s.set_value(9));
        grouped.ensure_groups(5);

        // Then
        assert_eq!(grouped.num_groups(), 5);
        assert!(grouped.read(0, NullableLongState::is_absent));
        assert_eq!(grouped.read(1, NullableLongState::value), Some(9));
        assert!(grouped.read(4, NullableLongState::is_absent));
    }

    #[test]
    fn should_renumber_groups_after_remove_front() {
        // Given
        let mut grouped = GroupedNullableState::<Int64Type>::new();
        grouped.ensure_groups(3);
        grouped.modify(0, |s| s.set_value(1));
        grouped.modify(2, |s| s.set_value(3));

        // When
        grouped.remove_front(2);

        // Then
        assert_eq!(grouped.num_groups(), 1);
        assert_eq!(grouped.read(0, NullableLongState::value), Some(3));
    }

    #[test]
    fn should_store_absence_written_through_modify() {
        let mut grouped = GroupedNullableState::<Float64Type>::new();
        grouped.ensure_groups(1);
        grouped.modify(0, |s| s.set_value(2.0));
        grouped.modify(0, AccumulatorState::reset);
        assert!(grouped.read(0, NullableDoubleState::is_absent));
    }

    #[test]
    fn should_adopt_incoming_when_absent_and_ignore_absent_incoming() {
        // Given
        let mut existing = NullableLongState::default();

        // When
        existing.merge_with(&NullableLongState::present(4), |a, b| a + b);
        existing.merge_with(&NullableLongState::default(), |a, b| a + b);

        // Then
        assert_eq!(existing.value(), Some(4));
    }
}
