//! The per-shape codec between an [`AccumulatorState`] and one position of a carrier column.
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
    column::{ShapeId, check_carrier_field},
    error::{Result, StateError},
    state::AccumulatorState,
};
use arrow::{
    array::{Array, ArrayBuilder, make_builder},
    datatypes::{DataType, Field},
};
use std::fmt::Debug;

/// Converts one state shape to and from one row of a carrier column.
///
/// The carrier type returned by [`carrier_type`](StateSerializer::carrier_type) must be
/// exactly what [`serialize`](StateSerializer::serialize) writes and
/// [`deserialize`](StateSerializer::deserialize) reads, and must not change while a
/// query runs.
pub trait StateSerializer: Debug + Send + Sync {
    type State: AccumulatorState;

    /// Shape name and format version written into carrier field metadata.
    fn shape(&self) -> ShapeId;

    /// The Arrow type of the carrier column.
    fn carrier_type(&self) -> DataType;

    /// Append exactly one row for `state` to `out`: a null if the state is absent,
    /// otherwise its payload. Nothing is appended if an error is returned.
    ///
    /// # Errors
    /// If `out` is not a builder for the carrier type.
    fn serialize(&self, state: &Self::State, out: &mut dyn ArrayBuilder) -> Result<()>;

    /// Overwrite `state` with the value at `position` of `input`. A null position
    /// leaves `state` absent whatever it held before.
    ///
    /// # Errors
    /// If `input` is not of the carrier type, `position` is out of range, or the
    /// stored value cannot be decoded.
    fn deserialize(&self, input: &dyn Array, position: usize, state: &mut Self::State)
    -> Result<()>;

    /// A builder of the carrier type.
    fn new_builder(&self, capacity: usize) -> Box<dyn ArrayBuilder> {
        make_builder(&self.carrier_type(), capacity)
    }

    /// A nullable carrier field tagged with this serializer's shape.
    fn carrier_field(&self, name: &str) -> Field {
        Field::new(name, self.carrier_type(), true).with_metadata(self.shape().to_metadata())
    }

    /// Check the column a serializer is about to be bound to. Called once at operator setup.
    ///
    /// # Errors
    /// [`StateError::CarrierTypeMismatch`] if the field type differs from the carrier type.
    fn check_bound_field(&self, field: &Field) -> Result<()> {
        let carrier_type = self.carrier_type();
        if field.data_type() == &carrier_type {
            Ok(())
        } else {
            Err(StateError::CarrierTypeMismatch {
                expected: carrier_type,
                actual: field.data_type().to_string(),
            })
        }
    }

    /// Check a carrier field received from another node or read from a spill.
    ///
    /// # Errors
    /// [`StateError::ShapeMismatch`] if shape, version or type differ.
    fn check_received_field(&self, field: &Field) -> Result<()> {
        check_carrier_field(field, &self.carrier_type(), &self.shape())
    }
}
