//! The narrow contract this crate needs from Arrow columns: typed builders and arrays
//! reached through the declared carrier [`DataType`], plus the field metadata that tags a
//! carrier column with the state shape it holds.
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
use crate::error::{Result, StateError, corrupt_err, shape_err};
use arrow::{
    array::{Array, ArrayBuilder},
    datatypes::{DataType, Field},
};
use std::{collections::HashMap, fmt::Display};

/// Field metadata key naming the state shape stored in a carrier column.
pub const SHAPE_METADATA_KEY: &str = "agg_state.shape";
/// Field metadata key holding the format version of a carrier column.
pub const VERSION_METADATA_KEY: &str = "agg_state.version";

/// Identifies the physical layout of one state shape on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeId {
    pub name: String,
    pub version: u32,
}

impl ShapeId {
    #[must_use]
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Metadata to attach to a carrier [`Field`].
    #[must_use]
    pub fn to_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            (SHAPE_METADATA_KEY.to_owned(), self.name.clone()),
            (VERSION_METADATA_KEY.to_owned(), self.version.to_string()),
        ])
    }

    /// Read the shape tag back from a carrier field.
    ///
    /// # Errors
    /// If the field has no shape tag or the version is not a number.
    pub fn from_field(field: &Field) -> Result<Self> {
        let metadata = field.metadata();
        let Some(name) = metadata.get(SHAPE_METADATA_KEY) else {
            return shape_err!("column \"{}\" carries no state shape tag", field.name());
        };
        let Some(version) = metadata.get(VERSION_METADATA_KEY) else {
            return shape_err!("column \"{}\" carries no state version tag", field.name());
        };
        let version = version.parse::<u32>().map_err(|_| {
            StateError::ShapeMismatch(format!(
                "column \"{}\" has unreadable state version \"{version}\"",
                field.name()
            ))
        })?;
        Ok(Self::new(name.clone(), version))
    }
}

impl Display for ShapeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

/// Check a received carrier field against what the local serializer reads.
///
/// # Errors
/// [`StateError::ShapeMismatch`] if the shape tag, version or data type differ.
pub fn check_carrier_field(field: &Field, carrier_type: &DataType, shape: &ShapeId) -> Result<()> {
    let remote = ShapeId::from_field(field)?;
    if &remote != shape {
        return shape_err!(
            "column \"{}\" holds {remote} but this node reads {shape}",
            field.name()
        );
    }
    if field.data_type() != carrier_type {
        return shape_err!(
            "column \"{}\" has type {} but {shape} is carried as {carrier_type}",
            field.name(),
            field.data_type()
        );
    }
    Ok(())
}

/// Reach the concrete builder behind a carrier builder.
///
/// # Errors
/// [`StateError::CarrierTypeMismatch`] if the builder is not a `B`.
pub fn downcast_builder<'a, B: ArrayBuilder>(
    out: &'a mut dyn ArrayBuilder,
    carrier_type: &DataType,
) -> Result<&'a mut B> {
    out.as_any_mut()
        .downcast_mut::<B>()
        .ok_or_else(|| StateError::CarrierTypeMismatch {
            expected: carrier_type.clone(),
            actual: format!("builder {}", std::any::type_name::<B>()),
        })
}

/// Reach the concrete array behind a carrier column, checking `position` is inside it.
///
/// # Errors
/// [`StateError::CarrierTypeMismatch`] if the array is not an `A` and
/// [`StateError::DataCorruption`] if `position` is out of range.
pub fn downcast_array<'a, A: Array + 'static>(
    input: &'a dyn Array,
    position: usize,
    carrier_type: &DataType,
) -> Result<&'a A> {
    let array = input
        .as_any()
        .downcast_ref::<A>()
        .ok_or_else(|| StateError::CarrierTypeMismatch {
            expected: carrier_type.clone(),
            actual: input.data_type().to_string(),
        })?;
    if position >= array.len() {
        return corrupt_err!(
            "position {position} outside carrier column of length {}",
            array.len()
        );
    }
    Ok(array)
}
