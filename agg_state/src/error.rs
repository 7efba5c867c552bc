//! Error type for state serialization, merge and spill.
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
use arrow::{datatypes::DataType, error::ArrowError};
use datafusion::error::DataFusionError;
use thiserror::Error;

/// Errors raised while producing, shipping, spilling or merging accumulator state.
#[derive(Debug, Error)]
pub enum StateError {
    /// A serializer was bound to, or handed, a column of the wrong type.
    #[error("carrier type mismatch: serializer uses {expected} but column is {actual}")]
    CarrierTypeMismatch { expected: DataType, actual: String },
    /// A carrier vector or state frame could not be decoded.
    #[error("corrupt state data: {0}")]
    DataCorruption(String),
    /// The sender used a different state shape or format version.
    #[error("state shape mismatch: {0}")]
    ShapeMismatch(String),
    /// Memory or spill space ran out.
    #[error("resources exhausted: {0}")]
    ResourceExhausted(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Arrow(#[from] ArrowError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = StateError> = std::result::Result<T, E>;

impl From<StateError> for DataFusionError {
    fn from(value: StateError) -> Self {
        match value {
            StateError::Arrow(e) => e.into(),
            StateError::Io(e) => e.into(),
            StateError::ResourceExhausted(msg) => DataFusionError::ResourcesExhausted(msg),
            other => DataFusionError::External(Box::new(other)),
        }
    }
}

/// Build a [`StateError::DataCorruption`] from a format string.
macro_rules! corrupt_err {
    ($($arg:tt)*) => {
        Err($crate::error::StateError::DataCorruption(format!($($arg)*)))
    };
}

/// Build a [`StateError::ShapeMismatch`] from a format string.
macro_rules! shape_err {
    ($($arg:tt)*) => {
        Err($crate::error::StateError::ShapeMismatch(format!($($arg)*)))
    };
}

pub(crate) use corrupt_err;
pub(crate) use shape_err;
