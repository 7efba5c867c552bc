//! The aggregate-function contract the combiner calls into, the sample functions built
//! on it, and parsing of aggregation configuration strings.
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
    factory::StateFactory,
    manager::{GroupedAggregate, StateManager},
    serializer::StateSerializer,
    state::AccumulatorState,
};
use arrow::{
    array::{ArrayBuilder, ArrowPrimitiveType},
    datatypes::{DataType, Float64Type, Int64Type},
};
use regex::Regex;
use std::fmt::{Debug, Display};

mod avg;
mod mode;
mod numeric;

pub use avg::Avg;
pub use mode::Mode;
pub use numeric::{Max, Sum};

pub const AGGREGATE_REGEX: &str = r"^\s*(\w+)\((\w+)\)\s*$";

/// One aggregate function: how raw rows fold into its state, how two partial states
/// combine, and how a final state is evaluated.
///
/// [`combine`](AggregateFunction::combine) must be associative and commutative, since
/// partial states arrive from exchanges and spills in no particular order.
pub trait AggregateFunction: Debug + Send + Sync + 'static {
    /// Arrow type of the raw input column.
    type Input: ArrowPrimitiveType;
    type State: AccumulatorState;
    type Factory: StateFactory<State = Self::State>;
    type Serializer: StateSerializer<State = Self::State>;

    fn name(&self) -> &'static str;

    fn factory(&self) -> &Self::Factory;

    fn serializer(&self) -> &Self::Serializer;

    /// Arrow type of the final value.
    fn output_type(&self) -> DataType;

    /// Fold one non-null input value into `state`.
    fn accumulate(&self, state: &mut Self::State, value: InputOf<Self>);

    /// Merge `incoming` into `existing`. An absent `existing` adopts `incoming`; an
    /// absent `incoming` leaves `existing` unchanged.
    fn combine(&self, existing: &mut Self::State, incoming: &Self::State);

    /// Append the final value for `state` to `out`, a builder of
    /// [`output_type`](AggregateFunction::output_type).
    ///
    /// # Errors
    /// If `out` is not a builder of the output type.
    fn evaluate_final(&self, state: &Self::State, out: &mut dyn ArrayBuilder) -> Result<()>;

    fn create_state(&self) -> Self::State {
        self.factory().create_single_state()
    }
}

/// Native type of an aggregate function's input values.
pub type InputOf<F> = <<F as AggregateFunction>::Input as ArrowPrimitiveType>::Native;
/// State type of an aggregate function.
pub type StateOf<F> = <F as AggregateFunction>::State;

/// Supported aggregation operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Sum,
    Max,
    Avg,
    Mode,
}

impl AggOp {
    /// Create the grouped combiner for this operation over an input column of `input_type`.
    ///
    /// # Errors
    /// [`StateError::InvalidConfig`] if the operation does not accept `input_type`.
    pub fn create_aggregate(self, input_type: &DataType) -> Result<Box<dyn GroupedAggregate>> {
        let aggregate: Box<dyn GroupedAggregate> = match (self, input_type) {
            (Self::Sum, DataType::Float64) => {
                Box::new(StateManager::new(Sum::<Float64Type>::new()))
            }
            (Self::Sum, DataType::Int64) => Box::new(StateManager::new(Sum::<Int64Type>::new())),
            (Self::Max, DataType::Float64) => {
                Box::new(StateManager::new(Max::<Float64Type>::new()))
            }
            (Self::Max, DataType::Int64) => Box::new(StateManager::new(Max::<Int64Type>::new())),
            (Self::Avg, DataType::Float64) => Box::new(StateManager::new(Avg::new())),
            (Self::Mode, DataType::Int64) => Box::new(StateManager::new(Mode::new())),
            (op, _) => {
                return Err(StateError::InvalidConfig(format!(
                    "aggregation {op} does not support input type {input_type}"
                )));
            }
        };
        Ok(aggregate)
    }
}

impl Display for AggOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Avg => "avg",
            Self::Mode => "mode",
        })
    }
}

impl TryFrom<&str> for AggOp {
    type Error = StateError;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "max" => Ok(Self::Max),
            "avg" => Ok(Self::Avg),
            "mode" => Ok(Self::Mode),
            _ => Err(StateError::InvalidConfig(format!(
                "Aggregation operator {value} not recognised"
            ))),
        }
    }
}

/// Aggregation of one input column. Consists of a column name and operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateExpr {
    pub column: String,
    pub op: AggOp,
}

impl AggregateExpr {
    #[must_use]
    pub fn new(column: impl Into<String>, op: AggOp) -> Self {
        Self {
            column: column.into(),
            op,
        }
    }

    /// Name of the carrier and output columns produced for this aggregation.
    #[must_use]
    pub fn output_name(&self) -> String {
        format!("{}({})", self.op, self.column)
    }

    /// Parse a comma separated list of `op(column)` aggregations, e.g.
    /// `"sum(price), avg(price)"`.
    ///
    /// # Errors
    /// [`StateError::InvalidConfig`] if an entry is not of the form `op(column)`, names an
    /// unknown operation, or the list is empty.
    pub fn parse_config(config: &str) -> Result<Vec<Self>> {
        let matcher =
            Regex::new(AGGREGATE_REGEX).map_err(|e| StateError::InvalidConfig(e.to_string()))?;
        let aggregates = config
            .split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(|entry| {
                let captures = matcher.captures(entry).ok_or_else(|| {
                    StateError::InvalidConfig(format!(
                        "\"{}\" is not an aggregation of the form op(column)",
                        entry.trim()
                    ))
                })?;
                Ok(Self::new(&captures[2], AggOp::try_from(&captures[1])?))
            })
            .collect::<Result<Vec<_>>>()?;
        if aggregates.is_empty() {
            return Err(StateError::InvalidConfig(
                "no aggregations configured".to_owned(),
            ));
        }
        Ok(aggregates)
    }
}
