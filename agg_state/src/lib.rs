//! The `agg_state` crate holds the partial state of grouped SQL aggregation and moves it
//! across exchange and spill boundaries.
//!
//! Each aggregate function keeps one [`AccumulatorState`] per group in dense grouped
//! storage. At a stage boundary, or when memory runs short, a [`StateManager`] writes
//! every group's state into one Arrow carrier column through the shape's
//! [`StateSerializer`]. The receiving side reads each row back into a scratch state and
//! combines it into the state already held for that group.
//!
//! [`HashAggregator`] puts this together as a grouping operator that can hand its
//! state to another operator and spill it to disk under memory pressure.
//!
//! # Examples
//! ```
//! # use agg_state::{AggregateExpr, AggregatorConfigBuilder, HashAggregator};
//! # use arrow::array::{Float64Array, Int64Array};
//! # use arrow::record_batch::RecordBatch;
//! # use arrow::datatypes::{DataType, Field, Schema};
//! # use std::sync::Arc;
//! # fn main() -> Result<(), agg_state::StateError> {
//! let schema = Arc::new(Schema::new(vec![
//!     Field::new("id", DataType::Int64, true),
//!     Field::new("price", DataType::Float64, true),
//! ]));
//! let config = AggregatorConfigBuilder::new()
//!     .key_column("id")
//!     .aggregates(AggregateExpr::parse_config("sum(price), avg(price)")?)
//!     .build()?;
//! let batch = RecordBatch::try_new(
//!     schema.clone(),
//!     vec![
//!         Arc::new(Int64Array::from(vec![1, 2, 1])),
//!         Arc::new(Float64Array::from(vec![1.0, 5.0, 3.0])),
//!     ],
//! )?;
//!
//! let mut partial = HashAggregator::try_new(config.clone(), &schema)?;
//! partial.update(&batch)?;
//! let mut last = HashAggregator::try_new(config, &schema)?;
//! last.merge(&partial.emit_state()?)?;
//! let result = last.finish()?;
//! assert_eq!(result.num_rows(), 2);
//! # Ok(())
//! # }
//! ```
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
pub mod accumulator;
mod aggregator;
pub mod codec;
pub mod column;
mod config;
mod error;
pub mod factory;
pub mod functions;
mod grouping;
pub mod manager;
pub mod null_state;
pub mod serializer;
pub mod shapes;
pub mod spill;
pub mod state;

pub use accumulator::{StateAccumulator, StateGroupsAccumulator};
pub use aggregator::HashAggregator;
pub use codec::{StateStreamReader, decode_state_batches, encode_state_batch};
pub use column::ShapeId;
pub use config::{AggregatorConfig, AggregatorConfigBuilder, DEFAULT_BATCH_SIZE};
pub use error::{Result, StateError};
pub use factory::StateFactory;
pub use functions::{AggOp, AggregateExpr, AggregateFunction};
pub use grouping::GroupKeyIndex;
pub use manager::{GroupedAggregate, StateManager};
pub use serializer::StateSerializer;
pub use spill::SpillManager;
pub use state::{AccumulatorState, GroupedState};
