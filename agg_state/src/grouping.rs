//! Dense group id assignment for an Int64 grouping key.
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
use arrow::array::Int64Array;
use nohash::BuildNoHashHasher;
use std::collections::HashMap;

/// Maps each distinct key to the next free group id. A NULL key is one group of its own.
#[derive(Debug, Default)]
pub struct GroupKeyIndex {
    /// Key to group id, hashed by identity
    ids: HashMap<i64, usize, BuildNoHashHasher<i64>>,
    /// Key of each group, indexed by group id
    keys: Vec<Option<i64>>,
    null_group: Option<usize>,
}

impl GroupKeyIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn num_groups(&self) -> usize {
        self.keys.len()
    }

    /// Group id of every row of `keys`, assigning new ids to unseen keys. `group_indices`
    /// is cleared first.
    pub fn intern(&mut self, keys: &Int64Array, group_indices: &mut Vec<usize>) {
        group_indices.clear();
        group_indices.reserve(keys.len());
        for key in keys {
            let next_id = self.keys.len();
            let id = match key {
                Some(key) => *self.ids.entry(key).or_insert(next_id),
                None => *self.null_group.get_or_insert(next_id),
            };
            if id == next_id {
                self.keys.push(key);
            }
            group_indices.push(id);
        }
    }

    /// Keys of all groups in group id order.
    #[must_use]
    pub fn keys(&self) -> Int64Array {
        Int64Array::from(self.keys.clone())
    }

    /// Bytes held, not including `self`.
    #[must_use]
    pub fn size(&self) -> usize {
        self.ids.capacity() * (size_of::<i64>() + size_of::<usize>())
            + self.keys.capacity() * size_of::<Option<i64>>()
    }

    /// Forget every group.
    pub fn clear(&mut self) {
        self.ids = HashMap::default();
        self.keys = Vec::new();
        self.null_group = None;
    }
}
