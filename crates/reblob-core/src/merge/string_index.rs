use std::collections::HashMap;

use crate::format::pbf::StringTable;
use crate::{ReblobError, Result};

/// Maps string values to their position in an output string table.
///
/// An index belongs to exactly one merge target. It is built from that
/// target's table on first use and dropped together with the target.
#[derive(Debug, Default, Clone)]
pub struct StringIndex {
    positions: HashMap<Vec<u8>, u32>,
}

impl StringIndex {
    /// Indexes every string of `table`. For duplicated values the first
    /// position wins.
    pub fn build(table: &StringTable) -> Result<Self> {
        let mut positions = HashMap::with_capacity(table.s.len());
        for (position, value) in table.s.iter().enumerate() {
            positions
                .entry(value.clone())
                .or_insert(to_position(position)?);
        }
        Ok(Self { positions })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, value: &[u8]) -> Option<u32> {
        self.positions.get(value).copied()
    }

    /// Returns the position of `value` in `table`, appending it first when the
    /// index does not know it yet.
    pub fn intern(&mut self, table: &mut StringTable, value: &[u8]) -> Result<u32> {
        if let Some(position) = self.get(value) {
            return Ok(position);
        }
        let position = to_position(table.s.len())?;
        table.s.push(value.to_vec());
        self.positions.insert(value.to_vec(), position);
        Ok(position)
    }

    /// Forgets `value`. Used when a string appended by [`intern`](Self::intern)
    /// is removed from the table again.
    pub fn forget(&mut self, value: &[u8]) {
        self.positions.remove(value);
    }
}

fn to_position(position: usize) -> Result<u32> {
    u32::try_from(position)
        .map_err(|_| ReblobError::format(format!("string table position {position} overflows")))
}
