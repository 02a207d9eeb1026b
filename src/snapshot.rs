//! The data model: item keys, field values, records, and snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An item key: an integer under a numeric-keyed schema, a string under a
/// string-keyed one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ItemKey {
    Number(i64),
    String(String),
}

/// One field's decoded value. Categorical values decode to their enum
/// string, or pass through as an integer when the wire value is not in the
/// schema's enum map (forward-compatibility, see design notes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Number(f64),
    Category(String),
    /// An enum integer with no matching schema entry — passed through
    /// unchanged rather than rejected.
    CategoryPassthrough(i64),
}

/// A record: the schema-ordered tuple of field values for one item in one
/// snapshot.
pub type Record = Vec<FieldValue>;

/// One timestamped row-set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: i64,
    /// Sorted ascending by key; no duplicates (both are push-time invariants
    /// enforced by the writer, not re-checked by the reader, which trusts
    /// the bytes it parses).
    pub items: Vec<(ItemKey, Record)>,
}

impl Snapshot {
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp, items: Vec::new() }
    }

    /// Validates ascending-unique key order; used by the writer's `push`.
    pub fn keys_sorted_unique(&self) -> bool {
        self.items.windows(2).all(|w| w[0].0 < w[1].0)
    }
}

/// Legacy-shaped row, returned by `Reader::get_all_snapshots`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyRecord {
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacySnapshot {
    pub timestamp: i64,
    pub items: BTreeMap<i64, LegacyRecord>,
}

/// Schema-shaped row, returned by `Reader::get_all_generic_snapshots`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericSnapshot {
    pub timestamp: i64,
    pub items: Vec<(ItemKey, std::collections::HashMap<String, FieldValue>)>,
}
