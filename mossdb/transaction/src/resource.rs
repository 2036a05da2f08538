use std::fmt;

use mossdb_common::types::Key;
use strum::Display;

/// A uniquely lockable unit: one key of one table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Resource {
    table: String,
    key: Key,
}

impl Resource {
    pub fn new(table: impl Into<String>, key: Key) -> Self {
        Self {
            table: table.into(),
            key,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key(&self) -> Key {
        self.key
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.table, self.key)
    }
}

/// Lock mode held on a [`Resource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum LockType {
    /// Shared; only conflicts with [`LockType::Write`].
    Read,
    /// Exclusive; conflicts with every other lock.
    Write,
}

impl LockType {
    /// Returns true if a lock of this type cannot be held alongside `other` by another
    /// transaction.
    pub fn conflicts_with(self, other: LockType) -> bool {
        self == LockType::Write || other == LockType::Write
    }
}
