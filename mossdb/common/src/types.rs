use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Identifies a connected client. Every client runs at most one transaction at a time, so the
/// client id doubles as the transaction id.
pub type ClientId = Uuid;

/// Entry key inside a table.
pub type Key = i64;

/// Entry value inside a table.
pub type Value = i64;

/// Kind of index backing a table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum TableType {
    BTree,
    Hash,
}

/// A row-level mutation recorded in the write-ahead log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum Action {
    Insert,
    Update,
    Delete,
}

impl Action {
    /// The action that reverts this one.
    pub fn inverse(self) -> Self {
        match self {
            Action::Insert => Action::Delete,
            Action::Update => Action::Update,
            Action::Delete => Action::Insert,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_table_type_tokens() {
        assert_eq!(TableType::BTree.to_string(), "btree");
        assert_eq!(TableType::from_str("hash").unwrap(), TableType::Hash);
        assert!(TableType::from_str("heap").is_err());
    }

    #[test]
    fn test_action_inverse() {
        assert_eq!(Action::Insert.inverse(), Action::Delete);
        assert_eq!(Action::Update.inverse(), Action::Update);
        assert_eq!(Action::Delete.inverse(), Action::Insert);
        assert_eq!(Action::from_str("delete").unwrap(), Action::Delete);
    }
}
