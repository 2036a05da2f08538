//! Log records and their one-line text encoding.
//!
//! ```text
//! table <btree|hash> <table>
//! start <client>
//! commit <client>
//! checkpoint [<client> ...]
//! <insert|update|delete> <client> <table> <key> <old> <new>
//! ```

use std::fmt;
use std::str::FromStr;

use mossdb_common::types::{Action, ClientId, Key, TableType, Value};

use crate::error::{RecoveryError, RecoveryResult};

const TABLE_TOKEN: &str = "table";
const START_TOKEN: &str = "start";
const COMMIT_TOKEN: &str = "commit";
const CHECKPOINT_TOKEN: &str = "checkpoint";

/// A single row-level change made by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditLog {
    pub client_id: ClientId,
    pub table: String,
    pub action: Action,
    pub key: Key,
    pub old_value: Value,
    pub new_value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A table was created.
    Table { table_type: TableType, table: String },
    Edit(EditLog),
    /// A client began a transaction.
    Start(ClientId),
    /// A client's transaction committed.
    Commit(ClientId),
    /// A checkpoint was taken while these clients had uncommitted edits.
    Checkpoint(Vec<ClientId>),
}

impl LogRecord {
    pub fn client_id(&self) -> Option<ClientId> {
        match self {
            LogRecord::Edit(edit) => Some(edit.client_id),
            LogRecord::Start(id) | LogRecord::Commit(id) => Some(*id),
            LogRecord::Table { .. } | LogRecord::Checkpoint(_) => None,
        }
    }
}

/// Returns true if `name` survives the whitespace-delimited encoding.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(char::is_whitespace)
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRecord::Table { table_type, table } => {
                write!(f, "{TABLE_TOKEN} {table_type} {table}")
            }
            LogRecord::Edit(edit) => write!(
                f,
                "{} {} {} {} {} {}",
                edit.action, edit.client_id, edit.table, edit.key, edit.old_value, edit.new_value
            ),
            LogRecord::Start(id) => write!(f, "{START_TOKEN} {id}"),
            LogRecord::Commit(id) => write!(f, "{COMMIT_TOKEN} {id}"),
            LogRecord::Checkpoint(ids) => {
                f.write_str(CHECKPOINT_TOKEN)?;
                for id in ids {
                    write!(f, " {id}")?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for LogRecord {
    type Err = RecoveryError;

    fn from_str(line: &str) -> RecoveryResult<Self> {
        let malformed = |reason: String| RecoveryError::Serialization {
            line: line.to_string(),
            reason,
        };
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&head, args)) = tokens.split_first() else {
            return Err(malformed("empty record".to_string()));
        };
        let expect_args = |n: usize| {
            if args.len() == n {
                Ok(())
            } else {
                Err(malformed(format!(
                    "expected {n} arguments after {head:?}, found {}",
                    args.len()
                )))
            }
        };
        let client = |token: &str| {
            ClientId::parse_str(token)
                .map_err(|e| malformed(format!("invalid client id {token:?}: {e}")))
        };
        let number = |token: &str| {
            token
                .parse::<i64>()
                .map_err(|e| malformed(format!("invalid number {token:?}: {e}")))
        };

        match head {
            TABLE_TOKEN => {
                expect_args(2)?;
                let table_type = TableType::from_str(args[0])
                    .map_err(|_| malformed(format!("unknown table type {:?}", args[0])))?;
                Ok(LogRecord::Table {
                    table_type,
                    table: args[1].to_string(),
                })
            }
            START_TOKEN => {
                expect_args(1)?;
                Ok(LogRecord::Start(client(args[0])?))
            }
            COMMIT_TOKEN => {
                expect_args(1)?;
                Ok(LogRecord::Commit(client(args[0])?))
            }
            CHECKPOINT_TOKEN => Ok(LogRecord::Checkpoint(
                args.iter()
                    .copied()
                    .map(&client)
                    .collect::<RecoveryResult<_>>()?,
            )),
            action => {
                let action = Action::from_str(action)
                    .map_err(|_| malformed(format!("unknown record type {action:?}")))?;
                expect_args(5)?;
                Ok(LogRecord::Edit(EditLog {
                    client_id: client(args[0])?,
                    table: args[1].to_string(),
                    action,
                    key: number(args[2])?,
                    old_value: number(args[3])?,
                    new_value: number(args[4])?,
                }))
            }
        }
    }
}
