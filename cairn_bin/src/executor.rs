//! Statement execution over the local store.

use std::fmt;

use crate::errors::QueryError;
use crate::parser::{self, Statement};
use crate::session::Session;
use crate::Db;

/// Outcome of one executed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteResult {
    Inserted,
    Updated,
    Deleted,
    Row { key: i32, value: String },
    TxStarted,
    TxCommitted,
    TxRolledBack,
}

impl fmt::Display for ExecuteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteResult::Inserted => write!(f, "inserted"),
            ExecuteResult::Updated => write!(f, "updated"),
            ExecuteResult::Deleted => write!(f, "deleted"),
            ExecuteResult::Row { key, value } => write!(f, "{key} | {value}"),
            ExecuteResult::TxStarted => write!(f, "transaction started"),
            ExecuteResult::TxCommitted => write!(f, "transaction committed"),
            ExecuteResult::TxRolledBack => write!(f, "transaction rolled back"),
        }
    }
}

/// Parses and executes one SQL string, binding mutations to the session's
/// transaction when one is active.
pub fn parse_and_execute(
    query: &str,
    db: &Db,
    session: &mut Session,
) -> Result<ExecuteResult, QueryError> {
    let statement = parser::parse(query)?;
    execute(&statement, db, session)
}

pub fn execute(
    statement: &Statement,
    db: &Db,
    session: &mut Session,
) -> Result<ExecuteResult, QueryError> {
    match statement {
        Statement::Insert(stmt) => {
            if let Some(tx) = session.transaction.as_mut() {
                tx.put_batch(&stmt.table_name, stmt.key, &stmt.value);
            } else {
                db.put(&stmt.table_name, stmt.key, &stmt.value)?;
            }
            Ok(ExecuteResult::Inserted)
        }
        Statement::Select(stmt) => match db.get(&stmt.table_name, stmt.key)? {
            Some(value) => Ok(ExecuteResult::Row {
                key: stmt.key,
                value,
            }),
            None => Err(QueryError::KeyNotFound {
                table: stmt.table_name.clone(),
                key: stmt.key,
            }),
        },
        Statement::Update(stmt) => {
            if let Some(tx) = session.transaction.as_mut() {
                tx.put_batch(&stmt.table_name, stmt.key, &stmt.value);
            } else {
                db.update(&stmt.table_name, stmt.key, &stmt.value)?;
            }
            Ok(ExecuteResult::Updated)
        }
        Statement::Delete(stmt) => {
            if let Some(tx) = session.transaction.as_mut() {
                tx.delete_batch(&stmt.table_name, stmt.key);
            } else {
                db.delete(&stmt.table_name, stmt.key)?;
            }
            Ok(ExecuteResult::Deleted)
        }
        Statement::Begin => {
            if session.transaction.is_some() {
                return Err(QueryError::TxAlreadyActive);
            }
            session.transaction = Some(db.begin_transaction());
            Ok(ExecuteResult::TxStarted)
        }
        Statement::Commit => {
            let mut tx = session.transaction.take().ok_or(QueryError::NoActiveTx)?;
            tx.commit()?;
            Ok(ExecuteResult::TxCommitted)
        }
        Statement::Rollback => {
            let mut tx = session.transaction.take().ok_or(QueryError::NoActiveTx)?;
            tx.rollback();
            Ok(ExecuteResult::TxRolledBack)
        }
    }
}
