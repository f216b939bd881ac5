//! Errors of the audit.

use std::{error, fmt};
use crate::commons::storage;


//------------ DaoError ------------------------------------------------------

/// Accessing the registry or a replica database failed.
#[derive(Debug)]
pub struct DaoError {
    context: String,
    cause: DaoErrorCause,
}

#[derive(Debug)]
enum DaoErrorCause {
    Store(storage::Error),
    Open(storage::StoreNewError),
    Other(String),
}

impl DaoError {
    pub fn store(context: impl Into<String>, err: storage::Error) -> Self {
        DaoError { context: context.into(), cause: DaoErrorCause::Store(err) }
    }

    pub fn open(
        context: impl Into<String>, err: storage::StoreNewError
    ) -> Self {
        DaoError { context: context.into(), cause: DaoErrorCause::Open(err) }
    }

    pub fn other(context: impl Into<String>, msg: impl fmt::Display) -> Self {
        DaoError {
            context: context.into(),
            cause: DaoErrorCause::Other(msg.to_string())
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

impl fmt::Display for DaoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.cause {
            DaoErrorCause::Store(err) => write!(f, "{}: {}", self.context, err),
            DaoErrorCause::Open(err) => write!(f, "{}: {}", self.context, err),
            DaoErrorCause::Other(msg) => write!(f, "{}: {}", self.context, msg),
        }
    }
}

impl error::Error for DaoError { }


//------------ AuditError ----------------------------------------------------

/// An audit pass could not be completed.
///
/// None of these are fatal for the audit thread. The pass is simply tried
/// again in the next cycle.
#[derive(Debug)]
pub enum AuditError {
    /// There were fewer than two registry entries to compare.
    InsufficientEntries {
        found: usize,
    },

    /// The auditing node has no registry entry of its own.
    NotRegistered,

    /// The registry or one of the databases could not be accessed.
    Transaction(DaoError),

    /// The pass was aborted while stopping.
    Interrupted,
}

impl AuditError {
    /// Returns whether this is the expected lack of peers.
    pub fn is_insufficient_entries(&self) -> bool {
        matches!(self, AuditError::InsufficientEntries { .. })
    }
}

impl From<DaoError> for AuditError {
    fn from(err: DaoError) -> Self {
        AuditError::Transaction(err)
    }
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuditError::InsufficientEntries { found: 0 } => {
                f.write_str("found no entries in the registry")
            }
            AuditError::InsufficientEntries { found } => {
                write!(
                    f, "found only {} entry in the registry, need at least 2",
                    found
                )
            }
            AuditError::NotRegistered => {
                f.write_str("no registry entry for this resource")
            }
            AuditError::Transaction(err) => err.fmt(f),
            AuditError::Interrupted => f.write_str("audit interrupted"),
        }
    }
}

impl error::Error for AuditError { }
