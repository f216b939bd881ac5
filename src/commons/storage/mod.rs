//! Persistent storage of data.
//!
//! Values are JSON documents addressed by a namespace, a scope within the
//! namespace and a key within the scope. Which backend holds the data is
//! selected by the scheme of the storage URI: `memory:` for process-local
//! stores and `local:` or `file:` for a directory on disk.

pub use self::store::{Error, KeyValueStore, StoreNewError, Transaction};

mod backends;
mod store;
