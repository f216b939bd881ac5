//! In-memory storage.
//!
//! All memory stores of a process live in one shared system. Stores opened
//! with the same URI and namespace see the same values, so `memory:` URIs
//! can stand in for a shared database within one process. The path of the
//! URI selects an independent location: `memory:a` and `memory:b` never
//! share data.

use std::{error, fmt};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use serde::ser::Serialize;
use serde_json::Value;
use url::Url;
use super::super::store::{
    Error as SuperError,
    Transaction as SuperTransaction
};


//------------ System --------------------------------------------------------

lazy_static! {
    static ref MEMORY: System = System::default();
}

/// All memory namespaces of the process, keyed by location and namespace.
#[derive(Debug, Default)]
struct System {
    namespaces: Mutex<HashMap<(String, String), Arc<MemoryNamespace>>>,
}

impl System {
    fn open(&self, location: &str, namespace: &str) -> Arc<MemoryNamespace> {
        let mut namespaces = self.namespaces.lock().expect("poisoned lock");
        namespaces.entry(
            (location.into(), namespace.into())
        ).or_default().clone()
    }
}


//------------ Store ---------------------------------------------------------

#[derive(Debug)]
pub struct Store {
    namespace: Arc<MemoryNamespace>,
}

impl Store {
    pub fn from_uri(
        uri: &Url, namespace: &str
    ) -> Result<Option<Self>, Error> {
        if uri.scheme() != "memory" {
            return Ok(None)
        }
        Ok(Some(Store { namespace: MEMORY.open(uri.path(), namespace) }))
    }

    pub fn execute<F, T>(
        &self, scope: &str, op: F
    ) -> Result<T, SuperError>
    where
        F: for<'a> FnOnce(&mut SuperTransaction<'a>) -> Result<T, SuperError>
    {
        let lock = self.namespace.get_lock(scope);
        let _lock = lock.lock().expect("poisoned lock");
        op(&mut SuperTransaction::from(Transaction {
            namespace: &self.namespace,
            scope,
        }))
    }
}


/// # Store-wide access
impl Store {
    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.namespace.scopes().values().all(BTreeMap::is_empty))
    }

    pub fn list_scopes(&self) -> Result<Vec<String>, Error> {
        Ok(
            self.namespace.scopes().iter().filter_map(|(name, values)| {
                (!values.is_empty()).then(|| name.clone())
            }).collect()
        )
    }

    pub fn wipe(&self) -> Result<(), Error> {
        self.namespace.scopes().clear();
        Ok(())
    }
}


//------------ Transaction ---------------------------------------------------

#[derive(Debug)]
pub struct Transaction<'a> {
    namespace: &'a MemoryNamespace,
    scope: &'a str,
}

/// # Reading
impl Transaction<'_> {
    pub fn has(&self, key: &str) -> Result<bool, Error> {
        Ok(
            self.namespace.scopes().get(self.scope).map(|values| {
                values.contains_key(key)
            }).unwrap_or(false)
        )
    }

    /// Returns the contents of the stored value with the given key.
    ///
    /// If the value does not exist, returns `Ok(None)`.
    pub fn get<T: DeserializeOwned>(
        &self, key: &str
    ) -> Result<Option<T>, Error> {
        let value = self.namespace.scopes().get(self.scope).and_then(|values| {
            values.get(key).cloned()
        });
        match value {
            Some(value) => {
                serde_json::from_value(value).map(Some).map_err(|err| {
                    Error::deserialize(self.scope, key, err)
                })
            }
            None => Ok(None)
        }
    }

    pub fn list_keys(&self) -> Result<Vec<String>, Error> {
        Ok(
            self.namespace.scopes().get(self.scope).map(|values| {
                values.keys().cloned().collect()
            }).unwrap_or_default()
        )
    }
}

/// # Writing
impl Transaction<'_> {
    pub fn store<T: Serialize>(
        &self, key: &str, value: &T
    ) -> Result<(), Error> {
        let value = serde_json::to_value(value).map_err(|err| {
            Error::serialize(self.scope, key, err)
        })?;
        self.namespace.scopes()
            .entry(self.scope.into()).or_default()
            .insert(key.into(), value);
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<(), Error> {
        let mut scopes = self.namespace.scopes();
        if let Some(values) = scopes.get_mut(self.scope) {
            values.remove(key);
            if values.is_empty() {
                scopes.remove(self.scope);
            }
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<(), Error> {
        self.namespace.scopes().remove(self.scope);
        Ok(())
    }
}


//------------ MemoryNamespace -----------------------------------------------

type MemoryValues = BTreeMap<String, Value>;

#[derive(Debug, Default)]
struct MemoryNamespace {
    scopes: Mutex<HashMap<String, MemoryValues>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryNamespace {
    fn scopes(&self) -> MutexGuard<'_, HashMap<String, MemoryValues>> {
        self.scopes.lock().expect("poisoned lock")
    }

    fn get_lock(&self, scope: &str) -> Arc<Mutex<()>> {
        self.locks.lock().expect("poisoned lock")
            .entry(scope.into()).or_default().clone()
    }
}


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    Deserialize {
        scope: String,
        key: String,
        err: String,
    },
    Serialize {
        scope: String,
        key: String,
        err: String,
    },
}

impl Error {
    fn deserialize(scope: &str, key: &str, err: impl fmt::Display) -> Self {
        Error::Deserialize {
            scope: scope.into(), key: key.into(), err: err.to_string()
        }
    }

    fn serialize(scope: &str, key: &str, err: impl fmt::Display) -> Self {
        Error::Serialize {
            scope: scope.into(), key: key.into(), err: err.to_string()
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Deserialize { scope, key, err } => {
                write!(f,
                    "failed to deserialize value for key '{key}' \
                    in scope '{scope}': {err}"
                )
            }
            Error::Serialize { scope, key, err } => {
                write!(f,
                    "failed to serialize value for key '{key}' \
                    in scope '{scope}': {err}"
                )
            }
        }
    }
}

impl error::Error for Error { }
