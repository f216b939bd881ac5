//! Replicated entities and the databases holding them.
//!
//! A replica database is a key-value store. Each persistence unit is a
//! namespace, each entity class a scope within it, and each entity a JSON
//! value stored under its identity key.

use std::collections::{BTreeMap, BTreeSet};
use serde::Serialize;
use serde_json::Value;
use url::Url;
use crate::commons::storage::KeyValueStore;
use super::error::DaoError;


//------------ EntitySet -----------------------------------------------------

/// The snapshots of the entities of one class keyed by identity.
pub type EntitySet = BTreeMap<String, Value>;


//------------ ComparableEntity ----------------------------------------------

/// A replicated entity that can be audited.
///
/// The comparable fields of an entity are its serialized representation,
/// so embedded objects are compared field by field, too. Fields that should
/// not take part in the comparison should be skipped during serialization.
pub trait ComparableEntity: Serialize {
    /// The name of the class of entities in the replica database.
    const CLASS_NAME: &'static str;

    /// Returns the identity key of the entity.
    fn entity_key(&self) -> String;

    /// Returns the fields that are compared between replicas.
    fn comparable_fields(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}


//------------ EntityStore ---------------------------------------------------

/// Access to the entities of one persistence unit in a replica database.
#[derive(Debug)]
pub struct EntityStore {
    store: KeyValueStore,
    db_url: String,
}

impl EntityStore {
    /// Opens the persistence unit in the database at `db_url`.
    pub fn open(db_url: &str, persistence_unit: &str) -> Result<Self, DaoError> {
        let url = Url::parse(db_url).map_err(|err| {
            DaoError::other(format!("invalid database URL '{db_url}'"), err)
        })?;
        let store = KeyValueStore::new(&url, persistence_unit).map_err(|err| {
            DaoError::open(format!("cannot open database '{db_url}'"), err)
        })?;
        Ok(EntityStore { store, db_url: db_url.into() })
    }

    pub fn db_url(&self) -> &str {
        &self.db_url
    }
}

/// # Reading
impl EntityStore {
    /// Returns the names of all entity classes that have entities.
    pub fn classes(&self) -> Result<Vec<String>, DaoError> {
        self.store.list_scopes().map_err(|err| {
            DaoError::store(
                format!("cannot list entity classes in '{}'", self.db_url),
                err
            )
        })
    }

    /// Returns all entities of the given class.
    ///
    /// The entities are read in one transaction and thus form a consistent
    /// snapshot.
    pub fn get_all(&self, class: &str) -> Result<EntitySet, DaoError> {
        self.store.execute(class, |txn| {
            let mut res = EntitySet::new();
            for key in txn.list_keys()? {
                if let Some(value) = txn.get(&key)? {
                    res.insert(key, value);
                }
            }
            Ok(res)
        }).map_err(|err| self.fetch_error(class, err))
    }

    /// Returns those of the given entities of a class that exist.
    pub fn get_keys(
        &self, class: &str, keys: &BTreeSet<String>
    ) -> Result<EntitySet, DaoError> {
        self.store.execute(class, |txn| {
            let mut res = EntitySet::new();
            for key in keys {
                if let Some(value) = txn.get(key)? {
                    res.insert(key.clone(), value);
                }
            }
            Ok(res)
        }).map_err(|err| self.fetch_error(class, err))
    }

    fn fetch_error(
        &self, class: &str, err: crate::commons::storage::Error
    ) -> DaoError {
        DaoError::store(
            format!(
                "cannot fetch entities of class '{}' from '{}'",
                class, self.db_url
            ),
            err
        )
    }
}

/// # Writing
impl EntityStore {
    /// Stores an entity, replacing an existing entity with the same key.
    pub fn put<E: ComparableEntity>(&self, entity: &E) -> Result<(), DaoError> {
        let value = entity.comparable_fields().map_err(|err| {
            DaoError::other(
                format!("cannot serialize entity of class '{}'", E::CLASS_NAME),
                err
            )
        })?;
        self.put_value(E::CLASS_NAME, &entity.entity_key(), &value)
    }

    pub fn put_value(
        &self, class: &str, key: &str, value: &Value
    ) -> Result<(), DaoError> {
        self.store.store(class, key, value).map_err(|err| {
            DaoError::store(
                format!("cannot store entity '{key}' of class '{class}'"),
                err
            )
        })
    }

    pub fn remove(&self, class: &str, key: &str) -> Result<(), DaoError> {
        self.store.execute(class, |txn| txn.delete(key)).map_err(|err| {
            DaoError::store(
                format!("cannot remove entity '{key}' of class '{class}'"),
                err
            )
        })
    }

    /// Removes all entities of the persistence unit.
    pub fn wipe(&self) -> Result<(), DaoError> {
        self.store.wipe().map_err(|err| {
            DaoError::store(format!("cannot wipe '{}'", self.db_url), err)
        })
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Policy {
        id: u32,
        name: String,
        #[serde(skip)]
        _cached: Option<String>,
    }

    impl ComparableEntity for Policy {
        const CLASS_NAME: &'static str = "Policy";

        fn entity_key(&self) -> String {
            self.id.to_string()
        }
    }

    #[test]
    fn put_and_get() {
        let store = EntityStore::open(
            "memory:entity-put-and-get", "auditPU"
        ).unwrap();
        store.put(&Policy {
            id: 1, name: "one".into(), _cached: Some("x".into())
        }).unwrap();
        store.put_value("Other", "a", &json!({"x": 1})).unwrap();

        let all = store.get_all("Policy").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["1"], json!({"id": 1, "name": "one"}));
        assert_eq!(store.classes().unwrap(), ["Other", "Policy"]);

        let keys = ["1".to_string(), "2".to_string()].into();
        assert_eq!(store.get_keys("Policy", &keys).unwrap().len(), 1);

        store.remove("Policy", "1").unwrap();
        assert!(store.get_all("Policy").unwrap().is_empty());
        store.wipe().unwrap();
        assert!(store.classes().unwrap().is_empty());
    }

    #[test]
    fn bad_url() {
        assert!(EntityStore::open("not a url", "auditPU").is_err());
        assert!(EntityStore::open("jdbc:mysql://db/x", "auditPU").is_err());
    }
}
