//! Access to the registry and the replica databases.

use std::fmt;
use std::collections::BTreeSet;
use chrono::{DateTime, Utc};
use log::debug;
use url::Url;
use crate::commons::storage::{self, KeyValueStore};
use crate::constants::REGISTRY_NAMESPACE;
use super::entity::{EntitySet, EntityStore};
use super::error::DaoError;
use super::registry::{
    ConnectionDescriptor, NodeType, Registration, RegistryEntry
};


//------------ PersistenceGateway --------------------------------------------

/// Everything the audit needs from persistent storage.
///
/// Every method is one transaction against the store it concerns. Nothing
/// is cached between calls: each read sees what has been persisted last.
pub trait PersistenceGateway: fmt::Debug + Send + Sync {
    /// Creates or refreshes the registry entry of a resource.
    ///
    /// A new entry is created undesignated. An existing entry keeps its
    /// designation flag and creation date; everything else is replaced and
    /// its last update set to `now`. Returns the entry as stored.
    fn upsert_registry_entry(
        &self, registration: &Registration, now: DateTime<Utc>
    ) -> Result<RegistryEntry, DaoError>;

    /// Returns all entries of a persistence unit with the given node type.
    ///
    /// The entries are ordered by resource name.
    fn list_registry_entries(
        &self, persistence_unit: &str, node_type: NodeType
    ) -> Result<Vec<RegistryEntry>, DaoError>;

    /// Designates a resource.
    ///
    /// Sets the designation flag of the entry of `resource_name` and clears
    /// it on every other entry of the persistence unit and node type, all
    /// in one transaction.
    fn change_designated(
        &self,
        persistence_unit: &str,
        node_type: NodeType,
        resource_name: &str,
    ) -> Result<(), DaoError>;

    /// Returns the names of the entity classes of a persistence unit.
    ///
    /// These are the classes that have entities in the database described.
    fn list_known_entity_class_names(
        &self,
        persistence_unit: &str,
        descriptor: &ConnectionDescriptor,
    ) -> Result<BTreeSet<String>, DaoError>;

    /// Returns all entities of a class from the database described.
    fn fetch_entity_collection(
        &self,
        persistence_unit: &str,
        class: &str,
        descriptor: &ConnectionDescriptor,
    ) -> Result<EntitySet, DaoError>;

    /// Returns those of the given entities that exist in the database.
    fn fetch_entities_by_keys(
        &self,
        persistence_unit: &str,
        class: &str,
        descriptor: &ConnectionDescriptor,
        keys: &BTreeSet<String>,
    ) -> Result<EntitySet, DaoError>;

    /// Removes all registry entries of a persistence unit.
    fn delete_registry_entries(
        &self, persistence_unit: &str
    ) -> Result<(), DaoError>;
}


//------------ StoreGateway --------------------------------------------------

/// The persistence gateway over key-value stores.
///
/// The registry lives in the namespace [`REGISTRY_NAMESPACE`] of the
/// registry store. Each persistence unit is a scope in there, each entry
/// is stored under its resource name. Replica databases are opened from
/// the URL in their connection descriptor, see [`EntityStore`].
#[derive(Debug)]
pub struct StoreGateway {
    registry: KeyValueStore,
}

impl StoreGateway {
    pub fn new(registry_uri: &Url) -> Result<Self, DaoError> {
        let registry = KeyValueStore::new(
            registry_uri, REGISTRY_NAMESPACE
        ).map_err(|err| {
            DaoError::open(
                format!("cannot open registry at '{registry_uri}'"), err
            )
        })?;
        Ok(StoreGateway { registry })
    }

    fn registry_error(
        persistence_unit: &str, err: storage::Error
    ) -> DaoError {
        DaoError::store(
            format!(
                "registry transaction for persistence unit '{}' failed",
                persistence_unit
            ),
            err
        )
    }
}

impl PersistenceGateway for StoreGateway {
    fn upsert_registry_entry(
        &self, registration: &Registration, now: DateTime<Utc>
    ) -> Result<RegistryEntry, DaoError> {
        let key = registration.resource_name.as_str();
        self.registry.execute(&registration.persistence_unit, |txn| {
            let entry = match txn.get::<RegistryEntry>(key)? {
                Some(mut entry) => {
                    registration.refresh_entry(&mut entry, now);
                    entry
                }
                None => {
                    debug!(
                        "Creating registry entry for resourceName={} in \
                         persistenceUnit={}",
                        key, registration.persistence_unit
                    );
                    registration.new_entry(now)
                }
            };
            txn.store(key, &entry)?;
            Ok(entry)
        }).map_err(|err| {
            Self::registry_error(&registration.persistence_unit, err)
        })
    }

    fn list_registry_entries(
        &self, persistence_unit: &str, node_type: NodeType
    ) -> Result<Vec<RegistryEntry>, DaoError> {
        self.registry.execute(persistence_unit, |txn| {
            let mut res = Vec::new();
            for key in txn.list_keys()? {
                if let Some(entry) = txn.get::<RegistryEntry>(&key)? {
                    if entry.node_type == node_type {
                        res.push(entry)
                    }
                }
            }
            Ok(res)
        }).map_err(|err| Self::registry_error(persistence_unit, err))
    }

    fn change_designated(
        &self,
        persistence_unit: &str,
        node_type: NodeType,
        resource_name: &str,
    ) -> Result<(), DaoError> {
        self.registry.execute(persistence_unit, |txn| {
            for key in txn.list_keys()? {
                let Some(mut entry) = txn.get::<RegistryEntry>(&key)? else {
                    continue
                };
                if entry.node_type != node_type {
                    continue
                }
                let designated = entry.resource_name == resource_name;
                if entry.designated != designated {
                    entry.designated = designated;
                    txn.store(&key, &entry)?;
                }
            }
            Ok(())
        }).map_err(|err| Self::registry_error(persistence_unit, err))
    }

    fn list_known_entity_class_names(
        &self,
        persistence_unit: &str,
        descriptor: &ConnectionDescriptor,
    ) -> Result<BTreeSet<String>, DaoError> {
        let store = EntityStore::open(&descriptor.db_url, persistence_unit)?;
        Ok(store.classes()?.into_iter().collect())
    }

    fn fetch_entity_collection(
        &self,
        persistence_unit: &str,
        class: &str,
        descriptor: &ConnectionDescriptor,
    ) -> Result<EntitySet, DaoError> {
        EntityStore::open(
            &descriptor.db_url, persistence_unit
        )?.get_all(class)
    }

    fn fetch_entities_by_keys(
        &self,
        persistence_unit: &str,
        class: &str,
        descriptor: &ConnectionDescriptor,
        keys: &BTreeSet<String>,
    ) -> Result<EntitySet, DaoError> {
        EntityStore::open(
            &descriptor.db_url, persistence_unit
        )?.get_keys(class, keys)
    }

    fn delete_registry_entries(
        &self, persistence_unit: &str
    ) -> Result<(), DaoError> {
        self.registry.execute(persistence_unit, |txn| {
            txn.clear()
        }).map_err(|err| Self::registry_error(persistence_unit, err))
    }
}


//============ Tests =========================================================
