//! The audit of the replica databases.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use log::{debug, error, warn};
use crate::commons::clock::{Clock, Interrupt, Sleep};
use super::compare::{compare_entries, compare_replicas};
use super::entity::EntitySet;
use super::error::AuditError;
use super::gateway::PersistenceGateway;
use super::registry::{ConnectionDescriptor, NodeType, RegistryEntry};


//------------ DbAudit -------------------------------------------------------

/// One audit pass over all replicas of a persistence unit.
///
/// The pass compares the local database of the auditing resource with the
/// database of every other resource of the same node type. Resources that
/// share a database are compared only once, a resource sharing the
/// auditing resource’s database not at all.
pub struct DbAudit<'a> {
    gateway: &'a dyn PersistenceGateway,
    clock: &'a dyn Clock,
    interrupt: &'a Interrupt,

    /// How long to wait before confirming mismatches, zero for never.
    recheck: Duration,
}

impl<'a> DbAudit<'a> {
    pub fn new(
        gateway: &'a dyn PersistenceGateway,
        clock: &'a dyn Clock,
        interrupt: &'a Interrupt,
    ) -> Self {
        DbAudit { gateway, clock, interrupt, recheck: Duration::ZERO }
    }

    /// Confirms mismatches by fetching them again after `recheck`.
    pub fn with_recheck(mut self, recheck: Duration) -> Self {
        self.recheck = recheck;
        self
    }

    /// Runs the audit pass for a resource.
    ///
    /// Logs its result at error level as `DB Audit: <N>` with `N` the total
    /// number of mismatches found, also if that is zero.
    pub fn db_audit(
        &self,
        resource_name: &str,
        persistence_unit: &str,
        node_type: NodeType,
    ) -> Result<AuditReport, AuditError> {
        let entries = self.gateway.list_registry_entries(
            persistence_unit, node_type
        )?;
        match entries.len() {
            0 => {
                error!(
                    "DB Audit found no entries for persistenceUnit={}, \
                     nodeType={}",
                    persistence_unit, node_type
                );
                return Err(AuditError::InsufficientEntries { found: 0 })
            }
            1 => {
                warn!(
                    "DB Audit found only one entry for persistenceUnit={}, \
                     nodeType={}; nothing to compare",
                    persistence_unit, node_type
                );
                return Err(AuditError::InsufficientEntries { found: 1 })
            }
            _ => { }
        }

        let Some(me) = entries.iter().find(|entry| {
            entry.resource_name == resource_name
        }) else {
            error!(
                "DB Audit found no entry for resourceName={} in \
                 persistenceUnit={}",
                resource_name, persistence_unit
            );
            return Err(AuditError::NotRegistered)
        };
        let peers = Self::distinct_peers(me, &entries);
        let classes = self.known_classes(persistence_unit, me, &peers)?;

        let mut report = AuditReport::default();
        for class in &classes {
            self.check_abort()?;
            let mine = self.gateway.fetch_entity_collection(
                persistence_unit, class, &me.connection
            )?;
            for peer in &peers {
                self.check_abort()?;
                let theirs = self.gateway.fetch_entity_collection(
                    persistence_unit, class, &peer.connection
                )?;
                let mut mismatched = compare_replicas(
                    class, &me.resource_name, &mine,
                    &peer.resource_name, &theirs
                );
                if !mismatched.is_empty() && !self.recheck.is_zero() {
                    mismatched = self.recheck(
                        persistence_unit, class, &me.connection,
                        &peer.connection, &mismatched
                    )?;
                }
                report.comparisons += 1;
                if !mismatched.is_empty() {
                    debug!(
                        "Mismatched entries (keys) for class {} between {} \
                         and {}: {}",
                        class, me.resource_name, peer.resource_name,
                        mismatched.iter().map(String::as_str)
                            .collect::<Vec<_>>().join(",")
                    );
                    report.add(class, mismatched);
                }
            }
        }

        error!("DB Audit: {}", report.mismatch_count);
        Ok(report)
    }

    /// Returns the entries of peers with a database other than mine.
    ///
    /// Of several peers sharing a database only the first one is kept.
    fn distinct_peers<'e>(
        me: &RegistryEntry, entries: &'e [RegistryEntry]
    ) -> Vec<&'e RegistryEntry> {
        let mut seen = BTreeSet::new();
        seen.insert(me.connection.db_url.as_str());
        entries.iter().filter(|entry| {
            seen.insert(entry.connection.db_url.as_str())
        }).collect()
    }

    /// Returns the classes present in my database or in any peer's.
    fn known_classes(
        &self,
        persistence_unit: &str,
        me: &RegistryEntry,
        peers: &[&RegistryEntry],
    ) -> Result<BTreeSet<String>, AuditError> {
        let mut res = self.gateway.list_known_entity_class_names(
            persistence_unit, &me.connection
        )?;
        for peer in peers {
            res.extend(self.gateway.list_known_entity_class_names(
                persistence_unit, &peer.connection
            )?);
        }
        Ok(res)
    }

    /// Fetches the given keys again and returns those still mismatched.
    fn recheck(
        &self,
        persistence_unit: &str,
        class: &str,
        mine: &ConnectionDescriptor,
        theirs: &ConnectionDescriptor,
        keys: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, AuditError> {
        if self.clock.sleep(self.recheck, self.interrupt) == Sleep::Interrupted {
            return Err(AuditError::Interrupted)
        }
        let mine: EntitySet = self.gateway.fetch_entities_by_keys(
            persistence_unit, class, mine, keys
        )?;
        let theirs = self.gateway.fetch_entities_by_keys(
            persistence_unit, class, theirs, keys
        )?;
        Ok(compare_entries(&mine, &theirs))
    }

    fn check_abort(&self) -> Result<(), AuditError> {
        if self.interrupt.is_aborted() {
            Err(AuditError::Interrupted)
        }
        else {
            Ok(())
        }
    }
}


//------------ AuditReport ---------------------------------------------------

/// The result of a completed audit pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AuditReport {
    /// The total number of mismatches over all classes and peers.
    pub mismatch_count: usize,

    /// The number of class and peer comparisons made.
    pub comparisons: usize,

    /// The mismatched keys per class over all peers.
    pub mismatched: BTreeMap<String, BTreeSet<String>>,
}

impl AuditReport {
    fn add(&mut self, class: &str, keys: BTreeSet<String>) {
        self.mismatch_count += keys.len();
        self.mismatched.entry(class.into()).or_default().extend(keys);
    }
}


//============ Tests =========================================================
