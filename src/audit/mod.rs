//! The integrity audit.
//!
//! Every node registers itself in a shared registry and heartbeats there
//! once per cycle. The designated node of a persistence unit compares its
//! own replica database with those of its peers.

pub use self::compare::{compare_entries, compare_replicas};
pub use self::engine::{AuditReport, DbAudit};
pub use self::entity::{ComparableEntity, EntitySet, EntityStore};
pub use self::error::{AuditError, DaoError};
pub use self::gateway::{PersistenceGateway, StoreGateway};
pub use self::integrity::{AuditProperties, AuditSettings, IntegrityAudit};
pub use self::registry::{
    ConnectionDescriptor, NodeType, Registration, RegistryEntry,
    UnknownNodeType
};
pub use self::rotation::{Decision, Designation, Rotation};
pub use self::scheduler::{AuditOutcome, CycleReport, Stepper};

pub mod compare;
pub mod engine;
pub mod entity;
pub mod error;
pub mod gateway;
pub mod integrity;
pub mod registry;
pub mod rotation;
pub mod scheduler;
