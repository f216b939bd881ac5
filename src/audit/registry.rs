//! The entries of the shared registry.

use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};


//------------ NodeType ------------------------------------------------------

/// The class of a node.
///
/// Only nodes of the same type are compared with each other and rotate
/// designation between each other.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize
)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    PdpXacml,
    PdpDrools,
    Pap,
    PapAdmin,
    Logparser,
    BrmsGateway,
    AstraGateway,
    ElkServer,
    Pypdp,
}

impl NodeType {
    pub const ALL: [NodeType; 9] = [
        NodeType::PdpXacml,
        NodeType::PdpDrools,
        NodeType::Pap,
        NodeType::PapAdmin,
        NodeType::Logparser,
        NodeType::BrmsGateway,
        NodeType::AstraGateway,
        NodeType::ElkServer,
        NodeType::Pypdp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::PdpXacml => "pdp_xacml",
            NodeType::PdpDrools => "pdp_drools",
            NodeType::Pap => "pap",
            NodeType::PapAdmin => "pap_admin",
            NodeType::Logparser => "logparser",
            NodeType::BrmsGateway => "brms_gateway",
            NodeType::AstraGateway => "astra_gateway",
            NodeType::ElkServer => "elk_server",
            NodeType::Pypdp => "pypdp",
        }
    }
}

impl FromStr for NodeType {
    type Err = UnknownNodeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|item| {
            item.as_str() == s
        }).ok_or_else(|| UnknownNodeType(s.into()))
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


//------------ ConnectionDescriptor ------------------------------------------

/// What a peer needs to reach the database of a resource.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConnectionDescriptor {
    pub db_url: String,
    pub db_user: String,
    pub db_driver: String,

    #[serde(default)]
    pub db_password: Option<String>,
}

impl ConnectionDescriptor {
    pub fn new(
        db_url: impl Into<String>,
        db_user: impl Into<String>,
        db_driver: impl Into<String>,
        db_password: Option<String>,
    ) -> Self {
        ConnectionDescriptor {
            db_url: db_url.into(),
            db_user: db_user.into(),
            db_driver: db_driver.into(),
            db_password,
        }
    }
}


//------------ RegistryEntry -------------------------------------------------

/// The registry entry of one resource in one persistence unit.
///
/// Each node only ever writes its own entry, apart from the designation
/// flag which the node deciding a designation change sets on all entries of
/// the persistence unit.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RegistryEntry {
    pub resource_name: String,
    pub persistence_unit: String,
    pub site: String,
    pub node_type: NodeType,
    pub designated: bool,

    #[serde(flatten)]
    pub connection: ConnectionDescriptor,

    pub last_updated: DateTime<Utc>,
    pub created_date: DateTime<Utc>,
}

impl RegistryEntry {
    /// Returns whether the entry has not been updated for too long.
    ///
    /// An entry is stale if more than `threshold` has passed between its
    /// last update and `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: TimeDelta) -> bool {
        now.signed_duration_since(self.last_updated) > threshold
    }
}


//------------ Registration --------------------------------------------------

/// What a node writes into its registry entry when registering.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Registration {
    pub resource_name: String,
    pub persistence_unit: String,
    pub site: String,
    pub node_type: NodeType,
    pub connection: ConnectionDescriptor,
}

impl Registration {
    /// Creates a fresh, undesignated entry.
    pub fn new_entry(&self, now: DateTime<Utc>) -> RegistryEntry {
        RegistryEntry {
            resource_name: self.resource_name.clone(),
            persistence_unit: self.persistence_unit.clone(),
            site: self.site.clone(),
            node_type: self.node_type,
            designated: false,
            connection: self.connection.clone(),
            last_updated: now,
            created_date: now,
        }
    }

    /// Refreshes an existing entry.
    ///
    /// Keeps the designation flag and the creation date.
    pub fn refresh_entry(&self, entry: &mut RegistryEntry, now: DateTime<Utc>) {
        entry.site.clone_from(&self.site);
        entry.node_type = self.node_type;
        entry.connection.clone_from(&self.connection);
        entry.last_updated = now;
    }
}


//------------ UnknownNodeType -----------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnknownNodeType(pub String);

impl fmt::Display for UnknownNodeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown node type '{}'", self.0)
    }
}

impl std::error::Error for UnknownNodeType { }


//============ Tests =========================================================
