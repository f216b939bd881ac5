//! Deciding which resource audits.
//!
//! In each persistence unit, exactly one resource of a node type should be
//! designated to run the audit. Every node decides for itself from the
//! registry entries it has just read. Since all nodes apply the same rules
//! to the same entries, they arrive at the same decision.
//!
//! Resources are ordered by their name. A resource is live if its entry
//! has been updated within the staleness threshold; the deciding resource
//! always considers itself live. If there is no live designee, the live
//! resource following the stale designee in order is designated, wrapping
//! around at the end. Without any designee, the first live resource is.

use std::fmt;
use chrono::{DateTime, TimeDelta, Utc};
use super::registry::RegistryEntry;


//------------ Designation ---------------------------------------------------

/// Who is designated, as seen by one resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Designation {
    NoDesignee,
    SelfDesignated,
    PeerDesignated(String),
}

impl Designation {
    fn of(winner: &str, me: &str) -> Self {
        if winner == me {
            Designation::SelfDesignated
        }
        else {
            Designation::PeerDesignated(winner.into())
        }
    }

    pub fn is_self(&self) -> bool {
        matches!(self, Designation::SelfDesignated)
    }
}

impl fmt::Display for Designation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Designation::NoDesignee => f.write_str("no designee"),
            Designation::SelfDesignated => f.write_str("self designated"),
            Designation::PeerDesignated(name) => {
                write!(f, "designated peer {}", name)
            }
        }
    }
}


//------------ Decision ------------------------------------------------------

/// The outcome of looking at the registry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Decision {
    /// The designation once the decision has been persisted.
    pub designation: Designation,

    /// The resource that needs to be persisted as designated, if any.
    pub claim: Option<String>,
}


//------------ Rotation ------------------------------------------------------

/// The registry entries of a persistence unit as seen by one resource.
pub struct Rotation<'a> {
    entries: &'a [RegistryEntry],
    me: &'a str,
    now: DateTime<Utc>,
    staleness: TimeDelta,
}

impl<'a> Rotation<'a> {
    /// Creates the view.
    ///
    /// The entries need to be ordered by resource name.
    pub fn new(
        entries: &'a [RegistryEntry],
        me: &'a str,
        now: DateTime<Utc>,
        staleness: TimeDelta,
    ) -> Self {
        Rotation { entries, me, now, staleness }
    }

    fn is_live(&self, entry: &RegistryEntry) -> bool {
        entry.resource_name == self.me
        || !entry.is_stale(self.now, self.staleness)
    }

    /// Returns the names of the live resources in order.
    pub fn candidates(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.entries.iter().filter(|entry| {
            self.is_live(entry)
        }).map(|entry| entry.resource_name.as_str())
    }

    /// Returns the live resource following `after`, wrapping around.
    ///
    /// Without `after`, returns the first live resource. Returns `None`
    /// only if there are no live resources at all.
    pub fn next_designee(&self, after: Option<&str>) -> Option<&'a str> {
        if let Some(after) = after {
            if let Some(next) = self.candidates().find(|name| *name > after) {
                return Some(next)
            }
        }
        self.candidates().next()
    }

    /// Returns the resource to hand over to after a completed audit.
    ///
    /// This is the live resource following myself which may be myself.
    pub fn successor(&self) -> Option<&'a str> {
        self.next_designee(Some(self.me))
    }

    /// Decides the designation.
    pub fn decide(&self) -> Decision {
        let designated: Vec<_> = self.entries.iter().filter(|entry| {
            entry.designated
        }).collect();

        if let Some(winner) = designated.iter().find(|entry| {
            self.is_live(entry)
        }) {
            let winner = winner.resource_name.as_str();
            return Decision {
                designation: Designation::of(winner, self.me),
                claim: (designated.len() > 1).then(|| winner.into()),
            }
        }

        let stale = designated.first().map(|entry| {
            entry.resource_name.as_str()
        });
        match self.next_designee(stale) {
            Some(winner) => {
                Decision {
                    designation: Designation::of(winner, self.me),
                    claim: Some(winner.into()),
                }
            }
            None => {
                Decision { designation: Designation::NoDesignee, claim: None }
            }
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::registry::{ConnectionDescriptor, NodeType};

    const STALENESS: TimeDelta = TimeDelta::seconds(60);

    /// Creates entries from (name, designated, seconds since update).
    fn entries(
        now: DateTime<Utc>, items: &[(&str, bool, i64)]
    ) -> Vec<RegistryEntry> {
        items.iter().map(|(name, designated, age)| {
            RegistryEntry {
                resource_name: name.to_string(),
                persistence_unit: "rotationPU".into(),
                site: "SiteA".into(),
                node_type: NodeType::PdpXacml,
                designated: *designated,
                connection: ConnectionDescriptor::new(
                    "memory:rotation", "user", "memory", None
                ),
                last_updated: now - TimeDelta::seconds(*age),
                created_date: now - TimeDelta::seconds(1000),
            }
        }).collect()
    }

    fn decide(items: &[(&str, bool, i64)], me: &str) -> Decision {
        let now = Utc::now();
        let entries = entries(now, items);
        Rotation::new(&entries, me, now, STALENESS).decide()
    }

    #[test]
    fn no_designee_claims_first_live() {
        let decision = decide(
            &[("pdp1", false, 100), ("pdp2", false, 0), ("pdp3", false, 0)],
            "pdp3"
        );
        assert_eq!(
            decision.designation, Designation::PeerDesignated("pdp2".into())
        );
        assert_eq!(decision.claim.as_deref(), Some("pdp2"));
    }

    #[test]
    fn live_designee_is_kept() {
        let decision = decide(
            &[("pdp1", false, 0), ("pdp2", true, 59)], "pdp1"
        );
        assert_eq!(
            decision.designation, Designation::PeerDesignated("pdp2".into())
        );
        assert_eq!(decision.claim, None);

        let decision = decide(
            &[("pdp1", false, 0), ("pdp2", true, 59)], "pdp2"
        );
        assert_eq!(decision.designation, Designation::SelfDesignated);
        assert_eq!(decision.claim, None);
    }

    #[test]
    fn stale_designee_is_replaced_by_next() {
        let items = [
            ("pdp1", false, 0), ("pdp2", true, 61), ("pdp3", false, 0)
        ];
        let decision = decide(&items, "pdp1");
        assert_eq!(
            decision.designation, Designation::PeerDesignated("pdp3".into())
        );
        assert_eq!(decision.claim.as_deref(), Some("pdp3"));
        assert_eq!(decide(&items, "pdp3").designation, Designation::SelfDesignated);
    }

    #[test]
    fn replacement_wraps_around() {
        let decision = decide(
            &[("pdp1", false, 0), ("pdp2", false, 0), ("pdp3", true, 100)],
            "pdp2"
        );
        assert_eq!(
            decision.designation, Designation::PeerDesignated("pdp1".into())
        );
    }

    #[test]
    fn sole_resource_keeps_designation() {
        let decision = decide(&[("pdp1", true, 1000)], "pdp1");
        assert_eq!(decision.designation, Designation::SelfDesignated);
        assert_eq!(decision.claim, None);

        let decision = decide(&[("pdp1", false, 1000)], "pdp1");
        assert_eq!(decision.designation, Designation::SelfDesignated);
        assert_eq!(decision.claim.as_deref(), Some("pdp1"));
    }

    #[test]
    fn stale_others_hand_back_to_me() {
        let decision = decide(
            &[("pdp1", true, 100), ("pdp2", false, 100), ("pdp3", false, 0)],
            "pdp3"
        );
        assert_eq!(decision.designation, Designation::SelfDesignated);
        assert_eq!(decision.claim.as_deref(), Some("pdp3"));
    }

    #[test]
    fn double_designation_is_repaired() {
        let decision = decide(
            &[("pdp1", true, 100), ("pdp2", true, 0), ("pdp3", true, 0)],
            "pdp3"
        );
        assert_eq!(
            decision.designation, Designation::PeerDesignated("pdp2".into())
        );
        assert_eq!(decision.claim.as_deref(), Some("pdp2"));
    }

    #[test]
    fn not_registered() {
        let decision = decide(&[("pdp1", false, 100)], "pdp2");
        assert_eq!(decision.designation, Designation::NoDesignee);
        assert_eq!(decision.claim, None);
    }

    #[test]
    fn successor() {
        let now = Utc::now();
        let entries = entries(now, &[
            ("pdp1", false, 0), ("pdp2", true, 0),
            ("pdp3", false, 100), ("pdp4", false, 0),
        ]);
        let rotation = |me| Rotation::new(&entries, me, now, STALENESS);
        assert_eq!(rotation("pdp2").successor(), Some("pdp4"));
        assert_eq!(rotation("pdp4").successor(), Some("pdp1"));
        assert_eq!(rotation("pdp3").successor(), Some("pdp4"));

        let single = super::tests::entries(now, &[("pdp1", true, 0)]);
        assert_eq!(
            Rotation::new(&single, "pdp1", now, STALENESS).successor(),
            Some("pdp1")
        );
    }
}
