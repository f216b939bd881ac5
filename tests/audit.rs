//! Audit passes over the replica databases of a fleet.

mod common;

use std::collections::BTreeSet;
use log::Level;
use serde::Serialize;
use serde_json::json;
use integrity_audit::audit::{
    compare_replicas, AuditOutcome, ComparableEntity, Designation, EntitySet,
};
use common::{audit_thread_name, capture_logs, logs_of_thread, step, Fleet};


//------------ Policy --------------------------------------------------------

#[derive(Clone, Serialize)]
struct Policy {
    id: String,
    version: u32,
    body: PolicyBody,
}

#[derive(Clone, Serialize)]
struct PolicyBody {
    rules: Vec<String>,
    enabled: bool,
}

impl Policy {
    fn new(id: &str, version: u32) -> Self {
        Policy {
            id: id.into(),
            version,
            body: PolicyBody {
                rules: vec!["permit".into(), format!("scope={id}")],
                enabled: true,
            }
        }
    }
}

impl ComparableEntity for Policy {
    const CLASS_NAME: &'static str = "Policy";

    fn entity_key(&self) -> String {
        self.id.clone()
    }
}

fn populate(fleet: &Fleet, name: &str, policies: &[Policy]) {
    let db = fleet.db(name);
    for policy in policies {
        db.put(policy).unwrap();
    }
}

fn keys(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|key| key.to_string()).collect()
}


//------------ Tests ---------------------------------------------------------

#[test]
fn mismatches_are_counted_and_logged() {
    capture_logs();
    let fleet = Fleet::new("auditPU");
    let policies = [
        Policy::new("p1", 1), Policy::new("p2", 1), Policy::new("p3", 1)
    ];
    populate(&fleet, "mismatch-pdp1", &policies);
    populate(&fleet, "mismatch-pdp2", &policies);
    populate(&fleet, "mismatch-pdp3", &policies);

    fleet.db("mismatch-pdp2").put(&Policy::new("p1", 2)).unwrap();
    fleet.db("mismatch-pdp3").remove("Policy", "p3").unwrap();
    fleet.db("mismatch-pdp3").put(&Policy::new("p4", 1)).unwrap();

    fleet.register_dead("mismatch-pdp2");
    fleet.register_dead("mismatch-pdp3");
    let mut pdp1 = fleet.node("mismatch-pdp1");
    let stepper = pdp1.start_stepped().unwrap();
    let report = step(&stepper);
    assert_eq!(report.designation, Designation::SelfDesignated);
    let AuditOutcome::Completed(report) = report.outcome else {
        panic!("audit did not complete")
    };
    assert_eq!(report.mismatch_count, 3);
    assert_eq!(report.comparisons, 2);
    assert_eq!(report.mismatched["Policy"], keys(&["p1", "p3", "p4"]));

    let logs = logs_of_thread(&audit_thread_name("mismatch-pdp1"));
    assert!(logs.iter().any(|line| {
        line.level == Level::Info
            && line.message == "Running audit for persistenceUnit=auditPU \
                                on resourceName=mismatch-pdp1"
    }));
    assert!(logs.iter().any(|line| {
        line.level == Level::Error && line.message == "DB Audit: 3"
    }));
}

#[test]
fn consistent_replicas_report_zero() {
    capture_logs();
    let fleet = Fleet::new("auditPU");
    let policies = [Policy::new("p1", 1), Policy::new("p2", 3)];
    populate(&fleet, "clean-pdp1", &policies);
    populate(&fleet, "clean-pdp2", &policies);
    fleet.db("clean-pdp1").put_value(
        "Group", "g1", &json!({ "name": "admins", "members": 2 })
    ).unwrap();
    fleet.db("clean-pdp2").put_value(
        "Group", "g1", &json!({ "members": 2.0, "name": "admins" })
    ).unwrap();

    fleet.register_dead("clean-pdp2");
    let mut pdp1 = fleet.node("clean-pdp1");
    let stepper = pdp1.start_stepped().unwrap();
    let AuditOutcome::Completed(report) = step(&stepper).outcome else {
        panic!("audit did not complete")
    };
    assert_eq!(report.mismatch_count, 0);
    assert_eq!(report.comparisons, 2);
    assert!(report.mismatched.is_empty());

    let logs = logs_of_thread(&audit_thread_name("clean-pdp1"));
    let errors = logs.iter().filter(|line| {
        line.level == Level::Error
    }).map(|line| line.message.as_str()).collect::<Vec<_>>();
    assert_eq!(errors, ["DB Audit: 0"]);
}

#[test]
fn table_missing_on_auditor() {
    capture_logs();
    let fleet = Fleet::new("auditPU");
    populate(&fleet, "missing-pdp2", &[
        Policy::new("p1", 1), Policy::new("p2", 1)
    ]);
    fleet.db("missing-pdp1").put_value(
        "Group", "g1", &json!({ "name": "admins" })
    ).unwrap();
    fleet.db("missing-pdp2").put_value(
        "Group", "g1", &json!({ "name": "admins" })
    ).unwrap();

    fleet.register_dead("missing-pdp2");
    let mut pdp1 = fleet.node("missing-pdp1");
    let stepper = pdp1.start_stepped().unwrap();
    let AuditOutcome::Completed(report) = step(&stepper).outcome else {
        panic!("audit did not complete")
    };
    assert_eq!(report.comparisons, 2);
    assert_eq!(report.mismatch_count, 2);
    assert_eq!(report.mismatched["Policy"], keys(&["p1", "p2"]));
    assert!(!report.mismatched.contains_key("Group"));

    assert!(logs_of_thread(&audit_thread_name("missing-pdp1")).iter().any(
        |line| line.level == Level::Error && line.message == "DB Audit: 2"
    ));
}

#[test]
fn every_cycle_is_marked() {
    capture_logs();
    let fleet = Fleet::new("markPU");
    let mut pdp1 = fleet.node("mark-pdp1");
    let mut pdp2 = fleet.node("mark-pdp2");
    let step1 = pdp1.start_stepped().unwrap();
    let step2 = pdp2.start_stepped().unwrap();

    assert!(step(&step1).audited());
    for _ in 0..3 {
        fleet.advance(10);
        assert_eq!(
            step(&step2).designation,
            Designation::PeerDesignated("mark-pdp1".into())
        );
        assert!(!step(&step1).audited());
    }

    let count = |name: &str, prefix: &str| {
        logs_of_thread(&audit_thread_name(name)).iter().filter(|line| {
            line.level == Level::Info && line.message.starts_with(prefix)
        }).count()
    };
    let marker = |name: &str| format!(
        "Running audit for persistenceUnit=markPU on resourceName={name}"
    );
    assert_eq!(count("mark-pdp1", &marker("mark-pdp1")), 4);
    assert_eq!(count("mark-pdp2", &marker("mark-pdp2")), 3);
    assert_eq!(count("mark-pdp1", "Auditing persistenceUnit=markPU"), 1);
    assert_eq!(count("mark-pdp2", "Auditing persistenceUnit=markPU"), 0);
}

#[test]
fn lone_resource_has_nothing_to_compare() {
    let fleet = Fleet::new("auditPU");
    populate(&fleet, "lone-pdp1", &[Policy::new("p1", 1)]);
    let mut pdp1 = fleet.node("lone-pdp1");
    let stepper = pdp1.start_stepped().unwrap();
    let report = step(&stepper);
    assert_eq!(report.designation, Designation::SelfDesignated);
    let AuditOutcome::Failed(err) = report.outcome else {
        panic!("audit should not have found peers")
    };
    assert!(err.is_insufficient_entries());
}

#[test]
fn replicas_of_three_policies() {
    capture_logs();
    let mine: EntitySet = [
        ("a".to_string(), json!({ "id": "a", "rules": ["permit"] })),
        ("b".to_string(), json!({ "id": "b", "rules": ["deny"] })),
        ("c".to_string(), json!({ "id": "c", "rules": [] })),
    ].into_iter().collect();
    let theirs: EntitySet = [
        ("a".to_string(), json!({ "id": "a", "rules": ["permit"] })),
        ("b".to_string(), json!({ "id": "b", "rules": ["permit"] })),
        ("d".to_string(), json!({ "id": "d", "rules": [] })),
    ].into_iter().collect();

    let mismatched = compare_replicas(
        "Policy", "pdp1", &mine, "pdp2", &theirs
    );
    assert_eq!(mismatched, keys(&["b", "c", "d"]));
    assert_eq!(
        compare_replicas("Policy", "pdp2", &theirs, "pdp1", &mine),
        mismatched
    );
}
