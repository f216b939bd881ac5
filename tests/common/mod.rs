#![allow(dead_code)] // Different tests use different parts.

use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};
use chrono::Utc;
use lazy_static::lazy_static;
use log::{Level, LevelFilter, Log, Metadata, Record};
use url::Url;
use integrity_audit::audit::{
    AuditProperties, ConnectionDescriptor, CycleReport, EntityStore,
    IntegrityAudit, NodeType, PersistenceGateway, Registration,
    StoreGateway,
};
use integrity_audit::commons::clock::{Clock, TestClock};


//------------ Fleet ---------------------------------------------------------

/// A set of resources sharing a registry and a test clock.
///
/// Every resource gets a replica database of its own.
pub struct Fleet {
    pub clock: TestClock,
    pub registry: String,
    pub persistence_unit: String,
}

impl Fleet {
    /// Creates a fleet with a registry of its own.
    pub fn new(persistence_unit: &str) -> Self {
        Self::with_registry(
            &format!("memory:registry-{}", rand::random::<u64>()),
            persistence_unit,
            TestClock::default(),
        )
    }

    /// Creates a fleet in the persistence unit of an existing registry.
    pub fn with_registry(
        registry: &str, persistence_unit: &str, clock: TestClock
    ) -> Self {
        Fleet {
            clock,
            registry: registry.into(),
            persistence_unit: persistence_unit.into(),
        }
    }

    pub fn db_url(&self, name: &str) -> String {
        format!("{}-{}", self.registry, name)
    }

    pub fn properties(&self, name: &str) -> AuditProperties {
        AuditProperties {
            site: Some("SiteA".into()),
            node_type: Some("pdp_xacml".into()),
            integrity_audit_period_seconds: Some(1),
            db_url: Some(self.db_url(name)),
            db_user: Some("policy_user".into()),
            db_driver: Some("memory".into()),
            registry_uri: Some(self.registry.clone()),
            .. Default::default()
        }
    }

    pub fn node(&self, name: &str) -> IntegrityAudit {
        self.node_with(name, |_| { })
    }

    pub fn node_with(
        &self, name: &str, op: impl FnOnce(&mut AuditProperties)
    ) -> IntegrityAudit {
        let mut properties = self.properties(name);
        op(&mut properties);
        IntegrityAudit::new(
            name, &self.persistence_unit, &properties,
            Arc::new(self.clock.clone())
        ).unwrap()
    }

    /// Opens the replica database of a resource.
    pub fn db(&self, name: &str) -> EntityStore {
        EntityStore::open(&self.db_url(name), &self.persistence_unit).unwrap()
    }

    pub fn gateway(&self) -> StoreGateway {
        StoreGateway::new(&Url::parse(&self.registry).unwrap()).unwrap()
    }

    /// Registers a resource that never runs.
    pub fn register_dead(&self, name: &str) {
        self.gateway().upsert_registry_entry(
            &Registration {
                resource_name: name.into(),
                persistence_unit: self.persistence_unit.clone(),
                site: "SiteA".into(),
                node_type: NodeType::PdpXacml,
                connection: ConnectionDescriptor::new(
                    self.db_url(name), "policy_user", "memory", None
                ),
            },
            self.clock.now()
        ).unwrap();
    }

    /// Returns the names of all designated resources in the registry.
    pub fn designated(&self) -> Vec<String> {
        self.gateway().list_registry_entries(
            &self.persistence_unit, NodeType::PdpXacml
        ).unwrap().into_iter().filter(|entry| {
            entry.designated
        }).map(|entry| entry.resource_name).collect()
    }

    /// Advances the clock by the given number of seconds.
    pub fn advance(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs))
    }
}


//------------ Stepping ------------------------------------------------------

/// Runs one cycle of a node started with `start_stepped`.
pub fn step(stepper: &integrity_audit::audit::Stepper) -> CycleReport {
    stepper.step().expect("audit thread has stopped")
}

/// Waits until `cond` is true, panicking after `timeout`.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        if Instant::now() > deadline {
            panic!("condition not met within {:?}", timeout);
        }
        thread::sleep(Duration::from_millis(5));
    }
}


//------------ Log Capture ---------------------------------------------------

/// A log message as captured.
#[derive(Clone, Debug)]
pub struct LogLine {
    pub thread: Option<String>,
    pub level: Level,
    pub message: String,
}

struct CaptureLogger {
    lines: Mutex<Vec<LogLine>>,
}

impl Log for CaptureLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.target().starts_with("integrity_audit")
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return
        }
        self.lines.lock().unwrap().push(LogLine {
            thread: thread::current().name().map(Into::into),
            level: record.level(),
            message: record.args().to_string(),
        });
    }

    fn flush(&self) { }
}

lazy_static! {
    static ref LOGGER: CaptureLogger = CaptureLogger {
        lines: Mutex::new(Vec::new())
    };
}

static INIT_LOGGER: Once = Once::new();

/// Installs the capturing logger for this test binary.
pub fn capture_logs() {
    INIT_LOGGER.call_once(|| {
        log::set_logger(&*LOGGER).unwrap();
        log::set_max_level(LevelFilter::Debug);
    });
}

/// Returns all captured lines logged by the named thread.
pub fn logs_of_thread(name: &str) -> Vec<LogLine> {
    LOGGER.lines.lock().unwrap().iter().filter(|line| {
        line.thread.as_deref() == Some(name)
    }).cloned().collect()
}

/// Returns the name of the audit thread of a resource.
pub fn audit_thread_name(resource_name: &str) -> String {
    format!("integrity-audit-{resource_name}")
}

/// Returns a clock starting now, for tests needing a fresh one.
pub fn fresh_clock() -> TestClock {
    TestClock::new(Utc::now())
}
