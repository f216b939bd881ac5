//! The integrity audit of one resource.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use chrono::TimeDelta;
use log::info;
use serde::Deserialize;
use url::Url;
use crate::commons::clock::Clock;
use crate::config::ConfigError;
use crate::constants::{
    AUDIT_COMPLETION_INTERVAL, AUDIT_RESET_CYCLES, ZERO_PERIOD_STEP
};
use super::error::DaoError;
use super::gateway::{PersistenceGateway, StoreGateway};
use super::registry::{ConnectionDescriptor, NodeType, Registration};
use super::scheduler::{self, AuditCycle, AuditThread, Stepper, Trigger};


//------------ AuditProperties -----------------------------------------------

/// The properties of an integrity audit as given by the user.
///
/// All properties are optional here so that [`validate`][Self::validate]
/// can report every missing or bad one at once.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AuditProperties {
    pub site: Option<String>,
    pub node_type: Option<String>,

    /// Seconds between cycles, negative to disable, zero for continuous.
    pub integrity_audit_period_seconds: Option<i64>,

    pub db_url: Option<String>,
    pub db_user: Option<String>,
    pub db_driver: Option<String>,
    pub db_password: Option<String>,

    /// The store holding the registry, defaults to `db_url`.
    pub registry_uri: Option<String>,

    pub audit_completion_interval_seconds: Option<u64>,
    pub audit_reset_cycles: Option<u32>,

    /// Milliseconds before confirming mismatches, zero to not confirm.
    pub mismatch_recheck_millis: Option<u64>,
}

impl AuditProperties {
    /// The period used when none is configured.
    pub const DEFAULT_PERIOD_SECONDS: i64 = -1;

    /// Validates the properties for a resource in a persistence unit.
    pub fn validate(
        &self, resource_name: &str, persistence_unit: &str
    ) -> Result<AuditSettings, ConfigError> {
        let mut bad = Vec::new();

        if resource_name.trim().is_empty() {
            bad.push("resource name is empty".to_string());
        }
        if persistence_unit.trim().is_empty() {
            bad.push("persistence unit is empty".to_string());
        }
        let site = Self::required(&self.site, "site", &mut bad);
        let node_type = match self.node_type.as_deref() {
            None | Some("") => {
                bad.push("node_type is missing".to_string());
                None
            }
            Some(value) => match NodeType::from_str(value) {
                Ok(node_type) => Some(node_type),
                Err(err) => {
                    bad.push(format!("node_type: {}", err));
                    None
                }
            }
        };
        let db_driver = Self::required(&self.db_driver, "db_driver", &mut bad);
        let db_user = Self::required(&self.db_user, "db_user", &mut bad);
        let db_url = Self::required(&self.db_url, "db_url", &mut bad);
        if let Some(url) = db_url {
            if let Err(err) = Url::parse(url) {
                bad.push(format!("db_url '{}' is invalid: {}", url, err));
            }
        }
        let registry_uri = match self.registry_uri.as_deref().or(db_url) {
            Some(uri) => match Url::parse(uri) {
                Ok(uri) => Some(uri),
                Err(err) => {
                    if self.registry_uri.is_some() {
                        bad.push(format!(
                            "registry_uri '{}' is invalid: {}", uri, err
                        ));
                    }
                    None
                }
            }
            None => None,
        };
        if self.audit_reset_cycles == Some(0) {
            bad.push("audit_reset_cycles must be at least 1".to_string());
        }

        match (site, node_type, db_driver, db_user, db_url, registry_uri) {
            (
                Some(site), Some(node_type), Some(db_driver), Some(db_user),
                Some(db_url), Some(registry_uri)
            ) if bad.is_empty() => {
                Ok(AuditSettings {
                    resource_name: resource_name.into(),
                    persistence_unit: persistence_unit.into(),
                    site: site.into(),
                    node_type,
                    period_seconds: self.integrity_audit_period_seconds
                        .unwrap_or(Self::DEFAULT_PERIOD_SECONDS),
                    connection: ConnectionDescriptor::new(
                        db_url, db_user, db_driver, self.db_password.clone()
                    ),
                    registry_uri,
                    completion_interval: self
                        .audit_completion_interval_seconds
                        .map(Duration::from_secs)
                        .unwrap_or(AUDIT_COMPLETION_INTERVAL),
                    reset_cycles: self.audit_reset_cycles
                        .unwrap_or(AUDIT_RESET_CYCLES),
                    mismatch_recheck: Duration::from_millis(
                        self.mismatch_recheck_millis.unwrap_or(0)
                    ),
                })
            }
            _ => Err(ConfigError::InvalidProperties(bad)),
        }
    }

    fn required<'a>(
        value: &'a Option<String>, name: &str, bad: &mut Vec<String>
    ) -> Option<&'a str> {
        match value.as_deref() {
            None | Some("") => {
                bad.push(format!("{} is missing", name));
                None
            }
            Some(value) => Some(value),
        }
    }
}


//------------ AuditSettings -------------------------------------------------

/// Validated audit properties.
#[derive(Clone, Debug)]
pub struct AuditSettings {
    pub resource_name: String,
    pub persistence_unit: String,
    pub site: String,
    pub node_type: NodeType,
    pub period_seconds: i64,
    pub connection: ConnectionDescriptor,
    pub registry_uri: Url,
    pub completion_interval: Duration,
    pub reset_cycles: u32,
    pub mismatch_recheck: Duration,
}

impl AuditSettings {
    pub fn registration(&self) -> Registration {
        Registration {
            resource_name: self.resource_name.clone(),
            persistence_unit: self.persistence_unit.clone(),
            site: self.site.clone(),
            node_type: self.node_type,
            connection: self.connection.clone(),
        }
    }

    /// Returns how long a designee holds designation after a pass.
    pub fn completion_interval(&self) -> TimeDelta {
        scheduler::delta(self.completion_interval)
    }

    /// Returns how long an entry may go without update before it is stale.
    pub fn staleness(&self) -> TimeDelta {
        scheduler::delta(
            self.completion_interval.saturating_mul(self.reset_cycles)
        )
    }

    /// Returns the time slept between cycles or `None` if disabled.
    pub fn period(&self) -> Option<Duration> {
        match u64::try_from(self.period_seconds) {
            Err(_) => None,
            Ok(0) => Some(ZERO_PERIOD_STEP),
            Ok(secs) => Some(Duration::from_secs(secs)),
        }
    }
}


//------------ IntegrityAudit ------------------------------------------------

/// The integrity audit of one resource in one persistence unit.
///
/// Owns the audit thread. The thread is stopped when the value is dropped.
#[derive(Debug)]
pub struct IntegrityAudit {
    settings: Arc<AuditSettings>,
    gateway: Arc<dyn PersistenceGateway>,
    clock: Arc<dyn Clock>,
    thread: Option<AuditThread>,
    cycles: Arc<AtomicU64>,
}

impl IntegrityAudit {
    /// Creates the audit for a resource.
    ///
    /// Fails if any of the properties are invalid, listing all of them.
    pub fn new(
        resource_name: &str,
        persistence_unit: &str,
        properties: &AuditProperties,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let settings = properties.validate(resource_name, persistence_unit)?;
        let gateway = StoreGateway::new(
            &settings.registry_uri
        ).map_err(|err: DaoError| ConfigError::Other(err.to_string()))?;
        Ok(Self::with_gateway(settings, Arc::new(gateway), clock))
    }

    /// Creates the audit with a persistence gateway of its own.
    pub fn with_gateway(
        settings: AuditSettings,
        gateway: Arc<dyn PersistenceGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        IntegrityAudit {
            settings: Arc::new(settings),
            gateway, clock,
            thread: None,
            cycles: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn settings(&self) -> &AuditSettings {
        &self.settings
    }

    pub fn gateway(&self) -> &Arc<dyn PersistenceGateway> {
        &self.gateway
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map(AuditThread::is_running).unwrap_or(false)
    }

    /// Returns the number of cycles the thread has run since its start.
    pub fn cycle_count(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}

/// # Lifecycle
impl IntegrityAudit {
    /// Starts the timer driven audit thread.
    ///
    /// Does nothing if the thread is already running or if the period is
    /// negative.
    pub fn start(&mut self) -> Result<(), ConfigError> {
        if self.is_running() {
            return Ok(())
        }
        let Some(period) = self.settings.period() else {
            info!(
                "Suppressing integrity audit, integrityAuditPeriodSeconds={}",
                self.settings.period_seconds
            );
            return Ok(())
        };
        self.spawn(Trigger::Timer(period))
    }

    /// Starts an audit thread that runs one cycle per step.
    ///
    /// The period is ignored. A thread still running is stopped first.
    pub fn start_stepped(&mut self) -> Result<Stepper, ConfigError> {
        self.stop();
        let (stepper, trigger) = Stepper::new();
        self.spawn(trigger)?;
        Ok(stepper)
    }

    fn spawn(&mut self, trigger: Trigger) -> Result<(), ConfigError> {
        // A thread that ended on its own still needs joining.
        self.stop();
        self.cycles.store(0, Ordering::Relaxed);
        let cycle = AuditCycle::new(
            self.settings.clone(), self.gateway.clone(), self.clock.clone()
        );
        let thread = AuditThread::spawn(
            format!("integrity-audit-{}", self.settings.resource_name),
            cycle, trigger, self.cycles.clone()
        ).map_err(|err| {
            ConfigError::Other(format!(
                "Cannot start integrity audit thread: {}", err
            ))
        })?;
        self.thread = Some(thread);
        Ok(())
    }

    /// Stops the audit thread. Does nothing if it isn’t running.
    pub fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            thread.stop()
        }
    }

    /// Removes all registry entries of our persistence unit.
    pub fn delete_registry_entries(&self) -> Result<(), DaoError> {
        self.gateway.delete_registry_entries(&self.settings.persistence_unit)
    }
}

impl Drop for IntegrityAudit {
    fn drop(&mut self) {
        self.stop()
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::clock::TestClock;

    fn properties(name: &str) -> AuditProperties {
        AuditProperties {
            site: Some("SiteA".into()),
            node_type: Some("pdp_xacml".into()),
            integrity_audit_period_seconds: Some(5),
            db_url: Some(format!("memory:integrity-{name}")),
            db_user: Some("user".into()),
            db_driver: Some("memory".into()),
            .. Default::default()
        }
    }

    #[test]
    fn validate_defaults() {
        let settings = properties("defaults").validate("pdp1", "pu").unwrap();
        assert_eq!(
            settings.registry_uri.as_str(), "memory:integrity-defaults"
        );
        assert_eq!(settings.completion_interval, AUDIT_COMPLETION_INTERVAL);
        assert_eq!(settings.reset_cycles, AUDIT_RESET_CYCLES);
        assert_eq!(settings.staleness(), TimeDelta::seconds(60));
        assert_eq!(settings.period(), Some(Duration::from_secs(5)));
        assert!(settings.mismatch_recheck.is_zero());

        let settings = AuditProperties {
            integrity_audit_period_seconds: None,
            .. properties("defaults")
        }.validate("pdp1", "pu").unwrap();
        assert_eq!(settings.period(), None);

        let settings = AuditProperties {
            integrity_audit_period_seconds: Some(0),
            .. properties("defaults")
        }.validate("pdp1", "pu").unwrap();
        assert_eq!(settings.period(), Some(ZERO_PERIOD_STEP));
    }

    #[test]
    fn validate_lists_everything() {
        let res = AuditProperties {
            node_type: Some("bogus".into()),
            db_url: Some("not a url".into()),
            .. Default::default()
        }.validate(" ", "");
        let Err(ConfigError::InvalidProperties(list)) = res else {
            panic!("expected invalid properties")
        };
        // resource name, persistence unit, site, node type, driver, user,
        // and database URL
        assert_eq!(list.len(), 7, "{:?}", list);
        assert!(list[0].contains("resource name"));
        assert!(list[1].contains("persistence unit"));
        assert!(list.iter().any(|s| s.contains("bogus")));
        assert!(list.iter().any(|s| s.contains("not a url")));
    }

    #[test]
    fn new_rejects_bad_properties() {
        let res = IntegrityAudit::new(
            "", "pu", &properties("bad"), Arc::new(TestClock::default())
        );
        assert!(matches!(res, Err(ConfigError::InvalidProperties(_))));
    }

    #[test]
    fn negative_period_does_not_start() {
        let mut audit = IntegrityAudit::new(
            "pdp1", "pu",
            &AuditProperties {
                integrity_audit_period_seconds: Some(-1),
                .. properties("negative")
            },
            Arc::new(TestClock::default())
        ).unwrap();
        audit.start().unwrap();
        assert!(!audit.is_running());
        assert_eq!(audit.cycle_count(), 0);
    }

    #[test]
    fn start_stop_restart() {
        let mut audit = IntegrityAudit::new(
            "pdp1", "pu", &properties("restart"),
            Arc::new(TestClock::default())
        ).unwrap();
        audit.start().unwrap();
        assert!(audit.is_running());
        audit.start().unwrap();
        assert!(audit.is_running());
        audit.stop();
        assert!(!audit.is_running());
        audit.stop();

        let stepper = audit.start_stepped().unwrap();
        assert_eq!(audit.cycle_count(), 0);
        let report = stepper.step().unwrap();
        assert!(report.designation.is_self());
        assert_eq!(audit.cycle_count(), 1);
        audit.delete_registry_entries().unwrap();
    }
}
