//! Crate-wide constants.

use std::time::Duration;


//------------ Binary Names -------------------------------------------------

/// The friendly name of the `integrity-audit` binary.
pub const INTEGRITY_AUDIT_APP: &str = "Integrity Audit";


//------------ Config Files Paths -------------------------------------------

/// The default path to the config file.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/integrity-audit.conf";


//------------ Environment Variables ----------------------------------------

/// The environment variable with the path to the config file.
pub const ENV_CONFIG_FILE: &str = "INTEGRITY_AUDIT_CONFIG";

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. It will
/// be overwritten by the config file. The default is “info.”
pub const ENV_LOG_LEVEL: &str = "INTEGRITY_AUDIT_LOG_LEVEL";


//------------ Storage ------------------------------------------------------

/// The namespace of the registry in the registry store.
pub const REGISTRY_NAMESPACE: &str = "integrity_audit";


//------------ Timing -------------------------------------------------------

/// How long a designee keeps its designation after completing a pass.
///
/// Multiplied by [`AUDIT_RESET_CYCLES`] this is also the time after which an
/// entry without heartbeat is considered stale.
pub const AUDIT_COMPLETION_INTERVAL: Duration = Duration::from_secs(30);

/// The number of completion intervals without heartbeat before staleness.
pub const AUDIT_RESET_CYCLES: u32 = 2;

/// The step slept between cycles when the audit period is zero.
pub const ZERO_PERIOD_STEP: Duration = Duration::from_millis(5);

/// The longest uninterrupted slice of a wall-clock sleep.
pub const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// How long stopping waits for the audit thread before escalating.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);
