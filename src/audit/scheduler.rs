//! The audit thread.
//!
//! Each node runs one thread that repeatedly wakes up, checks the
//! designation, audits if designated, and heartbeats. The thread is either
//! driven by a timer or, for tests, stepped explicitly one cycle at a time.

use std::{io, thread};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use chrono::{DateTime, TimeDelta, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use crate::commons::clock::{Clock, Interrupt, InterruptHandle, Sleep};
use crate::constants::STOP_TIMEOUT;
use super::engine::{AuditReport, DbAudit};
use super::error::{AuditError, DaoError};
use super::gateway::PersistenceGateway;
use super::integrity::AuditSettings;
use super::registry::Registration;
use super::rotation::{Designation, Rotation};


//------------ AuditCycle ----------------------------------------------------

/// The state kept by the audit thread between cycles.
///
/// Only local state lives here. Everything about peers is read fresh from
/// the registry in every cycle.
pub struct AuditCycle {
    settings: Arc<AuditSettings>,
    registration: Registration,
    gateway: Arc<dyn PersistenceGateway>,
    clock: Arc<dyn Clock>,

    /// Whether our entry has been written since the thread started.
    registered: bool,

    /// When our last audit pass as designee completed.
    audit_completed_at: Option<DateTime<Utc>>,
}

impl AuditCycle {
    pub fn new(
        settings: Arc<AuditSettings>,
        gateway: Arc<dyn PersistenceGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        AuditCycle {
            registration: settings.registration(),
            settings, gateway, clock,
            registered: false,
            audit_completed_at: None,
        }
    }

    /// Runs one cycle.
    ///
    /// Every cycle starts with the `Running audit for …` line, whether or
    /// not we end up auditing. Registers if necessary, decides the
    /// designation, audits if we are the designee, and finally heartbeats. Errors are logged and end up
    /// in the report. They never end the thread.
    pub fn run_once(&mut self, interrupt: &Interrupt) -> CycleReport {
        info!(
            "Running audit for persistenceUnit={} on resourceName={}",
            self.settings.persistence_unit, self.settings.resource_name
        );
        if !self.registered {
            self.registered = self.heartbeat();
            if !self.registered {
                return CycleReport {
                    designation: Designation::NoDesignee,
                    outcome: AuditOutcome::RegistryUnavailable,
                    heartbeat: false,
                }
            }
        }
        let (designation, outcome) = match self.designate_and_audit(interrupt) {
            Ok(res) => res,
            Err(err) => {
                error!("Integrity audit cycle failed: {}", err);
                (Designation::NoDesignee, AuditOutcome::RegistryUnavailable)
            }
        };
        let heartbeat = self.heartbeat();
        CycleReport { designation, outcome, heartbeat }
    }

    fn designate_and_audit(
        &mut self, interrupt: &Interrupt
    ) -> Result<(Designation, AuditOutcome), DaoError> {
        let settings = self.settings.clone();
        let pu = settings.persistence_unit.as_str();
        let me = settings.resource_name.as_str();
        let node_type = settings.node_type;

        let entries = self.gateway.list_registry_entries(pu, node_type)?;
        let now = self.clock.now();
        let rotation = Rotation::new(&entries, me, now, settings.staleness());
        let decision = rotation.decide();
        if let Some(winner) = decision.claim.as_deref() {
            info!(
                "Designating resourceName={} for persistenceUnit={}, \
                 nodeType={}",
                winner, pu, node_type
            );
            self.gateway.change_designated(pu, node_type, winner)?;
        }
        if !decision.designation.is_self() {
            self.audit_completed_at = None;
            return Ok((decision.designation, AuditOutcome::NotDesignated))
        }

        if let Some(completed) = self.audit_completed_at {
            let since = now.signed_duration_since(completed);
            if since < settings.completion_interval() {
                return Ok((Designation::SelfDesignated, AuditOutcome::Holding))
            }
            self.audit_completed_at = None;
            if let Some(successor) = rotation.successor() {
                if successor != me {
                    info!(
                        "Handing designation for persistenceUnit={} from \
                         resourceName={} to resourceName={}",
                        pu, me, successor
                    );
                    self.gateway.change_designated(pu, node_type, successor)?;
                    return Ok((
                        Designation::PeerDesignated(successor.into()),
                        AuditOutcome::HandedOver(successor.into())
                    ))
                }
            }
        }

        info!(
            "Auditing persistenceUnit={} as designated resourceName={}",
            pu, me
        );
        let res = DbAudit::new(
            self.gateway.as_ref(), self.clock.as_ref(), interrupt
        ).with_recheck(
            settings.mismatch_recheck
        ).db_audit(me, pu, node_type);

        let outcome = match res {
            Ok(report) => {
                self.audit_completed_at = Some(self.clock.now());
                AuditOutcome::Completed(report)
            }
            Err(err) => {
                if err.is_insufficient_entries() {
                    self.audit_completed_at = Some(self.clock.now());
                }
                else {
                    error!(
                        "Integrity audit for persistenceUnit={} on \
                         resourceName={} failed: {}",
                        pu, me, err
                    );
                }
                AuditOutcome::Failed(err)
            }
        };
        Ok((Designation::SelfDesignated, outcome))
    }

    /// Writes our registry entry. Returns whether that worked.
    fn heartbeat(&self) -> bool {
        match self.gateway.upsert_registry_entry(
            &self.registration, self.clock.now()
        ) {
            Ok(_) => true,
            Err(err) => {
                error!(
                    "Cannot update registry entry of resourceName={}: {}",
                    self.registration.resource_name, err
                );
                false
            }
        }
    }
}


//------------ CycleReport ---------------------------------------------------

/// What happened during one cycle.
#[derive(Debug)]
pub struct CycleReport {
    /// The designation at the end of the cycle.
    pub designation: Designation,

    pub outcome: AuditOutcome,

    /// Whether the heartbeat was written.
    pub heartbeat: bool,
}

impl CycleReport {
    /// Returns whether an audit pass was run.
    pub fn audited(&self) -> bool {
        matches!(
            self.outcome,
            AuditOutcome::Completed(_) | AuditOutcome::Failed(_)
        )
    }
}

/// What the audit part of a cycle did.
#[derive(Debug)]
pub enum AuditOutcome {
    /// Someone else is designated.
    NotDesignated,

    /// We are designated but our last pass completed only recently.
    Holding,

    /// We handed the designation to the given resource.
    HandedOver(String),

    Completed(AuditReport),

    Failed(AuditError),

    /// The registry could not be accessed.
    RegistryUnavailable,
}


//------------ Trigger -------------------------------------------------------

/// What starts a cycle.
pub enum Trigger {
    /// Sleep for the period between cycles.
    Timer(Duration),

    /// Wait for a step request and send back its report.
    Stepped(Receiver<Sender<CycleReport>>),
}


//------------ AuditThread ---------------------------------------------------

/// A running audit thread.
#[derive(Debug)]
pub struct AuditThread {
    name: String,
    handle: Option<JoinHandle<()>>,
    interrupt: InterruptHandle,

    /// Disconnects when the thread has finished.
    done: Receiver<()>,
}

impl AuditThread {
    /// Spawns the thread.
    ///
    /// `cycles` is incremented each time the thread wakes up for a cycle.
    pub fn spawn(
        name: String,
        cycle: AuditCycle,
        trigger: Trigger,
        cycles: Arc<AtomicU64>,
    ) -> Result<Self, io::Error> {
        let (handle, interrupt) = Interrupt::new();
        let (done_tx, done) = crossbeam_channel::bounded::<()>(0);
        let join = thread::Builder::new().name(name.clone()).spawn(move || {
            let _done = done_tx;
            match trigger {
                Trigger::Timer(period) => {
                    run_timer(cycle, period, &interrupt, &cycles)
                }
                Trigger::Stepped(steps) => {
                    run_stepped(cycle, steps, &interrupt, &cycles)
                }
            }
            debug!("Integrity audit thread exiting");
        })?;
        Ok(AuditThread {
            name, handle: Some(join), interrupt: handle, done
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|handle| {
            !handle.is_finished()
        }).unwrap_or(false)
    }

    /// Stops the thread.
    ///
    /// Asks the thread to stop and waits for it. If it doesn’t stop in
    /// time, aborts a running audit pass and waits once more. If it still
    /// hasn’t stopped, the thread is left to its fate.
    pub fn stop(mut self) {
        self.interrupt.request_stop();
        if !self.wait() {
            warn!(
                "Thread {} did not stop within {}s, aborting audit",
                self.name, STOP_TIMEOUT.as_secs()
            );
            self.interrupt.abort();
            if !self.wait() {
                error!(
                    "Thread {} did not stop after abort, detaching it",
                    self.name
                );
                self.handle = None;
                return
            }
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Thread {} panicked", self.name);
            }
        }
    }

    /// Waits for the thread to finish. Returns whether it did.
    fn wait(&self) -> bool {
        match self.done.recv_timeout(STOP_TIMEOUT) {
            Err(RecvTimeoutError::Timeout) => false,
            _ => true,
        }
    }
}

fn run_timer(
    mut cycle: AuditCycle,
    period: Duration,
    interrupt: &Interrupt,
    cycles: &AtomicU64,
) {
    let clock = cycle.clock.clone();
    loop {
        if clock.sleep(period, interrupt) == Sleep::Interrupted {
            break
        }
        cycles.fetch_add(1, Ordering::Relaxed);
        cycle.run_once(interrupt);
    }
}

fn run_stepped(
    mut cycle: AuditCycle,
    steps: Receiver<Sender<CycleReport>>,
    interrupt: &Interrupt,
    cycles: &AtomicU64,
) {
    loop {
        crossbeam_channel::select! {
            recv(steps) -> step => {
                let Ok(reply) = step else { break };
                cycles.fetch_add(1, Ordering::Relaxed);
                let _ = reply.send(cycle.run_once(interrupt));
            }
            recv(interrupt.stop_receiver()) -> _ => break,
        }
    }
}


//------------ Stepper -------------------------------------------------------

/// Runs the cycles of a stepped audit thread.
#[derive(Clone, Debug)]
pub struct Stepper {
    steps: Sender<Sender<CycleReport>>,
}

impl Stepper {
    /// Creates a stepper and the trigger for the thread it steps.
    pub fn new() -> (Self, Trigger) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Stepper { steps: tx }, Trigger::Stepped(rx))
    }

    /// Runs exactly one cycle and returns its report.
    ///
    /// Returns `None` if the thread has stopped.
    pub fn step(&self) -> Option<CycleReport> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.steps.send(tx).ok()?;
        rx.recv().ok()
    }
}


//------------ Helpers -------------------------------------------------------

/// Converts a duration into a time delta, saturating.
pub(super) fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;
    use crate::audit::gateway::StoreGateway;
    use crate::audit::integrity::AuditProperties;
    use crate::commons::clock::TestClock;

    fn cycle(name: &str, registry: &str, clock: &TestClock) -> AuditCycle {
        let properties = AuditProperties {
            site: Some("SiteA".into()),
            node_type: Some("pap".into()),
            integrity_audit_period_seconds: Some(1),
            db_url: Some(format!("memory:{registry}-{name}")),
            db_user: Some("user".into()),
            db_driver: Some("memory".into()),
            registry_uri: Some(format!("memory:{registry}")),
            .. Default::default()
        };
        let settings = Arc::new(
            properties.validate(name, "schedulerPU").unwrap()
        );
        let gateway = StoreGateway::new(
            &Url::parse(&format!("memory:{registry}")).unwrap()
        ).unwrap();
        AuditCycle::new(settings, Arc::new(gateway), Arc::new(clock.clone()))
    }

    #[test]
    fn single_resource_holds_and_reaudits() {
        let clock = TestClock::default();
        let mut pdp1 = cycle("pdp1", "scheduler-single", &clock);
        let interrupt = Interrupt::never();

        let report = pdp1.run_once(&interrupt);
        assert_eq!(report.designation, Designation::SelfDesignated);
        assert!(report.audited());
        assert!(report.heartbeat);

        clock.advance(Duration::from_secs(10));
        let report = pdp1.run_once(&interrupt);
        assert_eq!(report.designation, Designation::SelfDesignated);
        assert!(matches!(report.outcome, AuditOutcome::Holding));

        clock.advance(Duration::from_secs(30));
        let report = pdp1.run_once(&interrupt);
        assert_eq!(report.designation, Designation::SelfDesignated);
        assert!(report.audited());
    }

    #[test]
    fn designee_hands_over_after_completion() {
        let clock = TestClock::default();
        let mut pdp1 = cycle("pdp1", "scheduler-handover", &clock);
        let mut pdp2 = cycle("pdp2", "scheduler-handover", &clock);
        let interrupt = Interrupt::never();

        pdp1.run_once(&interrupt);
        let report = pdp2.run_once(&interrupt);
        assert_eq!(
            report.designation, Designation::PeerDesignated("pdp1".into())
        );

        // pdp1 audited alone in its first cycle, holds now.
        clock.advance(Duration::from_secs(31));
        let report = pdp1.run_once(&interrupt);
        assert!(matches!(report.outcome, AuditOutcome::HandedOver(ref s) if s == "pdp2"));

        let report = pdp2.run_once(&interrupt);
        assert_eq!(report.designation, Designation::SelfDesignated);
        assert!(matches!(report.outcome, AuditOutcome::Completed(_)));

        let report = pdp1.run_once(&interrupt);
        assert_eq!(
            report.designation, Designation::PeerDesignated("pdp2".into())
        );
    }

    #[test]
    fn stepped_thread() {
        let clock = TestClock::default();
        let cycles = Arc::new(AtomicU64::new(0));
        let (stepper, trigger) = Stepper::new();
        let audit_thread = AuditThread::spawn(
            "integrity-audit-stepped".into(),
            cycle("pdp1", "scheduler-stepped", &clock),
            trigger,
            cycles.clone(),
        ).unwrap();
        assert!(stepper.step().unwrap().audited());
        assert!(stepper.step().is_some());
        assert_eq!(cycles.load(Ordering::Relaxed), 2);
        assert!(audit_thread.is_running());
        audit_thread.stop();
        assert!(stepper.step().is_none());
    }

    #[test]
    fn timer_thread_stops() {
        let clock = TestClock::default();
        let cycles = Arc::new(AtomicU64::new(0));
        let audit_thread = AuditThread::spawn(
            "integrity-audit-timer".into(),
            cycle("pdp1", "scheduler-timer", &clock),
            Trigger::Timer(Duration::from_secs(60)),
            cycles.clone(),
        ).unwrap();
        while cycles.load(Ordering::Relaxed) < 3 {
            thread::yield_now();
        }
        audit_thread.stop();
    }
}
