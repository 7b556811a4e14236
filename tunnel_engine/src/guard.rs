//! Migration from the legacy to the modern transport with rollback.
//!
//! ```text
//! Start -> LegacyDisabled -> NewInstalled -> Verified -> committed
//!   \__________________\_______________\______ RolledBack
//! ```
//!
//! A [`MigrationGuard`] owns the [`MigrationState`] of one attempt. It must be
//! finished with [`MigrationGuard::commit`] or [`MigrationGuard::rollback`];
//! a guard dropped in between restores the legacy transport on its own and
//! can only log what went wrong while doing so.

use crate::backend::SystemMetadata;
use crate::controller::TransportController;
use crate::error::{EngineError, EngineResult};
use crate::host::HostIdentity;
use crate::legacy::LegacyTransport;
use crate::probe::ConnectivityProbe;
use crate::setup::SetupOrchestrator;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{error, info, warn};

/// Progress of one migration attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationState {
    pub legacy_disabled: bool,
    pub new_installed: bool,
    pub verified: bool,
}

/// Disables the legacy transport and puts it back unless committed.
pub struct MigrationGuard<'a> {
    legacy: &'a dyn LegacyTransport,
    host: &'a dyn HostIdentity,
    controller: &'a TransportController,
    terminal_id: u32,
    legacy_server: IpAddr,
    state: MigrationState,
    finished: bool,
}

impl<'a> MigrationGuard<'a> {
    /// Disable and stop the legacy transport.
    ///
    /// If that fails nothing has changed and no guard is created.
    pub fn begin(
        legacy: &'a dyn LegacyTransport,
        host: &'a dyn HostIdentity,
        controller: &'a TransportController,
        terminal_id: u32,
        legacy_server: IpAddr,
    ) -> EngineResult<Self> {
        legacy.disable()?;

        Ok(Self {
            legacy,
            host,
            controller,
            terminal_id,
            legacy_server,
            state: MigrationState {
                legacy_disabled: true,
                ..Default::default()
            },
            finished: false,
        })
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    /// Run the installation step of the new transport.
    pub fn install<F>(&mut self, install: F) -> EngineResult<()>
    where
        F: FnOnce() -> EngineResult<()>,
    {
        install()?;
        self.state.new_installed = true;
        Ok(())
    }

    /// Check that `target` answers over the new transport.
    pub fn verify(
        &mut self,
        probe: &ConnectivityProbe,
        target: &str,
        grace: Duration,
        attempts: u32,
    ) -> EngineResult<bool> {
        let reachable = probe.probe_with_retries(target, grace, attempts)?;
        self.state.verified = reachable;
        Ok(reachable)
    }

    /// Keep the new transport.
    pub fn commit(mut self) -> MigrationState {
        info!("Migration of system #{} committed", self.terminal_id);
        self.finished = true;
        self.state
    }

    /// Remove the new transport and bring the legacy one back.
    ///
    /// Every restore step is attempted; the first failure is returned.
    pub fn rollback(mut self) -> EngineResult<()> {
        self.finished = true;
        self.restore()
    }

    fn restore(&mut self) -> EngineResult<()> {
        info!("Rolling back to the legacy transport");
        let mut first_error: Option<EngineError> = None;

        match self.controller.remove() {
            Ok(true) => record(&mut first_error, self.controller.reload()),
            Ok(false) => {}
            Err(e) => record(&mut first_error, Err(e)),
        }

        record(&mut first_error, self.legacy.enable());
        record(
            &mut first_error,
            self.host.configure(self.terminal_id, self.legacy_server),
        );

        self.state = MigrationState::default();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn record(first_error: &mut Option<EngineError>, result: EngineResult<()>) {
    if let Err(e) = result {
        error!("Rollback step failed: {}", e);
        first_error.get_or_insert(e);
    }
}

impl Drop for MigrationGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Migration guard dropped without commit");

            if let Err(e) = self.restore() {
                error!("Could not restore legacy transport: {}", e);
            }
        }
    }
}

/// Settings of one migration attempt.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Address pinged over the new transport
    pub target: IpAddr,
    /// Address the host identity falls back to on rollback
    pub legacy_server: IpAddr,
    pub grace: Duration,
    pub attempts: u32,
    pub metadata: SystemMetadata,
}

/// Result of a migration that did not fail outright.
#[derive(Debug)]
pub enum MigrationOutcome {
    Committed,
    RolledBack(RollbackCause),
}

/// Why a migration was rolled back.
#[derive(Debug)]
pub enum RollbackCause {
    /// The server did not answer over the new transport
    Unreachable,
    /// A step of the new transport failed
    Failed(EngineError),
}

impl MigrationOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, MigrationOutcome::Committed)
    }
}

/// Migrate the configured terminal from the legacy to the modern transport.
///
/// Failures of the new transport are rolled back and reported as
/// [`MigrationOutcome::RolledBack`]. `Err` means the migration could not
/// start or the rollback itself failed.
pub fn migrate(
    orchestrator: &SetupOrchestrator<'_>,
    probe: &ConnectivityProbe,
    options: &MigrationOptions,
) -> EngineResult<MigrationOutcome> {
    let stack = orchestrator.stack();
    let terminal_id = stack.host.terminal_id()?;

    info!("Migrating system #{} to the modern transport", terminal_id);

    let mut guard = MigrationGuard::begin(
        stack.legacy,
        stack.host,
        stack.controller,
        terminal_id,
        options.legacy_server,
    )?;

    if let Err(e) = guard.install(|| orchestrator.patch_transport(terminal_id, &options.metadata)) {
        error!("Installing the new transport failed: {}", e);
        guard.rollback()?;
        return Ok(MigrationOutcome::RolledBack(RollbackCause::Failed(e)));
    }

    let target = options.target.to_string();

    match guard.verify(probe, &target, options.grace, options.attempts) {
        Ok(true) => {
            guard.commit();
            Ok(MigrationOutcome::Committed)
        }
        Ok(false) => {
            warn!("{} is not reachable over the new transport", target);
            guard.rollback()?;
            Ok(MigrationOutcome::RolledBack(RollbackCause::Unreachable))
        }
        Err(e) => {
            error!("Verifying the new transport failed: {}", e);
            guard.rollback()?;
            Ok(MigrationOutcome::RolledBack(RollbackCause::Failed(e)))
        }
    }
}
