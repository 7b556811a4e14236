//! Creating and re-keying terminals on the modern transport.

use crate::backend::{Backend, SystemMetadata};
use crate::controller::TransportController;
use crate::error::{EngineError, EngineResult};
use crate::facts::HostReport;
use crate::generator::UnitGenerator;
use crate::host::HostIdentity;
use crate::keys::{KeyPairProvider, PrivateKey};
use crate::legacy::LegacyTransport;
use crate::params::TunnelParameters;
use crate::probe::ConnectivityProbe;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The local pieces a transport switch is made of.
pub struct TransportStack<'a> {
    pub keys: &'a dyn KeyPairProvider,
    pub generator: &'a UnitGenerator,
    pub controller: &'a TransportController,
    pub host: &'a dyn HostIdentity,
    pub legacy: &'a dyn LegacyTransport,
}

/// Setting up a terminal on the legacy transport.
#[derive(Debug, Clone)]
pub struct LegacySetupOptions {
    /// Tunnel-side address of the legacy server
    pub server: IpAddr,
    /// Wait before checking the new connection
    pub grace: Duration,
    /// Set up a terminal the backend reports as configured
    pub force: bool,
    pub report: HostReport,
}

/// Registers the terminal with the backend and installs the tunnel it hands
/// out.
pub struct SetupOrchestrator<'a> {
    backend: &'a dyn Backend,
    stack: TransportStack<'a>,
    server: IpAddr,
    mtu: Option<u32>,
}

impl<'a> SetupOrchestrator<'a> {
    /// `server` is the tunnel-side address of the modern transport's server.
    pub fn new(backend: &'a dyn Backend, stack: TransportStack<'a>, server: IpAddr) -> Self {
        Self {
            backend,
            stack,
            server,
            mtu: None,
        }
    }

    /// Override the MTU handed out by the backend.
    pub fn with_mtu(mut self, mtu: Option<u32>) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn stack(&self) -> &TransportStack<'a> {
        &self.stack
    }

    /// Register a new terminal and switch it to the modern transport.
    pub fn create_new(&self, metadata: &SystemMetadata) -> EngineResult<u32> {
        debug!("Creating public / private key pair");
        let pair = self.stack.keys.generate()?;

        info!("Creating new system");
        let system = self.backend.register_system(&pair.public_key, metadata)?;
        info!("New system ID: {}", system.id);

        self.install(system.id, system.params, &pair.private_key)?;
        self.disable_legacy()?;

        Ok(system.id)
    }

    /// Re-key an existing terminal and switch it to the modern transport.
    ///
    /// A terminal the backend reports as configured, over either transport,
    /// is only touched with `force`.
    pub fn patch_existing(
        &self,
        terminal_id: u32,
        metadata: &SystemMetadata,
        force: bool,
    ) -> EngineResult<u32> {
        if force {
            warn!("Forcing reconfiguration of system #{}", terminal_id);
        } else if self.backend.is_configured(terminal_id)? {
            return Err(EngineError::AlreadyConfigured(terminal_id));
        }

        self.patch_transport(terminal_id, metadata)?;
        self.disable_legacy()?;

        Ok(terminal_id)
    }

    /// New key pair, backend update and local installation, leaving the
    /// legacy transport alone.
    pub fn patch_transport(&self, terminal_id: u32, metadata: &SystemMetadata) -> EngineResult<()> {
        debug!("Creating public / private key pair");
        let pair = self.stack.keys.generate()?;

        info!("Changing existing system #{}", terminal_id);
        let params = self
            .backend
            .patch_system(terminal_id, &pair.public_key, metadata)?;

        self.install(terminal_id, params, &pair.private_key)
    }

    /// Install the legacy client configuration of an existing terminal.
    ///
    /// The backend is only told about the terminal once its server answers.
    pub fn setup_legacy(
        &self,
        terminal_id: u32,
        probe: &ConnectivityProbe,
        options: &LegacySetupOptions,
    ) -> EngineResult<()> {
        if options.force {
            warn!("Forcing reconfiguration of system #{}", terminal_id);
        } else if self.backend.is_configured(terminal_id)? {
            return Err(EngineError::AlreadyConfigured(terminal_id));
        }

        debug!("Downloading OpenVPN configuration");
        let archive = self.backend.fetch_legacy_config(terminal_id)?;

        self.stack.host.configure(terminal_id, options.server)?;
        self.stack.legacy.install(&archive)?;
        self.stack.legacy.enable()?;
        self.stack.legacy.restart()?;

        let target = options.server.to_string();

        if !probe.probe(&target, options.grace)? {
            return Err(EngineError::Unreachable(target));
        }

        info!("Finalizing system #{}", terminal_id);
        self.backend.finalize(terminal_id, &options.report)
    }

    fn install(
        &self,
        terminal_id: u32,
        mut params: TunnelParameters,
        private_key: &PrivateKey,
    ) -> EngineResult<()> {
        if let Some(public_key) = &params.existing_public_key {
            warn!("Tunnel already configured for public key {}", public_key);
        }

        if let Some(mtu) = self.mtu {
            params.mtu = Some(mtu);
        }

        let artifacts = self.stack.generator.generate(&params, private_key)?;
        debug!(
            "Generated units for {} peer(s) and {} route(s)",
            params.peers.len(),
            params.route_count()
        );

        self.stack.host.configure(terminal_id, self.server)?;

        info!("Installing tunnel configuration");
        self.stack.controller.apply(&artifacts)
    }

    fn disable_legacy(&self) -> EngineResult<()> {
        debug!("Disabling legacy transport");
        self.stack.legacy.disable()
    }
}
