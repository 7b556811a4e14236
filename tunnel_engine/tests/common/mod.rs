//! Recording fakes for the engine's collaborators.

#![allow(dead_code)]

use shared_utils::config::WireGuardConfig;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tunnel_engine::{
    Backend, CommandOutput, CommandRunner, ConnectivityProbe, EngineError, EngineResult,
    HostIdentity, HostReport, LegacyTransport, Peer, RegisteredSystem, Route, SetupOrchestrator,
    SystemMetadata, TransportController, TransportStack, TunnelParameters, UnitGenerator,
    X25519KeyPairProvider,
};

pub const LEGACY_SERVER: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 8, 0, 1));
pub const MODERN_SERVER: IpAddr =
    IpAddr::V6(Ipv6Addr::new(0xfd56, 0x1dda, 0x8794, 0xcb90, 0xffff, 0xffff, 0xffff, 0xfffe));

pub fn sample_params() -> TunnelParameters {
    TunnelParameters {
        address: "10.0.0.2/24".to_string(),
        peers: vec![Peer {
            public_key: "PK1".to_string(),
            routes: vec![Route {
                destination: "0.0.0.0/0".to_string(),
                gateway: "10.0.0.1".to_string(),
                gateway_onlink: None,
            }],
            endpoint: "vpn.example:51820".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Answers every command with success unless told otherwise.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
    missing: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn fail(&self, prefix: &str) {
        self.failing.lock().unwrap().push(prefix.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
        self.missing.lock().unwrap().clear();
    }

    pub fn missing(&self, program: &str) {
        self.missing.lock().unwrap().push(program.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let line = format!("{} {}", program, args.join(" "));
        self.calls.lock().unwrap().push(line.clone());

        if self.missing.lock().unwrap().iter().any(|p| p == program) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "not installed"));
        }

        if self.failing.lock().unwrap().iter().any(|p| line.starts_with(p.as_str())) {
            return Ok(CommandOutput::failed(1, "simulated failure"));
        }

        Ok(CommandOutput::ok())
    }
}

/// Backend serving fixed parameters.
pub struct FakeBackend {
    pub params: Mutex<TunnelParameters>,
    pub next_id: u32,
    /// Set up before, e.g. over the legacy transport
    pub configured: Mutex<bool>,
    pub unavailable: Mutex<bool>,
    pub public_keys: Mutex<Vec<String>>,
    pub metadata: Mutex<Vec<SystemMetadata>>,
    pub legacy_config: Vec<u8>,
    pub finalized: Mutex<Vec<(u32, HostReport)>>,
}

impl FakeBackend {
    pub fn new(params: TunnelParameters) -> Self {
        Self {
            params: Mutex::new(params),
            next_id: 4711,
            configured: Mutex::new(false),
            unavailable: Mutex::new(false),
            public_keys: Mutex::new(Vec::new()),
            metadata: Mutex::new(Vec::new()),
            legacy_config: b"client.conf".to_vec(),
            finalized: Mutex::new(Vec::new()),
        }
    }

    fn check(&self) -> EngineResult<()> {
        if *self.unavailable.lock().unwrap() {
            Err(EngineError::BackendUnavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    fn record(&self, public_key: &str, metadata: &SystemMetadata) {
        self.public_keys.lock().unwrap().push(public_key.to_string());
        self.metadata.lock().unwrap().push(metadata.clone());
    }
}

impl Backend for FakeBackend {
    fn fetch_tunnel_info(&self, _terminal_id: u32) -> EngineResult<TunnelParameters> {
        self.check()?;
        Ok(self.params.lock().unwrap().clone())
    }

    fn is_configured(&self, terminal_id: u32) -> EngineResult<bool> {
        let params = self.fetch_tunnel_info(terminal_id)?;
        Ok(*self.configured.lock().unwrap() || params.existing_public_key.is_some())
    }

    fn register_system(
        &self,
        public_key: &str,
        metadata: &SystemMetadata,
    ) -> EngineResult<RegisteredSystem> {
        self.check()?;
        self.record(public_key, metadata);
        Ok(RegisteredSystem {
            id: self.next_id,
            params: self.params.lock().unwrap().clone(),
        })
    }

    fn patch_system(
        &self,
        _terminal_id: u32,
        public_key: &str,
        metadata: &SystemMetadata,
    ) -> EngineResult<TunnelParameters> {
        self.check()?;
        self.record(public_key, metadata);
        Ok(self.params.lock().unwrap().clone())
    }

    fn fetch_legacy_config(&self, _terminal_id: u32) -> EngineResult<Vec<u8>> {
        self.check()?;
        Ok(self.legacy_config.clone())
    }

    fn finalize(&self, terminal_id: u32, report: &HostReport) -> EngineResult<()> {
        self.check()?;
        self.finalized.lock().unwrap().push((terminal_id, report.clone()));
        Ok(())
    }
}

/// Host identity kept in memory.
pub struct FakeHost {
    pub id: u32,
    pub configured: Mutex<Vec<(u32, IpAddr)>>,
    pub resets: Mutex<u32>,
}

impl FakeHost {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            configured: Mutex::new(Vec::new()),
            resets: Mutex::new(0),
        }
    }

    pub fn last_server(&self) -> Option<IpAddr> {
        self.configured.lock().unwrap().last().map(|(_, server)| *server)
    }
}

impl HostIdentity for FakeHost {
    fn configure(&self, terminal_id: u32, server: IpAddr) -> EngineResult<()> {
        self.configured.lock().unwrap().push((terminal_id, server));
        Ok(())
    }

    fn terminal_id(&self) -> EngineResult<u32> {
        Ok(self.id)
    }

    fn reset(&self) -> EngineResult<()> {
        *self.resets.lock().unwrap() += 1;
        Ok(())
    }
}

/// Legacy transport tracking whether it is enabled.
pub struct FakeLegacy {
    pub enabled: Mutex<bool>,
    pub fail_disable: Mutex<bool>,
    pub fail_enable: Mutex<bool>,
    pub cleaned: Mutex<bool>,
    pub installed: Mutex<Vec<Vec<u8>>>,
    pub restarts: Mutex<u32>,
}

impl Default for FakeLegacy {
    fn default() -> Self {
        Self {
            enabled: Mutex::new(true),
            fail_disable: Mutex::new(false),
            fail_enable: Mutex::new(false),
            cleaned: Mutex::new(false),
            installed: Mutex::new(Vec::new()),
            restarts: Mutex::new(0),
        }
    }
}

impl FakeLegacy {
    pub fn is_enabled(&self) -> bool {
        *self.enabled.lock().unwrap()
    }
}

impl LegacyTransport for FakeLegacy {
    fn disable(&self) -> EngineResult<()> {
        if *self.fail_disable.lock().unwrap() {
            return Err(EngineError::LegacyTransport("disable failed".to_string()));
        }
        *self.enabled.lock().unwrap() = false;
        Ok(())
    }

    fn enable(&self) -> EngineResult<()> {
        if *self.fail_enable.lock().unwrap() {
            return Err(EngineError::LegacyTransport("enable failed".to_string()));
        }
        *self.enabled.lock().unwrap() = true;
        Ok(())
    }

    fn clean(&self) -> EngineResult<()> {
        *self.cleaned.lock().unwrap() = true;
        Ok(())
    }

    fn install(&self, archive: &[u8]) -> EngineResult<()> {
        self.installed.lock().unwrap().push(archive.to_vec());
        Ok(())
    }

    fn restart(&self) -> EngineResult<()> {
        *self.restarts.lock().unwrap() += 1;
        Ok(())
    }
}

/// Everything an orchestrator borrows, rooted in a temporary unit directory.
pub struct Harness {
    pub dir: TempDir,
    pub runner: Arc<RecordingRunner>,
    pub backend: FakeBackend,
    pub host: FakeHost,
    pub legacy: FakeLegacy,
    pub keys: X25519KeyPairProvider,
    pub generator: UnitGenerator,
    pub controller: TransportController,
    pub probe: ConnectivityProbe,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_params(sample_params())
    }

    pub fn with_params(params: TunnelParameters) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let config = WireGuardConfig {
            network_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        Self {
            controller: TransportController::from_config(&config, runner.clone())
                .without_ownership(),
            probe: ConnectivityProbe::new(runner.clone(), "/usr/bin/ping"),
            generator: UnitGenerator::from_config(&config),
            keys: X25519KeyPairProvider,
            backend: FakeBackend::new(params),
            host: FakeHost::new(1234),
            legacy: FakeLegacy::default(),
            runner,
            dir,
        }
    }

    pub fn orchestrator(&self) -> SetupOrchestrator<'_> {
        let stack = TransportStack {
            keys: &self.keys,
            generator: &self.generator,
            controller: &self.controller,
            host: &self.host,
            legacy: &self.legacy,
        };

        SetupOrchestrator::new(&self.backend, stack, MODERN_SERVER)
    }

    pub fn unit_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn artifacts_present(&self) -> bool {
        self.controller.is_installed()
    }
}
