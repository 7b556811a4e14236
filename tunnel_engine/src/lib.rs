//! Transport configuration and migration engine for the terminal VPN.
//!
//! Terminals reach the management backend through one of two mutually
//! exclusive transports: the legacy OpenVPN client service or a WireGuard
//! interface driven by systemd-networkd. This crate generates the
//! systemd-networkd units from backend parameters, installs and removes
//! them, checks reachability and switches a live terminal between the two
//! transports with automatic rollback.
//!
//! Everything here is synchronous and blocking. Subprocesses go through
//! [`CommandRunner`]; the backend, the host identity and the legacy
//! transport are traits so callers and tests can substitute them.

pub mod backend;
pub mod controller;
pub mod error;
pub mod facts;
pub mod generator;
pub mod guard;
pub mod host;
pub mod keys;
pub mod legacy;
pub mod params;
pub mod probe;
pub mod reset;
pub mod setup;
pub mod system;
pub mod units;

pub use backend::{Backend, RegisteredSystem, SystemMetadata};
pub use controller::TransportController;
pub use error::{EngineError, EngineResult, ErrorKind};
pub use facts::{HostFacts, HostReport};
pub use generator::{GeneratedArtifacts, UnitGenerator};
pub use guard::{
    migrate, MigrationGuard, MigrationOptions, MigrationOutcome, MigrationState, RollbackCause,
};
pub use host::{HostIdentity, SystemHostIdentity};
pub use keys::{KeyPair, KeyPairProvider, PrivateKey, X25519KeyPairProvider};
pub use legacy::{LegacyTransport, OpenVpnService};
pub use params::{Peer, Route, TunnelParameters, DEFAULT_MTU};
pub use probe::ConnectivityProbe;
pub use reset::reset_terminal;
pub use setup::{LegacySetupOptions, SetupOrchestrator, TransportStack};
pub use system::{CommandOutput, CommandRunner, FileOwnership, SystemCommandRunner};
