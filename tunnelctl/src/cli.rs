//! Command-line definition of `tunnelctl`.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevelArg {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevelArg> for tracing::Level {
    fn from(level: LogLevelArg) -> Self {
        match level {
            LogLevelArg::Trace => tracing::Level::TRACE,
            LogLevelArg::Debug => tracing::Level::DEBUG,
            LogLevelArg::Info => tracing::Level::INFO,
            LogLevelArg::Warn => tracing::Level::WARN,
            LogLevelArg::Error => tracing::Level::ERROR,
        }
    }
}

/// Set up, migrate and reset the terminal management VPN
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, after_help = "Examples:\n  tunnelctl setup --serial-number 4711-A --model Neptun\n  tunnelctl migrate --grace-time 15\n  tunnelctl render --params wireguard.json")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", env = "TERMVPN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level, overrides the configuration
    #[arg(short, long, value_enum)]
    pub log_level: Option<LogLevelArg>,

    /// Emit logs as JSON
    #[arg(long, env = "TERMVPN_JSON_LOGS")]
    pub json_logs: bool,

    /// Shorthand for --log-level debug
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register this terminal and switch it to WireGuard
    Setup(SetupArgs),

    /// Move a running OpenVPN terminal to WireGuard, rolling back on failure
    Migrate(MigrateArgs),

    /// Permanently disable one of the transports
    Disable {
        #[arg(value_enum)]
        transport: Transport,
    },

    /// Check whether a VPN server answers
    Probe {
        /// Address to ping (default: the WireGuard server)
        #[arg(short, long)]
        target: Option<IpAddr>,

        /// Seconds to wait before each check
        #[arg(short, long, default_value_t = 0)]
        grace_time: u64,

        /// Number of checks before giving up
        #[arg(short, long, default_value_t = 1)]
        attempts: u32,
    },

    /// Print the units generated from backend parameters without installing them
    Render {
        /// JSON file with the tunnel parameters or a whole system record
        #[arg(short, long, value_name = "FILE")]
        params: PathBuf,

        /// Private key to embed instead of a placeholder
        #[arg(long)]
        private_key: Option<String>,
    },

    /// Remove all VPN configuration and the host identity
    Reset {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    Wireguard,
    Openvpn,
}

#[derive(clap::Args, Debug)]
pub struct SetupArgs {
    /// ID of an existing system to re-key
    #[arg(long, required_if_eq("transport", "openvpn"))]
    pub id: Option<u32>,

    /// Transport to configure
    #[arg(short, long, value_enum, default_value_t = Transport::Wireguard)]
    pub transport: Transport,

    /// Re-key a system that is already configured
    #[arg(short, long)]
    pub force: bool,

    /// The system's serial number
    #[arg(short, long)]
    pub serial_number: Option<String>,

    /// Hardware model
    #[arg(short, long)]
    pub model: Option<String>,

    /// Operating system reported to the backend
    #[arg(short, long, default_value = "Arch Linux")]
    pub operating_system: String,

    /// System group of a new system
    #[arg(short = 'G', long, default_value_t = 1)]
    pub group: u32,

    /// MTU of the tunnel interface (default: from the configuration)
    #[arg(long)]
    pub mtu: Option<u32>,

    /// Backend user name (prompted if missing)
    #[arg(short, long, env = "TERMVPN_USER")]
    pub user: Option<String>,

    /// Seconds to wait for the OpenVPN connection (default: from the configuration)
    #[arg(short, long)]
    pub grace_time: Option<u64>,

    /// Disable the other transport
    #[arg(short = 'x', long)]
    pub exclusive: bool,

    /// Reboot without asking once the setup is done
    #[arg(short, long)]
    pub reboot: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(clap::Args, Debug)]
pub struct MigrateArgs {
    /// Seconds to wait before testing the new connection (default: from the configuration)
    #[arg(short, long)]
    pub grace_time: Option<u64>,

    /// Number of connection tests before rolling back
    #[arg(short, long, default_value_t = 1)]
    pub attempts: u32,

    /// MTU of the tunnel interface (default: from the configuration)
    #[arg(long)]
    pub mtu: Option<u32>,

    /// Backend user name (prompted if missing)
    #[arg(short, long, env = "TERMVPN_USER")]
    pub user: Option<String>,
}

impl Cli {
    /// Effective log level: `--log-level`, then `--verbose`, then the configuration.
    pub fn level(&self, configured: tracing::Level) -> tracing::Level {
        match (self.log_level, self.verbose) {
            (Some(level), _) => level.into(),
            (None, true) => tracing::Level::DEBUG,
            (None, false) => configured,
        }
    }

    /// Whether the command changes the system.
    pub fn needs_root(&self) -> bool {
        matches!(
            self.command,
            Command::Setup(_) | Command::Migrate(_) | Command::Disable { .. } | Command::Reset { .. }
        )
    }
}
