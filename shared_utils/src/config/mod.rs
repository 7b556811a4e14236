//! Configuration management module for termvpn.
//!
//! This module provides functionality for loading, parsing, and managing
//! the configuration settings shared by the tunnel engine, the management
//! API client and the command line front end.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// System-wide configuration file, preferred over the per-user location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/termvpn/config.toml";

/// Longest interface name the kernel accepts (IFNAMSIZ - 1).
const MAX_DEVICE_NAME_LEN: usize = 15;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    /// Error parsing TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Missing required configuration value
    #[error("Missing required configuration value: {0}")]
    MissingValue(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),
}

/// Settings of the modern (WireGuard) transport and its systemd-networkd units.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireGuardConfig {
    /// Interface name, also the base name of the unit files (default: "terminals")
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// Description written into the netdev unit
    #[serde(default = "default_description")]
    pub description: String,

    /// Interface MTU in bytes (default: 1280)
    #[serde(default = "default_mtu")]
    pub mtu: u32,

    /// Directory systemd-networkd reads its units from
    #[serde(default = "default_network_dir")]
    pub network_dir: PathBuf,

    /// Owner of the netdev unit; empty disables the chown
    #[serde(default = "default_netdev_owner")]
    pub netdev_owner: String,

    /// Group of the netdev unit; empty disables the chown
    #[serde(default = "default_netdev_group")]
    pub netdev_group: String,

    /// Permission bits of the netdev unit (default: 0o640)
    #[serde(default = "default_netdev_mode")]
    pub netdev_mode: u32,

    /// Address of the VPN server reachable through the tunnel
    #[serde(default = "default_wireguard_server")]
    pub server: IpAddr,

    /// Service restarted to load the units
    #[serde(default = "default_network_service")]
    pub network_service: String,
}

fn default_device_name() -> String {
    "terminals".to_string()
}

fn default_description() -> String {
    "Terminal maintenance VPN.".to_string()
}

fn default_mtu() -> u32 {
    1280
}

fn default_network_dir() -> PathBuf {
    PathBuf::from("/etc/systemd/network")
}

fn default_netdev_owner() -> String {
    "root".to_string()
}

fn default_netdev_group() -> String {
    "systemd-network".to_string()
}

fn default_netdev_mode() -> u32 {
    0o640
}

fn default_wireguard_server() -> IpAddr {
    IpAddr::V6(Ipv6Addr::new(
        0xfd56, 0x1dda, 0x8794, 0xcb90, 0xffff, 0xffff, 0xffff, 0xfffe,
    ))
}

fn default_network_service() -> String {
    "systemd-networkd.service".to_string()
}

impl Default for WireGuardConfig {
    fn default() -> Self {
        WireGuardConfig {
            device_name: default_device_name(),
            description: default_description(),
            mtu: default_mtu(),
            network_dir: default_network_dir(),
            netdev_owner: default_netdev_owner(),
            netdev_group: default_netdev_group(),
            netdev_mode: default_netdev_mode(),
            server: default_wireguard_server(),
            network_service: default_network_service(),
        }
    }
}

impl WireGuardConfig {
    /// Path of the generated netdev (device) unit.
    pub fn netdev_path(&self) -> PathBuf {
        self.network_dir.join(format!("{}.netdev", self.device_name))
    }

    /// Path of the generated network unit.
    pub fn network_path(&self) -> PathBuf {
        self.network_dir.join(format!("{}.network", self.device_name))
    }
}

/// Settings of the legacy (OpenVPN) transport.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenVpnConfig {
    /// Client service unit
    #[serde(default = "default_openvpn_service")]
    pub service: String,

    /// Directory holding the client configuration and certificates
    #[serde(default = "default_openvpn_client_dir")]
    pub client_dir: PathBuf,

    /// Address of the OpenVPN server
    #[serde(default = "default_openvpn_server")]
    pub server: IpAddr,

    /// Owner of the installed client files; empty disables the chown
    #[serde(default = "default_openvpn_client_owner")]
    pub client_owner: String,

    /// Group of the installed client files; empty disables the chown
    #[serde(default = "default_openvpn_client_group")]
    pub client_group: String,

    /// Seconds to wait for the client to connect after setup (default: 3)
    #[serde(default = "default_openvpn_grace_time_secs")]
    pub grace_time_secs: u64,
}

fn default_openvpn_service() -> String {
    "openvpn-client@terminals.service".to_string()
}

fn default_openvpn_client_dir() -> PathBuf {
    PathBuf::from("/etc/openvpn/client")
}

fn default_openvpn_server() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 8, 0, 1))
}

fn default_openvpn_client_owner() -> String {
    "openvpn".to_string()
}

fn default_openvpn_client_group() -> String {
    "network".to_string()
}

fn default_openvpn_grace_time_secs() -> u64 {
    3
}

impl Default for OpenVpnConfig {
    fn default() -> Self {
        OpenVpnConfig {
            service: default_openvpn_service(),
            client_dir: default_openvpn_client_dir(),
            server: default_openvpn_server(),
            client_owner: default_openvpn_client_owner(),
            client_group: default_openvpn_client_group(),
            grace_time_secs: default_openvpn_grace_time_secs(),
        }
    }
}

impl OpenVpnConfig {
    /// Returns the grace time as a [`Duration`].
    pub fn grace_time(&self) -> Duration {
        Duration::from_secs(self.grace_time_secs)
    }
}

/// Host identity files touched when a terminal is (re)configured.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    /// File holding the terminal ID as host name
    #[serde(default = "default_hostname_file")]
    pub hostname_file: PathBuf,

    /// Pacman configuration whose mirror points at the VPN server
    #[serde(default = "default_pacman_conf")]
    pub pacman_conf: PathBuf,

    /// Hosts file
    #[serde(default = "default_hosts_file")]
    pub hosts_file: PathBuf,

    /// Host names in the hosts file that resolve to the VPN server
    #[serde(default)]
    pub mirror_hosts: Vec<String>,

    /// Service showing the "unconfigured" warning on screen
    #[serde(default = "default_unconfigured_warning_service")]
    pub unconfigured_warning_service: String,
}

fn default_hostname_file() -> PathBuf {
    PathBuf::from("/etc/hostname")
}

fn default_pacman_conf() -> PathBuf {
    PathBuf::from("/etc/pacman.conf")
}

fn default_hosts_file() -> PathBuf {
    PathBuf::from("/etc/hosts")
}

fn default_unconfigured_warning_service() -> String {
    "unconfigured-warning.service".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            hostname_file: default_hostname_file(),
            pacman_conf: default_pacman_conf(),
            hosts_file: default_hosts_file(),
            mirror_hosts: Vec::new(),
            unconfigured_warning_service: default_unconfigured_warning_service(),
        }
    }
}

/// Reachability check settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    /// Seconds to wait before the first check (default: 10)
    #[serde(default = "default_grace_time_secs")]
    pub grace_time_secs: u64,

    /// Per-echo timeout in seconds (default: 1)
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u32,

    /// Echo requests per check (default: 5)
    #[serde(default = "default_probe_count")]
    pub count: u32,

    /// Path of the ping binary
    #[serde(default = "default_ping_path")]
    pub ping_path: String,
}

fn default_grace_time_secs() -> u64 {
    10
}

fn default_probe_timeout_secs() -> u32 {
    1
}

fn default_probe_count() -> u32 {
    5
}

fn default_ping_path() -> String {
    "/usr/bin/ping".to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            grace_time_secs: default_grace_time_secs(),
            timeout_secs: default_probe_timeout_secs(),
            count: default_probe_count(),
            ping_path: default_ping_path(),
        }
    }
}

impl ProbeConfig {
    /// Returns the grace time as a [`Duration`].
    pub fn grace_time(&self) -> Duration {
        Duration::from_secs(self.grace_time_secs)
    }
}

/// Fleet-management backend endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Session login endpoint
    #[serde(default = "default_login_url")]
    pub login_url: String,

    /// Base URL of the terminal setup API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_api_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_login_url() -> String {
    "https://his.homeinfo.de/session".to_string()
}

fn default_base_url() -> String {
    "https://termgr.homeinfo.de/setup/".to_string()
}

fn default_api_timeout_secs() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            login_url: default_login_url(),
            base_url: default_base_url(),
            timeout_secs: default_api_timeout_secs(),
        }
    }
}

impl ApiConfig {
    /// Returns the request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Log output settings. The level is the top-level `log_level`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Also write logs to daily rotated files (default: false)
    #[serde(default)]
    pub log_to_file: bool,

    /// Directory of the log files
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Base name of the log files
    #[serde(default = "default_log_file_name")]
    pub log_file_name: String,

    /// Emit JSON instead of text (default: false)
    #[serde(default)]
    pub json_format: bool,
}

fn default_log_dir() -> String {
    "/var/log/termvpn".to_string()
}

fn default_log_file_name() -> String {
    "termvpn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_to_file: false,
            log_dir: default_log_dir(),
            log_file_name: default_log_file_name(),
            json_format: false,
        }
    }
}

/// Main configuration structure for termvpn.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Log level (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Modern transport settings
    #[serde(default)]
    pub wireguard: WireGuardConfig,

    /// Legacy transport settings
    #[serde(default)]
    pub openvpn: OpenVpnConfig,

    /// Host identity settings
    #[serde(default)]
    pub host: HostConfig,

    /// Reachability check settings
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Backend settings
    #[serde(default)]
    pub api: ApiConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            logging: LoggingConfig::default(),
            wireguard: WireGuardConfig::default(),
            openvpn: OpenVpnConfig::default(),
            host: HostConfig::default(),
            probe: ProbeConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Config::default()
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.validate()?;

        // Environment variables take precedence over the file
        Self::apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to the defaults
    /// (with environment overrides) when the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::FileNotFound(_)) => {
                let mut config = Config::default();
                Self::apply_env_overrides(&mut config);
                config.validate()?;
                Ok(config)
            }
            other => other,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = self.wireguard.device_name.trim();

        if name.is_empty() {
            return Err(ConfigError::MissingValue("wireguard.device_name".to_string()));
        }

        if name.len() > MAX_DEVICE_NAME_LEN || name.contains('/') || name.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidValue {
                key: "wireguard.device_name".to_string(),
                message: format!("'{name}' is not a valid interface name"),
            });
        }

        if self.wireguard.network_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingValue("wireguard.network_dir".to_string()));
        }

        // The netdev unit embeds the private key.
        if self.wireguard.netdev_mode > 0o777 || self.wireguard.netdev_mode & 0o007 != 0 {
            return Err(ConfigError::InvalidValue {
                key: "wireguard.netdev_mode".to_string(),
                message: format!(
                    "{:o} must not grant access to other users",
                    self.wireguard.netdev_mode
                ),
            });
        }

        if self.wireguard.network_service.trim().is_empty() {
            return Err(ConfigError::MissingValue("wireguard.network_service".to_string()));
        }

        if self.openvpn.service.trim().is_empty() {
            return Err(ConfigError::MissingValue("openvpn.service".to_string()));
        }

        if self.probe.count == 0 {
            return Err(ConfigError::InvalidValue {
                key: "probe.count".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.logging.log_to_file && self.logging.log_dir.trim().is_empty() {
            return Err(ConfigError::MissingValue("logging.log_dir".to_string()));
        }

        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::MissingValue("api.base_url".to_string()));
        }

        match self.log_level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "log_level".to_string(),
                    message: format!("unknown level '{other}'"),
                })
            }
        }

        Ok(())
    }

    /// Apply environment variable overrides (prefix: TERMVPN_)
    /// Example keys:
    /// - TERMVPN_LOG_LEVEL, TERMVPN_LOG_DIR (also enables file logging)
    /// - TERMVPN_WIREGUARD_MTU, TERMVPN_WIREGUARD_NETWORK_DIR, TERMVPN_WIREGUARD_SERVER
    /// - TERMVPN_OPENVPN_SERVICE, TERMVPN_OPENVPN_SERVER
    /// - TERMVPN_PROBE_GRACE_TIME, TERMVPN_PROBE_TIMEOUT, TERMVPN_PROBE_COUNT
    /// - TERMVPN_API_LOGIN_URL, TERMVPN_API_BASE_URL
    fn apply_env_overrides(cfg: &mut Config) {
        use std::env;

        fn parse<T: std::str::FromStr>(s: &str) -> Option<T> {
            s.trim().parse().ok()
        }

        if let Ok(v) = env::var("TERMVPN_LOG_LEVEL") {
            if !v.is_empty() {
                cfg.log_level = v;
            }
        }

        if let Ok(v) = env::var("TERMVPN_LOG_DIR") {
            if !v.is_empty() {
                cfg.logging.log_dir = v;
                cfg.logging.log_to_file = true;
            }
        }

        // WireGuard
        if let Ok(v) = env::var("TERMVPN_WIREGUARD_MTU") {
            if let Some(n) = parse(&v) {
                cfg.wireguard.mtu = n;
            }
        }
        if let Ok(v) = env::var("TERMVPN_WIREGUARD_NETWORK_DIR") {
            if !v.is_empty() {
                cfg.wireguard.network_dir = PathBuf::from(v);
            }
        }
        if let Ok(v) = env::var("TERMVPN_WIREGUARD_SERVER") {
            if let Some(addr) = parse(&v) {
                cfg.wireguard.server = addr;
            }
        }

        // OpenVPN
        if let Ok(v) = env::var("TERMVPN_OPENVPN_SERVICE") {
            if !v.is_empty() {
                cfg.openvpn.service = v;
            }
        }
        if let Ok(v) = env::var("TERMVPN_OPENVPN_SERVER") {
            if let Some(addr) = parse(&v) {
                cfg.openvpn.server = addr;
            }
        }

        // Probe
        if let Ok(v) = env::var("TERMVPN_PROBE_GRACE_TIME") {
            if let Some(n) = parse(&v) {
                cfg.probe.grace_time_secs = n;
            }
        }
        if let Ok(v) = env::var("TERMVPN_PROBE_TIMEOUT") {
            if let Some(n) = parse(&v) {
                cfg.probe.timeout_secs = n;
            }
        }
        if let Ok(v) = env::var("TERMVPN_PROBE_COUNT") {
            if let Some(n) = parse(&v) {
                cfg.probe.count = n;
            }
        }

        // API
        if let Ok(v) = env::var("TERMVPN_API_LOGIN_URL") {
            if !v.is_empty() {
                cfg.api.login_url = v;
            }
        }
        if let Ok(v) = env::var("TERMVPN_API_BASE_URL") {
            if !v.is_empty() {
                cfg.api.base_url = v;
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        let system = PathBuf::from(SYSTEM_CONFIG_PATH);

        if system.exists() {
            return system;
        }

        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("termvpn").join("config.toml")
        } else {
            system
        }
    }
}

/// Loaded configuration together with the file it came from.
#[derive(Debug)]
pub struct ConfigManager {
    /// Current configuration
    config: Config,
    /// Path to the configuration file
    config_path: PathBuf,
}

impl ConfigManager {
    /// Load configuration from the specified path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let config = Config::load(&path)?;

        Ok(ConfigManager {
            config,
            config_path: path,
        })
    }

    /// Load configuration from the specified path or use defaults if it is absent
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let config = Config::load_or_default(&path)?;

        Ok(ConfigManager {
            config,
            config_path: path,
        })
    }

    /// Get a reference to the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the current configuration file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}
