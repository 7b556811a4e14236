//! Host identity: host name, package mirror and hosts file.
//!
//! A configured terminal is named after its ID and fetches packages from
//! the server at the far end of whichever transport is active, so both
//! have to follow every transport switch.

use crate::error::{EngineError, EngineResult};
use crate::system::{systemctl, CommandRunner, HOSTNAMECTL};
use regex::Regex;
use shared_utils::config::HostConfig;
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Identity of the terminal as seen by the rest of the fleet.
pub trait HostIdentity {
    /// Name the host after `terminal_id` and point it at `server`.
    fn configure(&self, terminal_id: u32, server: IpAddr) -> EngineResult<()>;

    /// ID of the terminal this host was configured as.
    fn terminal_id(&self) -> EngineResult<u32>;

    /// Return the host to the unconfigured state.
    fn reset(&self) -> EngineResult<()>;
}

/// Applies the identity to the local system.
pub struct SystemHostIdentity {
    hostname_file: PathBuf,
    pacman_conf: PathBuf,
    hosts_file: PathBuf,
    mirror_hosts: Vec<String>,
    unconfigured_warning_service: String,
    runner: Arc<dyn CommandRunner>,
}

impl SystemHostIdentity {
    pub fn from_config(config: &HostConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            hostname_file: config.hostname_file.clone(),
            pacman_conf: config.pacman_conf.clone(),
            hosts_file: config.hosts_file.clone(),
            mirror_hosts: config.mirror_hosts.clone(),
            unconfigured_warning_service: config.unconfigured_warning_service.clone(),
            runner,
        }
    }

    fn set_hostname(&self, hostname: &str) -> EngineResult<()> {
        debug!("Setting host name to {}", hostname);

        let output = self
            .runner
            .run(HOSTNAMECTL, &["set-hostname", hostname])
            .map_err(|e| EngineError::HostIdentity(format!("failed to execute hostnamectl: {e}")))?;

        if output.success() {
            Ok(())
        } else {
            Err(EngineError::HostIdentity(format!(
                "hostnamectl set-hostname failed with {}",
                output.describe()
            )))
        }
    }

    fn set_mirror(&self, server: IpAddr) -> EngineResult<()> {
        edit_file(&self.pacman_conf, |text| rewrite_mirrors(text, server))
    }

    fn set_hosts(&self, server: IpAddr) -> EngineResult<()> {
        if self.mirror_hosts.is_empty() {
            return Ok(());
        }

        edit_file(&self.hosts_file, |text| {
            Ok(self
                .mirror_hosts
                .iter()
                .fold(text.to_string(), |text, name| set_host_address(&text, name, server)))
        })
    }

    fn warning_service(&self, action: &str) -> EngineResult<()> {
        debug!("{} {}", action, self.unconfigured_warning_service);
        systemctl(self.runner.as_ref(), &[action, &self.unconfigured_warning_service])
            .map_err(EngineError::HostIdentity)
    }
}

impl HostIdentity for SystemHostIdentity {
    fn configure(&self, terminal_id: u32, server: IpAddr) -> EngineResult<()> {
        info!("Configuring host as terminal #{} using server {}", terminal_id, server);

        self.set_hostname(&terminal_id.to_string())?;
        self.set_mirror(server)?;
        self.set_hosts(server)?;
        self.warning_service("disable")
    }

    fn terminal_id(&self) -> EngineResult<u32> {
        let text = fs::read_to_string(&self.hostname_file).map_err(|e| {
            EngineError::HostIdentity(format!("cannot read {}: {e}", self.hostname_file.display()))
        })?;

        text.trim().parse().map_err(|_| {
            EngineError::HostIdentity(format!(
                "host name {:?} is not a terminal ID",
                text.trim()
            ))
        })
    }

    fn reset(&self) -> EngineResult<()> {
        info!("Resetting host name");

        match fs::remove_file(&self.hostname_file) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(EngineError::HostIdentity(format!(
                    "cannot remove {}: {e}",
                    self.hostname_file.display()
                )))
            }
        }

        self.warning_service("enable")
    }
}

/// Apply `edit` to a text file. A missing file is left alone.
fn edit_file(path: &Path, edit: impl FnOnce(&str) -> EngineResult<String>) -> EngineResult<()> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{} does not exist, skipping", path.display());
            return Ok(());
        }
        Err(e) => {
            return Err(EngineError::HostIdentity(format!(
                "cannot read {}: {e}",
                path.display()
            )))
        }
    };

    let mut edited = edit(&text)?;
    if text.ends_with('\n') && !edited.ends_with('\n') {
        edited.push('\n');
    }

    if edited != text {
        debug!("Updating {}", path.display());
        fs::write(path, edited).map_err(|e| {
            EngineError::HostIdentity(format!("cannot write {}: {e}", path.display()))
        })?;
    }

    Ok(())
}

/// Mirror URLs served by the VPN server.
const MIRROR_PATTERN: &str = r"(http://).*(:8080/)";

/// Point every mirror URL in `text` at `server`.
pub fn rewrite_mirrors(text: &str, server: IpAddr) -> EngineResult<String> {
    let pattern = Regex::new(MIRROR_PATTERN)
        .map_err(|e| EngineError::HostIdentity(format!("invalid mirror pattern: {e}")))?;

    let host = match server {
        IpAddr::V4(addr) => addr.to_string(),
        IpAddr::V6(addr) => format!("[{addr}]"),
    };

    Ok(pattern
        .replace_all(text, format!("${{1}}{host}${{2}}").as_str())
        .into_owned())
}

/// Point every hosts entry naming `name` (canonical or alias) at `address`.
///
/// Comments, blank lines and other entries are kept verbatim.
pub fn set_host_address(text: &str, name: &str, address: IpAddr) -> String {
    let mut lines: Vec<String> = text
        .lines()
        .map(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                return line.to_string();
            }

            let mut fields = trimmed.split_whitespace();
            let Some(Ok(_)) = fields.next().map(str::parse::<IpAddr>) else {
                return line.to_string();
            };
            let names: Vec<&str> = fields.collect();

            if names.contains(&name) {
                std::iter::once(address.to_string())
                    .chain(names.iter().map(|n| n.to_string()))
                    .collect::<Vec<_>>()
                    .join("\t")
            } else {
                line.to_string()
            }
        })
        .collect();

    if text.ends_with('\n') {
        lines.push(String::new());
    }

    lines.join("\n")
}
