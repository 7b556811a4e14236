//! Installation of the generated units and reloading of systemd-networkd.

use crate::error::{EngineError, EngineResult};
use crate::generator::GeneratedArtifacts;
use crate::system::{set_owner, systemctl, CommandRunner, FileOwnership};
use shared_utils::config::WireGuardConfig;
use std::fs::{self, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Writes, removes and loads the WireGuard units.
///
/// Assumes it is the only writer of the unit files.
pub struct TransportController {
    netdev_path: PathBuf,
    network_path: PathBuf,
    ownership: Option<FileOwnership>,
    netdev_mode: u32,
    network_service: String,
    runner: Arc<dyn CommandRunner>,
}

impl TransportController {
    pub fn from_config(config: &WireGuardConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            netdev_path: config.netdev_path(),
            network_path: config.network_path(),
            ownership: FileOwnership::from_names(&config.netdev_owner, &config.netdev_group),
            netdev_mode: config.netdev_mode,
            network_service: config.network_service.clone(),
            runner,
        }
    }

    /// Skip the chown of the netdev unit (unprivileged callers, tests).
    pub fn without_ownership(mut self) -> Self {
        self.ownership = None;
        self
    }

    pub fn netdev_path(&self) -> &Path {
        &self.netdev_path
    }

    pub fn network_path(&self) -> &Path {
        &self.network_path
    }

    /// Whether any of the unit files exists.
    pub fn is_installed(&self) -> bool {
        self.netdev_path.exists() || self.network_path.exists()
    }

    /// Write both units and reload the network manager.
    ///
    /// Write failures are [`EngineError::Apply`]; a failed reload is returned
    /// as [`EngineError::Reload`] and leaves the files in place.
    pub fn apply(&self, artifacts: &GeneratedArtifacts) -> EngineResult<()> {
        self.write(artifacts)?;
        self.reload()
    }

    /// Write both units without reloading.
    pub fn write(&self, artifacts: &GeneratedArtifacts) -> EngineResult<()> {
        debug!("Installing netdev unit {}", self.netdev_path.display());
        self.write_netdev(&artifacts.netdev.render())
            .map_err(|source| EngineError::Apply {
                path: self.netdev_path.clone(),
                source,
            })?;

        debug!("Installing network unit {}", self.network_path.display());
        fs::write(&self.network_path, artifacts.network.render()).map_err(|source| {
            EngineError::Apply {
                path: self.network_path.clone(),
                source,
            }
        })?;

        Ok(())
    }

    fn write_netdev(&self, content: &str) -> io::Result<()> {
        // Created owner-only so the key is never readable by others.
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&self.netdev_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        drop(file);

        if let Some(ownership) = &self.ownership {
            set_owner(&self.netdev_path, ownership)?;
        }

        fs::set_permissions(&self.netdev_path, Permissions::from_mode(self.netdev_mode))
    }

    /// Delete both units. Missing files are fine.
    ///
    /// Returns whether anything was removed.
    pub fn remove(&self) -> EngineResult<bool> {
        let mut removed = false;

        for path in [&self.netdev_path, &self.network_path] {
            debug!("Removing {}", path.display());

            match fs::remove_file(path) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(EngineError::Apply {
                        path: path.clone(),
                        source,
                    })
                }
            }
        }

        Ok(removed)
    }

    /// Restart the network manager so it re-reads its units.
    pub fn reload(&self) -> EngineResult<()> {
        info!("Restarting {}", self.network_service);

        systemctl(self.runner.as_ref(), &["restart", &self.network_service]).map_err(|detail| {
            EngineError::Reload {
                service: self.network_service.clone(),
                detail,
            }
        })
    }

    /// Remove the units and reload.
    pub fn disable(&self) -> EngineResult<()> {
        self.remove()?;
        self.reload()
    }
}
