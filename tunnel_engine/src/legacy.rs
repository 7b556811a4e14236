//! The legacy OpenVPN transport.

use crate::error::{EngineError, EngineResult};
use crate::system::{set_owner, systemctl, CommandRunner, FileOwnership, TAR};
use shared_utils::config::OpenVpnConfig;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Switches the legacy transport on and off.
pub trait LegacyTransport {
    /// Disable and stop the service.
    fn disable(&self) -> EngineResult<()>;

    /// Enable and start the service.
    fn enable(&self) -> EngineResult<()>;

    /// Remove the client configuration.
    fn clean(&self) -> EngineResult<()>;

    /// Replace the client configuration with the files in `archive`.
    fn install(&self, archive: &[u8]) -> EngineResult<()>;

    /// Restart the service so it picks up a new configuration.
    fn restart(&self) -> EngineResult<()>;
}

/// OpenVPN client service managed through systemctl.
pub struct OpenVpnService {
    service: String,
    client_dir: PathBuf,
    ownership: Option<FileOwnership>,
    runner: Arc<dyn CommandRunner>,
}

impl OpenVpnService {
    pub fn from_config(config: &OpenVpnConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            service: config.service.clone(),
            client_dir: config.client_dir.clone(),
            ownership: FileOwnership::from_names(&config.client_owner, &config.client_group),
            runner,
        }
    }

    /// Leave installed files owned by the caller (unprivileged callers, tests).
    pub fn without_ownership(mut self) -> Self {
        self.ownership = None;
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn systemctl(&self, args: &[&str]) -> EngineResult<()> {
        let mut argv = args.to_vec();
        argv.push(&self.service);
        systemctl(self.runner.as_ref(), &argv).map_err(EngineError::LegacyTransport)
    }

    fn extract(&self, archive: &[u8]) -> EngineResult<()> {
        let staging =
            |e: io::Error| EngineError::LegacyTransport(format!("cannot store archive: {e}"));

        let mut file = NamedTempFile::new().map_err(staging)?;
        file.write_all(archive).map_err(staging)?;
        file.flush().map_err(staging)?;

        let archive_path = file.path().display().to_string();
        let client_dir = self.client_dir.display().to_string();
        debug!("Extracting client configuration to {}", client_dir);

        let output = self
            .runner
            .run(TAR, &["-xf", archive_path.as_str(), "-C", client_dir.as_str()])
            .map_err(|e| EngineError::LegacyTransport(format!("failed to execute tar: {e}")))?;

        if output.success() {
            Ok(())
        } else {
            Err(EngineError::LegacyTransport(format!(
                "extracting the client configuration failed with {}",
                output.describe()
            )))
        }
    }
}

impl LegacyTransport for OpenVpnService {
    fn disable(&self) -> EngineResult<()> {
        info!("Disabling and stopping {}", self.service);
        self.systemctl(&["disable", "--now"])
    }

    fn enable(&self) -> EngineResult<()> {
        info!("Enabling and starting {}", self.service);
        self.systemctl(&["enable", "--now"])
    }

    fn clean(&self) -> EngineResult<()> {
        debug!("Removing files from {}", self.client_dir.display());

        let entries = match fs::read_dir(&self.client_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(EngineError::LegacyTransport(format!(
                    "cannot read {}: {e}",
                    self.client_dir.display()
                )))
            }
        };

        for entry in entries {
            let path = entry
                .map_err(|e| EngineError::LegacyTransport(e.to_string()))?
                .path();

            if path.is_file() {
                fs::remove_file(&path).map_err(|e| {
                    EngineError::LegacyTransport(format!("cannot remove {}: {e}", path.display()))
                })?;
            }
        }

        Ok(())
    }

    fn install(&self, archive: &[u8]) -> EngineResult<()> {
        if archive.is_empty() {
            return Err(EngineError::LegacyTransport(
                "received an empty configuration archive".to_string(),
            ));
        }

        info!("Installing OpenVPN configuration");
        self.clean()?;

        fs::create_dir_all(&self.client_dir).map_err(|e| {
            EngineError::LegacyTransport(format!(
                "cannot create {}: {e}",
                self.client_dir.display()
            ))
        })?;

        self.extract(archive)?;

        if let Some(ownership) = &self.ownership {
            chown_tree(&self.client_dir, ownership).map_err(|e| {
                EngineError::LegacyTransport(format!(
                    "cannot change owner of {}: {e}",
                    self.client_dir.display()
                ))
            })?;
        }

        Ok(())
    }

    fn restart(&self) -> EngineResult<()> {
        info!("Restarting {}", self.service);
        self.systemctl(&["restart"])
    }
}

/// Change the owner of `path` and everything below it.
fn chown_tree(path: &Path, ownership: &FileOwnership) -> io::Result<()> {
    set_owner(path, ownership)?;

    if path.is_dir() {
        for entry in fs::read_dir(path)? {
            chown_tree(&entry?.path(), ownership)?;
        }
    }

    Ok(())
}
