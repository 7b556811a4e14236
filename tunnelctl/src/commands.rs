//! Command handlers.

use crate::cli::{Command, MigrateArgs, SetupArgs, Transport};
use anyhow::{anyhow, bail, Context, Result};
use dialoguer::{Confirm, Input, Password};
use management_api::Client;
use shared_utils::config::Config;
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tunnel_engine::{
    migrate, reset_terminal, system, CommandRunner, ConnectivityProbe, EngineError, HostFacts,
    LegacySetupOptions, LegacyTransport, MigrationOptions, MigrationOutcome, OpenVpnService,
    PrivateKey, RollbackCause, SetupOrchestrator, SystemCommandRunner, SystemHostIdentity,
    SystemMetadata, TransportController, TransportStack, TunnelParameters, UnitGenerator,
    X25519KeyPairProvider,
};

/// The concrete collaborators, wired from the configuration.
struct Services {
    keys: X25519KeyPairProvider,
    generator: UnitGenerator,
    controller: TransportController,
    host: SystemHostIdentity,
    legacy: OpenVpnService,
    probe: ConnectivityProbe,
}

impl Services {
    fn new(config: &Config) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);

        Self {
            keys: X25519KeyPairProvider,
            generator: UnitGenerator::from_config(&config.wireguard),
            controller: TransportController::from_config(&config.wireguard, runner.clone()),
            host: SystemHostIdentity::from_config(&config.host, runner.clone()),
            legacy: OpenVpnService::from_config(&config.openvpn, runner.clone()),
            probe: ConnectivityProbe::from_config(&config.probe, runner),
        }
    }

    fn stack(&self) -> TransportStack<'_> {
        TransportStack {
            keys: &self.keys,
            generator: &self.generator,
            controller: &self.controller,
            host: &self.host,
            legacy: &self.legacy,
        }
    }
}

/// Run `command` and return the process exit code.
pub fn run(command: Command, config: &Config) -> Result<ExitCode> {
    match command {
        Command::Setup(args) => setup(args, config),
        Command::Migrate(args) => migrate_to_wireguard(args, config),
        Command::Disable { transport } => disable(transport, config),
        Command::Probe {
            target,
            grace_time,
            attempts,
        } => {
            let target = target.unwrap_or(config.wireguard.server);
            let services = Services::new(config);

            if services.probe.probe_with_retries(
                &target.to_string(),
                Duration::from_secs(grace_time),
                attempts,
            )? {
                info!("{} is reachable", target);
                Ok(ExitCode::SUCCESS)
            } else {
                error!("{} is not reachable", target);
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Render {
            params,
            private_key,
        } => {
            print!("{}", render(&params, private_key.as_deref(), config)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Reset { yes } => {
            if !confirm("Remove all VPN configuration from this terminal?", yes)? {
                bail!("Reset aborted by user.");
            }

            let services = Services::new(config);
            reset_terminal(&services.host, &services.legacy, &services.controller)?;
            info!("Terminal reset.");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn setup(args: SetupArgs, config: &Config) -> Result<ExitCode> {
    let client = login(config, args.user.as_deref())?;
    let services = Services::new(config);

    let metadata = SystemMetadata {
        serial_number: args.serial_number.clone(),
        model: args.model.clone(),
        operating_system: Some(args.operating_system.clone()),
        group: args.id.is_none().then_some(args.group),
    };

    let orchestrator = SetupOrchestrator::new(&client, services.stack(), config.wireguard.server)
        .with_mtu(Some(args.mtu.unwrap_or(config.wireguard.mtu)));

    let id = match args.id {
        Some(id) => {
            let info = client.info(id)?;
            info!("You are about to configure system #{}", info.id);

            if let Some(os) = &info.operating_system {
                info!("  Operating system: {}", os);
            }
            if let Some(model) = &info.model {
                info!("  Model: {}", model);
            }
            if let Some(deployment) = info.deployment {
                warn!("System is already deployed on #{}", deployment);
            }
            if let Some(configured) = &info.configured {
                if !args.force {
                    error!("System has already been configured on {}", configured);
                    return Err(EngineError::AlreadyConfigured(id).into());
                }

                warn!("System has already been configured on {}", configured);
            }

            if !confirm("Is this correct?", args.yes)? {
                bail!("Setup aborted by user.");
            }

            match args.transport {
                Transport::Wireguard => orchestrator.patch_existing(id, &metadata, args.force)?,
                Transport::Openvpn => {
                    let options = LegacySetupOptions {
                        server: config.openvpn.server,
                        grace: args
                            .grace_time
                            .map(Duration::from_secs)
                            .unwrap_or_else(|| config.openvpn.grace_time()),
                        force: args.force,
                        report: HostFacts::default().collect(args.serial_number.clone())?,
                    };

                    orchestrator.setup_legacy(id, &services.probe, &options)?;
                    id
                }
            }
        }
        None => orchestrator.create_new(&metadata)?,
    };

    if args.exclusive {
        match args.transport {
            Transport::Wireguard => {
                info!("Removing OpenVPN configuration");
                services.legacy.clean()?;
            }
            Transport::Openvpn => {
                info!("Disabling WireGuard");
                services.controller.disable()?;
            }
        }
    }

    info!("Setup of system #{} completed successfully.", id);
    offer_reboot(args.reboot, args.yes)?;
    Ok(ExitCode::SUCCESS)
}

/// Reboot into the new configuration if the user agrees.
///
/// `--yes` answers the setup questions, not this one.
fn offer_reboot(reboot: bool, yes: bool) -> Result<()> {
    if reboot || (!yes && confirm("Do you want to reboot now?", false)?) {
        info!("Rebooting");
        return system::reboot(&SystemCommandRunner).map_err(|e| anyhow!("Cannot reboot: {e}"));
    }

    info!("Okay, not rebooting.");
    Ok(())
}

fn migrate_to_wireguard(args: MigrateArgs, config: &Config) -> Result<ExitCode> {
    let client = login(config, args.user.as_deref())?;
    let services = Services::new(config);

    let orchestrator = SetupOrchestrator::new(&client, services.stack(), config.wireguard.server)
        .with_mtu(Some(args.mtu.unwrap_or(config.wireguard.mtu)));

    let options = MigrationOptions {
        target: config.wireguard.server,
        legacy_server: config.openvpn.server,
        grace: args
            .grace_time
            .map(Duration::from_secs)
            .unwrap_or_else(|| config.probe.grace_time()),
        attempts: args.attempts,
        metadata: SystemMetadata::default(),
    };

    match migrate(&orchestrator, &services.probe, &options)? {
        MigrationOutcome::Committed => {
            info!("System migrated to WireGuard.");
            Ok(ExitCode::SUCCESS)
        }
        MigrationOutcome::RolledBack(RollbackCause::Unreachable) => {
            error!("Could not migrate system to WireGuard: server not reachable.");
            Ok(ExitCode::FAILURE)
        }
        MigrationOutcome::RolledBack(RollbackCause::Failed(e)) => {
            error!("Could not migrate system to WireGuard: {}", e);
            Ok(exit_code(&e))
        }
    }
}

fn disable(transport: Transport, config: &Config) -> Result<ExitCode> {
    let services = Services::new(config);

    match transport {
        Transport::Wireguard => {
            info!("Disabling WireGuard");
            services.controller.disable()?;
        }
        Transport::Openvpn => {
            info!("Disabling OpenVPN");
            services.legacy.disable()?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Build the units for the parameters in `path` without touching the system.
pub fn render(path: &Path, private_key: Option<&str>, config: &Config) -> Result<String> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("{} is not JSON", path.display()))?;

    // Accept a whole system record as well as its `wireguard` object.
    let params = match value.get("wireguard") {
        Some(wireguard) => TunnelParameters::from_json(wireguard)?,
        None => TunnelParameters::from_json(&value)?,
    };

    let private_key = PrivateKey::new(private_key.unwrap_or("<private key>"));
    let artifacts = UnitGenerator::from_config(&config.wireguard).generate(&params, &private_key)?;

    Ok(format!(
        "# {}\n{}\n# {}\n{}",
        config.wireguard.netdev_path().display(),
        artifacts.netdev,
        config.wireguard.network_path().display(),
        artifacts.network,
    ))
}

fn login(config: &Config, user: Option<&str>) -> Result<Client> {
    let user = match user {
        Some(user) => user.to_string(),
        None => Input::<String>::new()
            .with_prompt("User name")
            .interact_text()
            .map_err(|e| anyhow!("Missing mandatory data: {e}"))?,
    };
    let passwd = Password::new()
        .with_prompt("Password")
        .interact()
        .map_err(|e| anyhow!("Missing mandatory data: {e}"))?;

    let client = Client::new(&config.api)?;
    client.login(&user, &passwd)?;
    Ok(client)
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
fn confirm(message: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }

    Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| anyhow!("Confirmation failed: {e}"))
}

/// Exit code for an unrecovered engine error.
pub fn exit_code(err: &EngineError) -> ExitCode {
    ExitCode::from(err.exit_code() as u8)
}
