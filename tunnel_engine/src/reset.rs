//! Returning a terminal to the unconfigured state.

use crate::controller::TransportController;
use crate::error::EngineResult;
use crate::host::HostIdentity;
use crate::legacy::LegacyTransport;
use tracing::info;

/// Remove both transports and the host identity.
///
/// Steps run in order and the first failure stops the reset.
pub fn reset_terminal(
    host: &dyn HostIdentity,
    legacy: &dyn LegacyTransport,
    controller: &TransportController,
) -> EngineResult<()> {
    info!("Disabling legacy transport");
    legacy.disable()?;

    info!("Removing legacy transport configuration");
    legacy.clean()?;

    info!("Removing tunnel configuration");
    controller.remove()?;

    host.reset()
}
