//! Interface to the fleet-management backend.

use crate::error::EngineResult;
use crate::facts::HostReport;
use crate::params::TunnelParameters;
use serde::{Deserialize, Serialize};

/// Optional descriptive data sent along with a new public key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMetadata {
    #[serde(rename = "sn", skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(rename = "os", skip_serializing_if = "Option::is_none")]
    pub operating_system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<u32>,
}

/// A system record returned by registration.
#[derive(Debug, Clone)]
pub struct RegisteredSystem {
    pub id: u32,
    pub params: TunnelParameters,
}

/// Capabilities of the backend that the engine relies on.
///
/// Implementations report every transport or protocol failure as
/// [`EngineError::BackendUnavailable`](crate::EngineError::BackendUnavailable).
pub trait Backend {
    /// Current tunnel parameters of a known terminal.
    fn fetch_tunnel_info(&self, terminal_id: u32) -> EngineResult<TunnelParameters>;

    /// Whether the terminal was set up before, on either transport.
    ///
    /// The default only knows about the modern transport's key.
    fn is_configured(&self, terminal_id: u32) -> EngineResult<bool> {
        Ok(self
            .fetch_tunnel_info(terminal_id)?
            .existing_public_key
            .is_some())
    }

    /// Create a new terminal for `public_key`.
    fn register_system(
        &self,
        public_key: &str,
        metadata: &SystemMetadata,
    ) -> EngineResult<RegisteredSystem>;

    /// Replace the public key of an existing terminal.
    fn patch_system(
        &self,
        terminal_id: u32,
        public_key: &str,
        metadata: &SystemMetadata,
    ) -> EngineResult<TunnelParameters>;

    /// Client configuration archive of the legacy transport.
    fn fetch_legacy_config(&self, terminal_id: u32) -> EngineResult<Vec<u8>>;

    /// Mark the setup of the terminal as complete.
    fn finalize(&self, terminal_id: u32, report: &HostReport) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_uses_backend_field_names() {
        let metadata = SystemMetadata {
            serial_number: Some("SN-1".to_string()),
            operating_system: Some("Arch Linux".to_string()),
            group: Some(3),
            ..Default::default()
        };

        assert_eq!(
            serde_json::to_value(&metadata).unwrap(),
            serde_json::json!({"sn": "SN-1", "os": "Arch Linux", "group": 3})
        );
    }
}
