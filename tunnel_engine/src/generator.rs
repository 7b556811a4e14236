//! Generation of the systemd-networkd units for the WireGuard tunnel.

use crate::error::EngineResult;
use crate::keys::PrivateKey;
use crate::params::TunnelParameters;
use crate::units::{Block, Section, UnitDocument};
use shared_utils::config::WireGuardConfig;
use std::fmt;

/// The netdev and network units for one tunnel.
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratedArtifacts {
    /// Device unit, contains the private key
    pub netdev: UnitDocument,
    pub network: UnitDocument,
}

impl fmt::Debug for GeneratedArtifacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedArtifacts")
            .field("netdev_blocks", &self.netdev.blocks().len())
            .field("network_blocks", &self.network.blocks().len())
            .finish()
    }
}

/// Turns tunnel parameters into unit documents. Holds no state besides the
/// interface naming.
#[derive(Debug, Clone)]
pub struct UnitGenerator {
    device_name: String,
    description: String,
}

impl UnitGenerator {
    pub fn new(device_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            description: description.into(),
        }
    }

    pub fn from_config(config: &WireGuardConfig) -> Self {
        Self::new(&config.device_name, &config.description)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Generate both units. Validation happens before anything is built.
    pub fn generate(
        &self,
        params: &TunnelParameters,
        private_key: &PrivateKey,
    ) -> EngineResult<GeneratedArtifacts> {
        params.validate()?;

        Ok(GeneratedArtifacts {
            netdev: self.netdev_unit(params, private_key),
            network: self.network_unit(params),
        })
    }

    fn netdev_unit(&self, params: &TunnelParameters, private_key: &PrivateKey) -> UnitDocument {
        let mtu = params.effective_mtu();
        let mut unit = UnitDocument::new();

        unit.push(
            Block::new()
                .with(
                    Section::new("NetDev")
                        .set("Name", &self.device_name)
                        .set("Kind", "wireguard")
                        .set("Description", &self.description)
                        .set_opt("MTUBytes", (mtu > 0).then(|| mtu.to_string())),
                )
                .with(Section::new("WireGuard").set("PrivateKey", private_key.expose())),
        );

        for peer in &params.peers {
            let allowed_ips = peer
                .routes
                .iter()
                .map(|route| route.destination.as_str())
                .collect::<Vec<_>>()
                .join(", ");

            unit.push(
                Block::new().with(
                    Section::new("WireGuardPeer")
                        .set("PublicKey", &peer.public_key)
                        .set_opt("PresharedKey", peer.preshared_key())
                        .set("AllowedIPs", allowed_ips)
                        .set("Endpoint", &peer.endpoint)
                        .set_opt(
                            "PersistentKeepalive",
                            peer.keepalive().map(|secs| secs.to_string()),
                        ),
                ),
            );
        }

        unit
    }

    fn network_unit(&self, params: &TunnelParameters) -> UnitDocument {
        let mut unit = UnitDocument::new();

        unit.push(
            Block::new()
                .with(Section::new("Match").set("Name", &self.device_name))
                .with(Section::new("Network").set("Address", &params.address)),
        );

        for route in params.peers.iter().flat_map(|peer| peer.routes.iter()) {
            unit.push(
                Block::new().with(
                    Section::new("Route")
                        .set("Gateway", &route.gateway)
                        .set("Destination", &route.destination)
                        .set_opt("GatewayOnlink", (route.gateway_onlink == Some(true)).then_some("true")),
                ),
            );
        }

        unit
    }
}
