//! Tunnel parameters as delivered by the backend.
//!
//! The structures mirror the backend's `wireguard` JSON object. They are
//! validated once when built from JSON and again by the unit generator, so
//! malformed input never reaches the file system.

use crate::error::{EngineError, EngineResult};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;

/// MTU used when the parameters carry none (or zero).
pub const DEFAULT_MTU: u32 = 1280;

/// One route reachable through a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Network CIDR, also used as the peer's allowed IPs
    #[serde(default)]
    pub destination: String,

    #[serde(default)]
    pub gateway: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_onlink: Option<bool>,
}

/// A remote tunnel endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    #[serde(rename = "pubkey", default)]
    pub public_key: String,

    #[serde(rename = "psk", default, skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<String>,

    #[serde(default)]
    pub routes: Vec<Route>,

    /// `host:port`
    #[serde(default)]
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_keepalive: Option<u32>,
}

impl Peer {
    /// Preshared key, treating an empty string as absent.
    pub fn preshared_key(&self) -> Option<&str> {
        self.preshared_key.as_deref().filter(|psk| !psk.is_empty())
    }

    /// Keepalive interval; zero and absent are the same thing.
    pub fn keepalive(&self) -> Option<u32> {
        self.persistent_keepalive.filter(|secs| *secs > 0)
    }
}

/// Backend-supplied description of the local tunnel endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelParameters {
    /// Interface address in CIDR notation
    #[serde(rename = "ipaddress", default)]
    pub address: String,

    /// Peers in backend order
    #[serde(default)]
    pub peers: Vec<Peer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,

    /// Public key of a previous configuration, if any
    #[serde(rename = "pubkey", default, skip_serializing_if = "Option::is_none")]
    pub existing_public_key: Option<String>,
}

impl TunnelParameters {
    /// Build validated parameters from the backend's JSON object.
    pub fn from_json(value: &serde_json::Value) -> EngineResult<Self> {
        let params: TunnelParameters = serde_json::from_value(value.clone())
            .map_err(|e| EngineError::config(format!("malformed tunnel parameters: {e}")))?;
        params.validate()?;
        Ok(params)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| EngineError::config(format!("malformed tunnel parameters: {e}")))?;
        Self::from_json(&value)
    }

    /// MTU to configure, falling back to [`DEFAULT_MTU`].
    pub fn effective_mtu(&self) -> u32 {
        match self.mtu {
            Some(mtu) if mtu > 0 => mtu,
            _ => DEFAULT_MTU,
        }
    }

    /// Number of routes over all peers.
    pub fn route_count(&self) -> usize {
        self.peers.iter().map(|peer| peer.routes.len()).sum()
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.address.trim().is_empty() {
            return Err(EngineError::config("missing address"));
        }

        parse_cidr(&self.address)
            .map_err(|e| EngineError::config(format!("invalid address '{}': {e}", self.address)))?;

        for (index, peer) in self.peers.iter().enumerate() {
            validate_peer(index, peer)?;
        }

        Ok(())
    }
}

fn validate_peer(index: usize, peer: &Peer) -> EngineResult<()> {
    if peer.public_key.trim().is_empty() {
        return Err(EngineError::config(format!("peer #{index}: missing public key")));
    }

    if peer.endpoint.trim().is_empty() {
        return Err(EngineError::config(format!("peer #{index}: missing endpoint")));
    }

    parse_endpoint(&peer.endpoint).map_err(|e| {
        EngineError::config(format!("peer #{index}: invalid endpoint '{}': {e}", peer.endpoint))
    })?;

    if peer.routes.is_empty() {
        return Err(EngineError::config(format!("peer #{index}: no routes")));
    }

    for route in &peer.routes {
        let net = parse_cidr(&route.destination).map_err(|e| {
            EngineError::config(format!(
                "peer #{index}: invalid route destination '{}': {e}",
                route.destination
            ))
        })?;

        if net != net.trunc() {
            return Err(EngineError::config(format!(
                "peer #{index}: route destination '{}' has host bits set",
                route.destination
            )));
        }

        route.gateway.parse::<IpAddr>().map_err(|_| {
            EngineError::config(format!(
                "peer #{index}: invalid gateway '{}' for {}",
                route.gateway, route.destination
            ))
        })?;
    }

    Ok(())
}

/// Parse an address or network in CIDR notation (e.g. "10.0.0.1/24").
pub fn parse_cidr(cidr: &str) -> Result<IpNet, String> {
    let cidr = cidr.trim();
    let net = IpNet::from_str(cidr).map_err(|e| e.to_string())?;

    // The text is written to the units verbatim, so the prefix must be canonical.
    let prefix = cidr.rsplit_once('/').map(|(_, prefix)| prefix).unwrap_or_default();

    if prefix != net.prefix_len().to_string() {
        return Err(format!("invalid prefix length {prefix}"));
    }

    Ok(net)
}

/// Split `host:port`, accepting bracketed IPv6 literals.
pub fn parse_endpoint(endpoint: &str) -> Result<(&str, u16), String> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| "expected host:port".to_string())?;

    let host = match host.strip_prefix('[') {
        Some(inner) => inner
            .strip_suffix(']')
            .ok_or_else(|| "unbalanced brackets".to_string())?,
        None if host.contains(':') => {
            return Err("IPv6 hosts must be enclosed in brackets".to_string())
        }
        None => host,
    };

    if host.is_empty() {
        return Err("missing host".to_string());
    }

    match port.parse::<u16>() {
        Ok(port) if port > 0 => Ok((host, port)),
        _ => Err(format!("invalid port '{port}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn peer() -> Peer {
        Peer {
            public_key: "PK1".to_string(),
            routes: vec![Route {
                destination: "0.0.0.0/0".to_string(),
                gateway: "10.0.0.1".to_string(),
                gateway_onlink: None,
            }],
            endpoint: "vpn.example:51820".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_backend_json_preserves_order() {
        let value = json!({
            "ipaddress": "fd56:1dda:8794:cb90::2/64",
            "pubkey": "OLDKEY",
            "peers": [
                {
                    "pubkey": "B",
                    "psk": null,
                    "endpoint": "[2001:db8::1]:51820",
                    "persistent_keepalive": 25,
                    "routes": [
                        {"destination": "fd56:1dda:8794:cb90::/64", "gateway": "fd56:1dda:8794:cb90::1", "gateway_onlink": true},
                        {"destination": "10.8.0.0/16", "gateway": "fd56:1dda:8794:cb90::1"}
                    ]
                },
                {
                    "pubkey": "A",
                    "endpoint": "wg.example:51820",
                    "routes": [{"destination": "192.168.0.0/24", "gateway": "10.0.0.1"}]
                }
            ]
        });

        let params = TunnelParameters::from_json(&value).unwrap();

        assert_eq!(params.existing_public_key.as_deref(), Some("OLDKEY"));
        assert_eq!(params.peers[0].public_key, "B");
        assert_eq!(params.peers[1].public_key, "A");
        assert_eq!(params.peers[0].routes[1].destination, "10.8.0.0/16");
        assert_eq!(params.peers[0].routes[0].gateway_onlink, Some(true));
        assert_eq!(params.peers[0].keepalive(), Some(25));
        assert_eq!(params.route_count(), 3);
        assert_eq!(params.effective_mtu(), DEFAULT_MTU);
    }

    #[test]
    fn test_missing_address() {
        let params = TunnelParameters {
            peers: vec![peer()],
            ..Default::default()
        };
        let err = params.validate().unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: missing address");
    }

    #[test]
    fn test_missing_endpoint() {
        let value = json!({
            "ipaddress": "10.0.0.2/24",
            "peers": [{"pubkey": "PK1", "routes": [{"destination": "0.0.0.0/0", "gateway": "10.0.0.1"}]}]
        });
        let err = TunnelParameters::from_json(&value).unwrap_err();
        assert!(err.to_string().contains("missing endpoint"));
    }

    #[test]
    fn test_peer_checks() {
        let mut params = TunnelParameters {
            address: "10.0.0.2/24".to_string(),
            peers: vec![peer()],
            ..Default::default()
        };
        assert!(params.validate().is_ok());

        params.peers[0].public_key.clear();
        assert!(params.validate().unwrap_err().to_string().contains("missing public key"));

        params.peers[0] = peer();
        params.peers[0].routes.clear();
        assert!(params.validate().unwrap_err().to_string().contains("no routes"));

        params.peers[0] = peer();
        params.peers[0].routes[0].destination = "10.0.0.1/24".to_string();
        assert!(params.validate().unwrap_err().to_string().contains("host bits"));

        params.peers[0] = peer();
        params.peers[0].routes[0].destination = "10.0.0.0".to_string();
        assert!(params.validate().is_err());

        params.peers[0] = peer();
        params.peers[0].endpoint = "vpn.example".to_string();
        assert!(params.validate().unwrap_err().to_string().contains("invalid endpoint"));

        params.peers[0] = peer();
        params.peers[0].routes[0].gateway = "gateway".to_string();
        assert!(params.validate().unwrap_err().to_string().contains("invalid gateway"));
    }

    #[test]
    fn test_empty_peer_list_is_legal() {
        let params = TunnelParameters::from_json(&json!({"ipaddress": "10.0.0.2/24"})).unwrap();
        assert!(params.peers.is_empty());
    }

    #[test]
    fn test_zero_mtu_and_keepalive() {
        let mut params = TunnelParameters {
            address: "10.0.0.2/24".to_string(),
            mtu: Some(0),
            peers: vec![peer()],
            ..Default::default()
        };
        params.peers[0].persistent_keepalive = Some(0);
        params.peers[0].preshared_key = Some(String::new());

        assert_eq!(params.effective_mtu(), DEFAULT_MTU);
        assert_eq!(params.peers[0].keepalive(), None);
        assert_eq!(params.peers[0].preshared_key(), None);
    }

    #[test]
    fn test_parse_cidr() {
        assert_eq!(parse_cidr("10.0.0.2/24").unwrap().prefix_len(), 24);
        assert_eq!(parse_cidr(" fd56:1dda:8794:cb90::/64 ").unwrap().prefix_len(), 64);
        assert!(parse_cidr("fd00::/129").is_err());
        assert!(parse_cidr("10.0.0.0/33").is_err());
        assert!(parse_cidr("nonsense/8").is_err());
        assert!(parse_cidr("10.0.0.0").is_err());
    }

    #[test]
    fn test_parse_cidr_rejects_odd_prefixes() {
        assert!(parse_cidr("0.0.0.0/+0").is_err());
        assert!(parse_cidr("10.0.0.2/024").is_err());
        assert!(parse_cidr("10.0.0.2/08").is_err());
        assert!(parse_cidr("fd00::/064").is_err());
        assert!(parse_cidr("10.0.0.2/").is_err());
    }

    #[test]
    fn test_validate_rejects_odd_prefixes() {
        let mut params = TunnelParameters {
            address: "10.0.0.2/024".to_string(),
            peers: vec![peer()],
            ..Default::default()
        };
        assert!(params
            .validate()
            .unwrap_err()
            .to_string()
            .contains("invalid address"));

        params.address = "10.0.0.2/24".to_string();
        params.peers[0].routes[0].destination = "0.0.0.0/+0".to_string();
        assert!(params
            .validate()
            .unwrap_err()
            .to_string()
            .contains("invalid route destination"));
    }

    #[test]
    fn test_host_bits() {
        let mut params = TunnelParameters {
            address: "10.0.0.2/24".to_string(),
            peers: vec![peer()],
            ..Default::default()
        };

        params.peers[0].routes[0].destination = "fd56:1dda:8794:cb90::1/64".to_string();
        assert!(params.validate().unwrap_err().to_string().contains("host bits"));

        params.peers[0].routes[0].destination = "fd56:1dda:8794:cb90::/64".to_string();
        assert!(params.validate().is_ok());

        params.peers[0].routes[0].destination = "10.8.0.1/32".to_string();
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(parse_endpoint("vpn.example:51820").unwrap(), ("vpn.example", 51820));
        assert_eq!(parse_endpoint("[2001:db8::1]:51820").unwrap(), ("2001:db8::1", 51820));
        assert!(parse_endpoint("2001:db8::1:51820").is_err());
        assert!(parse_endpoint(":51820").is_err());
        assert!(parse_endpoint("vpn.example:0").is_err());
        assert!(parse_endpoint("vpn.example:port").is_err());
    }
}
