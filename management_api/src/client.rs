//! Blocking session against the terminal setup API.

use crate::error::{ApiError, ApiResult};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use shared_utils::config::ApiConfig;
use tracing::{debug, info};
use tunnel_engine::{
    Backend, EngineError, EngineResult, HostReport, RegisteredSystem, SystemMetadata,
    TunnelParameters,
};

/// Terminal record as returned by the `info` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub id: u32,

    #[serde(default)]
    pub created: Option<String>,

    #[serde(default)]
    pub operating_system: Option<String>,

    /// Timestamp of the last configuration, if any
    #[serde(default)]
    pub configured: Option<String>,

    #[serde(default)]
    pub serial_number: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    /// Deployment the terminal is installed at
    #[serde(default)]
    pub deployment: Option<u32>,

    /// Raw tunnel parameters
    #[serde(default)]
    pub wireguard: Option<serde_json::Value>,
}

/// Body of the `system` endpoints' responses.
#[derive(Debug, Deserialize)]
struct SystemRecord {
    id: u32,
    wireguard: serde_json::Value,
}

#[derive(Serialize)]
struct Credentials<'a> {
    account: &'a str,
    passwd: &'a str,
}

#[derive(Serialize)]
struct InfoRequest {
    system: u32,
}

#[derive(Serialize)]
struct FinalizeRequest<'a> {
    system: u32,
    #[serde(flatten)]
    report: &'a HostReport,
}

#[derive(Serialize)]
struct SystemRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<u32>,
    pubkey: &'a str,
    #[serde(flatten)]
    metadata: &'a SystemMetadata,
}

/// Backend client keeping the session cookie between requests.
pub struct Client {
    http: HttpClient,
    login_url: Url,
    base_url: Url,
}

impl Client {
    pub fn new(config: &ApiConfig) -> ApiResult<Self> {
        let http = HttpClient::builder()
            .cookie_store(true)
            .timeout(config.timeout())
            .build()
            .map_err(|e| ApiError::Connection(e.to_string()))?;

        Self::with_client(http, &config.login_url, &config.base_url)
    }

    /// Use a preconfigured HTTP client.
    pub fn with_client(http: HttpClient, login_url: &str, base_url: &str) -> ApiResult<Self> {
        // Endpoints are joined onto the base, which needs a trailing slash.
        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };

        Ok(Self {
            http,
            login_url: parse_url(login_url)?,
            base_url: parse_url(&base)?,
        })
    }

    /// Open a session.
    pub fn login(&self, account: &str, passwd: &str) -> ApiResult<()> {
        info!("Logging in as {}", account);
        self.request(Method::POST, self.login_url.clone(), &Credentials { account, passwd })?;
        Ok(())
    }

    /// Record of terminal `system`.
    pub fn info(&self, system: u32) -> ApiResult<SystemInfo> {
        let url = self.endpoint("info")?;
        let response = self.request(Method::POST, url, &InfoRequest { system })?;
        Ok(response.json()?)
    }

    /// OpenVPN client configuration of terminal `system` as a tar archive.
    pub fn openvpn(&self, system: u32) -> ApiResult<Vec<u8>> {
        let url = self.endpoint("openvpn")?;
        let response = self.request(Method::POST, url, &InfoRequest { system })?;
        Ok(response.bytes()?.to_vec())
    }

    /// Report a completed setup.
    pub fn finalize(&self, system: u32, report: &HostReport) -> ApiResult<String> {
        let url = self.endpoint("finalize")?;
        let response = self.request(Method::POST, url, &FinalizeRequest { system, report })?;
        Ok(response.text()?)
    }

    /// Create a terminal for `pubkey`.
    pub fn add_system(&self, pubkey: &str, metadata: &SystemMetadata) -> ApiResult<serde_json::Value> {
        let body = SystemRequest {
            system: None,
            pubkey,
            metadata,
        };
        let response = self.request(Method::POST, self.endpoint("system")?, &body)?;
        Ok(response.json()?)
    }

    /// Replace the public key of terminal `system`.
    pub fn patch_system(
        &self,
        system: u32,
        pubkey: &str,
        metadata: &SystemMetadata,
    ) -> ApiResult<serde_json::Value> {
        let body = SystemRequest {
            system: Some(system),
            pubkey,
            metadata,
        };
        let response = self.request(Method::PATCH, self.endpoint("system")?, &body)?;
        Ok(response.json()?)
    }

    fn endpoint(&self, name: &str) -> ApiResult<Url> {
        self.base_url.join(name).map_err(|e| ApiError::InvalidUrl {
            url: format!("{}{name}", self.base_url),
            message: e.to_string(),
        })
    }

    fn request<T: Serialize + ?Sized>(&self, method: Method, url: Url, body: &T) -> ApiResult<Response> {
        debug!("{} {}", method, url);

        let response = self.http.request(method, url).json(body).send()?;
        let status = response.status();

        if status != StatusCode::OK {
            let message = response.text().unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }

        Ok(response)
    }
}

fn parse_url(url: &str) -> ApiResult<Url> {
    Url::parse(url).map_err(|e| ApiError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })
}

fn system_record(value: serde_json::Value) -> EngineResult<RegisteredSystem> {
    let record: SystemRecord = serde_json::from_value(value)
        .map_err(|e| EngineError::BackendUnavailable(format!("invalid system record: {e}")))?;

    Ok(RegisteredSystem {
        id: record.id,
        params: TunnelParameters::from_json(&record.wireguard)?,
    })
}

impl Backend for Client {
    fn fetch_tunnel_info(&self, terminal_id: u32) -> EngineResult<TunnelParameters> {
        let info = self.info(terminal_id)?;

        // Unconfigured terminals have no usable parameters yet.
        match info.wireguard {
            Some(value) => serde_json::from_value(value).map_err(|e| {
                EngineError::BackendUnavailable(format!("invalid tunnel parameters: {e}"))
            }),
            None => Ok(TunnelParameters::default()),
        }
    }

    fn is_configured(&self, terminal_id: u32) -> EngineResult<bool> {
        let info = self.info(terminal_id)?;
        let has_key = info
            .wireguard
            .as_ref()
            .and_then(|wireguard| wireguard.get("pubkey"))
            .is_some_and(|key| !key.is_null());

        Ok(info.configured.is_some() || has_key)
    }

    fn register_system(
        &self,
        public_key: &str,
        metadata: &SystemMetadata,
    ) -> EngineResult<RegisteredSystem> {
        system_record(self.add_system(public_key, metadata)?)
    }

    fn patch_system(
        &self,
        terminal_id: u32,
        public_key: &str,
        metadata: &SystemMetadata,
    ) -> EngineResult<TunnelParameters> {
        let record = system_record(Client::patch_system(self, terminal_id, public_key, metadata)?)?;
        Ok(record.params)
    }

    fn fetch_legacy_config(&self, terminal_id: u32) -> EngineResult<Vec<u8>> {
        Ok(self.openvpn(terminal_id)?)
    }

    fn finalize(&self, terminal_id: u32, report: &HostReport) -> EngineResult<()> {
        let reply = Client::finalize(self, terminal_id, report)?;
        debug!("Backend replied: {}", reply.trim());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_request_body() {
        let metadata = SystemMetadata {
            serial_number: Some("SN-1".to_string()),
            group: Some(1),
            ..Default::default()
        };
        let body = SystemRequest {
            system: Some(42),
            pubkey: "PUB",
            metadata: &metadata,
        };

        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"system": 42, "pubkey": "PUB", "sn": "SN-1", "group": 1})
        );
    }

    #[test]
    fn test_finalize_request_body() {
        let report = HostReport {
            serial_number: Some("SN-1".to_string()),
            mac_addresses: vec!["00:11:22:33:44:55".to_string()],
            cpuinfo: Vec::new(),
            efi_booted: true,
        };
        let body = FinalizeRequest {
            system: 42,
            report: &report,
        };

        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "system": 42,
                "sn": "SN-1",
                "mac_addresses": ["00:11:22:33:44:55"],
                "cpuinfo": [],
                "efi_booted": true
            })
        );
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let client = Client::with_client(
            HttpClient::new(),
            "https://backend.example/session",
            "https://backend.example/setup",
        )
        .unwrap();

        assert_eq!(
            client.endpoint("system").unwrap().as_str(),
            "https://backend.example/setup/system"
        );
    }

    #[test]
    fn test_invalid_url() {
        let result = Client::with_client(HttpClient::new(), "not a url", "https://x/");
        assert!(matches!(result, Err(ApiError::InvalidUrl { .. })));
    }

    #[test]
    fn test_system_record_validates_parameters() {
        let record = system_record(json!({
            "id": 7,
            "wireguard": {
                "ipaddress": "10.0.0.2/24",
                "peers": [{
                    "pubkey": "PK1",
                    "routes": [{"destination": "0.0.0.0/0", "gateway": "10.0.0.1"}],
                    "endpoint": "vpn.example:51820"
                }]
            }
        }))
        .unwrap();
        assert_eq!(record.id, 7);
        assert_eq!(record.params.peers.len(), 1);

        let err = system_record(json!({"id": 7, "wireguard": {"peers": []}})).unwrap_err();
        assert_eq!(err.kind(), tunnel_engine::ErrorKind::Configuration);

        let err = system_record(json!({"wireguard": {}})).unwrap_err();
        assert_eq!(err.kind(), tunnel_engine::ErrorKind::BackendUnavailable);
    }

    #[test]
    fn test_api_error_maps_to_backend_unavailable() {
        let err: EngineError = ApiError::Status {
            status: 401,
            message: "Unauthorized".to_string(),
        }
        .into();
        assert_eq!(err.kind(), tunnel_engine::ErrorKind::BackendUnavailable);
        assert!(err.to_string().contains("401"));
    }
}
