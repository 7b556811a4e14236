//! Hardware facts reported to the backend when a setup is finalized.

use crate::error::{EngineError, EngineResult};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Interfaces whose MAC addresses identify the terminal.
const MAC_INTERFACE_PATTERN: &str = r"^enp\ds\d$";

/// `/proc/cpuinfo` keys holding whitespace separated lists.
const LIST_KEYS: [&str; 2] = ["flags", "bugs"];

/// Data sent along with the serial number after a successful setup.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostReport {
    #[serde(rename = "sn", skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,

    pub mac_addresses: Vec<String>,

    /// One object per logical processor
    pub cpuinfo: Vec<Map<String, Value>>,

    pub efi_booted: bool,
}

/// Where the facts are read from.
#[derive(Debug, Clone)]
pub struct HostFacts {
    pub net_class_dir: PathBuf,
    pub cpuinfo_file: PathBuf,
    pub efi_dir: PathBuf,
}

impl Default for HostFacts {
    fn default() -> Self {
        Self {
            net_class_dir: PathBuf::from("/sys/class/net"),
            cpuinfo_file: PathBuf::from("/proc/cpuinfo"),
            efi_dir: PathBuf::from("/sys/firmware/efi"),
        }
    }
}

impl HostFacts {
    pub fn collect(&self, serial_number: Option<String>) -> EngineResult<HostReport> {
        Ok(HostReport {
            serial_number,
            mac_addresses: self.mac_addresses()?,
            cpuinfo: self.cpuinfo()?,
            efi_booted: self.efi_dir.is_dir(),
        })
    }

    /// MAC addresses of the onboard ethernet interfaces, ordered by name.
    pub fn mac_addresses(&self) -> EngineResult<Vec<String>> {
        let pattern = Regex::new(MAC_INTERFACE_PATTERN)
            .map_err(|e| EngineError::HostIdentity(format!("invalid interface pattern: {e}")))?;

        let entries = match fs::read_dir(&self.net_class_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(read_error(&self.net_class_dir, e)),
        };

        let mut interfaces = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| read_error(&self.net_class_dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();

            if pattern.is_match(&name) {
                interfaces.push((name, entry.path().join("address")));
            }
        }

        interfaces.sort();

        let mut addresses = Vec::new();

        for (name, path) in interfaces {
            match fs::read_to_string(&path) {
                Ok(address) => addresses.push(address.trim().to_string()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("{} has no link address", name);
                }
                Err(e) => return Err(read_error(&path, e)),
            }
        }

        Ok(addresses)
    }

    pub fn cpuinfo(&self) -> EngineResult<Vec<Map<String, Value>>> {
        match fs::read_to_string(&self.cpuinfo_file) {
            Ok(text) => Ok(parse_cpuinfo(&text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(read_error(&self.cpuinfo_file, e)),
        }
    }
}

fn read_error(path: &Path, e: io::Error) -> EngineError {
    EngineError::HostIdentity(format!("cannot read {}: {e}", path.display()))
}

/// Split `/proc/cpuinfo` into one object per processor block.
pub fn parse_cpuinfo(text: &str) -> Vec<Map<String, Value>> {
    let mut cores = Vec::new();
    let mut core = Map::new();

    for line in text.lines() {
        let line = line.trim();

        if line.is_empty() {
            if !core.is_empty() {
                cores.push(std::mem::take(&mut core));
            }
            continue;
        }

        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            core.insert(key.to_string(), cpuinfo_value(key, value.trim()));
        }
    }

    if !core.is_empty() {
        cores.push(core);
    }

    cores
}

fn cpuinfo_value(key: &str, value: &str) -> Value {
    if LIST_KEYS.contains(&key) {
        return value.split_whitespace().map(Value::from).collect();
    }

    if let Ok(n) = value.parse::<i64>() {
        return Value::from(n);
    }

    match value.parse::<f64>() {
        Ok(n) if n.is_finite() => Value::from(n),
        _ => Value::from(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    const CPUINFO: &str = "processor\t: 0\n\
vendor_id\t: GenuineIntel\n\
cpu MHz\t\t: 1992.002\n\
flags\t\t: fpu vme de\n\
bugs\t\t:\n\
\n\
processor\t: 1\n\
vendor_id\t: GenuineIntel\n\
\n";

    #[test]
    fn test_parse_cpuinfo() {
        let cores = parse_cpuinfo(CPUINFO);

        assert_eq!(cores.len(), 2);
        assert_eq!(cores[0]["processor"], json!(0));
        assert_eq!(cores[0]["vendor_id"], json!("GenuineIntel"));
        assert_eq!(cores[0]["cpu MHz"], json!(1992.002));
        assert_eq!(cores[0]["flags"], json!(["fpu", "vme", "de"]));
        assert_eq!(cores[0]["bugs"], json!([]));
        assert_eq!(cores[1]["processor"], json!(1));
    }

    #[test]
    fn test_collect() {
        let dir = tempdir().unwrap();
        let net = dir.path().join("net");

        for (name, address) in [
            ("enp2s0", "00:11:22:33:44:56"),
            ("enp1s0", "00:11:22:33:44:55"),
            ("wlan0", "66:77:88:99:aa:bb"),
            ("enp0s31f6", "cc:dd:ee:ff:00:11"),
        ] {
            fs::create_dir_all(net.join(name)).unwrap();
            fs::write(net.join(name).join("address"), format!("{address}\n")).unwrap();
        }
        fs::write(dir.path().join("cpuinfo"), CPUINFO).unwrap();

        let facts = HostFacts {
            net_class_dir: net,
            cpuinfo_file: dir.path().join("cpuinfo"),
            efi_dir: dir.path().join("efi"),
        };
        let report = facts.collect(Some("SN-42".to_string())).unwrap();

        assert_eq!(report.mac_addresses, vec!["00:11:22:33:44:55", "00:11:22:33:44:56"]);
        assert_eq!(report.cpuinfo.len(), 2);
        assert!(!report.efi_booted);

        let body = serde_json::to_value(&report).unwrap();
        assert_eq!(body["sn"], json!("SN-42"));
        assert_eq!(body["efi_booted"], json!(false));
    }

    #[test]
    fn test_missing_sources() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("efi")).unwrap();

        let facts = HostFacts {
            net_class_dir: dir.path().join("absent"),
            cpuinfo_file: dir.path().join("absent"),
            efi_dir: dir.path().join("efi"),
        };
        let report = facts.collect(None).unwrap();

        assert!(report.mac_addresses.is_empty());
        assert!(report.cpuinfo.is_empty());
        assert!(report.efi_booted);
        assert!(serde_json::to_value(&report).unwrap().get("sn").is_none());
    }
}
