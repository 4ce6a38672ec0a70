//! Host/runtime identification for the `run.json` `host`/`runtime` fields
//! (§3 "Run evidence"). The reference implementation reaches for
//! `socket.gethostname()`/`platform.machine()`; none of this workspace's
//! dependencies (or the wider example pack) pull in a `hostname`/`sysinfo`
//! crate for the same job, so this stays on `std::env`/`std::env::consts`
//! rather than adding a dependency for three strings.

use serde::{Deserialize, Serialize};

/// `run.json.host` (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostInfo {
    pub hostname: String,
    pub os: String,
    pub arch: String,
}

/// `run.json.runtime` (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeInfo {
    pub language: String,
    pub platform: String,
}

/// Best-effort hostname lookup via the environment (`HOSTNAME` on Unix,
/// `COMPUTERNAME` on Windows), `"unknown"` if neither is set.
#[must_use]
pub fn get_host_info() -> HostInfo {
    let hostname = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    HostInfo { hostname, os: std::env::consts::OS.to_string(), arch: std::env::consts::ARCH.to_string() }
}

#[must_use]
pub fn get_runtime_info() -> RuntimeInfo {
    RuntimeInfo {
        language: "rust".to_string(),
        platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_info_never_panics_and_fills_every_field() {
        let h = get_host_info();
        assert!(!h.hostname.is_empty());
        assert!(!h.os.is_empty());
        assert!(!h.arch.is_empty());
    }

    #[test]
    fn runtime_info_reports_rust() {
        let r = get_runtime_info();
        assert_eq!(r.language, "rust");
        assert!(r.platform.contains(std::env::consts::OS));
    }
}
