//! Configuration types

use crate::auth::AuthMethod;
use crate::protocol::lcp::DEFAULT_MRU;
use crate::telemetry::LogConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::time::Duration;

/// User-defined configuration (pppcp.toml)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub links: HashMap<String, LinkConfig>,
    /// Authentication name -> password
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

/// Who placed the call; stamped into CHAP challenges
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Originate {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkConfig {
    pub originate: Originate,
    pub fsm: FsmConfig,
    pub lcp: LcpConfig,
    pub auth: AuthConfig,
    pub ipcp: IpcpConfig,
}

/// Counters and timers shared by every control protocol on a link
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FsmConfig {
    pub restart_timeout_ms: u64,
    /// Configure-Request transmissions, also the Nak/Reject budget
    pub max_configure: u32,
    pub max_terminate: u32,
    /// Configure-Nak/Reject replies we send before giving up
    pub max_failure: u32,
    /// Stay in Stopped on failure instead of signalling LayerFinish
    pub passive: bool,
    /// Open while Opened/Stopped/Stopping restarts negotiation
    pub restart_on_open: bool,
}

impl FsmConfig {
    pub fn restart_timeout(&self) -> Duration {
        Duration::from_millis(self.restart_timeout_ms)
    }
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self {
            restart_timeout_ms: 3000,
            max_configure: 10,
            max_terminate: 2,
            max_failure: 5,
            passive: false,
            restart_on_open: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LcpConfig {
    pub mru: u16,
    pub magic_number: bool,
    pub check_magic: bool,
    pub echo_interval_secs: u64,
    /// Silence tolerated before the peer is declared dead; 0 disables echo
    pub echo_max_secs: u64,
    pub pfc: bool,
    pub acfc: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accm: Option<u32>,
}

impl LcpConfig {
    /// Echo interval and limit, if keep-alive is enabled
    pub fn echo(&self) -> Option<(Duration, Duration)> {
        if self.echo_interval_secs == 0 || self.echo_max_secs == 0 {
            return None;
        }
        Some((
            Duration::from_secs(self.echo_interval_secs),
            Duration::from_secs(self.echo_max_secs),
        ))
    }
}

impl Default for LcpConfig {
    fn default() -> Self {
        Self {
            mru: DEFAULT_MRU,
            magic_number: true,
            check_magic: true,
            echo_interval_secs: 10,
            echo_max_secs: 60,
            pfc: false,
            acfc: false,
            accm: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Methods we demand from the peer, most preferred first
    pub require: Vec<AuthMethod>,
    /// Methods we agree to perform when the peer asks
    pub accept: Vec<AuthMethod>,
    /// Our authentication name; the peer's advertised name is used if unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub retry_timeout_ms: u64,
    pub max_retries: u32,
    /// Overall limit for the authentication phase
    pub timeout_secs: u64,
    /// Strip `DOMAIN\` from names received in MS-CHAP responses
    pub strip_domain: bool,
    /// Drop challenges carrying our own fingerprint and origination
    pub spoof_check: bool,
}

impl AuthConfig {
    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require: Vec::new(),
            accept: vec![
                AuthMethod::Pap,
                AuthMethod::ChapMd5,
                AuthMethod::MsChap,
                AuthMethod::MsChapV2,
            ],
            name: None,
            retry_timeout_ms: 3000,
            max_retries: 5,
            timeout_secs: 60,
            strip_domain: false,
            spoof_check: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct IpcpConfig {
    /// Fixed local address; negotiated from the peer if unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_address: Option<Ipv4Addr>,
    /// Address handed to the peer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_address: Option<Ipv4Addr>,
    /// Ask the peer for name servers
    pub request_dns: bool,
    /// Name servers handed to the peer
    pub dns: Vec<Ipv4Addr>,
}

// ============================================================================
// Lock file types (generated, includes all defaults)
// ============================================================================

/// Generated lock file with all defaults filled in
#[derive(Debug, Clone, Serialize)]
pub struct ConfigLock {
    pub generated_at: String,
    pub log: LogConfig,
    pub links: BTreeMap<String, LinkConfig>,
    /// Names with a stored secret; the secrets themselves are left out
    pub secret_names: Vec<String>,
}

impl ConfigLock {
    pub fn from_config(config: &Config) -> Self {
        let links = config
            .links
            .iter()
            .map(|(name, link)| (name.clone(), link.clone()))
            .collect();

        let mut secret_names: Vec<String> = config.secrets.keys().cloned().collect();
        secret_names.sort();

        ConfigLock {
            generated_at: chrono::Utc::now().to_rfc3339(),
            log: config.log.clone(),
            links,
            secret_names,
        }
    }
}
