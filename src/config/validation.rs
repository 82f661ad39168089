//! Configuration validation

use super::{Config, LinkConfig};
use crate::protocol::lcp::MIN_MRU;
use crate::telemetry::is_known_level;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_log(config, &mut result);

    if config.links.is_empty() {
        result.warn("links: no links defined");
    }

    let mut names: Vec<&String> = config.links.keys().collect();
    names.sort();
    for name in names {
        let link = &config.links[name];
        validate_fsm(name, link, &mut result);
        validate_lcp(name, link, &mut result);
        validate_auth(name, link, config, &mut result);
        validate_ipcp(name, link, &mut result);
    }

    result
}

/// Check two links meant to talk to each other directly
pub fn validate_pair(
    a_name: &str,
    a: &LinkConfig,
    b_name: &str,
    b: &LinkConfig,
) -> ValidationResult {
    let mut result = ValidationResult::new();
    if a.originate == b.originate {
        let directions = [(a_name, a, b_name, b), (b_name, b, a_name, a)];
        for (auth_name, authenticator, peer_name, peer) in directions {
            let chap = authenticator
                .auth
                .require
                .iter()
                .any(|m| m.is_chap() && peer.auth.accept.contains(m));
            if chap && peer.auth.spoof_check {
                result.error(format!(
                    "links.{}: same originate as links.{}, its CHAP challenges would be dropped as spoofed",
                    auth_name, peer_name
                ));
            }
        }
    }
    result
}

fn validate_log(config: &Config, result: &mut ValidationResult) {
    if !is_known_level(&config.log.level) {
        result.warn(format!(
            "log.level: unknown level '{}', using info",
            config.log.level
        ));
    }
    if !matches!(config.log.format.as_str(), "pretty" | "compact" | "json") {
        result.warn(format!(
            "log.format: unknown format '{}', using pretty",
            config.log.format
        ));
    }
}

fn validate_fsm(name: &str, link: &LinkConfig, result: &mut ValidationResult) {
    let fsm = &link.fsm;
    if fsm.restart_timeout_ms == 0 {
        result.error(format!("links.{}.fsm: restart_timeout_ms must be > 0", name));
    }
    if fsm.max_configure == 0 {
        result.error(format!("links.{}.fsm: max_configure must be > 0", name));
    }
    if fsm.max_terminate == 0 {
        result.error(format!("links.{}.fsm: max_terminate must be > 0", name));
    }
    if fsm.max_failure == 0 {
        result.error(format!("links.{}.fsm: max_failure must be > 0", name));
    }
}

fn validate_lcp(name: &str, link: &LinkConfig, result: &mut ValidationResult) {
    let lcp = &link.lcp;
    if lcp.mru < MIN_MRU {
        result.error(format!(
            "links.{}.lcp: mru {} below minimum {}",
            name, lcp.mru, MIN_MRU
        ));
    }
    if lcp.echo_interval_secs == 0 && lcp.echo_max_secs > 0 {
        result.warn(format!(
            "links.{}.lcp: echo_interval_secs is 0, keep-alive disabled",
            name
        ));
    }
    if lcp.echo_interval_secs > 0 && lcp.echo_max_secs > 0 && lcp.echo_max_secs < lcp.echo_interval_secs
    {
        result.warn(format!(
            "links.{}.lcp: echo_max_secs {} shorter than one interval, first silent interval fails the link",
            name, lcp.echo_max_secs
        ));
    }
    if lcp.check_magic && !lcp.magic_number {
        result.warn(format!(
            "links.{}.lcp: check_magic has no effect without magic_number",
            name
        ));
    }
}

fn validate_auth(name: &str, link: &LinkConfig, config: &Config, result: &mut ValidationResult) {
    let auth = &link.auth;
    for (i, method) in auth.require.iter().enumerate() {
        if auth.require[..i].contains(method) {
            result.warn(format!(
                "links.{}.auth: '{}' listed twice in require",
                name, method
            ));
        }
    }
    if !auth.require.is_empty() && config.secrets.is_empty() {
        result.error(format!(
            "links.{}.auth: peer authentication required but no secrets defined",
            name
        ));
    }
    if auth.accept.is_empty() {
        result.warn(format!(
            "links.{}.auth: accept is empty, peers requiring authentication will be refused",
            name
        ));
    }
    if let Some(ref own) = auth.name {
        if !auth.accept.is_empty() && !config.secrets.contains_key(own) {
            result.warn(format!(
                "links.{}.auth: no secret for our name '{}'",
                name, own
            ));
        }
    }
    if auth.max_retries == 0 {
        result.error(format!("links.{}.auth: max_retries must be > 0", name));
    }
    if auth.retry_timeout_ms == 0 {
        result.error(format!("links.{}.auth: retry_timeout_ms must be > 0", name));
    }
    if auth.timeout_secs == 0 {
        result.error(format!("links.{}.auth: timeout_secs must be > 0", name));
    }
}

fn validate_ipcp(name: &str, link: &LinkConfig, result: &mut ValidationResult) {
    let ipcp = &link.ipcp;
    if let (Some(local), Some(peer)) = (ipcp.local_address, ipcp.peer_address) {
        if local == peer {
            result.error(format!(
                "links.{}.ipcp: local and peer address are both {}",
                name, local
            ));
        }
    }
    if ipcp.dns.len() > 2 {
        result.warn(format!(
            "links.{}.ipcp: only the first two dns servers are offered",
            name
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthMethod;
    use crate::config::Originate;
    use std::net::Ipv4Addr;

    fn make_config() -> Config {
        let mut config = Config::default();
        config.links.insert("ppp0".to_string(), LinkConfig::default());
        config
    }

    #[test]
    fn test_valid_default_link() {
        let config = make_config();
        let result = validate(&config);
        assert!(!result.has_errors());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_no_links_warns() {
        let result = validate(&Config::default());
        assert!(!result.has_errors());
        assert!(result.warnings.iter().any(|w| w.contains("no links")));
    }

    #[test]
    fn test_require_without_secrets() {
        let mut config = make_config();
        if let Some(link) = config.links.get_mut("ppp0") {
            link.auth.require = vec![AuthMethod::ChapMd5];
        }
        let result = validate(&config);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("no secrets defined")));
    }

    #[test]
    fn test_small_mru() {
        let mut config = make_config();
        if let Some(link) = config.links.get_mut("ppp0") {
            link.lcp.mru = 64;
        }
        let result = validate(&config);
        assert!(result.errors.iter().any(|e| e.contains("below minimum")));
    }

    #[test]
    fn test_zero_budgets() {
        let mut config = make_config();
        if let Some(link) = config.links.get_mut("ppp0") {
            link.fsm.max_configure = 0;
            link.auth.max_retries = 0;
        }
        let result = validate(&config);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_same_addresses() {
        let mut config = make_config();
        if let Some(link) = config.links.get_mut("ppp0") {
            link.ipcp.local_address = Some(Ipv4Addr::new(10, 0, 0, 1));
            link.ipcp.peer_address = Some(Ipv4Addr::new(10, 0, 0, 1));
        }
        let result = validate(&config);
        assert!(result.errors.iter().any(|e| e.contains("both 10.0.0.1")));
    }

    #[test]
    fn test_pair_with_same_originate_and_chap() {
        let mut server = LinkConfig::default();
        server.auth.require = vec![AuthMethod::ChapMd5];
        let client = LinkConfig::default();

        let result = validate_pair("a", &server, "b", &client);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("same originate"));

        server.originate = Originate::Remote;
        assert!(!validate_pair("a", &server, "b", &client).has_errors());
    }

    #[test]
    fn test_pair_with_pap_or_no_spoof_check() {
        let mut server = LinkConfig::default();
        server.auth.require = vec![AuthMethod::Pap];
        let mut client = LinkConfig::default();
        assert!(!validate_pair("a", &server, "b", &client).has_errors());

        server.auth.require = vec![AuthMethod::MsChapV2];
        client.auth.spoof_check = false;
        assert!(!validate_pair("a", &server, "b", &client).has_errors());
    }

    #[test]
    fn test_duplicate_require_and_unknown_format() {
        let mut config = make_config();
        config.secrets.insert("bob".into(), "pw".into());
        config.log.format = "xml".into();
        if let Some(link) = config.links.get_mut("ppp0") {
            link.auth.require = vec![AuthMethod::Pap, AuthMethod::Pap];
        }
        let result = validate(&config);
        assert!(!result.has_errors());
        assert!(result.warnings.iter().any(|w| w.contains("listed twice")));
        assert!(result.warnings.iter().any(|w| w.contains("log.format")));
    }
}
