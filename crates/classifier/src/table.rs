//! Priority-ordered source-type classification table.

use serde::{Deserialize, Serialize};

use logwarden_core::SourceType;

/// One row of the classification table.
///
/// A row matches when every non-empty predicate list has at least one hit:
/// `processes` are case-insensitive prefixes of the process name, `keywords`
/// are case-insensitive substrings of the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub source_type: SourceType,
    #[serde(default)]
    pub processes: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl ClassificationRule {
    pub fn new(source_type: SourceType) -> Self {
        Self {
            source_type,
            processes: Vec::new(),
            keywords: Vec::new(),
        }
    }

    pub fn processes(mut self, names: &[&str]) -> Self {
        self.processes = names.iter().map(|n| n.to_ascii_lowercase()).collect();
        self
    }

    pub fn keywords(mut self, words: &[&str]) -> Self {
        self.keywords = words.iter().map(|w| w.to_ascii_lowercase()).collect();
        self
    }

    /// Expects lowercased inputs.
    fn matches(&self, process: Option<&str>, message: &str) -> bool {
        if self.processes.is_empty() && self.keywords.is_empty() {
            return false;
        }
        let process_ok = self.processes.is_empty()
            || process
                .map(|p| self.processes.iter().any(|want| p.starts_with(want.as_str())))
                .unwrap_or(false);
        let keyword_ok = self.keywords.is_empty()
            || self.keywords.iter().any(|k| message.contains(k.as_str()));
        process_ok && keyword_ok
    }
}

/// First matching row wins; no match means [`SourceType::Generic`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTypeTable {
    rules: Vec<ClassificationRule>,
}

impl SourceTypeTable {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|mut r| {
                r.processes.iter_mut().for_each(|p| *p = p.to_ascii_lowercase());
                r.keywords.iter_mut().for_each(|k| *k = k.to_ascii_lowercase());
                r
            })
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    pub fn classify(&self, process: Option<&str>, message: &str) -> SourceType {
        let process = process.map(str::to_ascii_lowercase);
        let message = message.to_ascii_lowercase();
        self.rules
            .iter()
            .find(|r| r.matches(process.as_deref(), &message))
            .map(|r| r.source_type)
            .unwrap_or(SourceType::Generic)
    }
}

impl Default for SourceTypeTable {
    /// Table tuned for OpenWrt-style routers and access points.
    fn default() -> Self {
        Self::new(vec![
            // Auth lines from remote-access daemons.
            ClassificationRule::new(SourceType::Security)
                .processes(&["dropbear", "sshd", "sudo", "login", "su", "uhttpd"])
                .keywords(&[
                    "password",
                    "auth",
                    "login",
                    "invalid user",
                    "pubkey",
                    "session opened",
                    "not allowed",
                ]),
            // Firewall drops logged through the kernel.
            ClassificationRule::new(SourceType::Security)
                .processes(&["kernel"])
                .keywords(&["reject", "drop ", "dropped", "src="]),
            ClassificationRule::new(SourceType::Wifi)
                .processes(&["hostapd", "wpa_supplicant", "wpad"]),
            ClassificationRule::new(SourceType::Wifi)
                .processes(&["kernel"])
                .keywords(&["wlan", "ath9k", "ath10k", "mt76", "802.11"]),
            ClassificationRule::new(SourceType::Network).processes(&[
                "dnsmasq", "odhcpd", "odhcp6c", "netifd", "pppd", "udhcpc", "firewall",
            ]),
            ClassificationRule::new(SourceType::System).processes(&[
                "kernel", "procd", "init", "cron", "syslogd", "logd", "ubusd", "rpcd",
                "systemd",
            ]),
        ])
    }
}
