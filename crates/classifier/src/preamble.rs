//! Syslog preamble extraction.
//!
//! Three shapes are recognised, tried in order:
//! - RFC 5424: `<PRI>1 2025-10-18T12:00:00Z host app procid msgid - msg`
//! - RFC 3164: `<PRI>Oct 18 12:00:00 host proc[pid]: msg` (PRI and host optional)
//! - OpenWrt logread: `Sat Oct 18 12:00:00 2025 daemon.info proc[pid]: msg`
//!
//! Anything else yields `None` and the caller keeps the whole line.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static RFC5424_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^<(?P<pri>\d{1,3})>1\s+(?P<ts>\S+)\s+(?P<host>\S+)\s+(?P<app>\S+)\s+(?P<procid>\S+)\s+(?P<msgid>\S+)\s+(?P<sd>-|(?:\[[^\]]*\])+)\s?(?P<msg>.*)$",
    )
    .expect("valid rfc5424 regex")
});

static RFC3164_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:<(?P<pri>\d{1,3})>)?(?P<ts>[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})\s+(?P<host>[^\s:\[]+)\s+(?P<proc>[^\s\[:]+)(?:\[(?P<pid>\d+)\])?:\s?(?P<msg>.*)$",
    )
    .expect("valid rfc3164 regex")
});

static RFC3164_NO_HOST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:<(?P<pri>\d{1,3})>)?(?P<ts>[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})\s+(?P<proc>[^\s\[:]+)(?:\[(?P<pid>\d+)\])?:\s?(?P<msg>.*)$",
    )
    .expect("valid rfc3164 regex")
});

static LOGREAD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<ts>[A-Z][a-z]{2}\s+[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}\s+\d{4})\s+(?P<fac>[a-z0-9]+)\.(?P<lvl>[a-z]+)\s+(?P<proc>[^\s\[:]+)(?:\[(?P<pid>\d+)\])?:\s?(?P<msg>.*)$",
    )
    .expect("valid logread regex")
});

const FACILITIES: [&str; 24] = [
    "kern", "user", "mail", "daemon", "auth", "syslog", "lpr", "news", "uucp", "cron",
    "authpriv", "ftp", "ntp", "security", "console", "solaris-cron", "local0", "local1",
    "local2", "local3", "local4", "local5", "local6", "local7",
];

const SEVERITIES: [&str; 8] = [
    "emerg", "alert", "crit", "err", "warning", "notice", "info", "debug",
];

/// Which preamble shape matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyslogFormat {
    Rfc5424,
    Rfc3164,
    Logread,
}

impl SyslogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyslogFormat::Rfc5424 => "rfc5424",
            SyslogFormat::Rfc3164 => "rfc3164",
            SyslogFormat::Logread => "logread",
        }
    }
}

impl fmt::Display for SyslogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured header of a syslog line.
#[derive(Debug, Clone, PartialEq)]
pub struct Preamble {
    pub format: SyslogFormat,
    pub timestamp: Option<DateTime<Utc>>,
    pub hostname: Option<String>,
    pub process: Option<String>,
    pub pid: Option<u32>,
    pub facility: Option<&'static str>,
    pub severity: Option<&'static str>,
    pub message: String,
}

/// Parse a preamble from a decoded line. `reference` supplies the year for
/// formats that omit it (RFC 3164).
pub fn parse_preamble(line: &str, reference: DateTime<Utc>) -> Option<Preamble> {
    if let Some(caps) = RFC5424_RE.captures(line) {
        return Some(from_rfc5424(&caps));
    }
    if let Some(caps) = RFC3164_RE.captures(line) {
        return Some(from_rfc3164(&caps, true, reference));
    }
    if let Some(caps) = RFC3164_NO_HOST_RE.captures(line) {
        return Some(from_rfc3164(&caps, false, reference));
    }
    LOGREAD_RE.captures(line).map(|caps| from_logread(&caps))
}

fn from_rfc5424(caps: &Captures<'_>) -> Preamble {
    let (facility, severity) = decode_pri(caps.name("pri").map(|m| m.as_str()));
    let timestamp = nil_or(caps.name("ts").map(|m| m.as_str()))
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|dt| dt.with_timezone(&Utc));
    Preamble {
        format: SyslogFormat::Rfc5424,
        timestamp,
        hostname: nil_or(caps.name("host").map(|m| m.as_str())).map(str::to_string),
        process: nil_or(caps.name("app").map(|m| m.as_str())).map(str::to_string),
        pid: nil_or(caps.name("procid").map(|m| m.as_str())).and_then(|p| p.parse().ok()),
        facility,
        severity,
        message: caps.name("msg").map(|m| m.as_str()).unwrap_or_default().to_string(),
    }
}

fn from_rfc3164(caps: &Captures<'_>, with_host: bool, reference: DateTime<Utc>) -> Preamble {
    let (facility, severity) = decode_pri(caps.name("pri").map(|m| m.as_str()));
    let timestamp = caps
        .name("ts")
        .and_then(|m| parse_bsd_timestamp(m.as_str(), reference));
    let hostname = if with_host {
        caps.name("host").map(|m| m.as_str().to_string())
    } else {
        None
    };
    Preamble {
        format: SyslogFormat::Rfc3164,
        timestamp,
        hostname,
        process: caps.name("proc").map(|m| m.as_str().to_string()),
        pid: caps.name("pid").and_then(|m| m.as_str().parse().ok()),
        facility,
        severity,
        message: caps.name("msg").map(|m| m.as_str()).unwrap_or_default().to_string(),
    }
}

fn from_logread(caps: &Captures<'_>) -> Preamble {
    let timestamp = caps.name("ts").and_then(|m| {
        NaiveDateTime::parse_from_str(&collapse_ws(m.as_str()), "%a %b %d %H:%M:%S %Y")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    });
    let facility = caps
        .name("fac")
        .and_then(|m| FACILITIES.iter().copied().find(|f| *f == m.as_str()));
    let severity = caps.name("lvl").and_then(|m| normalize_level(m.as_str()));
    Preamble {
        format: SyslogFormat::Logread,
        timestamp,
        hostname: None,
        process: caps.name("proc").map(|m| m.as_str().to_string()),
        pid: caps.name("pid").and_then(|m| m.as_str().parse().ok()),
        facility,
        severity,
        message: caps.name("msg").map(|m| m.as_str()).unwrap_or_default().to_string(),
    }
}

/// Split PRI into facility and severity names. Out-of-range values yield `None`.
pub fn decode_pri(pri: Option<&str>) -> (Option<&'static str>, Option<&'static str>) {
    match pri.and_then(|p| p.parse::<usize>().ok()) {
        Some(value) if value < FACILITIES.len() * 8 => {
            (Some(FACILITIES[value / 8]), Some(SEVERITIES[value % 8]))
        }
        _ => (None, None),
    }
}

fn normalize_level(level: &str) -> Option<&'static str> {
    match level {
        "emerg" | "panic" => Some("emerg"),
        "alert" => Some("alert"),
        "crit" => Some("crit"),
        "err" | "error" => Some("err"),
        "warn" | "warning" => Some("warning"),
        "notice" => Some("notice"),
        "info" => Some("info"),
        "debug" => Some("debug"),
        _ => None,
    }
}

/// RFC 3164 timestamps carry no year. Borrow it from `reference`, stepping
/// back a year when that would put the timestamp more than a day ahead
/// (lines from late December arriving in January).
fn parse_bsd_timestamp(ts: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let collapsed = collapse_ws(ts);
    let parse_for_year = |year: i32| {
        NaiveDateTime::parse_from_str(&format!("{} {}", year, collapsed), "%Y %b %d %H:%M:%S")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    };
    let candidate = parse_for_year(reference.year())?;
    if candidate - reference > Duration::days(1) {
        parse_for_year(reference.year() - 1).or(Some(candidate))
    } else {
        Some(candidate)
    }
}

fn nil_or(value: Option<&str>) -> Option<&str> {
    value.filter(|v| *v != "-")
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 18, 12, 30, 0).unwrap()
    }

    #[test]
    fn parses_rfc3164_with_pri_and_pid() {
        let line = "<38>Oct 18 12:00:01 router1 dropbear[1234]: Bad password attempt for 'root' from 192.168.1.50:51234";
        let p = parse_preamble(line, reference()).unwrap();
        assert_eq!(p.format, SyslogFormat::Rfc3164);
        assert_eq!(p.hostname.as_deref(), Some("router1"));
        assert_eq!(p.process.as_deref(), Some("dropbear"));
        assert_eq!(p.pid, Some(1234));
        assert_eq!(p.facility, Some("auth"));
        assert_eq!(p.severity, Some("info"));
        assert_eq!(
            p.timestamp,
            Some(Utc.with_ymd_and_hms(2025, 10, 18, 12, 0, 1).unwrap())
        );
        assert!(p.message.starts_with("Bad password attempt"));
    }

    #[test]
    fn parses_rfc3164_without_hostname() {
        let line = "Oct  8 09:15:00 kernel: [12345.678] br-lan: port 2(wlan0) entered forwarding state";
        let p = parse_preamble(line, reference()).unwrap();
        assert_eq!(p.hostname, None);
        assert_eq!(p.process.as_deref(), Some("kernel"));
        assert_eq!(p.message, "[12345.678] br-lan: port 2(wlan0) entered forwarding state");
        assert_eq!(
            p.timestamp,
            Some(Utc.with_ymd_and_hms(2025, 10, 8, 9, 15, 0).unwrap())
        );
    }

    #[test]
    fn december_lines_in_january_use_previous_year() {
        let january = Utc.with_ymd_and_hms(2026, 1, 1, 0, 5, 0).unwrap();
        let p = parse_preamble("Dec 31 23:59:59 ap1 hostapd: wlan0: STA up", january).unwrap();
        assert_eq!(
            p.timestamp,
            Some(Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap())
        );
    }

    #[test]
    fn parses_rfc5424() {
        let line = "<86>1 2025-10-18T12:00:00.123Z gw1 sshd 4242 - - Failed password for invalid user admin from 10.1.1.9 port 50022 ssh2";
        let p = parse_preamble(line, reference()).unwrap();
        assert_eq!(p.format, SyslogFormat::Rfc5424);
        assert_eq!(p.hostname.as_deref(), Some("gw1"));
        assert_eq!(p.process.as_deref(), Some("sshd"));
        assert_eq!(p.pid, Some(4242));
        assert_eq!(p.facility, Some("authpriv"));
        assert_eq!(p.severity, Some("info"));
        assert!(p.timestamp.is_some());
        assert!(p.message.starts_with("Failed password"));
    }

    #[test]
    fn parses_logread() {
        let line = "Sat Oct 18 12:00:00 2025 daemon.notice hostapd: wlan0: STA 11:22:33:44:55:66 IEEE 802.11: disassociated";
        let p = parse_preamble(line, reference()).unwrap();
        assert_eq!(p.format, SyslogFormat::Logread);
        assert_eq!(p.process.as_deref(), Some("hostapd"));
        assert_eq!(p.facility, Some("daemon"));
        assert_eq!(p.severity, Some("notice"));
        assert_eq!(
            p.timestamp,
            Some(Utc.with_ymd_and_hms(2025, 10, 18, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn unrecognised_lines_yield_none() {
        assert!(parse_preamble("just some text", reference()).is_none());
        assert!(parse_preamble("", reference()).is_none());
        assert!(parse_preamble("<999", reference()).is_none());
    }

    #[test]
    fn decode_pri_rejects_out_of_range() {
        assert_eq!(decode_pri(Some("0")), (Some("kern"), Some("emerg")));
        assert_eq!(decode_pri(Some("191")), (Some("local7"), Some("debug")));
        assert_eq!(decode_pri(Some("192")), (None, None));
        assert_eq!(decode_pri(None), (None, None));
    }
}
