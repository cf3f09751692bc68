//! Post-provision service discovery parsing
//!
//! The finalize phase enumerates running systemd units, parses listening TCP
//! sockets into a process→port map, and reads credential drop files. The
//! parsing lives here so it can be tested against captured tool output.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

/// System units never surfaced as discovered services
pub const EXCLUDED_UNITS: &[&str] = &[
    "ssh",
    "sshd",
    "cron",
    "crond",
    "dbus",
    "getty",
    "rsyslog",
    "postfix",
    "haus-agent",
    "networking",
    "chrony",
    "chronyd",
];

/// Extract running service names from
/// `systemctl list-units --type=service --state=running --no-legend --plain`
pub fn parse_running_units(output: &str) -> Vec<String> {
    let mut units = Vec::new();
    for line in output.lines() {
        let first = match line.split_whitespace().next() {
            Some(token) => token,
            None => continue,
        };
        let name = match first.strip_suffix(".service") {
            Some(name) => name,
            None => continue,
        };
        // Instance units like getty@tty1 are matched by their base name
        let base = name.split('@').next().unwrap_or(name);
        if base.starts_with("systemd-") || EXCLUDED_UNITS.contains(&base) {
            continue;
        }
        if !units.contains(&name.to_string()) {
            units.push(name.to_string());
        }
    }
    units
}

fn process_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"users:\(\("([^"]+)""#).expect("valid regex"))
}

/// Parse `ss -tlnp` output into `{process name → port}`.
///
/// When a process listens on several ports, the first (lowest address order)
/// wins.
pub fn parse_listen_ports(output: &str) -> HashMap<String, u16> {
    let mut ports = HashMap::new();
    for line in output.lines() {
        if !line.trim_start().starts_with("LISTEN") {
            continue;
        }
        let columns: Vec<&str> = line.split_whitespace().collect();
        // LISTEN recv-q send-q local-addr:port peer-addr:port process
        let local = match columns.get(3) {
            Some(local) => *local,
            None => continue,
        };
        let port = match local.rsplit(':').next().and_then(|p| p.parse::<u16>().ok()) {
            Some(port) => port,
            None => continue,
        };
        let process = match process_re().captures(line).map(|c| c[1].to_string()) {
            Some(process) => process,
            None => continue,
        };
        ports.entry(process).or_insert(port);
    }
    ports
}

/// Service name from a credential drop file: the filename minus a
/// `.json|.txt|.conf` extension
pub fn service_name_from_credential_file(filename: &str) -> String {
    for ext in [".json", ".txt", ".conf"] {
        if let Some(stripped) = filename.strip_suffix(ext) {
            return stripped.to_string();
        }
    }
    filename.to_string()
}
