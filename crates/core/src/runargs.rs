//! Engine-CLI argument vector parsing
//!
//! Configurations may carry a raw `runArgs` vector in the container engine's
//! own CLI syntax. Only the flags that influence the container-create request
//! are recognized; unknown flags are ignored and malformed values are dropped
//! with a warning, never failing the parse.

use indexmap::IndexMap;
use std::fmt;
use tracing::warn;

/// Transport protocol of a published port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// A single `-p`/`--publish` binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub host_ip: Option<String>,
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: Protocol,
}

impl PortBinding {
    /// Render back to the engine's `[ip:]host:container[/proto]` syntax.
    pub fn to_engine_format(&self) -> String {
        let mut out = String::new();
        if let Some(ip) = &self.host_ip {
            out.push_str(ip);
            out.push(':');
        }
        if let Some(host) = self.host_port {
            out.push_str(&host.to_string());
            out.push(':');
        } else if self.host_ip.is_some() {
            out.push(':');
        }
        out.push_str(&self.container_port.to_string());
        if self.protocol == Protocol::Udp {
            out.push_str("/udp");
        }
        out
    }
}

/// Typed result of parsing a `runArgs` vector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRunArgs {
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
    pub privileged: bool,
    pub init: bool,
    pub shm_size: Option<u64>,
    pub devices: Vec<String>,
    pub extra_hosts: Vec<String>,
    pub network_mode: Option<String>,
    pub ipc_mode: Option<String>,
    pub pid_mode: Option<String>,
    /// target -> mount options (empty string when none were given)
    pub tmpfs: IndexMap<String, String>,
    pub sysctls: IndexMap<String, String>,
    pub ports: Vec<PortBinding>,
}

/// Parse an engine-CLI style argument vector.
pub fn parse_run_args(args: &[String]) -> ParsedRunArgs {
    let mut out = ParsedRunArgs::default();
    let mut iter = args.iter();

    while let Some(raw) = iter.next() {
        let (flag, inline_value) = match raw.split_once('=') {
            Some((f, v)) => (f, Some(v.to_string())),
            None => (raw.as_str(), None),
        };

        // Boolean flags take an optional `=value`; a bare flag means true.
        let bool_value = || -> bool {
            match &inline_value {
                Some(v) => v != "false" && v != "0",
                None => true,
            }
        };

        const VALUE_FLAGS: [&str; 14] = [
            "--cap-add",
            "--cap-drop",
            "--security-opt",
            "--device",
            "--add-host",
            "--network",
            "--net",
            "--ipc",
            "--pid",
            "--shm-size",
            "--tmpfs",
            "--sysctl",
            "--publish",
            "-p",
        ];

        match flag {
            "--privileged" => out.privileged = bool_value(),
            "--init" => out.init = bool_value(),
            // Unknown flags are ignored and never consume a lookahead token.
            _ if !VALUE_FLAGS.contains(&flag) => {}
            _ => {
                // Recognized value flags: inline form or the next token.
                let value = match inline_value {
                    Some(v) => Some(v),
                    None => iter.next().cloned(),
                };
                let Some(value) = value else {
                    warn!(flag = %flag, "Dropping run arg with missing value");
                    continue;
                };
                match flag {
                    "--cap-add" => out.cap_add.push(value),
                    "--cap-drop" => out.cap_drop.push(value),
                    "--security-opt" => out.security_opt.push(value),
                    "--device" => out.devices.push(value),
                    "--add-host" => out.extra_hosts.push(value),
                    "--network" | "--net" => out.network_mode = Some(value),
                    "--ipc" => out.ipc_mode = Some(value),
                    "--pid" => out.pid_mode = Some(value),
                    "--shm-size" => match parse_memory_size(&value) {
                        Some(bytes) => out.shm_size = Some(bytes),
                        None => warn!(value = %value, "Dropping malformed --shm-size"),
                    },
                    "--tmpfs" => {
                        let (target, opts) = match value.split_once(':') {
                            Some((t, o)) => (t.to_string(), o.to_string()),
                            None => (value, String::new()),
                        };
                        if target.starts_with('/') {
                            out.tmpfs.insert(target, opts);
                        } else {
                            warn!(target = %target, "Dropping tmpfs with relative target");
                        }
                    }
                    "--sysctl" => match value.split_once('=') {
                        Some((k, v)) => {
                            out.sysctls.insert(k.to_string(), v.to_string());
                        }
                        None => warn!(value = %value, "Dropping malformed --sysctl"),
                    },
                    "--publish" | "-p" => match parse_port_binding(&value) {
                        Some(binding) => out.ports.push(binding),
                        None => warn!(value = %value, "Dropping malformed port binding"),
                    },
                    _ => unreachable!("gated by VALUE_FLAGS"),
                }
            }
        }
    }

    out
}

/// Parse a memory size: plain bytes, or a number (integer or decimal) with an
/// optional unit in `{k, m, g, t}` and optional `b`/`B` suffix, case-insensitive.
/// Empty input yields 0; anything else malformed yields `None`.
pub fn parse_memory_size(input: &str) -> Option<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Some(0);
    }

    let lower = trimmed.to_lowercase();
    let without_b = lower.strip_suffix('b').unwrap_or(&lower);

    let (number_part, multiplier) = match without_b.chars().last() {
        Some('k') => (&without_b[..without_b.len() - 1], 1024u64),
        Some('m') => (&without_b[..without_b.len() - 1], 1024u64.pow(2)),
        Some('g') => (&without_b[..without_b.len() - 1], 1024u64.pow(3)),
        Some('t') => (&without_b[..without_b.len() - 1], 1024u64.pow(4)),
        _ => (without_b, 1u64),
    };

    if number_part.is_empty() {
        return None;
    }
    let value: f64 = number_part.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier as f64) as u64)
}

/// Format a byte count back into the grammar accepted by [`parse_memory_size`],
/// using the largest unit that divides it exactly.
pub fn format_memory_size(bytes: u64) -> String {
    const UNITS: [(u64, &str); 4] = [
        (1024u64.pow(4), "t"),
        (1024u64.pow(3), "g"),
        (1024u64.pow(2), "m"),
        (1024, "k"),
    ];
    for (size, suffix) in UNITS {
        if bytes >= size && bytes % size == 0 {
            return format!("{}{}", bytes / size, suffix);
        }
    }
    bytes.to_string()
}

/// Parse a port binding: `port`, `host:container`, or `ip:host:container`,
/// each optionally suffixed with `/tcp` or `/udp`. An invalid container port
/// yields no binding.
pub fn parse_port_binding(input: &str) -> Option<PortBinding> {
    let (spec, protocol) = match input.rsplit_once('/') {
        Some((spec, proto)) => {
            let protocol = match proto.to_lowercase().as_str() {
                "tcp" => Protocol::Tcp,
                "udp" => Protocol::Udp,
                _ => return None,
            };
            (spec, protocol)
        }
        None => (input, Protocol::Tcp),
    };

    let parts: Vec<&str> = spec.split(':').collect();
    match parts.as_slice() {
        [container] => Some(PortBinding {
            host_ip: None,
            host_port: None,
            container_port: container.parse().ok()?,
            protocol,
        }),
        [host, container] => Some(PortBinding {
            host_ip: None,
            host_port: host.parse().ok(),
            container_port: container.parse().ok()?,
            protocol,
        }),
        [ip, host, container] => Some(PortBinding {
            host_ip: Some(ip.to_string()),
            host_port: if host.is_empty() {
                None
            } else {
                host.parse().ok()
            },
            container_port: container.parse().ok()?,
            protocol,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_separate_and_inline_value_forms() {
        let parsed = parse_run_args(&args(&[
            "--cap-add",
            "SYS_PTRACE",
            "--cap-add=NET_ADMIN",
            "--network=host",
            "--ipc",
            "host",
        ]));
        assert_eq!(parsed.cap_add, vec!["SYS_PTRACE", "NET_ADMIN"]);
        assert_eq!(parsed.network_mode.as_deref(), Some("host"));
        assert_eq!(parsed.ipc_mode.as_deref(), Some("host"));
    }

    #[test]
    fn net_alias_and_boolean_flags() {
        let parsed = parse_run_args(&args(&["--net", "bridge", "--privileged", "--init"]));
        assert_eq!(parsed.network_mode.as_deref(), Some("bridge"));
        assert!(parsed.privileged);
        assert!(parsed.init);

        let parsed = parse_run_args(&args(&["--privileged=false"]));
        assert!(!parsed.privileged);
    }

    #[test]
    fn unknown_flags_are_ignored() {
        let parsed = parse_run_args(&args(&["--rm", "--hostname", "box", "--cap-add", "MKNOD"]));
        assert_eq!(parsed.cap_add, vec!["MKNOD"]);
    }

    #[test]
    fn tmpfs_and_sysctl() {
        let parsed = parse_run_args(&args(&[
            "--tmpfs",
            "/run:rw,size=64m",
            "--tmpfs=/tmp",
            "--sysctl",
            "net.core.somaxconn=1024",
        ]));
        assert_eq!(parsed.tmpfs.get("/run").map(String::as_str), Some("rw,size=64m"));
        assert_eq!(parsed.tmpfs.get("/tmp").map(String::as_str), Some(""));
        assert_eq!(
            parsed.sysctls.get("net.core.somaxconn").map(String::as_str),
            Some("1024")
        );
    }

    #[test]
    fn malformed_values_are_dropped_silently() {
        let parsed = parse_run_args(&args(&[
            "--shm-size",
            "lots",
            "--sysctl",
            "no-equals",
            "-p",
            "70000",
        ]));
        assert_eq!(parsed.shm_size, None);
        assert!(parsed.sysctls.is_empty());
        assert!(parsed.ports.is_empty());
    }

    #[test]
    fn memory_size_grammar() {
        assert_eq!(parse_memory_size(""), Some(0));
        assert_eq!(parse_memory_size("1024"), Some(1024));
        assert_eq!(parse_memory_size("64m"), Some(64 * 1024 * 1024));
        assert_eq!(parse_memory_size("64MB"), Some(64 * 1024 * 1024));
        assert_eq!(parse_memory_size("1.5g"), Some(1610612736));
        assert_eq!(parse_memory_size("2T"), Some(2 * 1024u64.pow(4)));
        assert_eq!(parse_memory_size("2b"), Some(2));
        assert_eq!(parse_memory_size("x"), None);
        assert_eq!(parse_memory_size("g"), None);
    }

    #[test]
    fn memory_size_round_trips_through_format() {
        for bytes in [0u64, 1, 512, 1024, 64 * 1024 * 1024, 3 * 1024u64.pow(3)] {
            assert_eq!(parse_memory_size(&format_memory_size(bytes)), Some(bytes));
        }
    }

    #[test]
    fn port_binding_forms() {
        assert_eq!(
            parse_port_binding("8080"),
            Some(PortBinding {
                host_ip: None,
                host_port: None,
                container_port: 8080,
                protocol: Protocol::Tcp,
            })
        );
        assert_eq!(
            parse_port_binding("8080:80/udp"),
            Some(PortBinding {
                host_ip: None,
                host_port: Some(8080),
                container_port: 80,
                protocol: Protocol::Udp,
            })
        );
        assert_eq!(
            parse_port_binding("127.0.0.1:8080:80"),
            Some(PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(8080),
                container_port: 80,
                protocol: Protocol::Tcp,
            })
        );
        assert_eq!(parse_port_binding("8080:notaport"), None);
        assert_eq!(parse_port_binding("1:2:3:4"), None);
    }

    #[test]
    fn port_binding_engine_format_round_trips() {
        for spec in ["8080", "8080:80", "127.0.0.1:8080:80", "53:53/udp"] {
            let parsed = parse_port_binding(spec).unwrap();
            assert_eq!(
                parse_port_binding(&parsed.to_engine_format()),
                Some(parsed)
            );
        }
    }
}
