//! Mount specification parsing
//!
//! Two syntaxes are accepted, mirroring the engine CLI:
//!
//! 1. Long form: comma-separated `key=value` pairs
//!    (`type=bind,source=/host,target=/work,readonly,consistency=cached`)
//! 2. Short form: `source:target[:opt,opt,...]` where options are
//!    `ro`/`readonly` and `cached`/`delegated`/`consistent`
//!
//! Non-tmpfs mounts require both source and target; tmpfs requires only a
//! target. Invalid specifications are dropped with a warning rather than
//! failing the caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Types of mounts supported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Bind,
    Volume,
    Tmpfs,
}

impl fmt::Display for MountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountKind::Bind => write!(f, "bind"),
            MountKind::Volume => write!(f, "volume"),
            MountKind::Tmpfs => write!(f, "tmpfs"),
        }
    }
}

impl FromStr for MountKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bind" => Ok(MountKind::Bind),
            "volume" => Ok(MountKind::Volume),
            "tmpfs" => Ok(MountKind::Tmpfs),
            other => Err(format!("unsupported mount type '{}'", other)),
        }
    }
}

/// Host/container view consistency, meaningful for bind mounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    Consistent,
    Cached,
    Delegated,
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Consistency::Consistent => write!(f, "consistent"),
            Consistency::Cached => write!(f, "cached"),
            Consistency::Delegated => write!(f, "delegated"),
        }
    }
}

/// A parsed, normalized mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub kind: MountKind,
    /// Host path or volume name; `None` only for tmpfs
    pub source: Option<String>,
    pub target: String,
    pub read_only: bool,
    pub consistency: Option<Consistency>,
}

impl Mount {
    /// Bind mount helper for internal callers (workspace mount, features).
    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Mount {
            kind: MountKind::Bind,
            source: Some(source.into()),
            target: target.into(),
            read_only: false,
            consistency: None,
        }
    }

    /// Parse one specification in either syntax. Returns `None` (after a
    /// warning) for anything invalid.
    pub fn parse(spec: &str) -> Option<Self> {
        let mount = if spec.contains('=') {
            Self::parse_long_form(spec)
        } else {
            Self::parse_short_form(spec)
        };
        match mount {
            Some(m) if m.is_valid() => Some(m),
            Some(m) => {
                warn!(spec = %spec, kind = %m.kind, "Dropping mount missing source or target");
                None
            }
            None => {
                warn!(spec = %spec, "Dropping unparseable mount");
                None
            }
        }
    }

    /// Parse a list, keeping only valid entries.
    pub fn parse_all(specs: &[String]) -> Vec<Self> {
        specs.iter().filter_map(|s| Self::parse(s)).collect()
    }

    fn parse_long_form(spec: &str) -> Option<Self> {
        let mut kind = MountKind::Bind;
        let mut source = None;
        let mut target = None;
        let mut read_only = false;
        let mut consistency = None;

        for part in spec.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some((key, value)) => match key.trim() {
                    "type" => kind = value.parse().ok()?,
                    "source" | "src" => source = Some(value.to_string()),
                    "target" | "dst" | "destination" => target = Some(value.to_string()),
                    "readonly" | "ro" => read_only = value != "false",
                    "consistency" => {
                        consistency = match value {
                            "consistent" => Some(Consistency::Consistent),
                            "cached" => Some(Consistency::Cached),
                            "delegated" => Some(Consistency::Delegated),
                            _ => return None,
                        }
                    }
                    _ => {} // tolerated and ignored, like unknown runArgs
                },
                None => match part {
                    "readonly" | "ro" => read_only = true,
                    _ => return None,
                },
            }
        }

        Some(Mount {
            kind,
            source,
            target: target?,
            read_only,
            consistency,
        })
    }

    fn parse_short_form(spec: &str) -> Option<Self> {
        let parts: Vec<&str> = spec.split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return None;
        }
        let source = parts[0];
        let target = parts[1];
        if source.is_empty() || target.is_empty() {
            return None;
        }

        let mut read_only = false;
        let mut consistency = None;
        if parts.len() == 3 {
            for opt in parts[2].split(',') {
                match opt {
                    "ro" | "readonly" => read_only = true,
                    "cached" => consistency = Some(Consistency::Cached),
                    "delegated" => consistency = Some(Consistency::Delegated),
                    "consistent" => consistency = Some(Consistency::Consistent),
                    _ => return None,
                }
            }
        }

        // A source that looks like a path is a bind mount; otherwise a volume.
        let kind = if source.starts_with('/') || source.starts_with('.') {
            MountKind::Bind
        } else {
            MountKind::Volume
        };

        Some(Mount {
            kind,
            source: Some(source.to_string()),
            target: target.to_string(),
            read_only,
            consistency,
        })
    }

    fn is_valid(&self) -> bool {
        if self.target.is_empty() {
            return false;
        }
        match self.kind {
            MountKind::Tmpfs => true,
            MountKind::Bind | MountKind::Volume => {
                self.source.as_deref().is_some_and(|s| !s.is_empty())
            }
        }
    }

    /// Render to the engine's long-form `--mount` value.
    pub fn to_engine_format(&self) -> String {
        let mut out = format!("type={}", self.kind);
        if let Some(source) = &self.source {
            out.push_str(&format!(",source={}", source));
        }
        out.push_str(&format!(",target={}", self.target));
        if self.read_only {
            out.push_str(",readonly");
        }
        if let Some(consistency) = self.consistency {
            out.push_str(&format!(",consistency={}", consistency));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_form_with_flags() {
        let m = Mount::parse("type=bind,source=/host/path,target=/work,readonly,consistency=cached")
            .unwrap();
        assert_eq!(m.kind, MountKind::Bind);
        assert_eq!(m.source.as_deref(), Some("/host/path"));
        assert_eq!(m.target, "/work");
        assert!(m.read_only);
        assert_eq!(m.consistency, Some(Consistency::Cached));
    }

    #[test]
    fn long_form_key_aliases() {
        let m = Mount::parse("type=volume,src=data,dst=/var/lib/data").unwrap();
        assert_eq!(m.kind, MountKind::Volume);
        assert_eq!(m.source.as_deref(), Some("data"));
        assert_eq!(m.target, "/var/lib/data");
    }

    #[test]
    fn long_form_defaults_to_bind() {
        let m = Mount::parse("source=/a,target=/b").unwrap();
        assert_eq!(m.kind, MountKind::Bind);
    }

    #[test]
    fn short_form_with_options() {
        let m = Mount::parse("/host:/container:ro,cached").unwrap();
        assert_eq!(m.kind, MountKind::Bind);
        assert!(m.read_only);
        assert_eq!(m.consistency, Some(Consistency::Cached));
    }

    #[test]
    fn short_form_named_volume() {
        let m = Mount::parse("pgdata:/var/lib/postgresql/data").unwrap();
        assert_eq!(m.kind, MountKind::Volume);
        assert_eq!(m.source.as_deref(), Some("pgdata"));
    }

    #[test]
    fn tmpfs_requires_only_target() {
        let m = Mount::parse("type=tmpfs,target=/scratch").unwrap();
        assert_eq!(m.kind, MountKind::Tmpfs);
        assert_eq!(m.source, None);
    }

    #[test]
    fn bind_without_source_is_dropped() {
        assert!(Mount::parse("type=bind,target=/work").is_none());
    }

    #[test]
    fn invalid_specs_are_dropped_not_fatal() {
        assert!(Mount::parse("garbage").is_none());
        assert!(Mount::parse("/only-source").is_none());
        assert!(Mount::parse("/a:/b:bogus-option").is_none());
        let kept = Mount::parse_all(&[
            "/a:/b".to_string(),
            "nope".to_string(),
            "type=tmpfs,target=/t".to_string(),
        ]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn parse_format_parse_is_idempotent() {
        for spec in [
            "/host:/container:ro,delegated",
            "vol:/data",
            "type=tmpfs,target=/scratch",
            "type=bind,source=/a,target=/b,readonly",
        ] {
            let first = Mount::parse(spec).unwrap();
            let second = Mount::parse(&first.to_engine_format()).unwrap();
            assert_eq!(first, second, "round-trip changed {}", spec);
        }
    }
}
