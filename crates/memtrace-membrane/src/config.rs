//! Tracer configuration.
//!
//! Read once from the environment when the preload library is loaded:
//! - `MEMTRACE_LOG`: output path. Unset, empty, `-` or `stderr` means
//!   standard error.
//! - `MEMTRACE_FORMAT`: `text` (default) or `jsonl`.
//! - `MEMTRACE_REALLOC_ACCOUNTING`: `confirmed` (default) or `eager`.
//! - `MEMTRACE_ZERO_SIZE`: `track` (default) or `abort`.
//!
//! Unknown values fall back to the default instead of failing the host
//! process.

use std::path::PathBuf;

pub const ENV_LOG: &str = "MEMTRACE_LOG";
pub const ENV_FORMAT: &str = "MEMTRACE_FORMAT";
pub const ENV_REALLOC_ACCOUNTING: &str = "MEMTRACE_REALLOC_ACCOUNTING";
pub const ENV_ZERO_SIZE: &str = "MEMTRACE_ZERO_SIZE";

/// Rendering of the event log.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogFormat {
    /// Sequence-numbered human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Jsonl,
}

impl LogFormat {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "jsonl" | "json" | "ndjson" => Self::Jsonl,
            _ => Self::Text,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Jsonl => "jsonl",
        }
    }
}

/// When the old block of a `realloc` is credited as freed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReallocAccounting {
    /// Release the old record only once the real `realloc` has succeeded.
    /// A failed `realloc` leaves the original block live, as the C contract
    /// says it is.
    #[default]
    Confirmed,
    /// Release and credit the old record before forwarding, even if the
    /// real `realloc` then fails.
    Eager,
}

impl ReallocAccounting {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "eager" | "compat" | "legacy" => Self::Eager,
            _ => Self::Confirmed,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Eager => "eager",
        }
    }
}

/// What to do with `malloc(0)`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZeroSizePolicy {
    /// Forward and track like any other request.
    #[default]
    Track,
    /// Treat a zero-size request as a contract violation and abort.
    Abort,
}

impl ZeroSizePolicy {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "abort" | "assert" | "strict" => Self::Abort,
            _ => Self::Track,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Abort => "abort",
        }
    }
}

/// Where the event log goes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum LogTarget {
    #[default]
    Stderr,
    File(PathBuf),
}

impl LogTarget {
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim() {
            "" | "-" | "stderr" => Self::Stderr,
            path => Self::File(PathBuf::from(path)),
        }
    }
}

/// Complete tracer configuration.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TraceConfig {
    pub target: LogTarget,
    pub format: LogFormat,
    pub realloc_accounting: ReallocAccounting,
    pub zero_size: ZeroSizePolicy,
}

impl TraceConfig {
    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            target: lookup(ENV_LOG)
                .map(|v| LogTarget::from_str_loose(&v))
                .unwrap_or_default(),
            format: lookup(ENV_FORMAT)
                .map(|v| LogFormat::from_str_loose(&v))
                .unwrap_or_default(),
            realloc_accounting: lookup(ENV_REALLOC_ACCOUNTING)
                .map(|v| ReallocAccounting::from_str_loose(&v))
                .unwrap_or_default(),
            zero_size: lookup(ENV_ZERO_SIZE)
                .map(|v| ZeroSizePolicy::from_str_loose(&v))
                .unwrap_or_default(),
        }
    }

    /// Build from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_formats() {
        assert_eq!(LogFormat::from_str_loose("JSONL"), LogFormat::Jsonl);
        assert_eq!(LogFormat::from_str_loose("json"), LogFormat::Jsonl);
        assert_eq!(LogFormat::from_str_loose("text"), LogFormat::Text);
        assert_eq!(LogFormat::from_str_loose("garbage"), LogFormat::Text);
    }

    #[test]
    fn parse_realloc_accounting() {
        assert_eq!(
            ReallocAccounting::from_str_loose("eager"),
            ReallocAccounting::Eager
        );
        assert_eq!(
            ReallocAccounting::from_str_loose("Confirmed"),
            ReallocAccounting::Confirmed
        );
        assert_eq!(
            ReallocAccounting::from_str_loose(""),
            ReallocAccounting::Confirmed
        );
    }

    #[test]
    fn parse_targets() {
        assert_eq!(LogTarget::from_str_loose("-"), LogTarget::Stderr);
        assert_eq!(LogTarget::from_str_loose(""), LogTarget::Stderr);
        assert_eq!(
            LogTarget::from_str_loose("/tmp/trace.log"),
            LogTarget::File(PathBuf::from("/tmp/trace.log"))
        );
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = TraceConfig::from_lookup(|_| None);
        assert_eq!(cfg, TraceConfig::default());
        assert_eq!(cfg.zero_size, ZeroSizePolicy::Track);
    }

    #[test]
    fn lookup_drives_every_field() {
        let cfg = TraceConfig::from_lookup(|name| {
            let v = match name {
                ENV_LOG => "out.jsonl",
                ENV_FORMAT => "jsonl",
                ENV_REALLOC_ACCOUNTING => "eager",
                ENV_ZERO_SIZE => "abort",
                _ => return None,
            };
            Some(v.to_string())
        });
        assert_eq!(cfg.target, LogTarget::File(PathBuf::from("out.jsonl")));
        assert_eq!(cfg.format, LogFormat::Jsonl);
        assert_eq!(cfg.realloc_accounting, ReallocAccounting::Eager);
        assert_eq!(cfg.zero_size, ZeroSizePolicy::Abort);
    }
}
