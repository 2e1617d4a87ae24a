//! PostgreSQL version detection, session parameter matrices, and SQL
//! template selection.
//!
//! Supported families are `9.3` and `16`; anything else is `Unknown` and is
//! treated as `Pg93` everywhere a behavioral choice is made (conservative
//! fallback, matching the legacy tool this core continues).

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Coarse version bucket driving every version-dependent behavior in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PgFamily {
    Pg93,
    Pg16,
    Unknown,
}

impl PgFamily {
    /// `Unknown` is handled identically to `Pg93` everywhere but diagnostics.
    pub fn effective(self) -> PgFamily {
        match self {
            PgFamily::Unknown => PgFamily::Pg93,
            other => other,
        }
    }
}

impl fmt::Display for PgFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PgFamily::Pg93 => "9.3",
            PgFamily::Pg16 => "16",
            PgFamily::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Parsed `SELECT version()` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgVersionInfo {
    pub major: u32,
    pub minor: u32,
    pub full_version: String,
    pub family: PgFamily,
}

impl PgVersionInfo {
    pub fn is_legacy(&self) -> bool {
        self.family == PgFamily::Pg93
    }

    pub fn supports_jsonb(&self) -> bool {
        self.family == PgFamily::Pg16
    }

    pub fn supports_parallel_query(&self) -> bool {
        self.family == PgFamily::Pg16
    }

    pub fn supports_pg_server_files_role(&self) -> bool {
        self.family == PgFamily::Pg16
    }
}

impl fmt::Display for PgVersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PostgreSQL {}.{} ({})", self.major, self.minor, self.family)
    }
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"PostgreSQL (\d+)\.(\d+)").expect("static regex"))
}

/// Parse a `version()` string into a `PgVersionInfo`. Total: malformed input
/// maps to `family = Unknown, major = 0, minor = 0` rather than erroring.
pub fn parse_version_string(version_str: &str) -> PgVersionInfo {
    let Some(caps) = version_regex().captures(version_str) else {
        return PgVersionInfo {
            major: 0,
            minor: 0,
            full_version: version_str.to_string(),
            family: PgFamily::Unknown,
        };
    };

    let major: u32 = caps[1].parse().unwrap_or(0);
    let minor: u32 = caps[2].parse().unwrap_or(0);

    let family = if major == 9 && minor == 3 {
        PgFamily::Pg93
    } else if major == 16 {
        PgFamily::Pg16
    } else {
        PgFamily::Unknown
    };

    PgVersionInfo {
        major,
        minor,
        full_version: version_str.to_string(),
        family,
    }
}

/// Compat mode override requested by job configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompatMode {
    #[default]
    Auto,
    Pg93,
    Pg16,
}

impl CompatMode {
    pub fn parse(raw: &str) -> Option<CompatMode> {
        match raw {
            "auto" => Some(CompatMode::Auto),
            "9.3" => Some(CompatMode::Pg93),
            "16" => Some(CompatMode::Pg16),
            _ => None,
        }
    }

    /// Resolve the effective family used to pick session params and SQL
    /// templates: `auto` defers to detection, forced modes override it but
    /// the caller should still keep the detected `PgVersionInfo` around for
    /// diagnostics.
    pub fn resolve(self, detected: PgFamily) -> PgFamily {
        match self {
            CompatMode::Auto => detected.effective(),
            CompatMode::Pg93 => PgFamily::Pg93,
            CompatMode::Pg16 => PgFamily::Pg16,
        }
    }
}

/// One `SET <key> = <value>` session parameter.
#[derive(Debug, Clone, Copy)]
pub struct SessionParam {
    pub key: &'static str,
    pub value: &'static str,
}

const PG93_PARAMS: &[SessionParam] = &[
    SessionParam { key: "work_mem", value: "128MB" },
    SessionParam { key: "maintenance_work_mem", value: "512MB" },
    SessionParam { key: "synchronous_commit", value: "off" },
    // Removed in 9.5+; only ever applies on a real 9.3/9.4 server. Attempting
    // it elsewhere is expected to fail and is swallowed by the caller.
    SessionParam { key: "checkpoint_segments", value: "32" },
];

const PG16_PARAMS: &[SessionParam] = &[
    SessionParam { key: "work_mem", value: "256MB" },
    SessionParam { key: "maintenance_work_mem", value: "1GB" },
    SessionParam { key: "synchronous_commit", value: "off" },
    SessionParam { key: "max_wal_size", value: "4GB" },
    SessionParam { key: "max_parallel_workers_per_gather", value: "2" },
];

/// Session parameters to `SET` on a connection for the given effective family.
pub fn session_params(family: PgFamily) -> &'static [SessionParam] {
    match family.effective() {
        PgFamily::Pg16 => PG16_PARAMS,
        _ => PG93_PARAMS,
    }
}

/// The handful of SQL fragments that differ across supported server versions.
pub struct VersionTemplates {
    pub estimate_size_sql: &'static str,
    pub check_permission_sql: &'static str,
}

/// `estimate_size_sql` expects two `$1` parameters: the bare table name (for
/// `pg_class.reltuples`) and the table's regclass (for the size function).
pub fn templates_for(family: PgFamily) -> VersionTemplates {
    match family.effective() {
        PgFamily::Pg16 => VersionTemplates {
            estimate_size_sql: "SELECT \
                (SELECT reltuples::bigint FROM pg_class WHERE relname = $1) AS row_count, \
                pg_total_relation_size($2) AS total_size",
            check_permission_sql: "SELECT rolsuper OR pg_has_role(current_user, 'pg_read_server_files', 'MEMBER') \
                FROM pg_roles WHERE rolname = current_user",
        },
        _ => VersionTemplates {
            estimate_size_sql: "SELECT \
                (SELECT reltuples::bigint FROM pg_class WHERE relname = $1) AS row_count, \
                pg_table_size($2) AS total_size",
            check_permission_sql: "SELECT rolsuper FROM pg_roles WHERE rolname = current_user",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_legacy_version() {
        let info = parse_version_string("PostgreSQL 9.3.25 on x86_64-pc-linux-gnu");
        assert_eq!(info.major, 9);
        assert_eq!(info.minor, 3);
        assert_eq!(info.family, PgFamily::Pg93);
        assert!(info.is_legacy());
    }

    #[test]
    fn parses_current_version() {
        let info = parse_version_string("PostgreSQL 16.1 (Ubuntu 16.1-1.pgdg22.04+1)");
        assert_eq!(info.major, 16);
        assert_eq!(info.family, PgFamily::Pg16);
        assert!(info.supports_jsonb());
    }

    #[test]
    fn unrecognized_major_minor_is_unknown() {
        let info = parse_version_string("PostgreSQL 14.9 on x86_64");
        assert_eq!(info.family, PgFamily::Unknown);
        assert_eq!(info.family.effective(), PgFamily::Pg93);
    }

    #[test]
    fn totality_on_malformed_input() {
        let info = parse_version_string("not a version string at all");
        assert_eq!(info.major, 0);
        assert_eq!(info.minor, 0);
        assert_eq!(info.family, PgFamily::Unknown);
    }

    #[test]
    fn compat_mode_forces_family_regardless_of_detection() {
        assert_eq!(CompatMode::Pg93.resolve(PgFamily::Pg16), PgFamily::Pg93);
        assert_eq!(CompatMode::Pg16.resolve(PgFamily::Pg93), PgFamily::Pg16);
        assert_eq!(CompatMode::Auto.resolve(PgFamily::Unknown), PgFamily::Pg93);
    }

    #[test]
    fn session_params_differ_by_family() {
        let pg93 = session_params(PgFamily::Pg93);
        assert!(pg93.iter().any(|p| p.key == "checkpoint_segments"));
        let pg16 = session_params(PgFamily::Pg16);
        assert!(pg16.iter().any(|p| p.key == "max_wal_size"));
        assert!(!pg16.iter().any(|p| p.key == "checkpoint_segments"));
    }
}
