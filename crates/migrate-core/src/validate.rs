//! Pure input validators: connection config, profile name, date
//! range, compat mode, and cross-version compatibility warnings. Every
//! function returns `(ok, message)` rather than an error type — these run
//! before a job starts and their failures are reported directly to the
//! caller, not folded into [`crate::error::MigrateError`].

use crate::config::ConnectionConfig;
use crate::version::{CompatMode, PgFamily, PgVersionInfo};
use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

fn database_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.]+$").expect("static regex"))
}

fn username_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("static regex"))
}

/// Profile names may mix ASCII letters/digits/spaces/`-`/`_` with Korean
/// syllables — carried over from the legacy tool's own character class
/// rather than narrowed to ASCII.
fn profile_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9가-힣\s\-_]+$").expect("static regex"))
}

/// Validate a connection config's shape before ever opening a connection
/// with it: host length, port range, database/username character classes.
pub fn validate_connection_config(config: &ConnectionConfig) -> (bool, String) {
    if config.host.is_empty() || config.host.len() > 255 {
        return (false, "host must be non-empty and at most 255 characters".to_string());
    }
    if config.port == 0 {
        return (false, "port must be between 1 and 65535".to_string());
    }
    if !database_name_regex().is_match(&config.database) {
        return (false, "database name may only contain letters, digits, '_' and '.'".to_string());
    }
    if !username_regex().is_match(&config.username) {
        return (false, "username may only contain letters, digits and '_'".to_string());
    }
    (true, String::new())
}

/// 1-100 characters, letters/digits/space/`-`/`_`/Korean syllables.
pub fn validate_profile_name(name: &str) -> (bool, String) {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return (false, "profile name must not be empty".to_string());
    }
    if name.chars().count() > 100 {
        return (false, "profile name must be at most 100 characters".to_string());
    }
    if !profile_name_regex().is_match(name) {
        return (false, "profile name contains unsupported characters".to_string());
    }
    (true, String::new())
}

/// `start <= end` and a span of at most 365 days.
pub fn validate_date_range(start_date: NaiveDate, end_date: NaiveDate) -> (bool, String) {
    if start_date > end_date {
        return (false, "start date must not be after end date".to_string());
    }
    let span = (end_date - start_date).num_days();
    if span > 365 {
        return (false, "date range must not exceed 365 days".to_string());
    }
    (true, String::new())
}

/// `compat_mode` must be one of `auto | 9.3 | 16`.
pub fn validate_compat_mode(raw: &str) -> (bool, String) {
    if CompatMode::parse(raw).is_some() {
        (true, String::new())
    } else {
        (false, format!("invalid compat mode: {raw} (expected auto, 9.3, or 16)"))
    }
}

/// Cross-version warnings for a source->target migration. Never fails the
/// job by itself — callers surface the warnings and proceed, mirroring the
/// legacy tool's own non-fatal treatment of these checks.
pub fn validate_version_compatibility(source: &PgVersionInfo, target: &PgVersionInfo) -> Vec<String> {
    let mut warnings = Vec::new();

    if target.major < source.major {
        warnings.push(format!(
            "target ({target}) is an older major version than source ({source}); some features may be incompatible"
        ));
    }

    if source.supports_jsonb() && !target.supports_jsonb() {
        warnings.push(
            "source supports JSONB but target (9.3) does not; JSONB columns may fail to migrate".to_string(),
        );
    }

    if source.family == PgFamily::Unknown {
        warnings.push(format!(
            "source version ({}) is not a recognized family (9.3, 16); treated as 9.3-compatible",
            source.full_version
        ));
    }

    if target.family == PgFamily::Unknown {
        warnings.push(format!(
            "target version ({}) is not a recognized family (9.3, 16); treated as 9.3-compatible",
            target.full_version
        ));
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: &str, port: u16, database: &str, username: &str) -> ConnectionConfig {
        ConnectionConfig {
            host: host.to_string(),
            port,
            database: database.to_string(),
            username: username.to_string(),
            password: String::new(),
            ssl: false,
            compat_mode: Default::default(),
        }
    }

    #[test]
    fn accepts_a_well_formed_config() {
        let (ok, _) = validate_connection_config(&config("db.internal", 5432, "migrate_db", "svc_user"));
        assert!(ok);
    }

    #[test]
    fn rejects_a_database_name_with_bad_characters() {
        let (ok, msg) = validate_connection_config(&config("db.internal", 5432, "db;drop", "svc_user"));
        assert!(!ok);
        assert!(msg.contains("database"));
    }

    #[test]
    fn rejects_an_empty_host() {
        let (ok, _) = validate_connection_config(&config("", 5432, "db", "user"));
        assert!(!ok);
    }

    #[test]
    fn profile_name_accepts_korean_letters() {
        let (ok, _) = validate_profile_name("운영 서버 - 마이그레이션");
        assert!(ok);
    }

    #[test]
    fn profile_name_rejects_special_characters() {
        let (ok, _) = validate_profile_name("prod*server");
        assert!(!ok);
    }

    #[test]
    fn date_range_rejects_start_after_end() {
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let (ok, _) = validate_date_range(start, end);
        assert!(!ok);
    }

    #[test]
    fn date_range_rejects_spans_over_a_year() {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let (ok, _) = validate_date_range(start, end);
        assert!(!ok);
    }

    #[test]
    fn compat_mode_accepts_known_values_only() {
        assert!(validate_compat_mode("auto").0);
        assert!(validate_compat_mode("9.3").0);
        assert!(validate_compat_mode("16").0);
        assert!(!validate_compat_mode("15").0);
    }

    #[test]
    fn version_compatibility_warns_on_downgrade_and_unknown_family() {
        let source = PgVersionInfo { major: 16, minor: 1, full_version: "PostgreSQL 16.1".into(), family: PgFamily::Pg16 };
        let target = PgVersionInfo { major: 9, minor: 3, full_version: "PostgreSQL 9.3.25".into(), family: PgFamily::Pg93 };
        let warnings = validate_version_compatibility(&source, &target);
        assert!(warnings.iter().any(|w| w.contains("older major version")));
        assert!(warnings.iter().any(|w| w.contains("JSONB")));
    }

    #[test]
    fn version_compatibility_is_silent_for_a_same_family_pair() {
        let a = PgVersionInfo { major: 16, minor: 1, full_version: "PostgreSQL 16.1".into(), family: PgFamily::Pg16 };
        let b = PgVersionInfo { major: 16, minor: 2, full_version: "PostgreSQL 16.2".into(), family: PgFamily::Pg16 };
        assert!(validate_version_compatibility(&a, &b).is_empty());
    }
}
