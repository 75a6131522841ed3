//! Process settings from the environment.

use crate::error::ConfigError;
use crate::schema::{CompilerOptions, DetailFallback};
use std::path::PathBuf;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Settings {
    /// Absent means the in-memory store.
    pub database_url: Option<String>,
    pub config_path: PathBuf,
    pub bind_addr: String,
    pub detail_fallback: DetailFallback,
    pub max_body_bytes: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let detail_fallback = match get("DETAIL_FALLBACK") {
            Some(v) => v.parse()?,
            None => DetailFallback::default(),
        };
        let max_body_bytes = match get("MAX_BODY_BYTES") {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| ConfigError::Validation(format!("MAX_BODY_BYTES must be a byte count, got '{}'", v)))?,
            None => DEFAULT_MAX_BODY_BYTES,
        };
        Ok(Settings {
            database_url: get("DATABASE_URL").filter(|s| !s.is_empty()),
            config_path: PathBuf::from(get("CONFIG_PATH").unwrap_or_else(|| "config".into())),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            detail_fallback,
            max_body_bytes,
        })
    }

    pub fn compiler_options(&self) -> CompilerOptions {
        CompilerOptions {
            detail_fallback: self.detail_fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let s = settings(&[]).unwrap();
        assert!(s.database_url.is_none());
        assert_eq!(s.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(s.detail_fallback, DetailFallback::PerCategory);
        assert_eq!(s.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    }

    #[test]
    fn parses_fallback_and_limits() {
        let s = settings(&[("DETAIL_FALLBACK", "whole_schema"), ("MAX_BODY_BYTES", "1024")]).unwrap();
        assert_eq!(s.detail_fallback, DetailFallback::WholeSchema);
        assert_eq!(s.max_body_bytes, 1024);
        assert!(settings(&[("DETAIL_FALLBACK", "sometimes")]).is_err());
        assert!(settings(&[("MAX_BODY_BYTES", "lots")]).is_err());
    }
}
