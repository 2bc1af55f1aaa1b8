//! Service configuration.
//!
//! Read once at startup from the process environment (after `.env` has been
//! loaded by `dotenvy`). Only the OpenRouter key is mandatory.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_DATABASE_PATH: &str = "story.db";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_API_PREFIX: &str = "/api";

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_path: PathBuf,
    pub bind_addr: SocketAddr,
    /// Mount point of the story and job routes, e.g. `/api`.
    pub api_prefix: String,
    /// CORS origins. Empty means any origin is accepted.
    pub allowed_origins: Vec<String>,
    pub openrouter_api_key: String,
    pub openrouter_model: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let openrouter_api_key = get("OPENROUTER_API_KEY")
            .context("OPENROUTER_API_KEY environment variable not set")?;

        let bind_raw = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid BIND_ADDR: {}", bind_raw))?;

        Ok(Self {
            database_path: get("DATABASE_PATH")
                .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string())
                .into(),
            bind_addr,
            api_prefix: normalize_prefix(
                &get("API_PREFIX").unwrap_or_else(|| DEFAULT_API_PREFIX.to_string()),
            ),
            allowed_origins: get("ALLOWED_ORIGINS")
                .map(|v| parse_origins(&v))
                .unwrap_or_default(),
            openrouter_api_key,
            openrouter_model: get("OPENROUTER_MODEL"),
        })
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Leading slash, no trailing slash. `/` and empty collapse to the empty prefix.
fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[("OPENROUTER_API_KEY", "sk-test")]).unwrap();
        assert_eq!(s.database_path, PathBuf::from("story.db"));
        assert_eq!(s.bind_addr.to_string(), "127.0.0.1:8000");
        assert_eq!(s.api_prefix, "/api");
        assert!(s.allowed_origins.is_empty());
        assert!(s.openrouter_model.is_none());
    }

    #[test]
    fn test_api_key_required() {
        assert!(settings(&[]).is_err());
        assert!(settings(&[("OPENROUTER_API_KEY", "  ")]).is_err());
    }

    #[test]
    fn test_overrides() {
        let s = settings(&[
            ("OPENROUTER_API_KEY", "k"),
            ("API_PREFIX", "v1/"),
            ("ALLOWED_ORIGINS", "http://localhost:5173/, https://play.example.com ,"),
            ("BIND_ADDR", "0.0.0.0:9000"),
            ("OPENROUTER_MODEL", "meta-llama/llama-3-70b"),
        ])
        .unwrap();
        assert_eq!(s.api_prefix, "/v1");
        assert_eq!(
            s.allowed_origins,
            vec!["http://localhost:5173", "https://play.example.com"]
        );
        assert_eq!(s.bind_addr.port(), 9000);
        assert_eq!(s.openrouter_model.as_deref(), Some("meta-llama/llama-3-70b"));
    }

    #[test]
    fn test_bad_bind_addr() {
        assert!(settings(&[("OPENROUTER_API_KEY", "k"), ("BIND_ADDR", "nowhere")]).is_err());
    }

    #[test]
    fn test_root_prefix() {
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix("/api"), "/api");
    }
}
