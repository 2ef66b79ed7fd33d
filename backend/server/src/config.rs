//! Application configuration loaded from environment variables.

use crate::errors::{MrvError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the REST API server
    pub api_port: u16,
    /// Path to the SQLite database file
    pub database_url: String,
    /// Base URL of the blockchain registration service
    pub chain_url: String,
    /// Base URL of the evidence-store (Pinata-style) API
    pub evidence_api_url: String,
    /// Public gateway URL prefix for retrieval links
    pub evidence_gateway_url: String,
    /// Bearer token for the evidence store; empty disables uploads
    pub evidence_jwt: String,
    /// Whether the ecosystem-aware scoring strategy is enabled
    pub enhanced_scoring: bool,
    /// Minimum score for best-effort blockchain registration
    pub registration_min_score: u8,
    /// How long (seconds) a blockchain liveness probe result is cached
    pub probe_ttl_secs: u64,
    /// Timeout (seconds) for the liveness probe
    pub probe_timeout_secs: u64,
    /// Timeout (seconds) for blockchain registration calls
    pub register_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "8002".to_string())
                .parse()
                .map_err(|_| MrvError::Config("Invalid API_PORT".to_string()))?,
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./mrv_projects.db".to_string()),
            chain_url: env_var("CHAIN_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            evidence_api_url: env_var("EVIDENCE_API_URL")
                .unwrap_or_else(|_| "https://api.pinata.cloud".to_string()),
            evidence_gateway_url: env_var("EVIDENCE_GATEWAY_URL")
                .unwrap_or_else(|_| "https://gateway.pinata.cloud/ipfs".to_string()),
            evidence_jwt: env_var("EVIDENCE_JWT").unwrap_or_default(),
            enhanced_scoring: env_var("ENHANCED_SCORING")
                .map(|v| v != "0" && v != "false")
                .unwrap_or(true),
            registration_min_score: env_var("REGISTRATION_MIN_SCORE")
                .unwrap_or_else(|_| "40".to_string())
                .parse()
                .map_err(|_| MrvError::Config("Invalid REGISTRATION_MIN_SCORE".to_string()))?,
            probe_ttl_secs: env_var("PROBE_TTL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| MrvError::Config("Invalid PROBE_TTL_SECS".to_string()))?,
            probe_timeout_secs: env_var("PROBE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| MrvError::Config("Invalid PROBE_TIMEOUT_SECS".to_string()))?,
            register_timeout_secs: env_var("REGISTER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| MrvError::Config("Invalid REGISTER_TIMEOUT_SECS".to_string()))?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| MrvError::Config(format!("Missing env var: {key}")))
}
