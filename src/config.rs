//! Runtime configuration, read from environment variables.
//!
//! Required:
//! - `OPENROUTER_API_KEY`
//! - `MESSAGES_SUPABASE_URL`, `MESSAGES_SUPABASE_KEY` (chat memories)
//! - `COMMUNITY_SUPABASE_URL`, `COMMUNITY_SUPABASE_KEY` (profiles, tasks, rewards)
//! - `PRIVY_APP_ID`, `PRIVY_APP_SECRET`
//! - `PINNING_API_URL`, `PINNING_API_KEY`
//! - `LEDGER_ENGINE_URL`, `LEDGER_ENGINE_TOKEN`, `LEDGER_CHAIN`, `LEDGER_BACKEND_WALLET`
//! - `SUBGRAPH_URL`
//!
//! Optional: `HOST` (127.0.0.1), `PORT` (3000), `EVALUATOR_MODEL`
//! (openai/gpt-4o), `IPFS_GATEWAY_URL`, `STEP_TIMEOUT_SECS` (unset = no
//! orchestrator timeout), `SETTLEMENT_CONFIRM_TIMEOUT_SECS` (120).

use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};

pub const DEFAULT_MODEL: &str = "openai/gpt-4o";
const DEFAULT_GATEWAY: &str = "https://ipfs.io/ipfs";

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_role_key: String,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub engine_url: String,
    pub access_token: String,
    pub chain: String,
    pub backend_wallet: String,
    pub confirm_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub openrouter_api_key: String,
    pub evaluator_model: String,
    pub messages_db: SupabaseConfig,
    pub community_db: SupabaseConfig,
    pub privy_app_id: String,
    pub privy_app_secret: String,
    pub pinning_api_url: String,
    pub pinning_api_key: String,
    pub ipfs_gateway_url: String,
    pub ledger: LedgerConfig,
    pub subgraph_url: String,
    pub step_timeout: Option<Duration>,
}

impl Config {
    pub fn from_env() -> PipelineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| {
                PipelineError::Configuration(format!("{} environment variable not set", key))
            })
        };
        let seconds = |key: &str| -> PipelineResult<Option<Duration>> {
            get(key)
                .map(|v| {
                    v.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                        PipelineError::Configuration(format!("{} must be whole seconds, got '{}'", key, v))
                    })
                })
                .transpose()
        };

        let port = match get("PORT") {
            Some(p) => p
                .parse()
                .map_err(|_| PipelineError::Configuration(format!("invalid PORT '{}'", p)))?,
            None => 3000,
        };

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port,
            openrouter_api_key: required("OPENROUTER_API_KEY")?,
            evaluator_model: get("EVALUATOR_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            messages_db: SupabaseConfig {
                url: required("MESSAGES_SUPABASE_URL")?,
                service_role_key: required("MESSAGES_SUPABASE_KEY")?,
            },
            community_db: SupabaseConfig {
                url: required("COMMUNITY_SUPABASE_URL")?,
                service_role_key: required("COMMUNITY_SUPABASE_KEY")?,
            },
            privy_app_id: required("PRIVY_APP_ID")?,
            privy_app_secret: required("PRIVY_APP_SECRET")?,
            pinning_api_url: required("PINNING_API_URL")?,
            pinning_api_key: required("PINNING_API_KEY")?,
            ipfs_gateway_url: get("IPFS_GATEWAY_URL").unwrap_or_else(|| DEFAULT_GATEWAY.to_string()),
            ledger: LedgerConfig {
                engine_url: required("LEDGER_ENGINE_URL")?,
                access_token: required("LEDGER_ENGINE_TOKEN")?,
                chain: required("LEDGER_CHAIN")?,
                backend_wallet: required("LEDGER_BACKEND_WALLET")?,
                confirm_timeout: seconds("SETTLEMENT_CONFIRM_TIMEOUT_SECS")?
                    .unwrap_or(Duration::from_secs(120)),
            },
            subgraph_url: required("SUBGRAPH_URL")?,
            step_timeout: seconds("STEP_TIMEOUT_SECS")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("OPENROUTER_API_KEY", "sk-test"),
            ("MESSAGES_SUPABASE_URL", "https://messages.supabase.co"),
            ("MESSAGES_SUPABASE_KEY", "k1"),
            ("COMMUNITY_SUPABASE_URL", "https://community.supabase.co"),
            ("COMMUNITY_SUPABASE_KEY", "k2"),
            ("PRIVY_APP_ID", "app"),
            ("PRIVY_APP_SECRET", "secret"),
            ("PINNING_API_URL", "https://pin.example"),
            ("PINNING_API_KEY", "pin"),
            ("LEDGER_ENGINE_URL", "https://engine.example"),
            ("LEDGER_ENGINE_TOKEN", "tok"),
            ("LEDGER_CHAIN", "arbitrum-sepolia"),
            ("LEDGER_BACKEND_WALLET", "0xbackend"),
            ("SUBGRAPH_URL", "https://graph.example"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> PipelineResult<Config> {
        Config::from_lookup(|k| env.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = load(&full_env()).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.evaluator_model, DEFAULT_MODEL);
        assert_eq!(config.step_timeout, None);
        assert_eq!(config.ledger.confirm_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_missing_required_is_configuration_error() {
        let mut env = full_env();
        env.insert("PRIVY_APP_SECRET", " ");
        let err = load(&env).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(ref m) if m.contains("PRIVY_APP_SECRET")));
    }

    #[test]
    fn test_timeouts_parse() {
        let mut env = full_env();
        env.insert("STEP_TIMEOUT_SECS", "30");
        assert_eq!(load(&env).unwrap().step_timeout, Some(Duration::from_secs(30)));
        env.insert("STEP_TIMEOUT_SECS", "soon");
        assert!(load(&env).is_err());
    }
}
