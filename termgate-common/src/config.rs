use std::str::FromStr;
use std::time::Duration;

use crate::{Secret, TermgateError};

/// Server configuration, environment-variable driven. Variable names match
/// the original deployment's `.env` surface so existing deployments keep
/// working unchanged.
#[derive(Debug, Clone)]
pub struct TermgateConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub secret_key: Secret<String>,
    pub algorithm: String,
    pub access_token_expire_minutes: u64,
    pub cors_origins: Vec<String>,
    pub llm: LlmDefaults,
    pub default_admin: AdminDefaults,
    pub ssh_connect_timeout: Duration,
}

/// Defaults handed to the LLM proxy collaborator.
#[derive(Debug, Clone)]
pub struct LlmDefaults {
    pub provider: String,
    pub api_url: String,
    pub model: String,
    pub api_key: Secret<String>,
}

/// Bootstrap credentials, used only while the user store is empty.
#[derive(Debug, Clone)]
pub struct AdminDefaults {
    pub username: String,
    pub password: Secret<String>,
    pub email: String,
}

impl TermgateConfig {
    pub fn from_env() -> Result<Self, TermgateError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TermgateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            host: var_or(&lookup, "HOST", "0.0.0.0"),
            port: var_parsed(&lookup, "PORT", 8000)?,
            database_url: var_or(&lookup, "DATABASE_URL", "sqlite+aiosqlite:///./ai_terminal.db"),
            secret_key: Secret::new(var_or(&lookup, "SECRET_KEY", "your-secret-key-here")),
            algorithm: var_or(&lookup, "ALGORITHM", "HS256"),
            access_token_expire_minutes: var_parsed(&lookup, "ACCESS_TOKEN_EXPIRE_MINUTES", 15)?,
            cors_origins: var_or(&lookup, "CORS_ORIGINS", "*")
                .split(',')
                .map(|origin| origin.trim().to_owned())
                .filter(|origin| !origin.is_empty())
                .collect(),
            llm: LlmDefaults {
                provider: var_or(&lookup, "DEFAULT_LLM_PROVIDER", "deepseek"),
                api_url: var_or(&lookup, "DEFAULT_LLM_API_URL", "https://api.deepseek.com/v1"),
                model: var_or(&lookup, "DEFAULT_LLM_MODEL", "deepseek-chat"),
                api_key: Secret::new(var_or(&lookup, "DEFAULT_LLM_API_KEY", "")),
            },
            default_admin: AdminDefaults {
                username: var_or(&lookup, "DEFAULT_ADMIN_USERNAME", "admin"),
                password: Secret::new(var_or(&lookup, "DEFAULT_ADMIN_PASSWORD", "admin!123")),
                email: var_or(&lookup, "DEFAULT_ADMIN_EMAIL", "admin@example.com"),
            },
            ssh_connect_timeout: Duration::from_secs(var_parsed(
                &lookup,
                "SSH_CONNECT_TIMEOUT_SECS",
                10,
            )?),
        })
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn var_or<F: Fn(&str) -> Option<String>>(lookup: &F, name: &str, default: &str) -> String {
    lookup(name).unwrap_or_else(|| default.to_owned())
}

fn var_parsed<F, T>(lookup: &F, name: &str, default: T) -> Result<T, TermgateError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value
            .parse()
            .map_err(|_| TermgateError::InvalidConfigValue {
                name: name.to_owned(),
                value,
            }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TermgateConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.listen_address(), "0.0.0.0:8000");
        assert_eq!(config.algorithm, "HS256");
        assert_eq!(config.access_token_expire_minutes, 15);
        assert_eq!(config.cors_origins, vec!["*"]);
        assert_eq!(config.ssh_connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides_and_cors_list() {
        let config = TermgateConfig::from_lookup(|name| match name {
            "PORT" => Some("9000".into()),
            "CORS_ORIGINS" => Some("https://a.example, https://b.example".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(
            config.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_bad_port_is_an_error() {
        let result = TermgateConfig::from_lookup(|name| match name {
            "PORT" => Some("not-a-port".into()),
            _ => None,
        });
        assert!(matches!(
            result,
            Err(TermgateError::InvalidConfigValue { .. })
        ));
    }
}
