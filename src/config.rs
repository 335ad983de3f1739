use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

/// Argon2id cost parameters. Defaults match the argon2 crate's recommended
/// profile (19 MiB, 2 passes, 1 lane).
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// Without SMTP settings outgoing mail is only logged.
    pub smtp: Option<SmtpConfig>,
    pub from: String,
    pub app_name: String,
    pub app_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// `None` selects the in-memory user store.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub frontend_url: Option<String>,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub mail: MailConfig,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn non_blank(key: &str, value: Option<String>) -> anyhow::Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("{key} must be set and non-empty"))
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt = JwtConfig {
            secret: non_blank("JWT_SECRET", std::env::var("JWT_SECRET").ok())?,
            issuer: env_or("JWT_ISSUER", "authkeep"),
            audience: env_or("JWT_AUDIENCE", "authkeep-users"),
        };

        let defaults = PasswordConfig::default();
        let password = PasswordConfig {
            memory_kib: env_parse("ARGON2_MEMORY_KIB", defaults.memory_kib),
            iterations: env_parse("ARGON2_ITERATIONS", defaults.iterations),
            parallelism: env_parse("ARGON2_PARALLELISM", defaults.parallelism),
        };

        let smtp = env_opt("SMTP_HOST").map(|host| SmtpConfig {
            host,
            port: env_parse("SMTP_PORT", 587),
            username: env_opt("SMTP_USERNAME"),
            password: env_opt("SMTP_PASSWORD"),
        });
        let mail = MailConfig {
            smtp,
            from: env_or("EMAIL_FROM", "noreply@authkeep.local"),
            app_name: env_or("APP_NAME", "Authkeep"),
            app_url: env_or("APP_URL", "http://localhost:5173"),
        };

        Ok(Self {
            host: env_or("APP_HOST", "0.0.0.0"),
            port: env_parse("APP_PORT", 5000),
            database_url: env_opt("DATABASE_URL"),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
            frontend_url: env_opt("FRONTEND_URL"),
            jwt,
            password,
            mail,
        })
    }
}
