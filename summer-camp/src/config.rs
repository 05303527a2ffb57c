use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_DATABASE_NAME: &str = "summer-camp";
const DEFAULT_TOKEN_TTL: &str = "1h";
const DEFAULT_GATEWAY_URL: &str = "https://api.stripe.com";
const DEFAULT_CURRENCY: &str = "usd";

#[derive(Debug, Parser)]
#[command(
    name = "summer-camp",
    version,
    about = "Summer-camp class enrollment API"
)]
pub struct Cli {
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<SocketAddr>,

    #[arg(long, value_enum)]
    pub store: Option<StoreKind>,

    #[arg(long, value_name = "URI")]
    pub database_url: Option<String>,

    #[arg(long, value_name = "NAME")]
    pub database_name: Option<String>,

    /// Access token lifetime, e.g. `1h` or `30m`.
    #[arg(long, value_name = "DURATION")]
    pub token_ttl: Option<String>,

    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Backing document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Mongo,
    Memory,
}

impl StoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreKind::Mongo => "mongo",
            StoreKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub store: StoreKind,
    pub database: Option<DatabaseConfig>,
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub payments: Option<GatewayConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub uri: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub secret_key: String,
    pub base_url: String,
    pub currency: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config in {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("invalid duration for {key}: {source}")]
    InvalidDuration {
        key: String,
        source: humantime::DurationError,
    },
    #[error("ACCESS_TOKEN_SECRET is not set")]
    MissingJwtSecret,
    #[error("mongo store needs DATABASE_URL or DB_USER, DB_PASS and DB_HOST")]
    MissingDatabase,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    bind: Option<SocketAddr>,
    store: Option<StoreKind>,
    #[serde(default)]
    database: FileDatabase,
    #[serde(default)]
    auth: FileAuth,
    #[serde(default)]
    payments: FilePayments,
}

#[derive(Debug, Default, Deserialize)]
struct FileDatabase {
    uri: Option<String>,
    user: Option<String>,
    password: Option<String>,
    host: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileAuth {
    jwt_secret: Option<String>,
    token_ttl: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FilePayments {
    secret_key: Option<String>,
    base_url: Option<String>,
    currency: Option<String>,
}

impl AppConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let from_file = read_file_config(cli.config.as_deref())?;
        Self::resolve(cli, from_file, read_env)
    }

    fn resolve<E>(cli: Cli, file: FileConfig, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let env_bind = match env("PORT") {
            Some(raw) => Some(parse_port("PORT", &raw)?),
            None => None,
        };
        let bind = cli
            .bind
            .or(env_bind)
            .or(file.bind)
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)));

        let env_store = match env("SUMMER_CAMP_STORE") {
            Some(raw) => Some(parse_store("SUMMER_CAMP_STORE", &raw)?),
            None => None,
        };
        let store = cli
            .store
            .or(env_store)
            .or(file.store)
            .unwrap_or(StoreKind::Mongo);

        let database = resolve_database(
            cli.database_url,
            cli.database_name,
            &env,
            file.database,
        );
        if store == StoreKind::Mongo && database.is_none() {
            return Err(ConfigError::MissingDatabase);
        }

        let jwt_secret = env("ACCESS_TOKEN_SECRET")
            .or(file.auth.jwt_secret)
            .filter(|secret| !secret.trim().is_empty())
            .ok_or(ConfigError::MissingJwtSecret)?;

        let (ttl_key, ttl_raw) = match cli.token_ttl {
            Some(raw) => ("--token-ttl", raw),
            None => match env("TOKEN_TTL") {
                Some(raw) => ("TOKEN_TTL", raw),
                None => (
                    "auth.token_ttl",
                    file.auth
                        .token_ttl
                        .unwrap_or_else(|| String::from(DEFAULT_TOKEN_TTL)),
                ),
            },
        };
        let token_ttl = humantime::parse_duration(ttl_raw.trim()).map_err(|source| {
            ConfigError::InvalidDuration {
                key: String::from(ttl_key),
                source,
            }
        })?;

        let payments = env("PAYMENT_SECRET_KEY")
            .or(file.payments.secret_key)
            .filter(|key| !key.trim().is_empty())
            .map(|secret_key| GatewayConfig {
                secret_key,
                base_url: file
                    .payments
                    .base_url
                    .unwrap_or_else(|| String::from(DEFAULT_GATEWAY_URL)),
                currency: file
                    .payments
                    .currency
                    .unwrap_or_else(|| String::from(DEFAULT_CURRENCY)),
            });

        Ok(Self {
            bind,
            store,
            database,
            jwt_secret,
            token_ttl,
            payments,
        })
    }
}

fn resolve_database<E>(
    cli_uri: Option<String>,
    cli_name: Option<String>,
    env: &E,
    file: FileDatabase,
) -> Option<DatabaseConfig>
where
    E: Fn(&str) -> Option<String>,
{
    let name = cli_name
        .or_else(|| env("DB_NAME"))
        .or(file.name)
        .unwrap_or_else(|| String::from(DEFAULT_DATABASE_NAME));

    let uri = cli_uri.or_else(|| env("DATABASE_URL")).or(file.uri);
    if let Some(uri) = uri {
        return Some(DatabaseConfig { uri, name });
    }

    let user = env("DB_USER").or(file.user)?;
    let password = env("DB_PASS").or(file.password)?;
    let host = env("DB_HOST").or(file.host)?;
    Some(DatabaseConfig {
        uri: atlas_uri(&user, &password, &host),
        name,
    })
}

/// Builds an SRV connection string; credentials are percent-encoded.
fn atlas_uri(user: &str, password: &str, host: &str) -> String {
    format!(
        "mongodb+srv://{}:{}@{}/?retryWrites=true&w=majority",
        utf8_percent_encode(user, NON_ALPHANUMERIC),
        utf8_percent_encode(password, NON_ALPHANUMERIC),
        host.trim()
    )
}

fn read_file_config(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };

    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_port(key: &str, raw: &str) -> Result<SocketAddr, ConfigError> {
    raw.trim()
        .parse::<u16>()
        .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
        .map_err(|_| ConfigError::InvalidValue {
            key: String::from(key),
            value: String::from(raw),
        })
}

fn parse_store(key: &str, raw: &str) -> Result<StoreKind, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "mongo" | "mongodb" => Ok(StoreKind::Mongo),
        "memory" | "mem" => Ok(StoreKind::Memory),
        _ => Err(ConfigError::InvalidValue {
            key: String::from(key),
            value: String::from(raw),
        }),
    }
}
