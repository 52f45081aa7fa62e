use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::summarize::SummarizerKind;

pub const DEFAULT_CONFIG_FILENAME: &str = "cyberseed.toml";
pub const DEFAULT_API_URL: &str = "https://cyberpunk.fandom.com/api.php";
pub const DEFAULT_USER_AGENT: &str = "cyberseed/0.1 (respectful bot; contact: local-user)";
pub const DEFAULT_DATABASE_URL: &str = "sqlite:///cyberpunk.db";
pub const DEFAULT_OUTPUT_DIR: &str = "out";
pub const DEFAULT_RATE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SeedConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub summary: SummarySection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub rate_delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DatabaseSection {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct OutputSection {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SummarySection {
    pub strategy: Option<SummarizerKind>,
}

impl SeedConfig {
    /// Resolve the API endpoint: env WIKI_API_URL > config > DEFAULT_API_URL.
    pub fn api_url(&self) -> String {
        env_text("WIKI_API_URL")
            .or_else(|| self.wiki.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_text("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn rate_delay_ms(&self) -> u64 {
        env_number("SEED_RATE_DELAY_MS")
            .or(self.wiki.rate_delay_ms)
            .unwrap_or(DEFAULT_RATE_DELAY_MS)
    }

    pub fn timeout_ms(&self) -> u64 {
        env_number("SEED_HTTP_TIMEOUT_MS")
            .or(self.wiki.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    /// Resolve the store connection string: env DATABASE_URL > config > local SQLite file.
    pub fn database_url(&self) -> String {
        env_text("DATABASE_URL")
            .or_else(|| self.database.url.clone())
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
    }

    pub fn output_dir(&self) -> PathBuf {
        env_text("SEED_OUTPUT_DIR")
            .map(PathBuf::from)
            .or_else(|| self.output.dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }

    /// Requested summarizer, `None` meaning "best available".
    pub fn summarizer(&self) -> Result<Option<SummarizerKind>> {
        match env_text("SEED_SUMMARIZER") {
            Some(value) => SummarizerKind::parse(&value)
                .context("invalid SEED_SUMMARIZER")
                .map(Some),
            None => Ok(self.summary.strategy),
        }
    }
}

/// Load and parse a SeedConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<SeedConfig> {
    if !config_path.exists() {
        return Ok(SeedConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SeedConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Where the relational store lives, decided by the connection string scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Sqlite(PathBuf),
    SqliteMemory,
    Postgres(String),
}

impl DatabaseTarget {
    /// Accepts `sqlite:///relative.db`, `sqlite:////absolute.db`, `sqlite://:memory:`,
    /// `postgres://…`, `postgresql://…` and `postgresql+driver://…`.
    pub fn parse(url: &str) -> Result<Self> {
        let trimmed = url.trim();
        if trimmed.eq_ignore_ascii_case("sqlite::memory:") {
            return Ok(Self::SqliteMemory);
        }
        let Some((scheme, rest)) = trimmed.split_once("://") else {
            bail!("unsupported database url (missing scheme): {trimmed}");
        };
        let backend = scheme
            .split('+')
            .next()
            .unwrap_or(scheme)
            .to_ascii_lowercase();

        match backend.as_str() {
            "sqlite" => {
                let path = rest.strip_prefix('/').unwrap_or(rest);
                if path.is_empty() {
                    bail!("sqlite database url has no path: {trimmed}");
                }
                if path == ":memory:" {
                    return Ok(Self::SqliteMemory);
                }
                Ok(Self::Sqlite(PathBuf::from(path)))
            }
            "postgres" | "postgresql" => {
                if rest.is_empty() {
                    bail!("postgres database url has no host: {trimmed}");
                }
                Ok(Self::Postgres(format!("postgresql://{rest}")))
            }
            other => bail!("unsupported database backend `{other}` in {trimmed}"),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Sqlite(_) | Self::SqliteMemory => "sqlite",
            Self::Postgres(_) => "postgres",
        }
    }
}

fn env_text(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_number(key: &str) -> Option<u64> {
    env_text(key).and_then(|value| value.parse::<u64>().ok())
}
