use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::eligibility::MentionPolicy;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    #[default]
    Socks5,
    Socks5h,
    Http,
    Https,
}

impl std::fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyScheme::Socks5 => write!(f, "socks5"),
            ProxyScheme::Socks5h => write!(f, "socks5h"),
            ProxyScheme::Http => write!(f, "http"),
            ProxyScheme::Https => write!(f, "https"),
        }
    }
}

impl FromStr for ProxyScheme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "socks5" => Ok(ProxyScheme::Socks5),
            "socks5h" => Ok(ProxyScheme::Socks5h),
            "http" => Ok(ProxyScheme::Http),
            "https" => Ok(ProxyScheme::Https),
            other => bail!("Unsupported proxy type: {}", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub mention: MentionPolicy,
    #[serde(default)]
    pub messages: MessagesConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default)]
    pub chat_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            chat_url: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl AiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Outbound proxy shared by the Telegram connection and the AI client.
#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub scheme: ProxyScheme,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    /// Full proxy URL; takes precedence over `scheme` + `port`.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scheme: ProxyScheme::default(),
            port: default_proxy_port(),
            url: None,
        }
    }
}

impl ProxyConfig {
    /// Returns the proxy URL to use, or `None` when the proxy is disabled.
    /// Without an explicit `url` the proxy is assumed to listen on localhost.
    pub fn effective_url(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        match &self.url {
            Some(url) if !url.is_empty() => Some(url.clone()),
            _ => Some(format!("{}://127.0.0.1:{}", self.scheme, self.port)),
        }
    }

    pub fn to_reqwest(&self) -> Result<Option<reqwest::Proxy>> {
        self.effective_url()
            .map(|url| {
                reqwest::Proxy::all(&url).with_context(|| format!("Invalid proxy URL: {}", url))
            })
            .transpose()
    }
}

/// User-visible strings.
#[derive(Debug, Deserialize, Clone)]
pub struct MessagesConfig {
    #[serde(default = "default_thinking")]
    pub thinking: String,
    #[serde(default = "default_no_answer")]
    pub no_answer: String,
    #[serde(default = "default_service_error")]
    pub service_error: String,
    #[serde(default = "default_send_failed")]
    pub send_failed: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            thinking: default_thinking(),
            no_answer: default_no_answer(),
            service_error: default_service_error(),
            send_failed: default_send_failed(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_proxy_port() -> u16 {
    8080
}

fn default_thinking() -> String {
    "🤔 Thinking...".to_string()
}

fn default_no_answer() -> String {
    "no answer available".to_string()
}

fn default_service_error() -> String {
    "service error: ".to_string()
}

fn default_send_failed() -> String {
    "Sorry, something went wrong: ".to_string()
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "1" | "on"
    )
}

impl Config {
    /// Reads the optional TOML file, applies environment overrides and validates.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML configuration")
    }

    /// Overrides file values with the variables the bot has always been
    /// configured through.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TG_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(url) = lookup("AI_CHAT_URL") {
            self.ai.chat_url = url;
        }
        if let Some(secs) = lookup("AI_TIMEOUT_SECS") {
            self.ai.timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("AI_TIMEOUT_SECS is not a number: {}", secs))?;
        }
        if let Some(flag) = lookup("IS_USE_PROXY") {
            self.proxy.enabled = parse_flag(&flag);
        }
        if let Some(scheme) = lookup("LOCAL_PROXY_TYPE") {
            self.proxy.scheme = scheme.parse()?;
        }
        if let Some(port) = lookup("LOCAL_PROXY_PORT") {
            self.proxy.port = port
                .trim()
                .parse()
                .with_context(|| format!("LOCAL_PROXY_PORT is not a port: {}", port))?;
        }
        if let Some(url) = lookup("PROXY_URL") {
            self.proxy.url = Some(url);
        }
        if let Some(position) = lookup("MENTION_POSITION") {
            self.mention.handle_position = position.parse()?;
        }
        if let Some(flag) = lookup("MENTION_ENTITY_AT_START") {
            self.mention.entity_at_start_only = parse_flag(&flag);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            bail!("Telegram bot token is missing (set TG_BOT_TOKEN or [telegram] bot_token)");
        }
        if self.ai.chat_url.trim().is_empty() {
            bail!("AI endpoint is missing (set AI_CHAT_URL or [ai] chat_url)");
        }
        reqwest::Url::parse(&self.ai.chat_url)
            .with_context(|| format!("Invalid AI endpoint URL: {}", self.ai.chat_url))?;
        if self.ai.timeout_secs == 0 {
            bail!("AI request timeout must be greater than zero");
        }
        self.proxy.to_reqwest()?;
        Ok(())
    }
}
