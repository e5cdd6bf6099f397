use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_DIR: &str = "receipt_tally";
pub const DEFAULT_SENDER: &str = "uber.us@uber.com";
pub const DEFAULT_REDIRECT: &str = "http://127.0.0.1:8080/callback";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Gmail,
    Imap,
}

impl Provider {
    pub fn oauth_scope(self) -> &'static str {
        match self {
            Provider::Gmail => "https://www.googleapis.com/auth/gmail.readonly",
            Provider::Imap => "https://mail.google.com/",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub client_id: String,
    pub user_email: Option<String>,
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub provider: Provider,
    pub imap_server: Option<String>,
    pub api_base: Option<String>,
    /// Address a message's `From` header must contain.
    pub sender: Option<String>,
    /// Provider query; defaults to a from-search on `sender`.
    pub query: Option<String>,
    pub workers: Option<usize>,
    pub deadline_secs: Option<u64>,
}

impl Config {
    pub fn sender(&self) -> &str {
        self.sender.as_deref().unwrap_or(DEFAULT_SENDER)
    }

    pub fn query(&self) -> String {
        match &self.query {
            Some(q) => q.clone(),
            None => default_query(self.provider, self.sender()),
        }
    }

    pub fn redirect_uri(&self) -> &str {
        self.redirect_uri.as_deref().unwrap_or(DEFAULT_REDIRECT)
    }

    pub fn imap_server(&self) -> &str {
        self.imap_server.as_deref().unwrap_or("imap.gmail.com")
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

pub fn default_query(provider: Provider, sender: &str) -> String {
    match provider {
        Provider::Gmail => format!("from:{sender}"),
        Provider::Imap => format!("FROM \"{sender}\""),
    }
}

pub fn config_dir() -> Result<PathBuf> {
    let p = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("no config dir available"))?
        .join(APP_DIR);
    fs::create_dir_all(&p)?;
    Ok(p)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

fn template() -> Config {
    Config {
        client_id: "YOUR_CLIENT_ID.apps.googleusercontent.com".to_string(),
        user_email: Some("you@example.com".to_string()),
        redirect_uri: Some(DEFAULT_REDIRECT.to_string()),
        provider: Provider::Gmail,
        imap_server: None,
        api_base: None,
        sender: Some(DEFAULT_SENDER.to_string()),
        query: None,
        workers: Some(8),
        deadline_secs: None,
    }
}

pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

/// Read `path`, writing a template there first if it does not exist.
pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        // create a template config for users to edit
        let tom = toml::to_string_pretty(&template())?;
        fs::write(path, tom)?;
        return Err(anyhow::anyhow!(
            "Created template config at {} — edit it and run again",
            path.display()
        ));
    }
    let s = fs::read_to_string(path)?;
    let cfg: Config =
        toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))?;
    Ok(cfg)
}
