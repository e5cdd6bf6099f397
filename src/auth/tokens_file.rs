use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::config::config_dir;

/// Non-secret tokens metadata stored in ~/.config/receipt_tally/tokens.json
#[derive(Debug, Serialize, Deserialize)]
pub struct TokensFile {
    /// Account the cached token was issued for.
    #[serde(default)]
    pub user: Option<String>,
    pub access_token: Option<String>,
    pub expires_at_epoch: Option<i64>, // epoch seconds
}

impl TokensFile {
    /// Cached token for `user` that is still valid at `now`.
    pub fn valid_for(&self, user: &str, now: i64) -> Option<&str> {
        if self.user.as_deref().is_some_and(|u| u != user) {
            return None;
        }
        match (&self.access_token, self.expires_at_epoch) {
            (Some(at), Some(exp)) if now < exp => Some(at.as_str()),
            _ => None,
        }
    }
}

fn tokens_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("tokens.json"))
}

/// Save access_token (non-secret) and expiry epoch
pub fn save_tokens(user: &str, access_token: &str, expires_at_epoch: i64) -> Result<()> {
    let tf = TokensFile {
        user: Some(user.to_string()),
        access_token: Some(access_token.to_string()),
        expires_at_epoch: Some(expires_at_epoch),
    };
    fs::write(tokens_path()?, serde_json::to_string_pretty(&tf)?)?;
    Ok(())
}

/// Load tokens file if present
pub fn load_tokens() -> Result<Option<TokensFile>> {
    let p = tokens_path()?;
    if !p.exists() {
        return Ok(None);
    }
    let s = fs::read_to_string(&p)?;
    let tf: TokensFile = serde_json::from_str(&s)?;
    Ok(Some(tf))
}

pub fn clear_tokens() -> Result<()> {
    let p = tokens_path()?;
    if p.exists() {
        fs::remove_file(p)?;
    }
    Ok(())
}
