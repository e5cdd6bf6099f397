use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::{oauth, token_store, tokens_file};
use crate::config::Config;
use crate::domain::message::Credential;

// Google access tokens live for an hour; assume a little less when unknown.
const FALLBACK_LIFETIME_SECS: i64 = 3500;

#[derive(Clone)]
pub struct TokenManager {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub user_email: String,
    pub scope: String,
}

fn now_epoch() -> Result<i64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64)
}

impl TokenManager {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let client_id = cfg.client_id.clone();
        let user_email = cfg
            .user_email
            .clone()
            .ok_or_else(|| anyhow!("user_email not set in config"))?;

        let client_secret = token_store::load_client_secret(&client_id)?
            .or_else(|| std::env::var("OAUTH_CLIENT_SECRET").ok());

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri: cfg.redirect_uri().to_string(),
            user_email,
            scope: cfg.provider.oauth_scope().to_string(),
        })
    }

    /// A credential valid right now: cached token, else refresh, else an
    /// interactive PKCE login. Never refreshed while a run uses it.
    pub fn credential(&self) -> Result<Credential> {
        let now = now_epoch()?;
        let refresh_token = token_store::load_refresh_token(&self.user_email)?;

        if let Some(tf) = tokens_file::load_tokens()?
            && let Some(at) = tf.valid_for(&self.user_email, now)
        {
            debug!("using cached access token");
            return Ok(self.build(at.to_string(), refresh_token));
        }

        if let Some(rt) = refresh_token {
            match oauth::refresh_access_token(&self.client_id, self.client_secret.as_deref(), &rt) {
                Ok(t) => {
                    info!("refreshed access token for {}", self.user_email);
                    return self.persist(t, Some(rt));
                }
                Err(e) => warn!("refresh failed: {e}; falling back to interactive auth"),
            }
        }

        self.login()
    }

    /// Run the interactive PKCE flow regardless of cached state.
    pub fn login(&self) -> Result<Credential> {
        let t = oauth::perform_pkce_flow(
            &self.client_id,
            self.client_secret.as_deref(),
            &self.redirect_uri,
            &self.scope,
        )?;
        self.persist(t, None)
    }

    /// Forget every stored token for this user.
    pub fn logout(&self) -> Result<()> {
        token_store::delete_refresh_token(&self.user_email)?;
        tokens_file::clear_tokens()?;
        info!("cleared stored tokens for {}", self.user_email);
        Ok(())
    }

    fn persist(&self, t: oauth::Tokens, previous_refresh: Option<String>) -> Result<Credential> {
        let now = now_epoch()?;
        let exp = t
            .expires_in
            .map(|s| now + s as i64)
            .unwrap_or(now + FALLBACK_LIFETIME_SECS);
        tokens_file::save_tokens(&self.user_email, &t.access_token, exp)?;

        // best-effort; don't fail the flow if the keyring is unavailable
        if let Some(rt) = &t.refresh_token
            && let Err(e) = token_store::save_refresh_token(&self.user_email, rt)
        {
            warn!("couldn't save refresh token to keyring: {e}");
        }

        let refresh = t.refresh_token.or(previous_refresh);
        Ok(self.build(t.access_token, refresh))
    }

    fn build(&self, access_token: String, refresh_token: Option<String>) -> Credential {
        let credential = Credential::new(&self.user_email, access_token);
        match refresh_token {
            Some(rt) => credential.with_refresh_token(rt),
            None => credential,
        }
    }
}
