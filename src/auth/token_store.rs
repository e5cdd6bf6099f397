use anyhow::{Result, anyhow};
use keyring::{Entry, Error as KeyringError};

const SERVICE: &str = "receipt_tally";

/// Save a refresh token into the OS keyring for the given username (email)
pub fn save_refresh_token(username: &str, refresh_token: &str) -> Result<()> {
    Entry::new(SERVICE, username)?
        .set_password(refresh_token)
        .map_err(|e| anyhow!(e.to_string()))
}

/// Load a refresh token from the keyring for the given username (email)
pub fn load_refresh_token(username: &str) -> Result<Option<String>> {
    load(username)
}

/// Forget the refresh token; missing entries are not an error.
pub fn delete_refresh_token(username: &str) -> Result<()> {
    match Entry::new(SERVICE, username)?.delete_credential() {
        Ok(()) | Err(KeyringError::NoEntry) => Ok(()),
        Err(e) => Err(anyhow!(e.to_string())),
    }
}

/// Save a client secret into the keyring, keyed by client_id
pub fn save_client_secret(client_id: &str, client_secret: &str) -> Result<()> {
    Entry::new(SERVICE, client_id)?
        .set_password(client_secret)
        .map_err(|e| anyhow!(e.to_string()))
}

/// Load client secret from keyring by client_id
pub fn load_client_secret(client_id: &str) -> Result<Option<String>> {
    load(client_id)
}

fn load(key: &str) -> Result<Option<String>> {
    match Entry::new(SERVICE, key)?.get_password() {
        Ok(v) => Ok(Some(v)),
        Err(KeyringError::NoEntry) => Ok(None),
        Err(e) => Err(anyhow!(e.to_string())),
    }
}
