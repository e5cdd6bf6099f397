use crate::domain::message::Header;

/// Matches messages whose `From` header mentions the tracked address.
#[derive(Debug, Clone)]
pub struct SenderFilter {
    address: String,
}

impl SenderFilter {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Header names compare case-sensitively; a missing `From` never matches.
    pub fn matches(&self, headers: &[Header]) -> bool {
        headers
            .iter()
            .filter(|h| h.name == "From")
            .any(|h| h.value.contains(&self.address))
    }
}
