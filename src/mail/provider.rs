use crate::domain::message::{Credential, MessageDetail, MessageId};
use crate::error::FetchError;

/// Resolves a provider query into candidate message ids.
pub trait MessageLister: Send + Sync {
    fn list(&self, credential: &Credential, query: &str) -> Result<Vec<MessageId>, FetchError>;
}

/// Retrieves one message. Called concurrently from several workers.
pub trait MessageFetcher: Send + Sync {
    fn fetch(&self, credential: &Credential, id: &MessageId) -> Result<MessageDetail, FetchError>;
}

/// A provider that can do both, which is what the CLI wires up.
pub trait MailProvider: MessageLister + MessageFetcher {}

impl<T: MessageLister + MessageFetcher> MailProvider for T {}
