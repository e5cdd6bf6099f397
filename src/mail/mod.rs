pub mod decoders;
pub mod gmail;
pub mod imap_client;
pub mod provider;
