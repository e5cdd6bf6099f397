pub mod aggregator;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod mail;
pub mod receipts;
pub mod report;

pub use aggregator::{Aggregator, AggregatorOptions, CancelToken};
pub use domain::message::{Credential, Header, MessageDetail, MessageId};
pub use domain::result::{AggregationResult, RunStats};
pub use error::{AggregateError, FetchError};
pub use receipts::SenderFilter;
