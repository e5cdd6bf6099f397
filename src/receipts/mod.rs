pub mod amount;
pub mod filter;

pub use filter::SenderFilter;
