pub mod adapters;
pub mod client;
pub mod types;
