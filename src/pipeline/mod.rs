//! Transcode job pipeline: intake, probing, encoding, delivery and cleanup.

pub mod bridge;
pub mod cleanup;
pub mod encoder;
pub mod job;
pub mod machine;
pub mod ports;
pub mod probe;
pub mod profile;
pub mod progress;
pub mod status;
pub mod tally;
