//! Configuration parsing for infrahaus
//!
//! This crate handles:
//! - Process configuration read from the environment at startup
//! - Template records (the read-only provisioning catalog)
//! - Job payloads consumed from the provisioning queue

mod error;
mod job;
mod settings;
mod substitute;
mod template;

pub use error::*;
pub use job::*;
pub use settings::*;
pub use substitute::*;
pub use template::*;
