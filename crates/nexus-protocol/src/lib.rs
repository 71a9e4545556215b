//! # nexus-protocol
//!
//! The miner-to-node session core.
//!
//! This crate provides:
//! - The template interface between `BLOCK_DATA` packets and workers
//! - The authenticated solo session state machine and the legacy pool policy
//! - The reconnecting connection manager that drives either policy

mod connection;
mod error;
mod pool;
mod session;
mod template;

pub use connection::{ConnectionConfig, ConnectionManager};
pub use error::{ProtocolError, ProtocolResult, TemplateError};
pub use pool::PoolProtocol;
pub use session::{MiningProtocol, SessionState, SoloProtocol};
pub use template::{
    FeedHandler, MiningTemplate, TemplateInterface, TemplateState, TemplateStats,
};
