//! Ring mutual exclusion with two complementary circulating tokens.
//!
//! Every node forwards a `Ping` and a `Pong` token to its successor and may
//! only occupy the critical section while it holds the `Ping`. Token loss is
//! detected when a node sees the same token value twice in a row and both
//! tokens are then regenerated locally.

pub mod config;
pub mod error;
pub mod log;
pub mod message;
pub mod node;
pub mod peer;
pub mod poisson;
pub mod ring;
pub mod timer;
pub mod transport;

pub use config::NodeConfig;
pub use message::{NodeEvent, Token, TokenKind};
pub use node::{Action, Node};

/// Generation carried by the very first Ping/Pong pair.
pub const FIRST_GENERATION: i64 = 1;

/// Longest accepted wire line, in bytes.
pub const MAX_LINE_LENGTH: usize = 1024;
