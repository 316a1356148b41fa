//! Request/response gateway for AT-style serial devices.
//!
//! A caller submits a catalog command; the gateway writes it to the serial
//! link and returns a [`CommandResult`] once the reply matches the command's
//! expected output, the device reports an error, or the command times out.
//! Listen commands are never written: they wait for an unsolicited message.
//!
//! - [`port`]: transport trait, subscriber registry, serial transport
//! - [`proto`]: command types, codec, catalog, wire format
//! - [`rx`]: receive buffer for the send path
//! - [`tx`]: the single send worker
//! - [`listen`]: matcher for unsolicited messages
//! - [`executor`]: the entry point, [`CommandExecutor`]
//! - [`server`]: line-delimited JSON front end
//! - [`mock`]: in-memory transport for tests

pub mod cli;
pub mod error;
pub mod executor;
pub mod listen;
pub mod mock;
pub mod port;
pub mod proto;
pub mod rx;
pub mod server;
pub mod stats;
pub mod tx;

pub use error::{GatewayError, Result};
pub use executor::{CommandExecutor, ExecutorOptions};
pub use port::{SerialTransport, Transport};
pub use proto::catalog::Catalog;
pub use proto::command::{
    CommandDescriptor, CommandKind, CommandRequest, CommandResult, CommandStatus,
};
