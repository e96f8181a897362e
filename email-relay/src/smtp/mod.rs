//! SMTP submission front: wire parsing, per-connection state, command
//! semantics and the connection engine.

pub mod command;
pub mod handlers;
pub mod reply;
pub mod server;
pub mod session;

pub use command::Command;
pub use handlers::{Action, CommandHandler, Policy};
pub use reply::Reply;
pub use server::{Limits, MessageSink, SmtpServer};
pub use session::{Envelope, Session};

use thiserror::Error;

/// Failures while reading a DATA body.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Message exceeds {0} bytes")]
    MaxBodyExceeded(usize),

    #[error("DATA deadline elapsed")]
    Timeout,

    #[error("Connection closed during DATA")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
