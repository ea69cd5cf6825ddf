//! Remote session layer
//!
//! - Transport: the connect/run/upload/close seam
//! - SessionHandle: connection state plus idempotent close
//! - SshTransport: libssh2-backed transport

#[cfg(test)]
pub(crate) mod fake;
mod handle;
mod ssh;
mod transport;

pub use handle::{ConnectionState, SessionHandle};
pub use ssh::SshTransport;
pub use transport::{CommandOutput, SessionTarget, Transport, shell_quote};
