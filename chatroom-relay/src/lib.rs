//! Text chatroom relay over plain TCP.
//!
//! Every connected client gets a [`session::Session`]; whatever bytes one
//! client sends are relayed, chunk for chunk, to every other client. There is
//! no framing beyond two in-band conventions described in [`protocol`].
//!
//! - [`cli`] parses the `server` and `client` subcommands.
//! - [`server`] owns the listening socket, spawns one task per connection
//!   and handles operator shutdown.
//! - [`registry`] is the shared set of live sessions and performs broadcast
//!   fan-out with per-recipient isolation.
//! - [`session`] runs one connection: name handshake, read loop, writer task
//!   and close bookkeeping.
//! - [`protocol`] holds the chunk size, quit keyword and join/leave notices.
//! - [`client`] is a small terminal client for the relay.
//! - [`error`] names the failures the relay distinguishes.

pub mod cli;
pub mod client;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
