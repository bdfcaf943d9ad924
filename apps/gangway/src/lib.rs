//! Terminal client: bridges the local terminal to a remote shell through a
//! gangway-pier server.

pub mod cli;
pub mod error;
pub mod resize;
pub mod session;
pub mod terminal;
pub mod transport;
