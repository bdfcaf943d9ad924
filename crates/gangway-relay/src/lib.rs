//! Relay engine connecting a local duplex endpoint to a framed transport.
//!
//! Both halves of a gangway session are instances of the same [`Relay`]: the
//! client pairs the local terminal with a WebSocket and produces resize
//! control frames, the pier pairs the WebSocket with an SSH shell session and
//! consumes them. The engine pumps bytes in both directions, multiplexes the
//! resize signal onto the same connection, and owns the close choreography so
//! that a failure on any of the three legs unwinds the whole session without
//! leaking tasks.

pub mod endpoint;
pub mod frame;
pub mod mock;
pub mod relay;
pub mod state;
pub mod transport;

pub use endpoint::{EndpointReader, EndpointWriter, ResizeRole, ResizeTarget};
pub use frame::{encode_resize, parse_resize, CloseCode, ControlParseError, WindowSize};
pub use relay::{Relay, RelayError};
pub use state::{SessionPhase, SessionState};
pub use transport::{CloseSignal, FramedTransport, IncomingMessage, TransportError};
