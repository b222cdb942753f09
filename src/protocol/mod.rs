//! RESP wire protocol
//!
//! Frame encoding/decoding, a framed stream wrapper, and the small amount
//! of request inspection the proxy needs.

pub mod command;
mod connection;
mod frame;

pub use command::{Disposition, TopologyRequest, classify, command_name, has_argument, proxy_error};
pub use connection::FrameStream;
pub use frame::{Frame, ProtocolError};
