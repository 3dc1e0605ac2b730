//! Channel adapters for AutoReply.
//!
//! Adapters are pure I/O: they convert platform messages to/from the
//! `InboundMessage` / `OutboundMessage` model and expose the fallible
//! send/typing/reaction surface the responder core drives.

mod error;
mod loopback;
mod traits;
mod types;

pub use error::{ConnectError, SendError};
pub use loopback::LoopbackAdapter;
pub use traits::ChannelAdapter;
pub use types::{ChatId, ChatKind, InboundMessage, MessageHandle, OutboundMessage, SenderId};
