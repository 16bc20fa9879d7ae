//! Wire types for the pipeline run channel protocol.
//!
//! Nothing in this crate performs I/O. It describes what travels over the
//! realtime socket and how to turn it into bytes and back:
//!
//! - [`frame`] - channel frames in the v2 serializer (JSON arrays and binary layouts)
//! - [`topic`] - the colon-delimited event names used by pipeline runs
//! - [`types`] - status enums, run start arguments and the channel auth exchange

pub mod error;
pub mod frame;
pub mod topic;
pub mod types;

pub use error::{ProtocolError, Result};
pub use frame::{Frame, InboundMessage, Payload, Reply, ReplyStatus, WireFrame, events};
pub use topic::{ChannelName, Topic, input_topic};
pub use types::{ChannelAuth, ChannelAuthRequest, ConnectionStatus, InitialInput, JoinArgs, JoinState, RunStatus, StartArgs};
