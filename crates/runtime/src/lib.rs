//! Pipeline run session client.
//!
//! This crate drives one live execution of a pipeline over a realtime channel
//! socket:
//!
//! - **Transport**: websocket (or in-memory) byte pipes behind [`Connector`]
//! - **Connection**: one socket per session, refs, replies, heartbeats and
//!   demultiplexing of inbound frames to channels
//! - **Run channel**: join, leave and push on a single `pipelines:*` topic
//! - **Router**: turns block events into [`RunHandlers`] callbacks
//! - **Encoder**: converts input values, including files, into channel pushes
//! - **Session**: the `idle -> starting -> running` state machine the host UI
//!   talks to
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐
//! │   RunSession   │  start_run / join_run / stop_run / push
//! └───────┬────────┘
//!         │ owns
//! ┌───────▼────────┐   ┌──────────────┐
//! │   Connection   │◄──┤  RunChannel  │  weak back-reference
//! └───────┬────────┘   └──────────────┘
//!         │
//! ┌───────▼────────┐
//! │   Connector    │  websocket / memory
//! └────────────────┘
//! ```

pub mod auth;
pub mod channel;
pub mod config;
pub mod connection;
pub mod encoder;
pub mod error;
pub mod handlers;
pub mod router;
pub mod session;
pub mod transport;
pub mod upload;

pub use auth::{ChannelAuthorizer, HttpAuthorizer};
pub use channel::{JoinOutcome, RunChannel};
pub use config::{AuthMode, FileDelivery, SessionConfig, SessionConfigBuilder};
pub use connection::{ChannelEvent, Connection};
pub use encoder::{FileSource, InputEncoder, InputValue, PushTarget};
pub use error::{Error, Result};
pub use handlers::{RunEvent, RunHandlers, RunHandlersBuilder};
pub use router::MessageRouter;
pub use runlink_protocol as protocol;
pub use runlink_protocol::{ChannelName, ConnectionStatus, JoinArgs, JoinState, Payload, RunStatus, StartArgs};
pub use session::{RunSession, RunSessionBuilder};
pub use transport::{Connector, MemoryConnector, MemoryServer, TransportParts, TransportSender, WebSocketConnector};
pub use upload::{FileUploader, MemoryUploader};
