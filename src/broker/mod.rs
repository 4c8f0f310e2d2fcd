//! The `broker` module holds the state shared by every connection: the
//! per-client session states, their subscriptions and outgoing queues, the
//! protocol hub that validates CONNECT and fans published messages out, and
//! the top-level [`Broker`].

pub mod auth;
pub mod engine;
pub mod events;
pub mod hub;
pub mod message;
pub mod protocol;
pub mod queue;
pub mod repository;
pub mod session_state;
pub mod subscription;

pub use auth::{Authenticator, StaticAuthenticator};
pub use engine::Broker;
pub use events::{SessionObserver, TracingObserver};
pub use hub::{AcceptedConnect, Hub};
pub use message::Message;
pub use session_state::{CloseReason, SessionState};
pub use subscription::SubscriptionTable;
