//! `ammbridge-middleware` – the bus side of the bridge.
//!
//! Routes records between the translation engine and the rest of the
//! simulation platform without caring about their meaning.
//!
//! # Modules
//!
//! - [`bus`] – the [`MessageBus`] write trait, the in-process per-kind
//!   [`EventBus`] built on Tokio broadcast channels, and [`BusParticipant`].
//! - [`dispatch`] – [`DispatchTable`]: one handler per record kind, pumped by
//!   one task per kind.
//! - [`gateway`] – WebSocket gateway exposing the bus to external processes as
//!   JSON frames.

pub mod bus;
pub mod dispatch;
pub mod gateway;

pub use bus::{BusParticipant, EventBus, KindReceiver, MessageBus, Subscription};
pub use dispatch::{DispatchTable, Handler};
pub use gateway::BusGateway;
