//! `atpneumatics-middleware` – controller transport
//!
//! Moves JSON messages between the CSC and the pneumatics controller without
//! caring about their meaning.
//!
//! # Modules
//!
//! - [`codec`] – `\r\n`-terminated JSON framing.
//! - [`adapter`] – the [`CommandLink`] trait the CSC talks to.
//! - [`client`] – [`TcpipClient`], the TCP implementation of [`CommandLink`].
//! - [`bus`] – topic-based publish/subscribe bus built on Tokio broadcast
//!   channels; controller events and telemetry are republished here.

pub mod adapter;
pub mod bus;
pub mod client;
pub mod codec;

pub use adapter::{CommandIssued, CommandLink};
pub use bus::{EventBus, Topic, TopicReceiver};
pub use client::TcpipClient;
