//! MQTT 3.1/3.1.1 front end for an AMQP 0-9-1 broker.
//!
//! The heart of this crate is [`processor::Processor`], the per-connection
//! state machine that bridges decoded MQTT frames onto an AMQP channel
//! pair: subscriptions become queue bindings consumed back to the client,
//! publishes are forwarded into a configured exchange, and QoS-1
//! acknowledgements are translated in both directions (publisher confirms
//! into PUBACKs, client PUBACKs into `basic.ack`).
//!
//! Everything around the processor is a seam: the AMQP client library
//! ([`amqp`]), the retained-message store ([`retain`]), the cluster-wide
//! client-id registry ([`registry`]), access control ([`auth`]), runtime
//! parameters ([`params`]) and the keepalive timer ([`keepalive`]). Socket
//! I/O and the MQTT wire codec live upstream and exchange decoded
//! [`mqtt3_protocol::Packet`] values with the processor.
//!
//! # Example
//!
//! ```rust
//! use mqtt3_gateway::auth::AllowAllAccessControl;
//! use mqtt3_gateway::keepalive::NoopKeepalive;
//! use mqtt3_gateway::params::InMemoryParameters;
//! use mqtt3_gateway::processor::{ConnectionInfo, Processor};
//! use mqtt3_gateway::registry::InMemoryRegistry;
//! use mqtt3_gateway::retain::InMemoryRetainedStores;
//! use mqtt3_gateway::testing::MockBroker;
//! use mqtt3_gateway::GatewayConfig;
//! use mqtt3_protocol::{ConnectPacket, Packet};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (frame_tx, frame_rx) = flume::unbounded();
//! let mut processor = Processor::new(
//!     Arc::new(GatewayConfig::default()),
//!     Arc::new(MockBroker::new()),
//!     Arc::new(AllowAllAccessControl),
//!     Arc::new(InMemoryRegistry::new()),
//!     Arc::new(InMemoryRetainedStores::new()),
//!     Arc::new(InMemoryParameters::new()),
//!     Arc::new(NoopKeepalive),
//!     frame_tx,
//!     ConnectionInfo::default(),
//!     None,
//! );
//!
//! let connect = ConnectPacket::new("sensor-1").with_credentials("guest", "guest");
//! processor.handle_packet(connect.into()).await?;
//! assert!(matches!(frame_rx.try_recv()?, Packet::ConnAck(_)));
//! # Ok(())
//! # }
//! ```

pub mod amqp;
pub mod auth;
pub mod config;
pub mod error;
pub mod keepalive;
pub mod params;
pub mod processor;
pub mod registry;
pub mod retain;
pub mod testing;
pub mod topic;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use processor::{ConnectionInfo, Disposition, Processor};
