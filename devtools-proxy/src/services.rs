//! Internal services of the proxy.
//!
//! - [`broker_registry`] – the map of live page brokers.
//! - [`page_broker`] – the per-page fan-in/fan-out hub.
//! - [`upstream`] – the browser side of a broker: dialing and write
//!   serialization.

pub(crate) mod broker_registry;
pub(crate) mod page_broker;
pub(crate) mod upstream;
