//! tether: process glue around the control node engine
//!
//! Turns a [`tether_core::config::Config`] into a set of workers sharing one
//! [`tether_node::Node`]: the listener, one reconnect loop per remote and one
//! local TCP forwarder per forward rule.

pub mod backoff;
pub mod logging;
pub mod workers;
