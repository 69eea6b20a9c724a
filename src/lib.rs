//! Voxbridge - realtime transport and host-bridge plumbing for a voice client
//!
//! Three independent pieces share one message discipline:
//! - `transport`: streaming remote calls over one shared session
//! - `bus`: host-pushed envelopes dispatched to listeners by handle
//! - `lifecycle`: a connect/retry state machine for a transient connection
//!
//! `codec` turns typed messages into bytes for all of them.

pub mod bus;
pub mod codec;
pub mod config;
pub mod echo;
pub mod error;
pub mod lifecycle;
pub mod transport;

pub use error::{Result, VoxError};
