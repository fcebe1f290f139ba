//! Push Delivery
//!
//! The projection layer: recompute-and-push units bound to external
//! streams, pinged by the scheduler when dirty.

pub mod projection;

pub use projection::{ProjectionError, PushStream, RxProjection};
