//! Push-first watchers with ordered fallback to interval polling.

pub mod actor;
pub mod delivery;
pub mod strategy;

pub use actor::*;
pub use delivery::{Delivery, ErrorCallback, UpdateCallback, UpdateSource};
pub use strategy::*;
