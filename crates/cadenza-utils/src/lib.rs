//! Shared utilities for the Cadenza workspace.

pub mod observer;

pub use observer::{Publisher, Subscription};
