//! Application layer containing the payment confirmation orchestration.
//!
//! This module defines the `PaymentController`, which owns one checkout's
//! session. It uses an Actor-like pattern with `tokio` channels so that host
//! intents, timer ticks and gateway responses are all applied on a single task.

pub mod controller;
pub mod timers;
