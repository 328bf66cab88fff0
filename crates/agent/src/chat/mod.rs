//! The per-turn chat pipeline and SSE framing.

pub mod service;
pub mod sse;

pub use service::{ChatService, TurnSummary};
