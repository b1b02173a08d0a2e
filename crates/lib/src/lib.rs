//! Agent relay library: on-behalf-of token exchange, request-scoped credential propagation,
//! and the HTTP handlers that relay conversation turns to the agent service.

pub mod agent;
pub mod auth;
pub mod config;
pub mod relay;
