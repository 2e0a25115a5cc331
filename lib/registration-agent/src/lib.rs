//! Agent integration
pub mod client;

pub use client::{AgentConfig, AgentRegistrar, AGENT_USER};
