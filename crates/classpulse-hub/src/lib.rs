//! # ClassPulse Hub
//!
//! Full assistant service: scope memory, dissatisfaction tracking and
//! escalation, analytics and grounding, the conversation orchestrator,
//! LLM providers, ticket sinks, and the REST API server.

pub mod analytics;
pub mod api;
pub mod grounding;
pub mod middleware;
pub mod orchestrator;
pub mod providers;
pub mod scope;
pub mod store;
pub mod support;
