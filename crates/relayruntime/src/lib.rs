//! Dispatch runtime
//!
//! This crate provides the engine that resolves units by name, decides
//! which process runs them, forwards them over a transport when needed and
//! records every dispatch in the hierarchical log.

mod config;
mod engine;
mod hook;
mod locality;
mod registry;
mod transport;

pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use hook::Hook;
pub use locality::{plan_route, Route};
pub use registry::{NodeFactory, NodeRegistry};
pub use transport::{ChannelTransport, Switchboard};
