//! Agent personas and their registry
//!
//! Each agent has an id, a capability list and a persona prompt. The registry
//! tracks the live status shown in the console and the web frontend.

pub mod profile;
pub mod registry;

pub use profile::{AgentProfile, AgentStatus, Capability, builtin_profiles};
pub use registry::AgentRegistry;
