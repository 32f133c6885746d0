//! Agent turn loop for Relay: model requests, tool routing, schema shaping.

mod agent;
mod names;
pub mod schema;

pub use agent::{Agent, AgentEvent, MAX_TOOL_ROUNDS};
pub use names::ToolNameMap;
pub use schema::SchemaDialect;
