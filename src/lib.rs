//! A local AI agent runtime: an agent turn engine, an MCP-style tool
//! server, and a checksummed, auditable conversation timeline.

pub mod agent;
pub mod cancellation;
pub mod chat_store;
pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod errors;
pub mod logging;
pub mod mcp_client;
pub mod mcp_server;
pub mod mcp_tools;
pub mod run_contract;
pub mod run_controller;
pub mod timeline;
pub mod timeline_view;

pub use agent::{Agent, AgentConfig, AgentObserver, NullObserver};
pub use errors::{AgentError, ErrorCode};
pub use mcp_client::McpClient;
pub use mcp_tools::ToolRegistry;
pub use run_contract::AgentRunPayload;
pub use run_controller::RunController;
