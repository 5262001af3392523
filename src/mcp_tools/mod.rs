//! The fixed tool catalog exposed through the MCP server.
//!
//! Tool names and argument schemas are part of the wire contract — exact
//! names matter. [`ToolRegistry::bootstrap`] builds the catalog once at
//! process start; it is read-only afterward except for the escape hatch
//! [`ToolRegistry::add_custom`], which mirrors the upstream toolkit's
//! runtime-extensible `ToolRegistry::add_protocol`.

pub mod schemas;
pub mod store;

use crate::errors::AgentError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A tool implementation. Receives already-schema-validated arguments and
/// returns either a JSON result or a structured [`AgentError`].
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value, AgentError>;
}

/// Static description of one catalog entry, returned by
/// [`ToolRegistry::describe`] for LLM system-prompt synchronization and by
/// `GET /mcp/schema`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub arguments_schema: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_schema: Option<serde_json::Value>,
}

struct ToolEntry {
    metadata: ToolMetadata,
    /// Destructive tools (delete/mutate) require an explicit confirmation
    /// gate at the MCP client before dispatch.
    destructive: bool,
    handler: Arc<dyn ToolHandler>,
}

/// The tool catalog. Populated once via [`ToolRegistry::bootstrap`];
/// `invoke`/`describe` are safe to call concurrently from many agent runs.
pub struct ToolRegistry {
    entries: RwLock<HashMap<String, ToolEntry>>,
}

impl ToolRegistry {
    /// Build the fixed 18-tool catalog backed by an in-memory
    /// requirements/labels/user-documents store.
    pub fn bootstrap() -> Arc<Self> {
        let store = store::InMemoryStore::new();
        let registry = Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
        });
        for (name, description, args_schema, destructive, handler) in
            store::build_handlers(store)
        {
            registry.insert(name, description, args_schema, destructive, handler);
        }
        registry
    }

    fn insert(
        &self,
        name: &'static str,
        description: &'static str,
        arguments_schema: serde_json::Value,
        destructive: bool,
        handler: Arc<dyn ToolHandler>,
    ) {
        self.entries.write().unwrap().insert(
            name.to_string(),
            ToolEntry {
                metadata: ToolMetadata {
                    name: name.to_string(),
                    description: description.to_string(),
                    arguments_schema,
                    result_schema: None,
                },
                destructive,
                handler,
            },
        );
    }

    /// Register an additional tool at runtime. Not part of the fixed
    /// catalog's wire contract; intended for embedding callers that wish
    /// to extend the registry, mirroring the upstream builder's
    /// `with_custom_tool`.
    pub fn add_custom(
        &self,
        name: &'static str,
        description: &'static str,
        arguments_schema: serde_json::Value,
        destructive: bool,
        handler: Arc<dyn ToolHandler>,
    ) {
        self.insert(name, description, arguments_schema, destructive, handler);
    }

    /// `{tools: {name: metadata, ...}}`, sorted by name.
    pub fn describe(&self) -> serde_json::Value {
        let entries = self.entries.read().unwrap();
        let mut names: Vec<&String> = entries.keys().collect();
        names.sort();
        let mut tools = serde_json::Map::new();
        for name in names {
            let entry = &entries[name];
            tools.insert(
                name.clone(),
                serde_json::to_value(&entry.metadata).expect("ToolMetadata serializes"),
            );
        }
        serde_json::json!({ "tools": tools })
    }

    pub fn is_destructive(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap()
            .get(name)
            .map(|e| e.destructive)
            .unwrap_or(false)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().unwrap().contains_key(name)
    }

    /// Validate that `name` exists, then forward `arguments` to the
    /// handler. Schema validation (`additionalProperties: false`, etc.)
    /// happens inside each handler at the service boundary, consistent
    /// with the registry only prescribing the envelope shape.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, AgentError> {
        let handler = {
            let entries = self.entries.read().unwrap();
            match entries.get(name) {
                Some(entry) => entry.handler.clone(),
                None => return Err(AgentError::NotFound(format!("unknown tool: {}", name))),
            }
        };
        handler.call(arguments).await
    }
}
