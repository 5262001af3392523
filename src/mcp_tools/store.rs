//! In-memory backing store for the tool catalog.
//!
//! The specification treats `RequirementsService`/`UserDocumentsService`
//! as external collaborators whose internal behavior it does not
//! prescribe (only the error envelope shape is uniform). This module
//! provides the in-process reference implementation the tool handlers
//! dispatch to, grounded on the upstream toolkit's `RwLock`-backed
//! `Memory` tool (`tools/memory.rs`).

use super::schemas;
use super::{ToolHandler, ToolMetadata};
use crate::errors::AgentError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Requirement {
    pub rid: String,
    pub title: String,
    pub statement: String,
    pub labels: Vec<String>,
    pub attachments: Vec<String>,
    pub links: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Label {
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UserDocument {
    pub name: String,
    pub content: String,
}

#[derive(Default)]
struct State {
    requirements: HashMap<String, Requirement>,
    labels: HashMap<String, Label>,
    documents: HashMap<String, UserDocument>,
    next_rid: u64,
}

/// Thread-safe in-memory requirements/labels/documents store.
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(State {
                next_rid: 1,
                ..Default::default()
            }),
        })
    }
}

fn bad(message: impl Into<String>) -> AgentError {
    AgentError::Validation(message.into())
}

fn not_found(message: impl Into<String>) -> AgentError {
    AgentError::NotFound(message.into())
}

fn str_arg<'a>(arguments: &'a serde_json::Value, key: &str) -> Result<&'a str, AgentError> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| bad(format!("missing or non-string field: {}", key)))
}

fn string_array_arg(arguments: &serde_json::Value, key: &str) -> Vec<String> {
    arguments
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Dispatches to one of the store's operations after validating the
/// request against its JSON schema.
struct StoreHandler {
    store: Arc<InMemoryStore>,
    schema: serde_json::Value,
    op: Op,
}

#[derive(Clone, Copy)]
enum Op {
    ListRequirements,
    GetRequirement,
    SearchRequirements,
    ListLabels,
    CreateRequirement,
    UpdateRequirementField,
    SetRequirementLabels,
    SetRequirementAttachments,
    SetRequirementLinks,
    DeleteRequirement,
    CreateLabel,
    UpdateLabel,
    DeleteLabel,
    LinkRequirements,
    ListUserDocuments,
    ReadUserDocument,
    CreateUserDocument,
    DeleteUserDocument,
}

#[async_trait]
impl ToolHandler for StoreHandler {
    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value, AgentError> {
        schemas::validate(&self.schema, &arguments).map_err(bad)?;
        let mut state = self.store.state.write().unwrap();
        match self.op {
            Op::ListRequirements => {
                let mut items: Vec<&Requirement> = state.requirements.values().collect();
                items.sort_by(|a, b| a.rid.cmp(&b.rid));
                Ok(serde_json::json!({ "items": items }))
            }
            Op::GetRequirement => {
                let rid = str_arg(&arguments, "rid")?;
                state
                    .requirements
                    .get(rid)
                    .map(|r| serde_json::to_value(r).unwrap())
                    .ok_or_else(|| not_found(format!("no such requirement: {}", rid)))
            }
            Op::SearchRequirements => {
                let query = str_arg(&arguments, "query")?.to_lowercase();
                let items: Vec<&Requirement> = state
                    .requirements
                    .values()
                    .filter(|r| {
                        r.title.to_lowercase().contains(&query)
                            || r.statement.to_lowercase().contains(&query)
                    })
                    .collect();
                Ok(serde_json::json!({ "items": items }))
            }
            Op::ListLabels => {
                let mut items: Vec<&Label> = state.labels.values().collect();
                items.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(serde_json::json!({ "items": items }))
            }
            Op::CreateRequirement => {
                let title = str_arg(&arguments, "title")?.to_string();
                let statement = str_arg(&arguments, "statement")?.to_string();
                let labels = string_array_arg(&arguments, "labels");
                let rid = format!("REQ{}", state.next_rid);
                state.next_rid += 1;
                let requirement = Requirement {
                    rid: rid.clone(),
                    title,
                    statement,
                    labels,
                    attachments: vec![],
                    links: vec![],
                };
                let value = serde_json::to_value(&requirement).unwrap();
                state.requirements.insert(rid, requirement);
                Ok(value)
            }
            Op::UpdateRequirementField => {
                let rid = str_arg(&arguments, "rid")?.to_string();
                let field = str_arg(&arguments, "field")?.to_string();
                let value = str_arg(&arguments, "value")?.to_string();
                let requirement = state
                    .requirements
                    .get_mut(&rid)
                    .ok_or_else(|| not_found(format!("no such requirement: {}", rid)))?;
                match field.as_str() {
                    "title" => requirement.title = value,
                    "statement" => requirement.statement = value,
                    other => return Err(bad(format!("unknown field: {}", other))),
                }
                Ok(serde_json::to_value(&*requirement).unwrap())
            }
            Op::SetRequirementLabels => {
                let rid = str_arg(&arguments, "rid")?.to_string();
                let labels = string_array_arg(&arguments, "labels");
                let requirement = state
                    .requirements
                    .get_mut(&rid)
                    .ok_or_else(|| not_found(format!("no such requirement: {}", rid)))?;
                requirement.labels = labels;
                Ok(serde_json::to_value(&*requirement).unwrap())
            }
            Op::SetRequirementAttachments => {
                let rid = str_arg(&arguments, "rid")?.to_string();
                let attachments = string_array_arg(&arguments, "attachments");
                let requirement = state
                    .requirements
                    .get_mut(&rid)
                    .ok_or_else(|| not_found(format!("no such requirement: {}", rid)))?;
                requirement.attachments = attachments;
                Ok(serde_json::to_value(&*requirement).unwrap())
            }
            Op::SetRequirementLinks => {
                let rid = str_arg(&arguments, "rid")?.to_string();
                let links = string_array_arg(&arguments, "links");
                let requirement = state
                    .requirements
                    .get_mut(&rid)
                    .ok_or_else(|| not_found(format!("no such requirement: {}", rid)))?;
                requirement.links = links;
                Ok(serde_json::to_value(&*requirement).unwrap())
            }
            Op::DeleteRequirement => {
                let rid = str_arg(&arguments, "rid")?.to_string();
                state
                    .requirements
                    .remove(&rid)
                    .ok_or_else(|| not_found(format!("no such requirement: {}", rid)))?;
                Ok(serde_json::json!({ "deleted": rid }))
            }
            Op::CreateLabel => {
                let name = str_arg(&arguments, "name")?.to_string();
                let color = arguments
                    .get("color")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                let label = Label {
                    name: name.clone(),
                    color,
                };
                let value = serde_json::to_value(&label).unwrap();
                state.labels.insert(name, label);
                Ok(value)
            }
            Op::UpdateLabel => {
                let name = str_arg(&arguments, "name")?.to_string();
                let label = state
                    .labels
                    .get_mut(&name)
                    .ok_or_else(|| not_found(format!("no such label: {}", name)))?;
                if let Some(color) = arguments.get("color").and_then(|v| v.as_str()) {
                    label.color = Some(color.to_string());
                }
                Ok(serde_json::to_value(&*label).unwrap())
            }
            Op::DeleteLabel => {
                let name = str_arg(&arguments, "name")?.to_string();
                state
                    .labels
                    .remove(&name)
                    .ok_or_else(|| not_found(format!("no such label: {}", name)))?;
                Ok(serde_json::json!({ "deleted": name }))
            }
            Op::LinkRequirements => {
                let source = str_arg(&arguments, "source_rid")?.to_string();
                let target = str_arg(&arguments, "target_rid")?.to_string();
                if !state.requirements.contains_key(&target) {
                    return Err(not_found(format!("no such requirement: {}", target)));
                }
                let requirement = state
                    .requirements
                    .get_mut(&source)
                    .ok_or_else(|| not_found(format!("no such requirement: {}", source)))?;
                requirement.links.push(target.clone());
                Ok(serde_json::json!({ "source_rid": source, "target_rid": target }))
            }
            Op::ListUserDocuments => {
                let mut names: Vec<&String> = state.documents.keys().collect();
                names.sort();
                Ok(serde_json::json!({ "items": names }))
            }
            Op::ReadUserDocument => {
                let name = str_arg(&arguments, "name")?;
                state
                    .documents
                    .get(name)
                    .map(|d| serde_json::to_value(d).unwrap())
                    .ok_or_else(|| not_found(format!("no such document: {}", name)))
            }
            Op::CreateUserDocument => {
                let name = str_arg(&arguments, "name")?.to_string();
                let content = str_arg(&arguments, "content")?.to_string();
                let document = UserDocument {
                    name: name.clone(),
                    content,
                };
                let value = serde_json::to_value(&document).unwrap();
                state.documents.insert(name, document);
                Ok(value)
            }
            Op::DeleteUserDocument => {
                let name = str_arg(&arguments, "name")?.to_string();
                state
                    .documents
                    .remove(&name)
                    .ok_or_else(|| not_found(format!("no such document: {}", name)))?;
                Ok(serde_json::json!({ "deleted": name }))
            }
        }
    }
}

type CatalogEntry = (
    &'static str,
    &'static str,
    serde_json::Value,
    bool,
    Arc<dyn ToolHandler>,
);

/// Build the full 18-entry catalog bound to one store instance.
pub fn build_handlers(store: Arc<InMemoryStore>) -> Vec<CatalogEntry> {
    let mut entries = Vec::new();
    macro_rules! tool {
        ($name:literal, $description:literal, $schema_fn:path, $op:expr, $destructive:expr) => {
            let schema = $schema_fn();
            entries.push((
                $name,
                $description,
                schema.clone(),
                $destructive,
                Arc::new(StoreHandler {
                    store: store.clone(),
                    schema,
                    op: $op,
                }) as Arc<dyn ToolHandler>,
            ));
        };
    }

    tool!(
        "list_requirements",
        "List requirements, paginated.",
        schemas::list_requirements,
        Op::ListRequirements,
        false
    );
    tool!(
        "get_requirement",
        "Fetch one requirement by RID.",
        schemas::get_requirement,
        Op::GetRequirement,
        false
    );
    tool!(
        "search_requirements",
        "Full-text search over requirement title and statement.",
        schemas::search_requirements,
        Op::SearchRequirements,
        false
    );
    tool!(
        "list_labels",
        "List all labels.",
        schemas::list_labels,
        Op::ListLabels,
        false
    );
    tool!(
        "create_requirement",
        "Create a new requirement.",
        schemas::create_requirement,
        Op::CreateRequirement,
        true
    );
    tool!(
        "update_requirement_field",
        "Update a single field on an existing requirement.",
        schemas::update_requirement_field,
        Op::UpdateRequirementField,
        true
    );
    tool!(
        "set_requirement_labels",
        "Replace the label set on a requirement.",
        schemas::set_requirement_labels,
        Op::SetRequirementLabels,
        true
    );
    tool!(
        "set_requirement_attachments",
        "Replace the attachment set on a requirement.",
        schemas::set_requirement_attachments,
        Op::SetRequirementAttachments,
        true
    );
    tool!(
        "set_requirement_links",
        "Replace the link set on a requirement.",
        schemas::set_requirement_links,
        Op::SetRequirementLinks,
        true
    );
    tool!(
        "delete_requirement",
        "Delete a requirement by RID.",
        schemas::delete_requirement,
        Op::DeleteRequirement,
        true
    );
    tool!(
        "create_label",
        "Create a new label.",
        schemas::create_label,
        Op::CreateLabel,
        true
    );
    tool!(
        "update_label",
        "Update an existing label's color.",
        schemas::update_label,
        Op::UpdateLabel,
        true
    );
    tool!(
        "delete_label",
        "Delete a label by name.",
        schemas::delete_label,
        Op::DeleteLabel,
        true
    );
    tool!(
        "link_requirements",
        "Create a link from one requirement to another.",
        schemas::link_requirements,
        Op::LinkRequirements,
        true
    );
    tool!(
        "list_user_documents",
        "List stored user documents.",
        schemas::list_user_documents,
        Op::ListUserDocuments,
        false
    );
    tool!(
        "read_user_document",
        "Read a user document's content by name.",
        schemas::read_user_document,
        Op::ReadUserDocument,
        false
    );
    tool!(
        "create_user_document",
        "Create a user document.",
        schemas::create_user_document,
        Op::CreateUserDocument,
        true
    );
    tool!(
        "delete_user_document",
        "Delete a user document by name.",
        schemas::delete_user_document,
        Op::DeleteUserDocument,
        true
    );

    entries
}

#[allow(dead_code)]
fn _assert_metadata_shape(_m: &ToolMetadata) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_requirement_round_trips() {
        let store = InMemoryStore::new();
        let handlers = build_handlers(store);
        let create = handlers
            .iter()
            .find(|(name, ..)| *name == "create_requirement")
            .unwrap();
        let result = create
            .4
            .call(serde_json::json!({"title": "T", "statement": "S"}))
            .await
            .unwrap();
        let rid = result["rid"].as_str().unwrap().to_string();

        let get = handlers
            .iter()
            .find(|(name, ..)| *name == "get_requirement")
            .unwrap();
        let fetched = get.4.call(serde_json::json!({"rid": rid})).await.unwrap();
        assert_eq!(fetched["title"], "T");
    }

    #[tokio::test]
    async fn delete_unknown_requirement_is_not_found() {
        let store = InMemoryStore::new();
        let handlers = build_handlers(store);
        let delete = handlers
            .iter()
            .find(|(name, ..)| *name == "delete_requirement")
            .unwrap();
        let err = delete
            .4
            .call(serde_json::json!({"rid": "NOPE"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::errors::ErrorCode::NotFound);
    }
}
