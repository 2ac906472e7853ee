use serde::Deserialize;

/// Backend service families a tenant can be bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceKind {
    Builder,
    Template,
    Function,
    Scenario,
    Transcoder,
}

impl ServiceKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Builder => "BUILDER",
            ServiceKind::Template => "TEMPLATE",
            ServiceKind::Function => "FUNCTION",
            ServiceKind::Scenario => "SCENARIO",
            ServiceKind::Transcoder => "TRANSCODER",
        }
    }
}

/// Storage dialect of a builder instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    DocumentStore,
    Relational,
}

impl Dialect {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Dialect::DocumentStore => "document_store",
            Dialect::Relational => "relational",
        }
    }
}

/// Whether the tenant runs on shared infrastructure or a dedicated node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    Shared,
    Dedicated,
}

/// Where a (project, environment) pair lives: the backend instance that
/// serves it, its storage dialect, and the id that backend uses as its own
/// "project id".
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ResourceBinding {
    /// Project id as seen by gateway callers.
    pub project_id: String,
    pub environment_id: String,
    /// The backend's notion of "project". Every backend call carries this id
    /// as its tenant key; it is never exposed outward.
    pub resource_environment_id: String,
    pub node_class: NodeClass,
    pub dialect: Dialect,
    pub service_kind: ServiceKind,
}
