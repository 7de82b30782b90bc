//! Typed REST resources

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A resource kind the REST API exposes CRUD commands for
pub trait Resource: DeserializeOwned + Send + Sync + 'static {
    /// Singular command suffix, e.g. `project` in `add_project`
    const KIND: &'static str;

    /// List command suffix and the key paginated list responses use
    const PLURAL: &'static str;

    fn id(&self) -> String;

    fn delete_command(&self) -> String {
        format!("delete_{}/{}", Self::KIND, self.id())
    }
}

macro_rules! resource {
    ($ty:ty, $kind:literal, $plural:literal) => {
        impl Resource for $ty {
            const KIND: &'static str = $kind;
            const PLURAL: &'static str = $plural;

            fn id(&self) -> String {
                self.id.to_string()
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub announcement: Option<String>,
    #[serde(default)]
    pub show_announcement: bool,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub suite_mode: Option<u8>,
    #[serde(default)]
    pub url: Option<String>,
}
resource!(Project, "project", "projects");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suite {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub project_id: Option<u64>,
}
resource!(Suite, "suite", "suites");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub suite_id: Option<u64>,
    #[serde(default)]
    pub parent_id: Option<u64>,
    #[serde(default)]
    pub depth: u32,
}
resource!(Section, "section", "sections");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub section_id: Option<u64>,
    #[serde(default)]
    pub template_id: Option<u64>,
    #[serde(default)]
    pub type_id: Option<u64>,
    #[serde(default)]
    pub priority_id: Option<u64>,
}
resource!(Case, "case", "cases");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub project_id: Option<u64>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub entries: Vec<PlanEntry>,
}
resource!(Plan, "plan", "plans");

/// Entry of a test plan; entry ids are GUID strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub id: String,
    #[serde(default)]
    pub suite_id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    /// Owning plan; responses omit it, so callers fill it in
    #[serde(default)]
    pub plan_id: u64,
}

impl Resource for PlanEntry {
    const KIND: &'static str = "plan_entry";
    const PLURAL: &'static str = "entries";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn delete_command(&self) -> String {
        format!("delete_plan_entry/{}/{}", self.plan_id, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigGroup {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub project_id: Option<u64>,
    #[serde(default)]
    pub configs: Vec<Config>,
}
// Config groups are listed through `get_configs`
resource!(ConfigGroup, "config_group", "configs");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub group_id: Option<u64>,
}
resource!(Config, "config", "configs");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub role_id: Option<u64>,
}
resource!(User, "user", "users");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub is_final: bool,
}
resource!(Status, "status", "statuses");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Priority {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub is_default: bool,
}
resource!(Priority, "priority", "priorities");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
}
resource!(Template, "template", "templates");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultField {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub system_name: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub type_id: Option<u64>,
}
resource!(ResultField, "result_field", "result_fields");
