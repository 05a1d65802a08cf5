use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    View,
    Export,
    Login,
    Logout,
    AccessDenied,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::View => "view",
            AuditAction::Export => "export",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::AccessDenied => "access_denied",
        }
    }

    pub fn parse(s: &str) -> Option<AuditAction> {
        match s {
            "create" => Some(AuditAction::Create),
            "update" => Some(AuditAction::Update),
            "delete" => Some(AuditAction::Delete),
            "view" => Some(AuditAction::View),
            "export" => Some(AuditAction::Export),
            "login" => Some(AuditAction::Login),
            "logout" => Some(AuditAction::Logout),
            "access_denied" => Some(AuditAction::AccessDenied),
            _ => None,
        }
    }
}

/// Append-only audit record. `user_id` goes NULL when the user is deleted;
/// the row itself survives until the audit retention sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub org_id: String,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub action: AuditAction,
    pub object_type: String,
    pub object_id: Option<String>,
    pub description: String,
    pub metadata: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: String,
}

/// Filters for the audit list endpoint.
#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub object_type: Option<String>,
    pub user_id: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    #[serde(default)]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            action: None,
            object_type: None,
            user_id: None,
            since: None,
            until: None,
            page: 0,
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> u64 {
    100
}
