use serde_json::Value;

/// Input payload for role-set creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRoleSetInput {
    /// Unique role-set name.
    pub name: String,
    /// Google Cloud project the owned service account is created in.
    pub project: String,
    /// Secret kind in storage form (`access_token` or `service_account_key`).
    pub secret_kind: String,
    /// Human-authored binding spec: resource name to role-name array.
    pub bindings: Value,
    /// OAuth scopes; required for `access_token`, forbidden otherwise.
    pub token_scopes: Vec<String>,
}

/// Input payload for role-set updates. Absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateRoleSetInput {
    /// Replacement binding spec.
    pub bindings: Option<Value>,
    /// Replacement OAuth scopes.
    pub token_scopes: Option<Vec<String>>,
}
