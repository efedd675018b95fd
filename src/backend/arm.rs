//! Azure Resource Manager role-assignment REST client.
//! HTTP statuses and ARM error codes are mapped to `ErrorClass` here and nowhere else.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::token::{ClientSecretCredential, StaticToken, TokenSource};
use super::AuthorizationBackend;
use crate::config::ArmConfig;
use crate::error::{BackendError, ErrorClass};
use crate::model::{normalize_scope, PrincipalType, RoleAssignment};

pub const DEFAULT_API_VERSION: &str = "2022-04-01";
const ROLE_ASSIGNMENTS_PATH: &str = "providers/Microsoft.Authorization/roleAssignments";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentPage {
    #[serde(default)]
    value: Vec<AssignmentResource>,
    #[serde(default)]
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct AssignmentResource {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    properties: AssignmentProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentProperties {
    role_definition_id: String,
    principal_id: String,
    #[serde(default)]
    principal_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    created_on: Option<DateTime<Utc>>,
}

impl AssignmentResource {
    fn into_assignment(self, listed_scope: &str) -> RoleAssignment {
        let assignment_id = self
            .name
            .or_else(|| self.id.as_deref().and_then(|id| id.rsplit('/').next()).map(str::to_string))
            .unwrap_or_default();
        let props = self.properties;
        RoleAssignment {
            assignment_id,
            scope: normalize_scope(props.scope.as_deref().unwrap_or(listed_scope)),
            role_definition_id: props.role_definition_id,
            principal_id: props.principal_id,
            principal_type: props.principal_type.as_deref().and_then(PrincipalType::parse),
            created_on: props.created_on,
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Map an HTTP status plus the ARM error code to a backend error.
pub fn classify_status(status: u16, code: Option<&str>, message: &str) -> BackendError {
    let class = match status {
        400 if code.is_some_and(|c| c.eq_ignore_ascii_case("PrincipalNotFound")) => ErrorClass::BadRequestPrincipalNotFound,
        403 => ErrorClass::Forbidden,
        404 => ErrorClass::NotFound,
        409 => ErrorClass::Conflict,
        408 | 429 | 500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Other,
    };
    let code = match code {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => format!("Http{status}"),
    };
    BackendError::new(class, code, message.to_string())
}

fn classify_transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        BackendError::transient(e.to_string())
    } else {
        BackendError::other("RequestFailed".to_string(), e.to_string())
    }
}

fn parse_error_body(body: &str) -> (Option<String>, String) {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => (Some(env.error.code), env.error.message),
        Err(_) => (None, body.to_string()),
    }
}

pub struct ArmBackend {
    client: reqwest::Client,
    endpoint: String,
    api_version: String,
    tokens: Arc<dyn TokenSource>,
}

impl ArmBackend {
    pub fn new(config: &ArmConfig, tokens: Arc<dyn TokenSource>) -> Result<Self, BackendError> {
        Ok(Self::with_client(build_client(config)?, config, tokens))
    }

    pub fn with_client(client: reqwest::Client, config: &ArmConfig, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            tokens,
        }
    }

    /// Picks the static token when configured, otherwise the client-secret credential.
    pub fn from_config(config: &ArmConfig) -> Result<Self, BackendError> {
        let client = build_client(config)?;
        let tokens: Arc<dyn TokenSource> = if let Some(token) = &config.token {
            Arc::new(StaticToken::new(token.clone()))
        } else if let (Some(tenant), Some(client_id), Some(secret)) = (&config.tenant_id, &config.client_id, &config.client_secret) {
            Arc::new(ClientSecretCredential::new(
                client.clone(),
                &config.authority,
                tenant,
                client_id.clone(),
                secret.clone(),
                format!("{}/.default", config.endpoint.trim_end_matches('/')),
            ))
        } else {
            return Err(BackendError::other(
                "MissingCredentials".to_string(),
                "configure a static token or tenant id, client id and client secret".to_string(),
            ));
        };
        Ok(Self::with_client(client, config, tokens))
    }

    fn collection_url(&self, scope: &str, principal_filter: Option<&str>) -> String {
        let mut url = format!("{}{}/{}?api-version={}", self.endpoint, normalize_scope(scope), ROLE_ASSIGNMENTS_PATH, self.api_version);
        if let Some(p) = principal_filter {
            url.push_str("&$filter=");
            url.push_str(&urlencoding::encode(&format!("principalId eq '{}'", p.replace('\'', "''"))));
        }
        url
    }

    fn item_url(&self, scope: &str, assignment_id: &str) -> String {
        format!(
            "{}{}/{}/{}?api-version={}",
            self.endpoint,
            normalize_scope(scope),
            ROLE_ASSIGNMENTS_PATH,
            urlencoding::encode(assignment_id),
            self.api_version
        )
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let token = self.tokens.bearer_token().await?;
        let resp = req.bearer_auth(token).send().await.map_err(classify_transport_error)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let (code, message) = parse_error_body(&body);
        Err(classify_status(status.as_u16(), code.as_deref(), &message))
    }
}

fn build_client(config: &ArmConfig) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| BackendError::other("ClientBuildFailed".to_string(), e.to_string()))
}

#[async_trait]
impl AuthorizationBackend for ArmBackend {
    async fn list_assignments(&self, scope: &str, principal_filter: Option<&str>) -> Result<Vec<RoleAssignment>, BackendError> {
        let mut url = self.collection_url(scope, principal_filter);
        let mut out = Vec::new();
        let mut pages = 0u32;
        loop {
            pages += 1;
            let resp = self.send(self.client.get(&url)).await?;
            let page: AssignmentPage = resp
                .json()
                .await
                .map_err(|e| BackendError::other("InvalidResponse".to_string(), format!("role assignment page: {e}")))?;
            out.extend(page.value.into_iter().map(|r| r.into_assignment(scope)));
            match page.next_link {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }
        debug!(target: "role_orchestrator::arm", scope, principal = ?principal_filter, pages, rows = out.len(), "listed role assignments");
        Ok(out)
    }

    async fn create_assignment(&self, scope: &str, assignment_id: &str, assignment: &RoleAssignment) -> Result<(), BackendError> {
        let mut properties = json!({
            "roleDefinitionId": assignment.role_definition_id,
            "principalId": assignment.principal_id,
        });
        if let Some(t) = assignment.principal_type {
            properties["principalType"] = json!(t.as_str());
        }
        let req = self.client.put(self.item_url(scope, assignment_id)).json(&json!({ "properties": properties }));
        self.send(req).await?;
        debug!(target: "role_orchestrator::arm", scope, assignment_id, "created role assignment");
        Ok(())
    }

    async fn delete_assignment(&self, scope: &str, assignment_id: &str) -> Result<(), BackendError> {
        // 204 means the record was already gone; both 200 and 204 are success here.
        self.send(self.client.delete(self.item_url(scope, assignment_id))).await?;
        debug!(target: "role_orchestrator::arm", scope, assignment_id, "deleted role assignment");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> ArmBackend {
        let config = ArmConfig { endpoint: "https://management.example.test/".into(), ..ArmConfig::default() };
        ArmBackend::with_client(reqwest::Client::new(), &config, Arc::new(StaticToken::new("t")))
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(400, Some("PrincipalNotFound"), "x").class, ErrorClass::BadRequestPrincipalNotFound);
        assert_eq!(classify_status(400, Some("InvalidRoleDefinitionId"), "x").class, ErrorClass::Other);
        assert_eq!(classify_status(403, Some("AuthorizationFailed"), "x").class, ErrorClass::Forbidden);
        assert_eq!(classify_status(404, None, "x").class, ErrorClass::NotFound);
        assert_eq!(classify_status(409, Some("RoleAssignmentExists"), "x").class, ErrorClass::Conflict);
        assert_eq!(classify_status(429, None, "x").class, ErrorClass::Transient);
        assert_eq!(classify_status(503, None, "x").class, ErrorClass::Transient);
        assert_eq!(classify_status(401, None, "x").class, ErrorClass::Other);
        assert_eq!(classify_status(502, None, "x").code, "Http502");
    }

    #[test]
    fn error_body_parsing() {
        let (code, msg) = parse_error_body(r#"{"error":{"code":"PrincipalNotFound","message":"Principal abc does not exist"}}"#);
        assert_eq!(code.as_deref(), Some("PrincipalNotFound"));
        assert_eq!(msg, "Principal abc does not exist");
        let (code, msg) = parse_error_body("gateway timeout");
        assert!(code.is_none());
        assert_eq!(msg, "gateway timeout");
    }

    #[test]
    fn urls() {
        let b = backend();
        assert_eq!(
            b.collection_url("/subscriptions/s1/", None),
            format!("https://management.example.test/subscriptions/s1/providers/Microsoft.Authorization/roleAssignments?api-version={DEFAULT_API_VERSION}")
        );
        let filtered = b.collection_url("subscriptions/s1", Some("p1"));
        assert!(filtered.starts_with("https://management.example.test/subscriptions/s1/providers/"), "{filtered}");
        assert!(filtered.ends_with("&$filter=principalId%20eq%20%27p1%27"), "{filtered}");
        assert_eq!(
            b.item_url("/subscriptions/s1", "a1"),
            format!("https://management.example.test/subscriptions/s1/providers/Microsoft.Authorization/roleAssignments/a1?api-version={DEFAULT_API_VERSION}")
        );
    }

    #[test]
    fn resource_conversion_prefers_reported_scope() {
        let raw = r#"{
            "id": "/subscriptions/s1/providers/Microsoft.Authorization/roleAssignments/a9",
            "properties": {
                "roleDefinitionId": "/subscriptions/s1/providers/Microsoft.Authorization/roleDefinitions/r1",
                "principalId": "p1",
                "principalType": "ServicePrincipal",
                "scope": "/subscriptions/s1",
                "createdOn": "2024-05-01T10:00:00Z"
            }
        }"#;
        let res: AssignmentResource = serde_json::from_str(raw).unwrap();
        let a = res.into_assignment("/subscriptions/s1/resourceGroups/rg");
        assert_eq!(a.assignment_id, "a9");
        assert_eq!(a.scope, "/subscriptions/s1");
        assert_eq!(a.principal_type, Some(PrincipalType::ServicePrincipal));
        assert!(a.created_on.is_some());
    }

    #[test]
    fn from_config_requires_credentials() {
        let err = ArmBackend::from_config(&ArmConfig::default()).err().unwrap();
        assert_eq!(err.code, "MissingCredentials");
        let with_token = ArmConfig { token: Some("abc".into()), ..ArmConfig::default() };
        assert!(ArmBackend::from_config(&with_token).is_ok());
    }
}
