//! Graph sink backed by the Veza Open Authorization API.

use async_trait::async_trait;
use reqwest::Method;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::OaaConfig;
use crate::graph::{ApplicationGraph, Identity, PermissionKind};
use crate::sink::{GraphSink, Provider, PushResponse, SinkError};
use crate::{SailPointError, SailPointResult};

const PROVIDERS_PATH: &str = "/api/v1/providers/custom";

/// Statuses that mark a local user inactive.
const INACTIVE_STATUSES: &[&str] = &["inactive", "disabled", "locked"];

/// List envelope used by the provider and data source endpoints.
#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct DataSource {
    id: String,
}

/// Error body returned by the API.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Vec<Value>,
}

/// HTTP client for the OAA custom provider endpoints.
#[derive(Debug)]
pub struct OaaClient {
    http_client: reqwest::Client,
    base_url: Url,
    config: OaaConfig,
}

impl OaaClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: OaaConfig) -> SailPointResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| SailPointError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: config.url.clone(),
            config,
        })
    }

    fn url(&self, path: &str) -> Result<Url, SinkError> {
        self.base_url
            .join(path)
            .map_err(|e| SinkError::new(None, format!("Invalid sink URL: {e}")))
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, SinkError> {
        let url = self.url(path)?;
        debug!(method = %method, url = %url, "Calling graph sink");

        let mut request = self
            .http_client
            .request(method, url)
            .bearer_auth(self.config.api_key.expose_secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SinkError::new(e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), &text));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| {
            SinkError::new(
                Some(status.as_u16()),
                format!("Malformed response from graph sink: {e}"),
            )
        })
    }

    async fn find_data_source(
        &self,
        provider_id: &str,
        name: &str,
    ) -> Result<Option<String>, SinkError> {
        let body = self
            .call(
                Method::GET,
                &format!("{PROVIDERS_PATH}/{provider_id}/datasources"),
                &[("filter", name_filter(name))],
                None,
            )
            .await?;
        let list: ListResponse<DataSource> = parse(body)?;
        Ok(list.values.into_iter().next().map(|ds| ds.id))
    }

    async fn create_data_source(&self, provider_id: &str, name: &str) -> Result<String, SinkError> {
        let body = self
            .call(
                Method::POST,
                &format!("{PROVIDERS_PATH}/{provider_id}/datasources"),
                &[],
                Some(&json!({ "id": provider_id, "name": name })),
            )
            .await?;
        let ds: DataSource = parse(unwrap_value(body))?;
        info!(data_source = name, "Created data source");
        Ok(ds.id)
    }
}

#[async_trait]
impl GraphSink for OaaClient {
    #[instrument(skip(self))]
    async fn get_provider(&self, name: &str) -> Result<Option<Provider>, SinkError> {
        let body = self
            .call(Method::GET, PROVIDERS_PATH, &[("filter", name_filter(name))], None)
            .await?;
        let list: ListResponse<Provider> = parse(body)?;
        Ok(list.values.into_iter().find(|p| p.name == name))
    }

    #[instrument(skip(self))]
    async fn create_provider(&self, name: &str, template: &str) -> Result<Provider, SinkError> {
        let body = self
            .call(
                Method::POST,
                PROVIDERS_PATH,
                &[],
                Some(&json!({ "name": name, "custom_template": template })),
            )
            .await?;
        parse(unwrap_value(body))
    }

    #[instrument(skip(self))]
    async fn delete_provider(&self, provider_id: &str) -> Result<(), SinkError> {
        self.call(
            Method::DELETE,
            &format!("{PROVIDERS_PATH}/{provider_id}"),
            &[],
            None,
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip(self, icon_base64))]
    async fn update_icon(&self, provider_id: &str, icon_base64: &str) -> Result<(), SinkError> {
        self.call(
            Method::POST,
            &format!("{PROVIDERS_PATH}/{provider_id}:icon"),
            &[],
            Some(&json!({ "icon_base64": icon_base64 })),
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip(self, graph), fields(identities = graph.identities.len()))]
    async fn push(
        &self,
        provider_name: &str,
        data_source_name: &str,
        graph: &ApplicationGraph,
    ) -> Result<PushResponse, SinkError> {
        let provider = self.get_provider(provider_name).await?.ok_or_else(|| {
            SinkError::new(Some(404), format!("Provider '{provider_name}' not found"))
        })?;

        let data_source_id = match self.find_data_source(&provider.id, data_source_name).await? {
            Some(id) => id,
            None => self.create_data_source(&provider.id, data_source_name).await?,
        };

        let payload = application_payload(graph);
        let json_data = serde_json::to_string(&payload)
            .map_err(|e| SinkError::new(None, format!("Failed to serialize graph: {e}")))?;

        let body = self
            .call(
                Method::POST,
                &format!(
                    "{PROVIDERS_PATH}/{}/datasources/{data_source_id}:push",
                    provider.id
                ),
                &[],
                Some(&json!({
                    "id": provider.id,
                    "data_source_id": data_source_id,
                    "json_data": json_data,
                })),
            )
            .await?;

        if body.is_null() {
            return Ok(PushResponse::default());
        }
        parse(body)
    }
}

fn name_filter(name: &str) -> String {
    format!("name eq \"{}\"", name.replace('"', "\\\""))
}

/// Some endpoints wrap the created object in `{"value": ...}`.
fn unwrap_value(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.get("value").is_some_and(Value::is_object) => {
            map.remove("value").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn parse<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, SinkError> {
    serde_json::from_value(body)
        .map_err(|e| SinkError::new(None, format!("Unexpected response from graph sink: {e}")))
}

/// Builds a [`SinkError`] from a non-2xx response, flattening detail entries
/// into one line each.
fn error_from_body(status: u16, text: &str) -> SinkError {
    let parsed: ErrorBody = serde_json::from_str(text).unwrap_or_default();
    let message = parsed
        .message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if text.trim().is_empty() {
                format!("Graph sink returned status {status}")
            } else {
                text.trim().to_string()
            }
        });

    let details = parsed.details.iter().flat_map(detail_lines).collect();
    SinkError::new(Some(status), message).with_details(details)
}

fn detail_lines(detail: &Value) -> Vec<String> {
    match detail {
        Value::String(s) => vec![s.clone()],
        Value::Object(map) => {
            if let Some(Value::Array(violations)) = map.get("field_violations") {
                return violations
                    .iter()
                    .map(|v| {
                        let field = v.get("field").and_then(Value::as_str).unwrap_or_default();
                        let description = v
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        if field.is_empty() {
                            description.to_string()
                        } else {
                            format!("{field}: {description}")
                        }
                    })
                    .collect();
            }
            for key in ["reason", "message", "description"] {
                if let Some(s) = map.get(key).and_then(Value::as_str) {
                    return vec![s.to_string()];
                }
            }
            vec![detail.to_string()]
        }
        Value::Null => Vec::new(),
        other => vec![other.to_string()],
    }
}

fn permission_type(kind: PermissionKind) -> &'static str {
    match kind {
        PermissionKind::DataRead => "DataRead",
        PermissionKind::DataWrite => "DataWrite",
        PermissionKind::MetadataRead => "MetadataRead",
        PermissionKind::MetadataWrite => "MetadataWrite",
    }
}

fn user_properties(identity: &Identity) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert("sailpoint_id".into(), json!(identity.unique_id));
    if let Some(email) = &identity.primary_email {
        props.insert("email".into(), json!(email));
    }
    if let Some(status) = &identity.status {
        props.insert("status".into(), json!(status));
    }
    for (name, value) in &identity.custom_attributes {
        props.insert(name.clone(), value.clone());
    }
    props
}

fn is_active(identity: &Identity) -> bool {
    identity.status.as_deref().map_or(true, |s| {
        !INACTIVE_STATUSES
            .iter()
            .any(|inactive| s.eq_ignore_ascii_case(inactive))
    })
}

/// Serializes the graph into the OAA custom application document.
#[must_use]
pub fn application_payload(graph: &ApplicationGraph) -> Value {
    let mut groups_by_identity: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for membership in &graph.memberships {
        groups_by_identity
            .entry(membership.identity_id.as_str())
            .or_default()
            .push(membership.group_id.as_str());
    }

    let local_users: Vec<Value> = graph
        .identities
        .iter()
        .map(|identity| {
            json!({
                "name": identity.name(),
                "unique_id": identity.unique_id,
                "identities": identity.primary_email.iter().collect::<Vec<_>>(),
                "groups": groups_by_identity
                    .get(identity.unique_id.as_str())
                    .map(Vec::as_slice)
                    .unwrap_or_default(),
                "is_active": is_active(identity),
                "created_at": identity.created_at,
                "last_login_at": identity.last_login_at,
                "custom_properties": user_properties(identity),
                "permissions": [],
            })
        })
        .collect();

    let local_groups: Vec<Value> = graph
        .groups
        .iter()
        .map(|group| {
            json!({
                "name": group.display_name,
                "unique_id": group.unique_id,
                "identities": [],
                "groups": [],
                "custom_properties": {},
            })
        })
        .collect();

    let permissions: Vec<Value> = graph
        .permissions
        .iter()
        .map(|p| {
            json!({
                "name": p.name,
                "permission_type": p.kinds.iter().map(|k| permission_type(*k)).collect::<Vec<_>>(),
                "apply_to_sub_resources": false,
                "resource_types": [],
            })
        })
        .collect();

    let mut grants_by_identity: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for grant in &graph.grants {
        grants_by_identity
            .entry(grant.identity_id.as_str())
            .or_default()
            .push(grant.permission.as_str());
    }
    let identity_to_permissions: Vec<Value> = grants_by_identity
        .into_iter()
        .map(|(identity, perms)| {
            json!({
                "identity": identity,
                "identity_type": "local_user",
                "application_permissions": perms
                    .into_iter()
                    .map(|p| json!({ "application": graph.name, "permission": p }))
                    .collect::<Vec<_>>(),
                "role_assignments": [],
            })
        })
        .collect();

    let user_property_types: Map<String, Value> = graph
        .property_definitions
        .iter()
        .map(|(name, ty)| (name.clone(), json!(ty)))
        .collect();

    json!({
        "custom_property_definition": {
            "applications": [{
                "application_type": graph.application_type,
                "application_properties": {},
                "local_user_properties": user_property_types,
                "local_group_properties": {},
                "local_role_properties": {},
                "role_properties": {},
                "resources": [],
            }],
        },
        "applications": [{
            "name": graph.name,
            "application_type": graph.application_type,
            "description": graph.description,
            "local_users": local_users,
            "local_groups": local_groups,
            "local_roles": [],
            "tags": [],
            "custom_properties": {},
            "resources": [],
        }],
        "permissions": permissions,
        "identity_to_permissions": identity_to_permissions,
    })
}
