//! Common test utilities for xavyo-connector-sailpoint integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use xavyo_connector_sailpoint::{
    ApplicationGraph, GraphSink, Provider, PushResponse, RetryPolicy, SailPointConfig,
    SailPointCredentials, SinkError,
};

pub const TEST_TOKEN: &str = "test-access-token";
pub const IDENTITIES_PATH: &str = "/v3/public-identities";

/// Test data factory for SailPoint identities.
pub fn create_identity(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "email": format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
        "status": "active",
        "created": "2024-01-15T09:30:00Z",
        "lastLogin": 1_700_000_000_000_i64,
        "groups": []
    })
}

/// Test data factory for identities in the given groups.
pub fn create_identity_in_groups(id: &str, name: &str, groups: &[(&str, &str)]) -> Value {
    let mut identity = create_identity(id, name);
    identity["groups"] = json!(groups
        .iter()
        .map(|(gid, gname)| json!({"id": gid, "name": gname}))
        .collect::<Vec<_>>());
    identity
}

pub fn create_token_response() -> Value {
    json!({
        "access_token": TEST_TOKEN,
        "token_type": "bearer",
        "expires_in": 749
    })
}

/// Configuration pointing at the mock server, with fast retries and no
/// request spacing.
pub fn test_config(server: &MockServer) -> SailPointConfig {
    let base_url = Url::parse(&server.uri()).unwrap();
    let mut config =
        SailPointConfig::new(base_url, SailPointCredentials::new("client-id", "client-secret"))
            .with_retry(RetryPolicy::for_testing())
            .with_rate_limit(Duration::ZERO)
            .with_page_size(2);
    config.tenant = "acme".to_string();
    config
}

/// Mounts a successful token endpoint.
pub async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(header("scope", "sp:scope:all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(create_token_response()))
        .mount(server)
        .await;
}

/// Serves a fixed record set by `offset`/`limit`, recording the offsets asked.
pub struct OffsetResponder {
    pub records: Vec<Value>,
    pub total: Option<usize>,
    pub offsets: Arc<Mutex<Vec<u64>>>,
}

impl OffsetResponder {
    pub fn new(records: Vec<Value>, total: Option<usize>) -> Self {
        Self {
            records,
            total,
            offsets: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

fn query_u64(request: &Request, key: &str) -> Option<u64> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.parse().ok())
}

impl Respond for OffsetResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let offset = query_u64(request, "offset").unwrap_or(0);
        let limit = query_u64(request, "limit").unwrap_or(250);
        self.offsets.lock().unwrap().push(offset);

        let start = (offset as usize).min(self.records.len());
        let end = (start + limit as usize).min(self.records.len());
        let page = self.records[start..end].to_vec();

        let mut template = ResponseTemplate::new(200).set_body_json(Value::Array(page));
        if let Some(total) = self.total {
            template = template.insert_header("X-Total-Count", total.to_string().as_str());
        }
        template
    }
}

/// Serves prepared pages in order, then empty pages.
pub struct SequenceResponder {
    pub pages: Vec<ResponseTemplate>,
    pub calls: Arc<Mutex<Vec<u64>>>,
}

impl SequenceResponder {
    pub fn new(pages: Vec<ResponseTemplate>) -> Self {
        Self {
            pages,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Respond for SequenceResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut calls = self.calls.lock().unwrap();
        let idx = calls.len();
        calls.push(query_u64(request, "offset").unwrap_or(0));
        self.pages
            .get(idx)
            .cloned()
            .unwrap_or_else(|| ResponseTemplate::new(200).set_body_json(json!([])))
    }
}

/// Page response with an optional total header.
pub fn page(items: Vec<Value>, total: Option<u64>) -> ResponseTemplate {
    let template = ResponseTemplate::new(200).set_body_json(Value::Array(items));
    match total {
        Some(total) => template.insert_header("X-Total-Count", total.to_string().as_str()),
        None => template,
    }
}

/// A push the recording sink accepted.
#[derive(Debug, Clone)]
pub struct RecordedPush {
    pub provider_name: String,
    pub data_source_name: String,
    pub graph: ApplicationGraph,
}

#[derive(Debug, Default)]
struct SinkState {
    providers: Vec<Provider>,
    pushes: Vec<RecordedPush>,
    calls: Vec<String>,
    icons: Vec<String>,
    next_id: u32,
}

/// In-memory graph sink recording every call.
#[derive(Debug, Default)]
pub struct RecordingSink {
    state: Mutex<SinkState>,
    pub push_error: Option<SinkError>,
    pub icon_error: Option<SinkError>,
    pub warnings: Vec<String>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(self, id: &str, name: &str) -> Self {
        self.state.lock().unwrap().providers.push(Provider {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn with_push_error(mut self, err: SinkError) -> Self {
        self.push_error = Some(err);
        self
    }

    pub fn with_icon_error(mut self, err: SinkError) -> Self {
        self.icon_error = Some(err);
        self
    }

    pub fn with_warnings(mut self, warnings: &[&str]) -> Self {
        self.warnings = warnings.iter().map(|w| w.to_string()).collect();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn pushes(&self) -> Vec<RecordedPush> {
        self.state.lock().unwrap().pushes.clone()
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.state.lock().unwrap().providers.clone()
    }

    pub fn icons(&self) -> Vec<String> {
        self.state.lock().unwrap().icons.clone()
    }
}

#[async_trait]
impl GraphSink for RecordingSink {
    async fn get_provider(&self, name: &str) -> Result<Option<Provider>, SinkError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("get_provider:{name}"));
        Ok(state.providers.iter().find(|p| p.name == name).cloned())
    }

    async fn create_provider(&self, name: &str, template: &str) -> Result<Provider, SinkError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_provider:{name}:{template}"));
        state.next_id += 1;
        let provider = Provider {
            id: format!("provider-{}", state.next_id),
            name: name.to_string(),
        };
        state.providers.push(provider.clone());
        Ok(provider)
    }

    async fn delete_provider(&self, provider_id: &str) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_provider:{provider_id}"));
        state.providers.retain(|p| p.id != provider_id);
        Ok(())
    }

    async fn update_icon(&self, provider_id: &str, icon_base64: &str) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("update_icon:{provider_id}"));
        if let Some(err) = &self.icon_error {
            return Err(err.clone());
        }
        state.icons.push(icon_base64.to_string());
        Ok(())
    }

    async fn push(
        &self,
        provider_name: &str,
        data_source_name: &str,
        graph: &ApplicationGraph,
    ) -> Result<PushResponse, SinkError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("push:{provider_name}:{data_source_name}"));
        if let Some(err) = &self.push_error {
            return Err(err.clone());
        }
        state.pushes.push(RecordedPush {
            provider_name: provider_name.to_string(),
            data_source_name: data_source_name.to_string(),
            graph: graph.clone(),
        });
        Ok(PushResponse {
            warnings: self.warnings.clone(),
        })
    }
}
