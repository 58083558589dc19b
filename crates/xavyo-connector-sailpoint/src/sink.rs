//! Destination of the finished graph.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::graph::ApplicationGraph;

/// Provider template used for custom applications.
pub const APPLICATION_TEMPLATE: &str = "application";

/// A provider registered on the graph sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
}

/// Successful push result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Structured failure reported by the graph sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkError {
    /// HTTP status, `None` when no response was received.
    pub status_code: Option<u16>,
    pub message: String,
    pub details: Vec<String>,
}

impl SinkError {
    pub fn new(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status_code {
            write!(f, "[{status}] ")?;
        }
        f.write_str(&self.message)?;
        if !self.details.is_empty() {
            write!(f, " ({})", self.details.join("; "))?;
        }
        Ok(())
    }
}

impl std::error::Error for SinkError {}

/// Operations the sync engine needs from the graph sink.
#[async_trait]
pub trait GraphSink: Send + Sync {
    /// Looks a provider up by name.
    async fn get_provider(&self, name: &str) -> Result<Option<Provider>, SinkError>;

    /// Creates a provider from a template.
    async fn create_provider(&self, name: &str, template: &str) -> Result<Provider, SinkError>;

    /// Deletes a provider and its data sources.
    async fn delete_provider(&self, provider_id: &str) -> Result<(), SinkError>;

    /// Attaches a base64 encoded icon to a provider.
    async fn update_icon(&self, provider_id: &str, icon_base64: &str) -> Result<(), SinkError>;

    /// Pushes the graph as the full content of a data source.
    async fn push(
        &self,
        provider_name: &str,
        data_source_name: &str,
        graph: &ApplicationGraph,
    ) -> Result<PushResponse, SinkError>;
}

/// Sink that accepts every call and keeps nothing. Used for dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

#[async_trait]
impl GraphSink for DiscardSink {
    async fn get_provider(&self, _name: &str) -> Result<Option<Provider>, SinkError> {
        Ok(None)
    }

    async fn create_provider(&self, name: &str, _template: &str) -> Result<Provider, SinkError> {
        Ok(Provider {
            id: String::new(),
            name: name.to_string(),
        })
    }

    async fn delete_provider(&self, _provider_id: &str) -> Result<(), SinkError> {
        Ok(())
    }

    async fn update_icon(&self, _provider_id: &str, _icon_base64: &str) -> Result<(), SinkError> {
        Ok(())
    }

    async fn push(
        &self,
        _provider_name: &str,
        _data_source_name: &str,
        _graph: &ApplicationGraph,
    ) -> Result<PushResponse, SinkError> {
        Ok(PushResponse::default())
    }
}
