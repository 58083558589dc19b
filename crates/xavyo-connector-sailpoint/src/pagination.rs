//! Offset pagination over SailPoint collection endpoints.

use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::client::RateLimitedHttpClient;
use crate::config::MAX_PAGE_SIZE;
use crate::transform::RawRecord;
use crate::{SailPointError, SailPointResult};

/// Records between two progress log lines.
const PROGRESS_INTERVAL: u64 = 1000;

/// Query of one paginated fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageQuery {
    /// Requested page size; clamped to 1..=250.
    pub limit: Option<u32>,
    /// Filter expression, e.g. `status eq "ACTIVE"`.
    pub filters: Option<String>,
    /// Sort expression, e.g. `name,-created`.
    pub sorters: Option<String>,
}

impl PageQuery {
    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: impl Into<String>) -> Self {
        self.filters = Some(filters.into());
        self
    }

    #[must_use]
    pub fn with_sorters(mut self, sorters: impl Into<String>) -> Self {
        self.sorters = Some(sorters.into());
        self
    }

    /// Effective page size.
    #[must_use]
    pub fn page_size(&self, default: u32) -> u32 {
        self.limit.unwrap_or(default).clamp(1, MAX_PAGE_SIZE)
    }
}

/// Starts paginated fetches through a shared client.
#[derive(Debug, Clone, Copy)]
pub struct PaginatedFetcher<'a> {
    client: &'a RateLimitedHttpClient,
}

impl<'a> PaginatedFetcher<'a> {
    #[must_use]
    pub fn new(client: &'a RateLimitedHttpClient) -> Self {
        Self { client }
    }

    /// Starts a fresh pass over `endpoint`. Nothing is requested until the
    /// returned pager is polled.
    #[must_use]
    pub fn fetch(&self, endpoint: &str, query: PageQuery) -> RecordPager<'a> {
        let page_size = query.page_size(self.client.config().page_size);
        RecordPager {
            client: self.client,
            endpoint: endpoint.to_string(),
            page_size,
            query,
            offset: 0,
            total: None,
            buffer: VecDeque::new(),
            pages: 0,
            yielded: 0,
            done: false,
        }
    }
}

/// Lazy, single-pass sequence of the records of one collection.
///
/// Pages are requested one at a time, in order, as the buffer runs dry.
/// The pass ends on an empty page, or once the advertised total is reached.
#[derive(Debug)]
pub struct RecordPager<'a> {
    client: &'a RateLimitedHttpClient,
    endpoint: String,
    query: PageQuery,
    page_size: u32,
    offset: u64,
    total: Option<u64>,
    buffer: VecDeque<RawRecord>,
    pages: u32,
    yielded: u64,
    done: bool,
}

impl RecordPager<'_> {
    /// Returns the next record, fetching the next page when needed.
    ///
    /// # Errors
    ///
    /// A failed page request ends the pass with
    /// [`SailPointError::Pagination`], carrying the offset that was reached.
    /// Records already returned stay valid.
    pub async fn try_next(&mut self) -> SailPointResult<Option<RawRecord>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                self.yielded += 1;
                if self.yielded % PROGRESS_INTERVAL == 0 {
                    info!(
                        endpoint = %self.endpoint,
                        fetched = self.yielded,
                        total = ?self.total,
                        "Fetch progress"
                    );
                }
                return Ok(Some(record));
            }
            if self.done {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    /// Drains the remaining records.
    pub async fn collect_all(mut self) -> SailPointResult<Vec<RawRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.try_next().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Pages requested so far.
    #[must_use]
    pub fn pages_fetched(&self) -> u32 {
        self.pages
    }

    /// Offset of the next page.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total advertised by the last page, if any.
    #[must_use]
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    async fn fetch_page(&mut self) -> SailPointResult<()> {
        let mut params = vec![
            ("limit", self.page_size.to_string()),
            ("offset", self.offset.to_string()),
            ("count", "true".to_string()),
        ];
        if let Some(filters) = &self.query.filters {
            params.push(("filters", filters.clone()));
        }
        if let Some(sorters) = &self.query.sorters {
            params.push(("sorters", sorters.clone()));
        }

        let response = match self.client.get(&self.endpoint, &params).await {
            Ok(response) => response,
            Err(err) => {
                self.done = true;
                return Err(SailPointError::Pagination {
                    offset: self.offset,
                    source: Box::new(err),
                });
            }
        };
        self.pages += 1;

        let items = match response.body {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                self.done = true;
                return Err(SailPointError::Pagination {
                    offset: self.offset,
                    source: Box::new(SailPointError::Api {
                        status_code: Some(response.status),
                        body: format!("expected a JSON array, got {}", kind_of(&other)),
                    }),
                });
            }
        };

        let returned = items.len() as u64;
        debug!(
            endpoint = %self.endpoint,
            offset = self.offset,
            returned,
            total = ?response.total_count,
            "Fetched page"
        );

        for item in items {
            match RawRecord::from_value(item) {
                Some(record) => self.buffer.push_back(record),
                None => warn!(endpoint = %self.endpoint, "Skipping non-object item in page"),
            }
        }

        self.offset += returned;
        self.total = response.total_count.filter(|t| *t > 0);

        if returned == 0 {
            self.done = true;
        } else if let Some(total) = self.total {
            if self.offset >= total {
                self.done = true;
            }
        }
        Ok(())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
