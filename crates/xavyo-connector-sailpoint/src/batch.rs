//! Folding batches of raw records into the graph with per-record isolation.

use tracing::{debug, error, info, warn};

use crate::graph::{GraphBuilder, GraphError, Identity, PermissionKind};
use crate::transform::{RawRecord, RecordTransformer, ValidationError};

/// Permission granted to identities that have an email address.
pub const ACCESS_PERMISSION: &str = "access";

/// Permission granted by the title heuristic.
pub const ADMIN_PERMISSION: &str = "admin";

/// Custom property holding the job title.
pub const TITLE_PROPERTY: &str = "custom_title";

/// Rules deriving permission grants from identity attributes.
#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    /// Granted when the identity has an email. `None` disables it.
    pub email_permission: Option<String>,
    /// Case-insensitive keyword searched in the title property. `None`
    /// disables the heuristic.
    pub admin_title_keyword: Option<String>,
    pub admin_permission: String,
    pub title_property: String,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            email_permission: Some(ACCESS_PERMISSION.to_string()),
            admin_title_keyword: None,
            admin_permission: ADMIN_PERMISSION.to_string(),
            title_property: TITLE_PROPERTY.to_string(),
        }
    }
}

impl PermissionPolicy {
    /// Enables the admin title heuristic.
    #[must_use]
    pub fn with_admin_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.admin_title_keyword = Some(keyword.into());
        self
    }

    /// Declares the permissions this policy can grant.
    pub fn define_permissions(&self, graph: &mut GraphBuilder) {
        if let Some(name) = &self.email_permission {
            graph.define_permission(
                name.clone(),
                &[PermissionKind::DataRead, PermissionKind::DataWrite],
            );
        }
        if self.admin_title_keyword.is_some() {
            graph.define_permission(
                self.admin_permission.clone(),
                &[
                    PermissionKind::DataRead,
                    PermissionKind::DataWrite,
                    PermissionKind::MetadataRead,
                    PermissionKind::MetadataWrite,
                ],
            );
        }
    }

    /// Permissions an identity should hold, derived from its own attributes.
    #[must_use]
    pub fn derive(&self, identity: &Identity) -> Vec<String> {
        let mut permissions = Vec::new();

        if let Some(name) = &self.email_permission {
            if identity.primary_email.is_some() {
                permissions.push(name.clone());
            }
        }

        if let Some(keyword) = &self.admin_title_keyword {
            let is_admin = identity
                .custom_attributes
                .get(&self.title_property)
                .and_then(|v| v.as_str())
                .is_some_and(|title| {
                    title
                        .to_ascii_lowercase()
                        .contains(&keyword.to_ascii_lowercase())
                });
            if is_admin {
                permissions.push(self.admin_permission.clone());
            }
        }

        permissions
    }
}

/// Why one record did not make it into the graph intact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("upsert failed: {0}")]
    Upsert(GraphError),

    #[error("permission grant failed: {0}")]
    Permission(GraphError),
}

/// A failed record within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    /// Position of the record in its batch.
    pub index: usize,
    pub unique_id: Option<String>,
    pub error: RecordError,
}

/// Counts of one processed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Records whose identity reached the graph.
    pub processed: usize,
    /// Record-level failures, including failed grants.
    pub errors: usize,
    pub failures: Vec<RecordFailure>,
}

impl BatchOutcome {
    /// Adds another outcome's counts to this one.
    pub fn merge(&mut self, other: BatchOutcome) {
        self.processed += other.processed;
        self.errors += other.errors;
        self.failures.extend(other.failures);
    }
}

/// Transforms and upserts records one by one; a failing record never stops
/// the batch.
#[derive(Debug, Clone, Default)]
pub struct BatchProcessor {
    transformer: RecordTransformer,
    policy: PermissionPolicy,
}

impl BatchProcessor {
    #[must_use]
    pub fn new(transformer: RecordTransformer, policy: PermissionPolicy) -> Self {
        Self {
            transformer,
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    /// Folds a batch into `graph`.
    ///
    /// An identity counts as processed once it is upserted. A failed grant
    /// afterwards is counted as an error but leaves the identity in place.
    pub fn process(&self, batch: &[RawRecord], graph: &mut GraphBuilder) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for (index, record) in batch.iter().enumerate() {
            match self.process_record(record, graph) {
                Ok(grant_failures) => {
                    outcome.processed += 1;
                    for (unique_id, err) in grant_failures {
                        warn!(identity_id = %unique_id, error = %err, "Permission grant failed");
                        outcome.errors += 1;
                        outcome.failures.push(RecordFailure {
                            index,
                            unique_id: Some(unique_id),
                            error: err,
                        });
                    }
                }
                Err(err) => {
                    let unique_id = record.get_str("id").map(str::to_string);
                    error!(index, identity_id = ?unique_id, error = %err, "Invalid identity record");
                    outcome.errors += 1;
                    outcome.failures.push(RecordFailure {
                        index,
                        unique_id,
                        error: err,
                    });
                }
            }
        }

        info!(
            processed = outcome.processed,
            errors = outcome.errors,
            "Processed batch"
        );
        if outcome.errors > 0 {
            warn!(errors = outcome.errors, "Batch had record errors");
        }
        outcome
    }

    fn process_record(
        &self,
        record: &RawRecord,
        graph: &mut GraphBuilder,
    ) -> Result<Vec<(String, RecordError)>, RecordError> {
        let identity = self.transformer.transform(record)?;
        let permissions = self.policy.derive(&identity);
        let unique_id = identity.unique_id.clone();

        graph.upsert_identity(identity).map_err(RecordError::Upsert)?;
        debug!(identity_id = %unique_id, "Upserted identity");

        let mut failures = Vec::new();
        for permission in permissions {
            if let Err(err) = graph.grant(&unique_id, &permission) {
                failures.push((unique_id.clone(), RecordError::Permission(err)));
            }
        }
        Ok(failures)
    }
}
