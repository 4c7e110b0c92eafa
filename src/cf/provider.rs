//! Provider interface
//!
//! The paged list/get/create/update/delete surface the aggregation layer
//! consumes. [`CfClient`](super::client::CfClient) implements it over HTTP;
//! tests implement it in memory.

use crate::error::{CfError, CfResult};
use async_trait::async_trait;
use serde_json::Value;

/// Cloud Controller API generation a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    V2,
    V3,
}

/// A list query: resource path plus filters, independent of paging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub version: ApiVersion,
    pub path: String,
    pub filters: Vec<(String, String)>,
}

impl ListQuery {
    pub fn v2(path: &str) -> Self {
        Self {
            version: ApiVersion::V2,
            path: path.to_string(),
            filters: Vec::new(),
        }
    }

    pub fn v3(path: &str) -> Self {
        Self {
            version: ApiVersion::V3,
            path: path.to_string(),
            filters: Vec::new(),
        }
    }

    /// Add a filter parameter.
    ///
    /// V3 filters are plain query params (`names=foo`). V2 filters are
    /// encoded as `q=key:value`.
    pub fn filter(mut self, key: &str, value: &str) -> Self {
        match self.version {
            ApiVersion::V3 => self.filters.push((key.to_string(), value.to_string())),
            ApiVersion::V2 => self
                .filters
                .push(("q".to_string(), format!("{}:{}", key, value))),
        }
        self
    }

    /// Add a filter only when a value is present.
    pub fn filter_opt(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.filter(key, value),
            None => self,
        }
    }
}

/// One page of raw records.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub resources: Vec<RawRecord>,
    /// Total page count when the provider reports it.
    pub total_pages: Option<u32>,
    /// End-of-data flag for providers that only link the next page.
    pub has_next: bool,
}

impl Page {
    /// Whether another page follows `current` (1-indexed).
    pub fn has_more(&self, current: u32) -> bool {
        match self.total_pages {
            Some(total) => current < total,
            None => self.has_next,
        }
    }
}

/// An unmodified Cloud Controller resource.
///
/// V2 resources arrive as `{metadata: {...}, entity: {...}}`, V3 resources
/// are flat. Both are normalized so the identity fields sit on the record
/// and everything else stays in `entity`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub guid: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub entity: Value,
}

impl RawRecord {
    /// Normalize a raw resource according to its API version.
    pub fn from_value(version: ApiVersion, value: Value) -> Self {
        match version {
            ApiVersion::V2 => Self::from_v2(value),
            ApiVersion::V3 => Self::from_v3(value),
        }
    }

    pub fn from_v2(value: Value) -> Self {
        let metadata = value.get("metadata");
        let field = |name: &str| {
            metadata
                .and_then(|m| m.get(name))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        Self {
            guid: field("guid"),
            created_at: field("created_at"),
            updated_at: field("updated_at"),
            entity: value.get("entity").cloned().unwrap_or(Value::Null),
        }
    }

    pub fn from_v3(value: Value) -> Self {
        let field = |name: &str| value.get(name).and_then(|v| v.as_str()).map(str::to_string);
        Self {
            guid: field("guid"),
            created_at: field("created_at"),
            updated_at: field("updated_at"),
            entity: value,
        }
    }

    /// Look up a value by dot-separated path inside the entity.
    pub fn field(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.entity, |current, part| match part.parse::<usize>() {
                Ok(idx) => current.get(idx),
                Err(_) => current.get(part),
            })
            .filter(|v| !v.is_null())
    }

    pub fn str_field(&self, path: &str) -> Option<&str> {
        self.field(path).and_then(|v| v.as_str())
    }

    pub fn u64_field(&self, path: &str) -> Option<u64> {
        self.field(path).and_then(|v| v.as_u64())
    }

    pub fn bool_field(&self, path: &str) -> Option<bool> {
        self.field(path).and_then(|v| v.as_bool())
    }

    /// String array at `path`; absent or non-string entries are skipped.
    pub fn str_list(&self, path: &str) -> Vec<String> {
        self.field(path)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// GUID of a V3 to-one relationship (`relationships.<name>.data.guid`).
    pub fn relationship_guid(&self, name: &str) -> Option<&str> {
        self.str_field(&format!("relationships.{}.data.guid", name))
    }

    /// GUID of the record, or an error naming `kind` when absent.
    pub fn require_guid(&self, kind: &'static str) -> CfResult<&str> {
        self.guid.as_deref().ok_or_else(|| CfError::MalformedRecord {
            kind,
            reason: "missing guid".to_string(),
        })
    }
}

/// Paged read access plus writes against the Cloud Controller.
///
/// All write operations complete before returning.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Fetch one page (1-indexed) of a list query.
    async fn list_page(&self, query: &ListQuery, page: u32) -> CfResult<Page>;

    /// Fetch a single resource by path, e.g. `/v3/apps/<guid>`.
    async fn get(&self, version: ApiVersion, path: &str) -> CfResult<RawRecord>;

    async fn create(&self, version: ApiVersion, path: &str, body: &Value) -> CfResult<RawRecord>;

    async fn update(&self, version: ApiVersion, path: &str, patch: &Value) -> CfResult<RawRecord>;

    async fn delete(&self, version: ApiVersion, path: &str) -> CfResult<()>;
}
