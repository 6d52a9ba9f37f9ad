use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AccessKeyId, AccessKeyValidity, DynamicAccessKeyId, LoadBalancerAlgorithm};

/// Filter shared by the list and count requests of one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilter {
    #[serde(default)]
    pub term: String,
}

impl ListFilter {
    pub fn new(term: impl Into<String>) -> Self {
        Self { term: term.into() }
    }

    /// The trimmed term, or `None` when the filter matches everything.
    pub fn normalized_term(&self) -> Option<&str> {
        let term = self.term.trim();
        (!term.is_empty()).then_some(term)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListDynamicAccessKeysQuery {
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub skip: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountDynamicAccessKeysQuery {
    #[serde(default)]
    pub term: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicAccessKeySummary {
    pub id: DynamicAccessKeyId,
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub load_balancer_algorithm: LoadBalancerAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub access_keys_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DynamicAccessKeySummary {
    pub fn validity(&self, now: DateTime<Utc>) -> AccessKeyValidity {
        AccessKeyValidity::at(self.expires_at, now)
    }
}

/// Body of create and update requests. A missing `path` on create gets a
/// generated one; on update it keeps the stored path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicAccessKeyDraft {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default)]
    pub load_balancer_algorithm: LoadBalancerAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl DynamicAccessKeyDraft {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKeySummary {
    pub id: AccessKeyId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_access_key_id: Option<DynamicAccessKeyId>,
    pub created_at: DateTime<Utc>,
}

/// Body of an access key create request; `dynamic_access_key_id` attaches
/// the new key straight away.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccessKey {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_access_key_id: Option<DynamicAccessKeyId>,
}
