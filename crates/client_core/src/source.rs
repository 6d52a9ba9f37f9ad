//! Collaborator contracts of the list controller.

use std::{fmt::Debug, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{AccessKeyId, DynamicAccessKeyId},
    protocol::{AccessKeySummary, DynamicAccessKeySummary, ListFilter, NewAccessKey},
};

/// A listable entity with a stable identity.
pub trait Record: Clone + Send + Sync + 'static {
    type Key: Clone + Eq + Debug + Send + Sync;

    fn key(&self) -> Self::Key;
}

impl Record for DynamicAccessKeySummary {
    type Key = DynamicAccessKeyId;

    fn key(&self) -> DynamicAccessKeyId {
        self.id
    }
}

/// Answers one page and the matching total for a filter. Implementations
/// must order rows by a stable key and apply the same filter to both calls.
#[async_trait]
pub trait DataSource: Send + Sync {
    type Record: Record;

    async fn list(&self, filter: &ListFilter, offset: u64, limit: u32)
        -> Result<Vec<Self::Record>>;

    async fn count(&self, filter: &ListFilter) -> Result<u64>;
}

pub type RecordKey<S> = <<S as DataSource>::Record as Record>::Key;

#[async_trait]
pub trait MutationSink: DataSource {
    type Draft: Send + Sync;

    async fn create(&self, draft: &Self::Draft) -> Result<Self::Record>;

    async fn update(&self, key: &RecordKey<Self>, draft: &Self::Draft) -> Result<Self::Record>;

    async fn remove(&self, key: &RecordKey<Self>) -> Result<()>;
}

/// Access keys attached to dynamic access keys.
#[async_trait]
pub trait AccessKeyLinks: Send + Sync {
    async fn attached_access_keys(&self, owner: DynamicAccessKeyId)
        -> Result<Vec<AccessKeySummary>>;

    async fn unattached_access_keys(&self) -> Result<Vec<AccessKeySummary>>;

    async fn create_access_key(&self, new_key: &NewAccessKey) -> Result<AccessKeySummary>;

    async fn attach_access_key(
        &self,
        owner: DynamicAccessKeyId,
        id: AccessKeyId,
    ) -> Result<AccessKeySummary>;

    async fn detach_access_key(&self, owner: DynamicAccessKeyId, id: AccessKeyId) -> Result<()>;
}

#[async_trait]
impl<T> DataSource for Arc<T>
where
    T: DataSource + ?Sized,
{
    type Record = T::Record;

    async fn list(
        &self,
        filter: &ListFilter,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<Self::Record>> {
        (**self).list(filter, offset, limit).await
    }

    async fn count(&self, filter: &ListFilter) -> Result<u64> {
        (**self).count(filter).await
    }
}

#[async_trait]
impl<T> MutationSink for Arc<T>
where
    T: MutationSink + ?Sized,
{
    type Draft = T::Draft;

    async fn create(&self, draft: &Self::Draft) -> Result<Self::Record> {
        (**self).create(draft).await
    }

    async fn update(&self, key: &RecordKey<Self>, draft: &Self::Draft) -> Result<Self::Record> {
        (**self).update(key, draft).await
    }

    async fn remove(&self, key: &RecordKey<Self>) -> Result<()> {
        (**self).remove(key).await
    }
}
