use anyhow::Result;
use async_trait::async_trait;
use server_api::{ApiContext, PageLimits};
use shared::{
    domain::{AccessKeyId, DynamicAccessKeyId},
    error::{ApiError, ApiException},
    protocol::{
        AccessKeySummary, CountDynamicAccessKeysQuery, DynamicAccessKeyDraft,
        DynamicAccessKeySummary, ListDynamicAccessKeysQuery, ListFilter, NewAccessKey,
    },
};
use storage::Storage;

use crate::source::{AccessKeyLinks, DataSource, MutationSink};

/// Data source that runs the server's API operations against a local
/// database, for tools that open the SQLite file directly.
#[derive(Clone)]
pub struct InProcessDataSource {
    ctx: ApiContext,
}

impl InProcessDataSource {
    pub fn new(storage: Storage, page_size: u32) -> Self {
        let limits = PageLimits {
            page_size,
            max_page_size: PageLimits::default().max_page_size.max(page_size),
        };
        Self {
            ctx: ApiContext { storage, limits },
        }
    }

    pub async fn get(&self, id: DynamicAccessKeyId) -> Result<DynamicAccessKeySummary> {
        server_api::get_dynamic_access_key(&self.ctx, id)
            .await
            .map_err(api_failure)
    }
}

#[async_trait]
impl DataSource for InProcessDataSource {
    type Record = DynamicAccessKeySummary;

    async fn list(
        &self,
        filter: &ListFilter,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<DynamicAccessKeySummary>> {
        let query = ListDynamicAccessKeysQuery {
            term: filter.term.clone(),
            skip: offset,
            limit: Some(limit),
        };
        server_api::list_dynamic_access_keys(&self.ctx, &query)
            .await
            .map_err(api_failure)
    }

    async fn count(&self, filter: &ListFilter) -> Result<u64> {
        let query = CountDynamicAccessKeysQuery {
            term: filter.term.clone(),
        };
        let count = server_api::count_dynamic_access_keys(&self.ctx, &query)
            .await
            .map_err(api_failure)?;
        Ok(count.count)
    }
}

#[async_trait]
impl MutationSink for InProcessDataSource {
    type Draft = DynamicAccessKeyDraft;

    async fn create(&self, draft: &DynamicAccessKeyDraft) -> Result<DynamicAccessKeySummary> {
        server_api::create_dynamic_access_key(&self.ctx, draft.clone())
            .await
            .map_err(api_failure)
    }

    async fn update(
        &self,
        id: &DynamicAccessKeyId,
        draft: &DynamicAccessKeyDraft,
    ) -> Result<DynamicAccessKeySummary> {
        server_api::update_dynamic_access_key(&self.ctx, *id, draft.clone())
            .await
            .map_err(api_failure)
    }

    async fn remove(&self, id: &DynamicAccessKeyId) -> Result<()> {
        server_api::remove_dynamic_access_key(&self.ctx, *id)
            .await
            .map_err(api_failure)
    }
}

#[async_trait]
impl AccessKeyLinks for InProcessDataSource {
    async fn attached_access_keys(
        &self,
        owner: DynamicAccessKeyId,
    ) -> Result<Vec<AccessKeySummary>> {
        server_api::list_attached_access_keys(&self.ctx, owner)
            .await
            .map_err(api_failure)
    }

    async fn unattached_access_keys(&self) -> Result<Vec<AccessKeySummary>> {
        server_api::list_unattached_access_keys(&self.ctx)
            .await
            .map_err(api_failure)
    }

    async fn create_access_key(&self, new_key: &NewAccessKey) -> Result<AccessKeySummary> {
        server_api::create_access_key(&self.ctx, new_key.clone())
            .await
            .map_err(api_failure)
    }

    async fn attach_access_key(
        &self,
        owner: DynamicAccessKeyId,
        id: AccessKeyId,
    ) -> Result<AccessKeySummary> {
        server_api::attach_access_key(&self.ctx, owner, id)
            .await
            .map_err(api_failure)
    }

    async fn detach_access_key(&self, owner: DynamicAccessKeyId, id: AccessKeyId) -> Result<()> {
        server_api::detach_access_key(&self.ctx, owner, id)
            .await
            .map_err(api_failure)
    }
}

fn api_failure(err: ApiError) -> anyhow::Error {
    ApiException::from(err).into()
}

#[cfg(test)]
#[path = "tests/in_process_tests.rs"]
mod tests;
