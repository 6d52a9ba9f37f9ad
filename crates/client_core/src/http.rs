use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use shared::{
    domain::{AccessKeyId, DynamicAccessKeyId},
    error::{ApiError, ApiException, ErrorCode},
    protocol::{
        AccessKeySummary, CountDynamicAccessKeysQuery, CountResponse, DynamicAccessKeyDraft,
        DynamicAccessKeySummary, ListDynamicAccessKeysQuery, ListFilter, NewAccessKey,
    },
};
use url::Url;

use crate::source::{AccessKeyLinks, DataSource, MutationSink};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Data source backed by the dashboard server's HTTP API.
#[derive(Clone)]
pub struct HttpDataSource {
    http: Client,
    base_url: Url,
}

impl HttpDataSource {
    pub fn new(server_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Self::with_client(http, server_url)
    }

    pub fn with_client(http: Client, server_url: &str) -> Result<Self> {
        let mut base_url =
            Url::parse(server_url).with_context(|| format!("invalid server url '{server_url}'"))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid endpoint path '{path}'"))
    }

    pub async fn get(&self, id: DynamicAccessKeyId) -> Result<DynamicAccessKeySummary> {
        let response = self
            .http
            .get(self.endpoint(&format!("dynamic-access-keys/{id}"))?)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    type Record = DynamicAccessKeySummary;

    async fn list(
        &self,
        filter: &ListFilter,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<DynamicAccessKeySummary>> {
        let response = self
            .http
            .get(self.endpoint("dynamic-access-keys")?)
            .query(&ListDynamicAccessKeysQuery {
                term: filter.term.clone(),
                skip: offset,
                limit: Some(limit),
            })
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn count(&self, filter: &ListFilter) -> Result<u64> {
        let response = self
            .http
            .get(self.endpoint("dynamic-access-keys/count")?)
            .query(&CountDynamicAccessKeysQuery {
                term: filter.term.clone(),
            })
            .send()
            .await?;
        let count: CountResponse = check_status(response).await?.json().await?;
        Ok(count.count)
    }
}

#[async_trait]
impl MutationSink for HttpDataSource {
    type Draft = DynamicAccessKeyDraft;

    async fn create(&self, draft: &DynamicAccessKeyDraft) -> Result<DynamicAccessKeySummary> {
        let response = self
            .http
            .post(self.endpoint("dynamic-access-keys")?)
            .json(draft)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn update(
        &self,
        id: &DynamicAccessKeyId,
        draft: &DynamicAccessKeyDraft,
    ) -> Result<DynamicAccessKeySummary> {
        let response = self
            .http
            .put(self.endpoint(&format!("dynamic-access-keys/{id}"))?)
            .json(draft)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn remove(&self, id: &DynamicAccessKeyId) -> Result<()> {
        let response = self
            .http
            .delete(self.endpoint(&format!("dynamic-access-keys/{id}"))?)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl AccessKeyLinks for HttpDataSource {
    async fn attached_access_keys(
        &self,
        owner: DynamicAccessKeyId,
    ) -> Result<Vec<AccessKeySummary>> {
        let response = self
            .http
            .get(self.endpoint(&format!("dynamic-access-keys/{owner}/access-keys"))?)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn unattached_access_keys(&self) -> Result<Vec<AccessKeySummary>> {
        let response = self
            .http
            .get(self.endpoint("access-keys/unattached")?)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn create_access_key(&self, new_key: &NewAccessKey) -> Result<AccessKeySummary> {
        let response = self
            .http
            .post(self.endpoint("access-keys")?)
            .json(new_key)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn attach_access_key(
        &self,
        owner: DynamicAccessKeyId,
        id: AccessKeyId,
    ) -> Result<AccessKeySummary> {
        let response = self
            .http
            .put(self.endpoint(&format!("dynamic-access-keys/{owner}/access-keys/{id}"))?)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn detach_access_key(&self, owner: DynamicAccessKeyId, id: AccessKeyId) -> Result<()> {
        let response = self
            .http
            .delete(self.endpoint(&format!("dynamic-access-keys/{owner}/access-keys/{id}"))?)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

/// Turns a non-success response into an [`ApiException`], keeping the
/// server's error body when it sent one.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().clone();
    let api_error = match response.json::<ApiError>().await {
        Ok(api_error) => api_error,
        Err(_) => ApiError::new(
            if status == reqwest::StatusCode::NOT_FOUND {
                ErrorCode::NotFound
            } else {
                ErrorCode::Internal
            },
            format!("unexpected status {status}"),
        ),
    };
    Err(anyhow!(ApiException::from(api_error)).context(format!("{status} from {url}")))
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
