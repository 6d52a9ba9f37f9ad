use shared::{
    domain::{
        is_valid_path, new_dynamic_access_key_path, AccessKeyId, DynamicAccessKeyId,
        MAX_NAME_CHARS, MAX_PREFIX_CHARS,
    },
    error::{ApiError, ErrorCode},
    pagination::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE},
    protocol::{
        AccessKeySummary, CountDynamicAccessKeysQuery, CountResponse, DynamicAccessKeyDraft,
        DynamicAccessKeySummary, ListDynamicAccessKeysQuery, ListFilter, NewAccessKey,
    },
};
use storage::{DynamicAccessKeyFields, Storage, StoredAccessKey, StoredDynamicAccessKey};
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub limits: PageLimits,
}

/// Page size applied when a list request names no limit, and the ceiling
/// for requests that do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub page_size: u32,
    pub max_page_size: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl PageLimits {
    pub fn effective_limit(&self, requested: Option<u32>) -> u32 {
        let max = self.max_page_size.max(1);
        requested.unwrap_or(self.page_size).clamp(1, max)
    }
}

pub async fn list_dynamic_access_keys(
    ctx: &ApiContext,
    query: &ListDynamicAccessKeysQuery,
) -> Result<Vec<DynamicAccessKeySummary>, ApiError> {
    let filter = ListFilter::new(query.term.as_str());
    let limit = ctx.limits.effective_limit(query.limit);
    let keys = ctx
        .storage
        .list_dynamic_access_keys(filter.normalized_term(), query.skip, limit)
        .await
        .map_err(internal)?;
    Ok(keys.into_iter().map(summary).collect())
}

pub async fn count_dynamic_access_keys(
    ctx: &ApiContext,
    query: &CountDynamicAccessKeysQuery,
) -> Result<CountResponse, ApiError> {
    let filter = ListFilter::new(query.term.as_str());
    let count = ctx
        .storage
        .count_dynamic_access_keys(filter.normalized_term())
        .await
        .map_err(internal)?;
    Ok(CountResponse { count })
}

pub async fn get_dynamic_access_key(
    ctx: &ApiContext,
    id: DynamicAccessKeyId,
) -> Result<DynamicAccessKeySummary, ApiError> {
    ctx.storage
        .get_dynamic_access_key(id)
        .await
        .map_err(internal)?
        .map(summary)
        .ok_or_else(|| not_found(id))
}

pub async fn create_dynamic_access_key(
    ctx: &ApiContext,
    draft: DynamicAccessKeyDraft,
) -> Result<DynamicAccessKeySummary, ApiError> {
    let path = draft.path.clone().unwrap_or_else(new_dynamic_access_key_path);
    let fields = validate_draft(draft, path)?;
    ensure_path_available(ctx, &fields.path, None).await?;

    let id = ctx
        .storage
        .create_dynamic_access_key(&fields)
        .await
        .map_err(|err| write_failure(err, &fields.path))?;
    info!(%id, name = %fields.name, "dynamic access key created");
    get_dynamic_access_key(ctx, id).await
}

pub async fn update_dynamic_access_key(
    ctx: &ApiContext,
    id: DynamicAccessKeyId,
    draft: DynamicAccessKeyDraft,
) -> Result<DynamicAccessKeySummary, ApiError> {
    let existing = ctx
        .storage
        .get_dynamic_access_key(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(id))?;
    let path = draft.path.clone().unwrap_or(existing.path);
    let fields = validate_draft(draft, path)?;
    ensure_path_available(ctx, &fields.path, Some(id)).await?;

    let updated = ctx
        .storage
        .update_dynamic_access_key(id, &fields)
        .await
        .map_err(|err| write_failure(err, &fields.path))?;
    if !updated {
        return Err(not_found(id));
    }
    info!(%id, "dynamic access key updated");
    get_dynamic_access_key(ctx, id).await
}

pub async fn remove_dynamic_access_key(
    ctx: &ApiContext,
    id: DynamicAccessKeyId,
) -> Result<(), ApiError> {
    let removed = ctx
        .storage
        .remove_dynamic_access_key(id)
        .await
        .map_err(internal)?;
    if !removed {
        return Err(not_found(id));
    }
    info!(%id, "dynamic access key removed");
    Ok(())
}

fn validate_name(raw: &str) -> Result<String, ApiError> {
    let name = raw.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::validation("name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(ApiError::validation(format!(
            "name must be at most {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(name)
}

fn validate_draft(draft: DynamicAccessKeyDraft, path: String) -> Result<DynamicAccessKeyFields, ApiError> {
    let name = validate_name(&draft.name)?;

    let path = path.trim().to_string();
    if !is_valid_path(&path) {
        return Err(ApiError::validation(
            "path must be 1-64 characters of letters, digits, '-' or '_'",
        ));
    }

    let prefix = draft
        .prefix
        .map(|prefix| prefix.trim().to_string())
        .filter(|prefix| !prefix.is_empty());
    if prefix
        .as_ref()
        .is_some_and(|prefix| prefix.chars().count() > MAX_PREFIX_CHARS)
    {
        return Err(ApiError::validation(format!(
            "prefix must be at most {MAX_PREFIX_CHARS} characters"
        )));
    }

    Ok(DynamicAccessKeyFields {
        name,
        path,
        prefix,
        load_balancer_algorithm: draft.load_balancer_algorithm,
        expires_at: draft.expires_at,
    })
}

async fn ensure_path_available(
    ctx: &ApiContext,
    path: &str,
    owner: Option<DynamicAccessKeyId>,
) -> Result<(), ApiError> {
    let existing = ctx
        .storage
        .find_dynamic_access_key_by_path(path)
        .await
        .map_err(internal)?;
    match existing {
        Some(key) if Some(key.id) != owner => Err(path_conflict(path)),
        _ => Ok(()),
    }
}

fn path_conflict(path: &str) -> ApiError {
    ApiError::new(
        ErrorCode::Conflict,
        format!("path '{path}' is already used by another dynamic access key"),
    )
}

/// A concurrent writer can claim the path between the availability check
/// and the write; the UNIQUE index then reports it.
fn write_failure(err: anyhow::Error, path: &str) -> ApiError {
    if storage::is_unique_violation(&err) {
        warn!(%path, "path claimed concurrently");
        return path_conflict(path);
    }
    internal(err)
}

fn summary(key: StoredDynamicAccessKey) -> DynamicAccessKeySummary {
    DynamicAccessKeySummary {
        id: key.id,
        name: key.name,
        path: key.path,
        prefix: key.prefix,
        load_balancer_algorithm: key.load_balancer_algorithm,
        expires_at: key.expires_at,
        access_keys_count: key.access_keys_count,
        created_at: key.created_at,
        updated_at: key.updated_at,
    }
}

pub async fn list_attached_access_keys(
    ctx: &ApiContext,
    id: DynamicAccessKeyId,
) -> Result<Vec<AccessKeySummary>, ApiError> {
    get_dynamic_access_key(ctx, id).await?;
    let keys = ctx
        .storage
        .list_access_keys(Some(id))
        .await
        .map_err(internal)?;
    Ok(keys.into_iter().map(access_key_summary).collect())
}

pub async fn list_unattached_access_keys(
    ctx: &ApiContext,
) -> Result<Vec<AccessKeySummary>, ApiError> {
    let keys = ctx.storage.list_access_keys(None).await.map_err(internal)?;
    Ok(keys.into_iter().map(access_key_summary).collect())
}

pub async fn create_access_key(
    ctx: &ApiContext,
    new_key: NewAccessKey,
) -> Result<AccessKeySummary, ApiError> {
    let name = validate_name(&new_key.name)?;
    if let Some(owner) = new_key.dynamic_access_key_id {
        get_dynamic_access_key(ctx, owner).await?;
    }
    let id = ctx
        .storage
        .create_access_key(&name, new_key.dynamic_access_key_id)
        .await
        .map_err(internal)?;
    info!(%id, %name, "access key created");
    get_access_key(ctx, id).await
}

/// Attaches an unattached access key to `owner`. Keys already attached
/// elsewhere must be detached first.
pub async fn attach_access_key(
    ctx: &ApiContext,
    owner: DynamicAccessKeyId,
    id: AccessKeyId,
) -> Result<AccessKeySummary, ApiError> {
    get_dynamic_access_key(ctx, owner).await?;
    let key = get_access_key(ctx, id).await?;
    match key.dynamic_access_key_id {
        Some(current) if current == owner => return Ok(key),
        Some(current) => {
            return Err(ApiError::new(
                ErrorCode::Conflict,
                format!("access key {id} is attached to dynamic access key {current}"),
            ))
        }
        None => {}
    }

    if !ctx
        .storage
        .attach_access_key(id, owner)
        .await
        .map_err(internal)?
    {
        return Err(access_key_not_found(id));
    }
    info!(%id, %owner, "access key attached");
    get_access_key(ctx, id).await
}

pub async fn detach_access_key(
    ctx: &ApiContext,
    owner: DynamicAccessKeyId,
    id: AccessKeyId,
) -> Result<(), ApiError> {
    let detached = ctx
        .storage
        .detach_access_key(id, owner)
        .await
        .map_err(internal)?;
    if !detached {
        return Err(ApiError::not_found(format!(
            "access key {id} is not attached to dynamic access key {owner}"
        )));
    }
    info!(%id, %owner, "access key detached");
    Ok(())
}

async fn get_access_key(ctx: &ApiContext, id: AccessKeyId) -> Result<AccessKeySummary, ApiError> {
    ctx.storage
        .get_access_key(id)
        .await
        .map_err(internal)?
        .map(access_key_summary)
        .ok_or_else(|| access_key_not_found(id))
}

fn access_key_summary(key: StoredAccessKey) -> AccessKeySummary {
    AccessKeySummary {
        id: key.id,
        name: key.name,
        dynamic_access_key_id: key.dynamic_access_key_id,
        created_at: key.created_at,
    }
}

fn access_key_not_found(id: AccessKeyId) -> ApiError {
    ApiError::not_found(format!("access key {id} not found"))
}

fn not_found(id: DynamicAccessKeyId) -> ApiError {
    ApiError::not_found(format!("dynamic access key {id} not found"))
}

fn internal(err: anyhow::Error) -> ApiError {
    error!(error = %format!("{err:#}"), "storage operation failed");
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
