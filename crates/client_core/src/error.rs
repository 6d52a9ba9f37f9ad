use thiserror::Error;

/// Failures the list controller surfaces to its caller. Superseded
/// responses are not errors; see [`crate::controller::FetchOutcome`].
#[derive(Debug, Error)]
pub enum ListError {
    #[error("failed to fetch page {page} for term '{term}': {source:#}")]
    FetchFailure {
        term: String,
        page: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("page {requested} is outside 1..={total_pages}")]
    InvalidPageRequest { requested: u32, total_pages: u32 },
    #[error("{action} failed: {source:#}")]
    MutationFailure {
        action: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ListError {
    pub fn is_invalid_page(&self) -> bool {
        matches!(self, Self::InvalidPageRequest { .. })
    }
}
