//! Error taxonomy for reelforge.
//!
//! Each component owns one enum ([`ResolutionError`], [`StoreError`],
//! [`CacheError`], [`StreamError`]). They all funnel into [`Error`], which
//! carries enough context for the HTTP boundary to pick a status code via
//! [`Error::http_status`].

/// Failures while turning a catalog page link into a fetchable URL.
///
/// Every variant names the zero-based pipeline step that failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolutionError {
    /// An expected element or anchor was absent from the rendered page.
    #[error("step {step}: element not found: {element}")]
    ElementNotFound { step: usize, element: String },

    /// No redirect target matched inside the page's inline scripts.
    #[error("step {step}: redirect not found (pattern {pattern})")]
    RedirectNotFound { step: usize, pattern: String },

    /// A bounded wait elapsed before the page became ready.
    #[error("step {step}: timed out after {waited_ms}ms waiting for {waiting_for}")]
    Timeout {
        step: usize,
        waiting_for: String,
        waited_ms: u64,
    },

    /// None of the listed candidates fell inside a configured size band.
    #[error("step {step}: no acceptable candidate among {candidates}")]
    NoAcceptableCandidate { step: usize, candidates: usize },

    /// The rendering engine failed to load a page.
    #[error("step {step}: failed to load {url}: {message}")]
    Navigation {
        step: usize,
        url: String,
        message: String,
    },
}

impl ResolutionError {
    /// Index of the step that failed.
    pub fn step(&self) -> usize {
        match self {
            Self::ElementNotFound { step, .. }
            | Self::RedirectNotFound { step, .. }
            | Self::Timeout { step, .. }
            | Self::NoAcceptableCandidate { step, .. }
            | Self::Navigation { step, .. } => *step,
        }
    }
}

/// Failures of the chunked blob store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A chunk or metadata upload failed; the container has been removed.
    #[error("upload to {container} failed: {message}")]
    UploadFailed { container: String, message: String },

    /// The manifest or metadata blob is missing, unparsable or inconsistent.
    #[error("manifest for {container} is corrupt: {reason}")]
    ManifestCorrupt { container: String, reason: String },

    /// A chunk listed in the manifest is not present on the blob host.
    #[error("chunk {chunk_id} missing from {container}")]
    ChunkMissing { container: String, chunk_id: String },

    /// The blob host returned an unexpected failure.
    #[error("blob backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Failures of the cache coordinator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    /// No usable mirror link, or the link could not be resolved.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The download into the local cache failed.
    #[error("download failed: {0}")]
    DownloadFailed(String),

    /// No entry exists for the given reference.
    #[error("cache entry not found: {0}")]
    EntryNotFound(String),
}

/// Failures while serving a byte range.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The requested range cannot be satisfied by the backing.
    ///
    /// `total` is the size known at the time, if any, for `Content-Range: bytes */total`.
    #[error("range not satisfiable")]
    RangeNotSatisfiable { total: Option<u64> },

    /// The backing artifact could not be opened or read.
    #[error("backing unavailable: {0}")]
    BackingUnavailable(String),

    /// Acquisition of the bytes being waited on failed.
    #[error(transparent)]
    SourceFailed(CacheError),
}

/// Unified error type covering every failure mode in reelforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Resolution(_) => 502,
            Error::Store(StoreError::ChunkMissing { .. }) => 502,
            Error::Store(StoreError::Backend(_)) => 502,
            Error::Store(_) => 500,
            Error::Cache(CacheError::EntryNotFound(_)) => 404,
            Error::Cache(_) => 502,
            Error::Stream(StreamError::RangeNotSatisfiable { .. }) => 416,
            Error::Stream(StreamError::BackingUnavailable(_)) => 500,
            Error::Stream(StreamError::SourceFailed(_)) => 502,
            Error::Io(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::Internal`].
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using the unified [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            Error::from(CacheError::EntryNotFound("x".into())).http_status(),
            404
        );
        assert_eq!(
            Error::from(StreamError::RangeNotSatisfiable { total: Some(5) }).http_status(),
            416
        );
        assert_eq!(
            Error::from(CacheError::SourceUnavailable("gone".into())).http_status(),
            502
        );
        assert_eq!(
            Error::from(StoreError::ManifestCorrupt {
                container: "c".into(),
                reason: "bad json".into()
            })
            .http_status(),
            500
        );
        assert_eq!(
            Error::from(StreamError::SourceFailed(CacheError::DownloadFailed("reset".into())))
                .http_status(),
            502
        );
        assert_eq!(Error::internal("bug").http_status(), 500);
    }

    #[test]
    fn test_resolution_error_reports_step() {
        let err = ResolutionError::Timeout {
            step: 2,
            waiting_for: "#section2".into(),
            waited_ms: 1500,
        };
        assert_eq!(err.step(), 2);
        assert_eq!(
            err.to_string(),
            "step 2: timed out after 1500ms waiting for #section2"
        );
    }

    #[test]
    fn test_transparent_display() {
        let err = Error::from(CacheError::DownloadFailed("connection reset".into()));
        assert_eq!(err.to_string(), "download failed: connection reset");
    }
}
