//! Reelforge-Common: shared identifiers and the error taxonomy.
//!
//! - **Typed IDs**: [`SourceKey`] for catalog items, [`EntryRef`] for cache entries
//! - **Errors**: one enum per component plus the unified [`Error`]
//!
//! # Examples
//!
//! ```
//! use reelforge_common::{CacheError, Error, SourceKey};
//!
//! let key = SourceKey::new("movie-42/1080p");
//! assert_eq!(key.digest().len(), 64);
//!
//! let err = Error::from(CacheError::EntryNotFound("abc".into()));
//! assert_eq!(err.http_status(), 404);
//! ```

pub mod error;
pub mod ids;

pub use error::{CacheError, Error, ResolutionError, Result, StoreError, StreamError};
pub use ids::*;
