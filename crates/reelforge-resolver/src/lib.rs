//! Download source resolution for reelforge.
//!
//! A catalog entry only knows the link to a hosting page. Getting from there
//! to a URL that actually serves bytes takes several hops: an inline script
//! redirect, a page that renders its download anchor late, a final link.
//! This crate models that chain as a fixed pipeline of [`Step`]s run by a
//! [`SourceResolver`] through a pluggable [`Renderer`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use reelforge_resolver::{
//!     default_pipeline, HttpRenderer, ResolverOptions, SizeBands, SourceResolver,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let renderer = Arc::new(HttpRenderer::new("reelforge", Duration::from_secs(30)));
//! let resolver = SourceResolver::from_config(
//!     renderer,
//!     &default_pipeline(),
//!     &SizeBands::default(),
//!     ResolverOptions::default(),
//! )?;
//! let url = resolver.resolve("https://hub.example/drive/abc").await?;
//! println!("{url}");
//! # Ok(())
//! # }
//! ```

pub mod candidate;
pub mod page;
pub mod render;
pub mod resolver;
pub mod step;

pub use candidate::{parse_size, select_candidate, ParsedSize, SizeBand, SizeBands, SizeUnit};
pub use page::{RenderedPage, Selector};
pub use render::{CommandRenderer, HttpRenderer, RenderSession, Renderer, HEADLESS_BROWSER_COMMAND};
pub use resolver::{default_pipeline, LinkResolver, ResolutionSession, ResolverOptions, SourceResolver};
pub use step::{BuildError, Step, StepConfig, DEFAULT_REDIRECT_PATTERN};
