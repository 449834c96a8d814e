//! The step interpreter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reelforge_common::ResolutionError;
use reqwest::Url;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::candidate::SizeBands;
use crate::page::{RenderedPage, Selector};
use crate::render::{RenderSession, Renderer};
use crate::step::{BuildError, Step, StepConfig, DEFAULT_REDIRECT_PATTERN};

/// Anything that turns a page link into a final download URL.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    async fn resolve(&self, link: &str) -> Result<String, ResolutionError>;
}

/// Timing knobs for the interpreter.
#[derive(Debug, Clone, Copy)]
pub struct ResolverOptions {
    /// Bound on a single page load.
    pub navigation_timeout: Duration,
    /// Delay between re-renders while waiting for an element.
    pub poll_interval: Duration,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// The three-hop chain: an inline script redirect, a generated page that
/// reveals the fast-server anchor once `#section2` renders, then the final
/// "Download Here" link.
pub fn default_pipeline() -> Vec<StepConfig> {
    vec![
        StepConfig::ScriptRedirect {
            pattern: DEFAULT_REDIRECT_PATTERN.to_string(),
        },
        StepConfig::WaitForElement {
            element: "#section2".to_string(),
            target: "a:contains('Download [Server : 10Gbps]')".to_string(),
            attribute: "href".to_string(),
            timeout_secs: 30,
        },
        StepConfig::FollowLink {
            label: "Download Here".to_string(),
        },
    ]
}

/// State of one `resolve` call.
pub struct ResolutionSession {
    pub initial_link: String,
    pub step_index: usize,
    handle: Box<dyn RenderSession>,
    outcome: Option<Result<Url, ResolutionError>>,
}

impl ResolutionSession {
    fn new(initial_link: &str, handle: Box<dyn RenderSession>) -> Self {
        Self {
            initial_link: initial_link.to_string(),
            step_index: 0,
            handle,
            outcome: None,
        }
    }

    /// Tear down the engine session and hand back the outcome.
    async fn finish(mut self) -> Result<Url, ResolutionError> {
        self.handle.close().await;
        self.outcome.unwrap_or_else(|| {
            Err(ResolutionError::Navigation {
                step: self.step_index,
                url: self.initial_link.clone(),
                message: "resolution ended without an outcome".to_string(),
            })
        })
    }
}

/// Runs a fixed pipeline of steps through a rendering engine.
pub struct SourceResolver {
    renderer: Arc<dyn Renderer>,
    steps: Vec<Step>,
    options: ResolverOptions,
}

impl SourceResolver {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        steps: Vec<Step>,
        options: ResolverOptions,
    ) -> Result<Self, BuildError> {
        if steps.is_empty() {
            return Err(BuildError::EmptyPipeline);
        }
        Ok(Self {
            renderer,
            steps,
            options,
        })
    }

    /// Compile `configs` and build a resolver. `bands` is the default for
    /// candidate steps.
    pub fn from_config(
        renderer: Arc<dyn Renderer>,
        configs: &[StepConfig],
        bands: &SizeBands,
        options: ResolverOptions,
    ) -> Result<Self, BuildError> {
        let steps = configs
            .iter()
            .enumerate()
            .map(|(i, c)| c.compile(i, bands))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(renderer, steps, options)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn engine(&self) -> &'static str {
        self.renderer.name()
    }

    /// Resolve `link` to the final download URL.
    ///
    /// Opens one engine session, runs every step in order, and closes the
    /// session whatever the outcome.
    pub async fn resolve(&self, link: &str) -> Result<String, ResolutionError> {
        let handle = self
            .renderer
            .open()
            .await
            .map_err(|message| ResolutionError::Navigation {
                step: 0,
                url: link.to_string(),
                message,
            })?;
        let mut session = ResolutionSession::new(link, handle);

        let outcome = self.run(&mut session).await;
        session.outcome = Some(outcome);
        let url = session.finish().await?;

        info!(link = %link, url = %url, engine = self.engine(), "Resolved download source");
        Ok(url.into())
    }

    async fn run(&self, session: &mut ResolutionSession) -> Result<Url, ResolutionError> {
        let mut current = Url::parse(&session.initial_link).map_err(|e| {
            ResolutionError::Navigation {
                step: 0,
                url: session.initial_link.clone(),
                message: e.to_string(),
            }
        })?;

        for (index, step) in self.steps.iter().enumerate() {
            session.step_index = index;
            debug!(step = index, kind = step.kind(), url = %current, "Running resolution step");

            let page = self
                .render_ready(session, index, &current, step.readiness())
                .await?;
            let next = step.extract(index, &page).inspect_err(|e| {
                warn!(step = index, kind = step.kind(), error = %e, "Resolution step failed");
            })?;

            current = if step.navigates() {
                self.render_ready(session, index, &next, step.landing())
                    .await?
                    .url
            } else {
                next
            };
        }
        Ok(current)
    }

    /// Render `url`, re-rendering until `ready` holds or its bound elapses.
    async fn render_ready(
        &self,
        session: &mut ResolutionSession,
        index: usize,
        url: &Url,
        ready: Option<(&Selector, Duration)>,
    ) -> Result<RenderedPage, ResolutionError> {
        let started = Instant::now();
        loop {
            let page = self.render(session, index, url).await?;
            let Some((selector, bound)) = ready else {
                return Ok(page);
            };
            if page.contains(selector) {
                return Ok(page);
            }
            let waited = started.elapsed();
            if waited >= bound {
                return Err(ResolutionError::Timeout {
                    step: index,
                    waiting_for: selector.to_string(),
                    waited_ms: waited.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.options.poll_interval.min(bound - waited)).await;
        }
    }

    async fn render(
        &self,
        session: &mut ResolutionSession,
        index: usize,
        url: &Url,
    ) -> Result<RenderedPage, ResolutionError> {
        let navigation = |message: String| ResolutionError::Navigation {
            step: index,
            url: url.to_string(),
            message,
        };
        let page = tokio::time::timeout(self.options.navigation_timeout, session.handle.render(url))
            .await
            .map_err(|_| navigation(format!("timed out after {:?}", self.options.navigation_timeout)))?
            .map_err(navigation)?;

        // Client-side refreshes count as part of loading the page.
        match page.meta_refresh().and_then(|t| page.join(&t)) {
            Some(target) if target != page.url => {
                debug!(step = index, from = %page.url, to = %target, "Following meta refresh");
                tokio::time::timeout(self.options.navigation_timeout, session.handle.render(&target))
                    .await
                    .map_err(|_| navigation(format!("timed out after {:?}", self.options.navigation_timeout)))?
                    .map_err(navigation)
            }
            _ => Ok(page),
        }
    }
}

#[async_trait]
impl LinkResolver for SourceResolver {
    async fn resolve(&self, link: &str) -> Result<String, ResolutionError> {
        SourceResolver::resolve(self, link).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned pages; counts opens, closes and renders.
    #[derive(Default)]
    struct ScriptedRenderer {
        pages: HashMap<String, Vec<String>>,
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        renders: Arc<AtomicUsize>,
    }

    struct ScriptedSession {
        pages: HashMap<String, Vec<String>>,
        seen: HashMap<String, usize>,
        closed: Arc<AtomicUsize>,
        renders: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Renderer for ScriptedRenderer {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn open(&self) -> Result<Box<dyn RenderSession>, String> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedSession {
                pages: self.pages.clone(),
                seen: HashMap::new(),
                closed: self.closed.clone(),
                renders: self.renders.clone(),
            }))
        }
    }

    #[async_trait]
    impl RenderSession for ScriptedSession {
        async fn render(&mut self, url: &Url) -> Result<RenderedPage, String> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            let versions = self
                .pages
                .get(url.as_str())
                .ok_or_else(|| format!("404 {url}"))?;
            let n = self.seen.entry(url.to_string()).or_default();
            let html = versions[(*n).min(versions.len() - 1)].clone();
            *n += 1;
            Ok(RenderedPage::new(url.clone(), html))
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn options() -> ResolverOptions {
        ResolverOptions {
            navigation_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn hubcloud_pages(section_after: usize) -> HashMap<String, Vec<String>> {
        let mut generated = vec!["<p>generating link...</p>".to_string(); section_after];
        generated.push(
            r#"<div id="section2"><a href="https://fast.example/f/1">Download [Server : 10Gbps]</a></div>"#
                .to_string(),
        );
        HashMap::from([
            (
                "https://hub.example/drive/1".to_string(),
                vec!["<div class=\"tab-content\"><script>var url = 'https://gen.example/g?id=1';</script></div>".to_string()],
            ),
            ("https://gen.example/g?id=1".to_string(), generated),
            (
                "https://fast.example/f/1".to_string(),
                vec![r#"<a href="https://cdn.example/movie.mkv">Download Here</a>"#.to_string()],
            ),
        ])
    }

    fn resolver(renderer: ScriptedRenderer) -> SourceResolver {
        SourceResolver::from_config(
            Arc::new(renderer),
            &default_pipeline(),
            &SizeBands::default(),
            options(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_default_pipeline_resolves_three_hops() {
        let renderer = ScriptedRenderer {
            pages: hubcloud_pages(2),
            ..Default::default()
        };
        let (opened, closed, renders) = (
            renderer.opened.clone(),
            renderer.closed.clone(),
            renderer.renders.clone(),
        );
        let url = resolver(renderer)
            .resolve("https://hub.example/drive/1")
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example/movie.mkv");
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        // One render per hop plus two re-renders while waiting.
        assert_eq!(renders.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_wait_times_out_with_step_index() {
        let mut pages = hubcloud_pages(0);
        pages.insert(
            "https://gen.example/g?id=1".to_string(),
            vec!["<p>still generating</p>".to_string()],
        );
        let renderer = ScriptedRenderer {
            pages,
            ..Default::default()
        };
        let closed = renderer.closed.clone();
        let configs = vec![
            default_pipeline()[0].clone(),
            StepConfig::WaitForElement {
                element: "#section2".into(),
                target: "a:contains('10Gbps')".into(),
                attribute: "href".into(),
                timeout_secs: 0,
            },
        ];
        let resolver =
            SourceResolver::from_config(Arc::new(renderer), &configs, &SizeBands::default(), options())
                .unwrap();
        let err = resolver.resolve("https://hub.example/drive/1").await.unwrap_err();
        assert_matches!(err, ResolutionError::Timeout { step: 1, .. });
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_navigation_failure_closes_session() {
        let renderer = ScriptedRenderer::default();
        let closed = renderer.closed.clone();
        let err = resolver(renderer)
            .resolve("https://hub.example/missing")
            .await
            .unwrap_err();
        assert_matches!(err, ResolutionError::Navigation { step: 0, .. });
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_link_is_navigation_error() {
        let err = resolver(ScriptedRenderer::default())
            .resolve("not a url")
            .await
            .unwrap_err();
        assert_matches!(err, ResolutionError::Navigation { step: 0, .. });
    }

    #[tokio::test]
    async fn test_click_lands_on_redirect_target() {
        let pages = HashMap::from([
            (
                "https://alt.example/file/1".to_string(),
                vec![r#"<form action="/confirm"><button id="download">Download</button></form>"#.to_string()],
            ),
            (
                "https://alt.example/confirm".to_string(),
                vec![r#"<a id="downloadbtn" href="https://cdn.example/alt.mkv">Go</a>"#.to_string()],
            ),
        ]);
        let configs = vec![
            StepConfig::Click {
                element: "#download".into(),
                wait_for: Some("#downloadbtn".into()),
                timeout_secs: 1,
            },
            StepConfig::WaitForElement {
                element: "#downloadbtn".into(),
                target: "#downloadbtn".into(),
                attribute: "href".into(),
                timeout_secs: 1,
            },
        ];
        let resolver = SourceResolver::from_config(
            Arc::new(ScriptedRenderer {
                pages,
                ..Default::default()
            }),
            &configs,
            &SizeBands::default(),
            options(),
        )
        .unwrap();
        let url = resolver.resolve("https://alt.example/file/1").await.unwrap();
        assert_eq!(url, "https://cdn.example/alt.mkv");
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let result = SourceResolver::new(Arc::new(ScriptedRenderer::default()), vec![], options());
        assert!(matches!(result, Err(BuildError::EmptyPipeline)));
    }
}
