//! Rendering engines.
//!
//! A [`Renderer`] opens one [`RenderSession`] per resolution. The session
//! owns whatever state the engine keeps between hops (cookies for the HTTP
//! engine) and is closed when the resolution ends.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client, Url};
use tokio::process::Command;
use tracing::debug;

use crate::page::RenderedPage;

/// Placeholder substituted with the page URL in command arguments.
pub const URL_PLACEHOLDER: &str = "{url}";

/// argv for a headless browser that runs page scripts before dumping the DOM.
///
/// Hosts that only reveal their download section after client-side scripts
/// run need this rather than a plain fetch tool.
pub const HEADLESS_BROWSER_COMMAND: &[&str] = &[
    "chromium",
    "--headless",
    "--disable-gpu",
    "--virtual-time-budget=10000",
    "--dump-dom",
    URL_PLACEHOLDER,
];

const MAX_REDIRECTS: usize = 10;

/// Factory for rendering sessions.
#[async_trait]
pub trait Renderer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn open(&self) -> Result<Box<dyn RenderSession>, String>;
}

/// One live rendering context.
#[async_trait]
pub trait RenderSession: Send {
    /// Load `url` and return the page as the engine sees it.
    async fn render(&mut self, url: &Url) -> Result<RenderedPage, String>;

    /// Release engine resources. Called exactly once.
    async fn close(&mut self);
}

/// Plain HTTP fetch with a per-session cookie jar.
#[derive(Debug, Clone)]
pub struct HttpRenderer {
    user_agent: String,
    timeout: Duration,
}

impl HttpRenderer {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn open(&self) -> Result<Box<dyn RenderSession>, String> {
        let client = Client::builder()
            .cookie_store(true)
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Box::new(HttpSession { client }))
    }
}

struct HttpSession {
    client: Client,
}

#[async_trait]
impl RenderSession for HttpSession {
    async fn render(&mut self, url: &Url) -> Result<RenderedPage, String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        let final_url = response.url().clone();
        let html = response.text().await.map_err(|e| e.to_string())?;
        debug!(url = %url, final_url = %final_url, bytes = html.len(), "Rendered page");
        Ok(RenderedPage::new(final_url, html))
    }

    async fn close(&mut self) {}
}

/// Runs an external fetch tool and treats its stdout as the page.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRenderer {
    /// `argv[0]` is the program; `{url}` in any argument is replaced by the
    /// page URL. The URL is appended when no argument contains it.
    pub fn new(argv: &[String], timeout: Duration) -> Result<Self, String> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| "render command is empty".to_string())?;
        let mut args = args.to_vec();
        if !args.iter().any(|a| a.contains(URL_PLACEHOLDER)) {
            args.push(URL_PLACEHOLDER.to_string());
        }
        Ok(Self {
            program: program.clone(),
            args,
            timeout,
        })
    }

    /// `wget -qO- {url}`
    pub fn wget(timeout: Duration) -> Self {
        Self {
            program: "wget".to_string(),
            args: vec!["-qO-".to_string(), URL_PLACEHOLDER.to_string()],
            timeout,
        }
    }

    /// [`HEADLESS_BROWSER_COMMAND`]
    pub fn headless_browser(timeout: Duration) -> Self {
        Self {
            program: HEADLESS_BROWSER_COMMAND[0].to_string(),
            args: HEADLESS_BROWSER_COMMAND[1..].iter().map(|a| a.to_string()).collect(),
            timeout,
        }
    }

    fn args_for(&self, url: &Url) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace(URL_PLACEHOLDER, url.as_str()))
            .collect()
    }
}

#[async_trait]
impl Renderer for CommandRenderer {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn open(&self) -> Result<Box<dyn RenderSession>, String> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl RenderSession for CommandRenderer {
    async fn render(&mut self, url: &Url) -> Result<RenderedPage, String> {
        let child = Command::new(&self.program)
            .args(self.args_for(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {e}", self.program))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| format!("{} timed out after {:?}", self.program, self.timeout))?
            .map_err(|e| e.to_string())?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            ));
        }
        Ok(RenderedPage::new(
            url.clone(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
        ))
    }

    async fn close(&mut self) {}
}
