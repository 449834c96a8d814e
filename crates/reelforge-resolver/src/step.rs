//! Pipeline steps: configuration form and compiled form.

use std::time::Duration;

use regex::Regex;
use reelforge_common::ResolutionError;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::candidate::{select_candidate, SizeBands};
use crate::page::{location_assignment, RenderedPage, Selector};

/// Inline script assignment the redirect hop publishes its target through.
pub const DEFAULT_REDIRECT_PATTERN: &str = r"var url = '(http[^']*)';";

fn default_redirect_pattern() -> String {
    DEFAULT_REDIRECT_PATTERN.to_string()
}

fn default_attribute() -> String {
    "href".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// A step as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepConfig {
    /// Capture a URL out of inline script text.
    ScriptRedirect {
        #[serde(default = "default_redirect_pattern")]
        pattern: String,
    },
    /// Re-render until `element` appears, then read `attribute` of `target`.
    WaitForElement {
        element: String,
        target: String,
        #[serde(default = "default_attribute")]
        attribute: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// Follow the anchor whose text contains `label`.
    FollowLink { label: String },
    /// Activate `element` and land on wherever it navigates.
    Click {
        element: String,
        #[serde(default)]
        wait_for: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// Pick among size-labelled anchors.
    SelectCandidate {
        #[serde(default)]
        bands: Option<SizeBands>,
    },
}

/// Reasons a pipeline cannot be built from configuration.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("step {step}: invalid pattern: {source}")]
    InvalidPattern {
        step: usize,
        #[source]
        source: regex::Error,
    },

    #[error("step {step}: pattern must have a capture group: {pattern}")]
    MissingCaptureGroup { step: usize, pattern: String },

    #[error("step {step}: invalid selector {selector:?} (expected #id or a:contains('text'))")]
    InvalidSelector { step: usize, selector: String },

    #[error("step {step}: {unit} size band has min greater than max")]
    InvertedBand { step: usize, unit: &'static str },

    #[error("pipeline has no steps")]
    EmptyPipeline,
}

/// A compiled step.
#[derive(Debug, Clone)]
pub enum Step {
    ScriptRedirect {
        pattern: Regex,
    },
    WaitForElement {
        ready: Selector,
        target: Selector,
        attribute: String,
        timeout: Duration,
    },
    FollowLink {
        label: String,
    },
    Click {
        element: Selector,
        wait_for: Option<Selector>,
        timeout: Duration,
    },
    SelectCandidate {
        bands: SizeBands,
    },
}

fn selector(step: usize, raw: &str) -> Result<Selector, BuildError> {
    Selector::parse(raw).ok_or_else(|| BuildError::InvalidSelector {
        step,
        selector: raw.to_string(),
    })
}

impl StepConfig {
    /// Compile into a [`Step`]. `bands` applies to candidate steps that do
    /// not carry their own.
    pub fn compile(&self, index: usize, bands: &SizeBands) -> Result<Step, BuildError> {
        Ok(match self {
            Self::ScriptRedirect { pattern } => {
                let re = Regex::new(pattern).map_err(|source| BuildError::InvalidPattern {
                    step: index,
                    source,
                })?;
                if re.captures_len() < 2 {
                    return Err(BuildError::MissingCaptureGroup {
                        step: index,
                        pattern: pattern.clone(),
                    });
                }
                Step::ScriptRedirect { pattern: re }
            }
            Self::WaitForElement {
                element,
                target,
                attribute,
                timeout_secs,
            } => Step::WaitForElement {
                ready: selector(index, element)?,
                target: selector(index, target)?,
                attribute: attribute.to_ascii_lowercase(),
                timeout: Duration::from_secs(*timeout_secs),
            },
            Self::FollowLink { label } => Step::FollowLink {
                label: label.clone(),
            },
            Self::Click {
                element,
                wait_for,
                timeout_secs,
            } => Step::Click {
                element: selector(index, element)?,
                wait_for: wait_for
                    .as_deref()
                    .map(|w| selector(index, w))
                    .transpose()?,
                timeout: Duration::from_secs(*timeout_secs),
            },
            Self::SelectCandidate { bands: own } => {
                let bands = own.clone().unwrap_or_else(|| bands.clone());
                if let Some(unit) = bands.inverted().first().copied() {
                    return Err(BuildError::InvertedBand { step: index, unit });
                }
                Step::SelectCandidate { bands }
            }
        })
    }
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ScriptRedirect { .. } => "script_redirect",
            Self::WaitForElement { .. } => "wait_for_element",
            Self::FollowLink { .. } => "follow_link",
            Self::Click { .. } => "click",
            Self::SelectCandidate { .. } => "select_candidate",
        }
    }

    /// Element that must be present before extraction, with the bound on
    /// how long to keep re-rendering for it.
    pub fn readiness(&self) -> Option<(&Selector, Duration)> {
        match self {
            Self::WaitForElement { ready, timeout, .. } => Some((ready, *timeout)),
            _ => None,
        }
    }

    /// Element that must be present on the page a click lands on.
    pub fn landing(&self) -> Option<(&Selector, Duration)> {
        match self {
            Self::Click {
                wait_for: Some(w),
                timeout,
                ..
            } => Some((w, *timeout)),
            _ => None,
        }
    }

    /// Whether the extracted URL must itself be loaded to produce the
    /// step's output.
    pub fn navigates(&self) -> bool {
        matches!(self, Self::Click { .. })
    }

    /// Pull the next URL out of a rendered page.
    pub fn extract(&self, index: usize, page: &RenderedPage) -> Result<Url, ResolutionError> {
        let not_found = |element: String| ResolutionError::ElementNotFound {
            step: index,
            element,
        };

        match self {
            Self::ScriptRedirect { pattern } => page
                .scripts()
                .into_iter()
                .find_map(|script| {
                    pattern
                        .captures(script)
                        .and_then(|c| c.get(1))
                        .map(|m| m.as_str().to_string())
                })
                .and_then(|target| page.join(&target))
                .ok_or_else(|| ResolutionError::RedirectNotFound {
                    step: index,
                    pattern: pattern.as_str().to_string(),
                }),

            Self::WaitForElement {
                target, attribute, ..
            } => {
                let element = page.find(target).ok_or_else(|| not_found(target.to_string()))?;
                element
                    .attr(attribute)
                    .and_then(|value| page.join(value))
                    .ok_or_else(|| not_found(format!("{target}[{attribute}]")))
            }

            Self::FollowLink { label } => page
                .anchors()
                .into_iter()
                .find(|a| a.text.contains(label.as_str()))
                .and_then(|a| a.attr("href").and_then(|href| page.join(href)))
                .ok_or_else(|| not_found(format!("a:contains('{label}')"))),

            Self::Click { element, .. } => {
                let el = page.find(element).ok_or_else(|| not_found(element.to_string()))?;
                let target = el
                    .attr("href")
                    .or_else(|| el.attr("data-href"))
                    .map(str::to_string)
                    .or_else(|| el.attr("onclick").and_then(location_assignment).map(str::to_string))
                    .or_else(|| page.enclosing_form_action(&el));
                target
                    .and_then(|t| page.join(&t))
                    .ok_or_else(|| not_found(format!("{element} navigation target")))
            }

            Self::SelectCandidate { bands } => {
                let anchors: Vec<_> = page
                    .anchors()
                    .into_iter()
                    .filter(|a| a.attr("href").is_some())
                    .collect();
                let texts: Vec<&str> = anchors.iter().map(|a| a.text.as_str()).collect();
                select_candidate(&texts, bands)
                    .and_then(|i| anchors[i].attr("href").and_then(|href| page.join(href)))
                    .ok_or(ResolutionError::NoAcceptableCandidate {
                        step: index,
                        candidates: anchors.len(),
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::SizeBand;
    use assert_matches::assert_matches;

    fn page(html: &str) -> RenderedPage {
        RenderedPage::new(Url::parse("https://hub.example/drive/1").unwrap(), html)
    }

    fn compile(config: StepConfig) -> Step {
        config.compile(0, &SizeBands::default()).unwrap()
    }

    #[test]
    fn test_config_deserializes_by_kind() {
        let steps: Vec<StepConfig> = serde_json::from_str(
            r##"[
                {"kind": "script_redirect"},
                {"kind": "wait_for_element", "element": "#section2",
                 "target": "a:contains('10Gbps')"},
                {"kind": "follow_link", "label": "Download Here"},
                {"kind": "click", "element": "#download", "wait_for": "#downloadbtn"},
                {"kind": "select_candidate"}
            ]"##,
        )
        .unwrap();
        assert_eq!(
            steps[0],
            StepConfig::ScriptRedirect {
                pattern: DEFAULT_REDIRECT_PATTERN.into()
            }
        );
        assert_matches!(&steps[1], StepConfig::WaitForElement { attribute, timeout_secs: 30, .. } if attribute == "href");
        assert_matches!(&steps[4], StepConfig::SelectCandidate { bands: None });
    }

    #[test]
    fn test_script_redirect_extracts_url() {
        let step = compile(StepConfig::ScriptRedirect {
            pattern: DEFAULT_REDIRECT_PATTERN.into(),
        });
        let p = page("<script>var x = 1;</script><script>var url = 'https://gen.example/t?id=9';</script>");
        assert_eq!(step.extract(0, &p).unwrap().as_str(), "https://gen.example/t?id=9");
    }

    #[test]
    fn test_script_redirect_missing() {
        let step = compile(StepConfig::ScriptRedirect {
            pattern: DEFAULT_REDIRECT_PATTERN.into(),
        });
        let err = step.extract(2, &page("<script>var y = 2;</script>")).unwrap_err();
        assert_matches!(err, ResolutionError::RedirectNotFound { step: 2, .. });
    }

    #[test]
    fn test_compile_rejects_bad_input() {
        let bands = SizeBands::default();
        assert_matches!(
            StepConfig::ScriptRedirect { pattern: "(".into() }.compile(1, &bands),
            Err(BuildError::InvalidPattern { step: 1, .. })
        );
        assert_matches!(
            StepConfig::ScriptRedirect { pattern: "no group".into() }.compile(1, &bands),
            Err(BuildError::MissingCaptureGroup { .. })
        );
        assert_matches!(
            StepConfig::FollowLink { label: "x".into() }.compile(0, &bands),
            Ok(Step::FollowLink { .. })
        );
        assert_matches!(
            StepConfig::Click { element: "button".into(), wait_for: None, timeout_secs: 1 }
                .compile(3, &bands),
            Err(BuildError::InvalidSelector { step: 3, .. })
        );
        let inverted = SizeBands {
            mb: Some(SizeBand { min: 10.0, max: 1.0 }),
            gb: None,
        };
        assert_matches!(
            StepConfig::SelectCandidate { bands: None }.compile(0, &inverted),
            Err(BuildError::InvertedBand { unit: "MB", .. })
        );
    }

    #[test]
    fn test_wait_for_element_reads_target() {
        let step = compile(StepConfig::WaitForElement {
            element: "#section2".into(),
            target: "a:contains('Download [Server : 10Gbps]')".into(),
            attribute: "href".into(),
            timeout_secs: 1,
        });
        assert!(step.readiness().is_some());
        let p = page(
            r#"<div id="section2"><a href="/slow">Download [Server : 1Gbps]</a>
               <a href="https://fast.example/f">Download [Server : 10Gbps]</a></div>"#,
        );
        assert_eq!(step.extract(1, &p).unwrap().as_str(), "https://fast.example/f");

        let err = step.extract(1, &page(r#"<div id="section2"></div>"#)).unwrap_err();
        assert_matches!(err, ResolutionError::ElementNotFound { step: 1, .. });
    }

    #[test]
    fn test_follow_link_resolves_relative() {
        let step = compile(StepConfig::FollowLink {
            label: "Download Here".into(),
        });
        let p = page(r#"<a href="../files/movie.mkv">Download Here</a>"#);
        assert_eq!(
            step.extract(0, &p).unwrap().as_str(),
            "https://hub.example/files/movie.mkv"
        );
        assert_matches!(
            step.extract(0, &page("<a href='/x'>Elsewhere</a>")),
            Err(ResolutionError::ElementNotFound { .. })
        );
    }

    #[test]
    fn test_click_targets() {
        let step = compile(StepConfig::Click {
            element: "#download".into(),
            wait_for: None,
            timeout_secs: 1,
        });
        assert!(step.navigates());

        let href = page(r#"<a id="download" href="/go/1">Download</a>"#);
        assert_eq!(step.extract(0, &href).unwrap().path(), "/go/1");

        let onclick = page(r#"<button id="download" onclick="location.href='/go/2'">Get</button>"#);
        assert_eq!(step.extract(0, &onclick).unwrap().path(), "/go/2");

        let form = page(r#"<form action="/go/3"><button id="download">Get</button></form>"#);
        assert_eq!(step.extract(0, &form).unwrap().path(), "/go/3");

        let inert = page(r#"<button id="download">Get</button>"#);
        assert_matches!(step.extract(0, &inert), Err(ResolutionError::ElementNotFound { .. }));
    }

    #[test]
    fn test_select_candidate_step() {
        let bands = SizeBands {
            mb: Some(SizeBand { min: 300.0, max: 800.0 }),
            gb: None,
        };
        let step = StepConfig::SelectCandidate { bands: None }.compile(0, &bands).unwrap();
        let p = page(
            r#"<a href="/a">720p [700 MB]</a><a href="/b">1080p [1.8 GB]</a><a href="/c">480p [400 MB]</a>"#,
        );
        assert_eq!(step.extract(0, &p).unwrap().path(), "/a");

        let none = page(r#"<a href="/b">1080p [1.8 GB]</a>"#);
        assert_matches!(
            step.extract(4, &none),
            Err(ResolutionError::NoAcceptableCandidate { step: 4, candidates: 1 })
        );
    }
}
