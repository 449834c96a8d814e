//! Rendered pages and the small amount of HTML inspection the steps need.
//!
//! Pages are inspected with regular expressions rather than a DOM. Hosts in
//! this space serve flat, machine-generated markup, and the steps only ever
//! ask for scripts, anchors, an element by id, or the form around it.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

static SCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>(.*?)</script\s*>").unwrap());
static ANCHOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>").unwrap());
static FORM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<form\b([^>]*)>(.*?)</form\s*>").unwrap());
static ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap()
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static META_REFRESH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<meta\b[^>]*http-equiv\s*=\s*["']?refresh["']?[^>]*content\s*=\s*["'][^"']*url\s*=\s*([^"'>]+)["']"#)
        .unwrap()
});
static LOCATION_ASSIGN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"location(?:\.href)?\s*=\s*["']([^"']+)["']"#).unwrap()
});
static CONTAINS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^a:contains\(\s*["']?(.*?)["']?\s*\)$"#).unwrap());

/// A page as produced by a rendering engine.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Final URL after any redirects the engine followed.
    pub url: Url,
    pub html: String,
}

/// An HTML element located in a page.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attrs: HashMap<String, String>,
    /// Visible text with tags stripped and whitespace collapsed.
    pub text: String,
    /// Byte offset of the opening tag in the page.
    pub position: usize,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// How a step names the element it cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// `#id`
    Id(String),
    /// `a:contains('label')`: first anchor whose text contains `label`.
    AnchorText(String),
}

impl Selector {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(id) = raw.strip_prefix('#') {
            if id.is_empty() || id.chars().any(char::is_whitespace) {
                return None;
            }
            return Some(Self::Id(id.to_string()));
        }
        let caps = CONTAINS.captures(raw)?;
        let label = caps.get(1)?.as_str();
        if label.is_empty() {
            return None;
        }
        Some(Self::AnchorText(label.to_string()))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::AnchorText(label) => write!(f, "a:contains('{label}')"),
        }
    }
}

impl RenderedPage {
    pub fn new(url: Url, html: impl Into<String>) -> Self {
        Self {
            url,
            html: html.into(),
        }
    }

    /// Bodies of every inline `<script>` block, in document order.
    pub fn scripts(&self) -> Vec<&str> {
        SCRIPT
            .captures_iter(&self.html)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect()
    }

    pub fn anchors(&self) -> Vec<Element> {
        ANCHOR
            .captures_iter(&self.html)
            .map(|c| Element {
                tag: "a".to_string(),
                attrs: parse_attrs(c.get(1).map_or("", |m| m.as_str())),
                text: visible_text(c.get(2).map_or("", |m| m.as_str())),
                position: c.get(0).map_or(0, |m| m.start()),
            })
            .collect()
    }

    pub fn element_by_id(&self, id: &str) -> Option<Element> {
        let pattern = format!(
            r#"(?is)<([A-Za-z][A-Za-z0-9]*)\b([^>]*\sid\s*=\s*["']?{}["']?(?:[\s/][^>]*)?)>"#,
            regex::escape(id)
        );
        let re = Regex::new(&pattern).ok()?;
        let caps = re.captures(&self.html)?;
        let whole = caps.get(0)?;
        let tag = caps.get(1)?.as_str().to_ascii_lowercase();
        let attrs = parse_attrs(caps.get(2)?.as_str());

        // Inner text runs to the first matching close tag; nesting of the
        // same tag is not tracked.
        let rest = &self.html[whole.end()..];
        let close = format!("</{tag}");
        let text = rest
            .to_ascii_lowercase()
            .find(&close)
            .map(|end| visible_text(&rest[..end]))
            .unwrap_or_default();

        Some(Element {
            tag,
            attrs,
            text,
            position: whole.start(),
        })
    }

    pub fn find(&self, selector: &Selector) -> Option<Element> {
        match selector {
            Selector::Id(id) => self.element_by_id(id),
            Selector::AnchorText(label) => self
                .anchors()
                .into_iter()
                .find(|a| a.text.contains(label.as_str())),
        }
    }

    pub fn contains(&self, selector: &Selector) -> bool {
        self.find(selector).is_some()
    }

    /// `action` of the form enclosing `element`, if any.
    pub fn enclosing_form_action(&self, element: &Element) -> Option<String> {
        FORM.captures_iter(&self.html).find_map(|c| {
            let whole = c.get(0)?;
            if element.position < whole.start() || element.position >= whole.end() {
                return None;
            }
            parse_attrs(c.get(1)?.as_str()).remove("action")
        })
    }

    /// Target of a `<meta http-equiv="refresh">` client redirect.
    pub fn meta_refresh(&self) -> Option<String> {
        META_REFRESH
            .captures(&self.html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    }

    /// Resolve a possibly relative target against this page's URL.
    pub fn join(&self, target: &str) -> Option<Url> {
        self.url.join(decode_entities(target.trim()).as_ref()).ok()
    }
}

/// URL assigned to `location` / `location.href` in an inline handler.
pub fn location_assignment(script: &str) -> Option<&str> {
    LOCATION_ASSIGN
        .captures(script)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn parse_attrs(raw: &str) -> HashMap<String, String> {
    ATTR.captures_iter(raw)
        .filter_map(|c| {
            let name = c.get(1)?.as_str().to_ascii_lowercase();
            let value = c.get(2).or_else(|| c.get(3)).or_else(|| c.get(4))?;
            Some((name, value.as_str().to_string()))
        })
        .collect()
}

fn visible_text(inner: &str) -> String {
    let stripped = TAG.replace_all(inner, " ");
    let decoded = decode_entities(&stripped);
    WHITESPACE.replace_all(decoded.trim(), " ").into_owned()
}

fn decode_entities(s: &str) -> std::borrow::Cow<'_, str> {
    if !s.contains('&') {
        return s.into();
    }
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(html: &str) -> RenderedPage {
        RenderedPage::new(Url::parse("https://host.example/drive/abc").unwrap(), html)
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!(Selector::parse("#section2"), Some(Selector::Id("section2".into())));
        assert_eq!(
            Selector::parse("a:contains('Download Here')"),
            Some(Selector::AnchorText("Download Here".into()))
        );
        assert_eq!(
            Selector::parse(r#"a:contains("Download [Server : 10Gbps]")"#),
            Some(Selector::AnchorText("Download [Server : 10Gbps]".into()))
        );
        assert_eq!(Selector::parse("#"), None);
        assert_eq!(Selector::parse("div.tab"), None);
    }

    #[test]
    fn test_scripts_and_anchors() {
        let p = page(
            r#"<div class="tab-content"><script type="text/javascript">
                var url = 'https://next.example/x';
            </script></div>
            <a href="/one" class="btn"><b>Download</b>&nbsp;Here</a>
            <A HREF='two'>700   MB</A>"#,
        );
        assert_eq!(p.scripts().len(), 1);
        assert!(p.scripts()[0].contains("var url"));

        let anchors = p.anchors();
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[0].text, "Download Here");
        assert_eq!(anchors[0].attr("href"), Some("/one"));
        assert_eq!(anchors[1].text, "700 MB");
        assert_eq!(anchors[1].attr("HREF"), Some("two"));
    }

    #[test]
    fn test_element_by_id() {
        let p = page(r#"<div><section id="section2" class="x"><p>ready</p></section></div>"#);
        let el = p.element_by_id("section2").unwrap();
        assert_eq!(el.tag, "section");
        assert_eq!(el.text, "ready");
        assert!(p.element_by_id("section").is_none());
        assert!(p.element_by_id("missing").is_none());
    }

    #[test]
    fn test_enclosing_form_action() {
        let p = page(
            r#"<form method="post" action="/go?token=1"><button id="download">Go</button></form>
               <button id="other">x</button>"#,
        );
        let inside = p.element_by_id("download").unwrap();
        let outside = p.element_by_id("other").unwrap();
        assert_eq!(p.enclosing_form_action(&inside).as_deref(), Some("/go?token=1"));
        assert_eq!(p.enclosing_form_action(&outside), None);
    }

    #[test]
    fn test_meta_refresh_and_location() {
        let p = page(r#"<meta http-equiv="refresh" content="0; url=https://dest.example/f">"#);
        assert_eq!(p.meta_refresh().as_deref(), Some("https://dest.example/f"));
        assert_eq!(
            location_assignment("window.location.href = '/file/1';"),
            Some("/file/1")
        );
    }

    #[test]
    fn test_join_relative_and_entities() {
        let p = page("");
        assert_eq!(
            p.join("/file?a=1&amp;b=2").unwrap().as_str(),
            "https://host.example/file?a=1&b=2"
        );
        assert_eq!(p.join("next").unwrap().as_str(), "https://host.example/drive/next");
    }
}
