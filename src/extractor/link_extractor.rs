use scraper::{ElementRef, Html, Selector};
use std::fmt;
use std::sync::OnceLock;
use url::Url;

/// Element kinds whose `href`/`src` are collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTag {
    Anchor,
    Link,
    Script,
    Image,
}

impl LinkTag {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "a" => Some(LinkTag::Anchor),
            "link" => Some(LinkTag::Link),
            "script" => Some(LinkTag::Script),
            "img" => Some(LinkTag::Image),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkTag::Anchor => "a",
            LinkTag::Link => "link",
            LinkTag::Script => "script",
            LinkTag::Image => "img",
        }
    }
}

impl fmt::Display for LinkTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reference found in a document.
#[derive(Debug, Clone)]
pub struct Reference<'a> {
    /// Reference resolved against the document URL, or the raw value when it
    /// cannot be resolved
    pub url: String,
    /// Attribute value as written in the markup
    pub raw: &'a str,
    pub source_url: &'a str,
    pub tag: LinkTag,
    pub element: ElementRef<'a>,
}

/// Owned, reference-only view of a [`Reference`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    pub url: String,
    pub raw: String,
    pub tag: LinkTag,
}

impl From<&Reference<'_>> for ExtractedLink {
    fn from(reference: &Reference<'_>) -> Self {
        Self {
            url: reference.url.clone(),
            raw: reference.raw.to_string(),
            tag: reference.tag,
        }
    }
}

/// A parsed document. [`ParsedDocument::references`] can be iterated any number
/// of times and always yields the same sequence.
pub struct ParsedDocument {
    html: Html,
    source_url: String,
    base: Option<Url>,
}

impl ParsedDocument {
    pub fn parse(raw_html: &str, source_url: &str) -> Self {
        Self {
            html: Html::parse_document(raw_html),
            source_url: source_url.to_string(),
            base: Url::parse(source_url).ok(),
        }
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Lazily walks `a`, `link`, `script` and `img` elements in document order.
    /// The value is `href` when present, else `src`; bare `#` is skipped.
    pub fn references(&self) -> impl Iterator<Item = Reference<'_>> + '_ {
        static SELECTOR: OnceLock<Selector> = OnceLock::new();
        let selector = SELECTOR.get_or_init(|| {
            Selector::parse("a, link, script, img").expect("static link selector")
        });

        self.html.select(selector).filter_map(move |element| {
            let tag = LinkTag::from_name(element.value().name())?;
            let raw = reference_value(&element)?;
            if raw == "#" {
                return None;
            }

            Some(Reference {
                url: self.resolve(raw),
                raw,
                source_url: &self.source_url,
                tag,
                element,
            })
        })
    }

    /// Owned copies of [`ParsedDocument::references`].
    pub fn links(&self) -> Vec<ExtractedLink> {
        self.references().map(|r| ExtractedLink::from(&r)).collect()
    }

    fn resolve(&self, raw: &str) -> String {
        let resolved = match &self.base {
            Some(base) => base.join(raw),
            None => Url::parse(raw),
        };
        resolved.map(|u| u.to_string()).unwrap_or_else(|_| raw.to_string())
    }
}

fn reference_value<'a>(element: &ElementRef<'a>) -> Option<&'a str> {
    let value = element.value();
    value
        .attr("href")
        .filter(|href| !href.trim().is_empty())
        .or_else(|| value.attr("src"))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
