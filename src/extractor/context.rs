//! Human-readable "where does this link live" snippets for findings.

use scraper::ElementRef;
use std::fmt::Display;

const CONTEXT_TAGS: [&str; 9] = ["p", "div", "li", "h1", "h2", "h3", "h4", "h5", "h6"];
const MAX_CONTEXT_CHARS: usize = 200;
const KEPT_CHARS: usize = 100;

/// Describe `link` by its nearest block-level ancestor.
///
/// ```text
/// Link: <a href="/x">x</a>
/// Context: <p>See <a href="/x">x</a> for details</p>
/// ```
pub fn link_context(link: ElementRef<'_>) -> String {
    let context = link
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|ancestor| CONTEXT_TAGS.contains(&ancestor.value().name()))
        .map(|ancestor| ancestor.html())
        .unwrap_or_else(|| link.text().collect::<String>());

    format!("Link: {}\nContext: {}", link.html(), truncate_middle(&context))
}

/// Context text used when the link element cannot be described.
pub fn context_error(err: impl Display) -> String {
    format!("Error getting context: {}", err)
}

/// Keep the first and last 100 characters of anything longer than 200.
pub fn truncate_middle(text: &str) -> String {
    let len = text.chars().count();
    if len <= MAX_CONTEXT_CHARS {
        return text.to_string();
    }

    let head: String = text.chars().take(KEPT_CHARS).collect();
    let tail: String = text.chars().skip(len - KEPT_CHARS).collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ParsedDocument;

    fn first_link_context(html: &str) -> String {
        let doc = ParsedDocument::parse(html, "https://site.test/");
        let reference = doc.references().next().expect("document has a link");
        link_context(reference.element)
    }

    #[test]
    fn test_uses_nearest_meaningful_ancestor() {
        let context = first_link_context(
            r#"<section><ul><li>Item <a href="/x">x</a></li></ul></section>"#,
        );
        assert_eq!(
            context,
            "Link: <a href=\"/x\">x</a>\nContext: <li>Item <a href=\"/x\">x</a></li>"
        );
    }

    #[test]
    fn test_heading_ancestor() {
        let context = first_link_context(r#"<h3><a href="/docs">Docs</a></h3>"#);
        assert!(context.ends_with("Context: <h3><a href=\"/docs\">Docs</a></h3>"));
    }

    #[test]
    fn test_falls_back_to_link_text() {
        let context = first_link_context(r#"<span><a href="/x">Read more</a></span>"#);
        assert_eq!(context, "Link: <a href=\"/x\">Read more</a>\nContext: Read more");
    }

    #[test]
    fn test_empty_text_without_ancestor() {
        let context = first_link_context(r#"<img src="/banner">"#);
        assert_eq!(context, "Link: <img src=\"/banner\">\nContext: ");
    }

    #[test]
    fn test_truncates_long_context_keeping_both_ends() {
        let anchor = r#"<a href="https://site.test/gone">gone</a>"#;
        let filler = "x".repeat(300 - "<div>".len() - "</div>".len() - anchor.len());
        let ancestor = format!("<div>{}{}</div>", anchor, filler);
        assert_eq!(ancestor.chars().count(), 300);

        let context = first_link_context(&ancestor);
        let (_, rendered) = context.split_once("\nContext: ").unwrap();

        assert_eq!(rendered.chars().count(), 203);
        assert_eq!(rendered, format!("{}...{}", &ancestor[..100], &ancestor[200..]));
    }

    #[test]
    fn test_truncate_counts_characters_not_bytes() {
        let text = "é".repeat(250);
        let truncated = truncate_middle(&text);
        assert_eq!(truncated.chars().count(), 203);
        assert!(truncated.starts_with("éé"));
    }

    #[test]
    fn test_short_text_is_untouched() {
        assert_eq!(truncate_middle("short"), "short");
        assert_eq!(truncate_middle(&"y".repeat(200)).len(), 200);
    }

    #[test]
    fn test_context_error_message() {
        assert_eq!(context_error("boom"), "Error getting context: boom");
    }
}
