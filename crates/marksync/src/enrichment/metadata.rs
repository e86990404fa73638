//! Page metadata extraction.

use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use url::Url;

/// Longest summary kept, in characters.
pub const MAX_SUMMARY_CHARS: usize = 2000;

/// Elements whose text never counts toward the summary.
const NON_CONTENT: &[&str] = &[
    "script", "style", "noscript", "nav", "footer", "header", "aside", "template",
];

static OG_TITLE: LazyLock<Selector> = LazyLock::new(|| selector("meta[property='og:title']"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static OG_DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| selector("meta[property='og:description']"));
static DESCRIPTION: LazyLock<Selector> = LazyLock::new(|| selector("meta[name='description']"));
static CANONICAL: LazyLock<Selector> = LazyLock::new(|| selector("link[rel='canonical']"));
static OG_URL: LazyLock<Selector> = LazyLock::new(|| selector("meta[property='og:url']"));
static BODY: LazyLock<Selector> = LazyLock::new(|| selector("body"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("Invalid metadata selector")
}

/// Metadata pulled from one HTML page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub canonical_url: Option<String>,
    pub summary: Option<String>,
}

/// Extract title, description and canonical URL from `html`.
///
/// Open Graph tags win over `<title>` and `meta[name=description]`. The
/// canonical URL comes from `link[rel=canonical]`, then `og:url`, then
/// `final_url`, resolved against `final_url`. With `with_summary`, the visible
/// body text is collapsed and truncated into a summary.
pub fn extract_metadata(html: &str, final_url: &str, with_summary: bool) -> PageMetadata {
    let document = Html::parse_document(html);
    let base = Url::parse(final_url).ok();

    let title = meta_content(&document, &OG_TITLE).or_else(|| {
        document
            .select(&TITLE)
            .next()
            .map(|el| el.text().collect::<String>())
            .and_then(non_empty)
    });

    let description =
        meta_content(&document, &OG_DESCRIPTION).or_else(|| meta_content(&document, &DESCRIPTION));

    let canonical_url = document
        .select(&CANONICAL)
        .find_map(|el| el.value().attr("href"))
        .map(str::to_string)
        .or_else(|| meta_content(&document, &OG_URL))
        .and_then(|href| resolve(base.as_ref(), &href))
        .or_else(|| base.as_ref().map(Url::to_string));

    let summary = if with_summary {
        summarize(&document)
    } else {
        None
    };

    PageMetadata {
        title,
        description,
        canonical_url,
        summary,
    }
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .filter_map(|el| el.value().attr("content"))
        .find_map(|c| non_empty(c.to_string()))
}

fn non_empty(s: String) -> Option<String> {
    let collapsed = collapse_whitespace(&s);
    (!collapsed.is_empty()).then_some(collapsed)
}

fn resolve(base: Option<&Url>, href: &str) -> Option<String> {
    match base {
        Some(base) => base.join(href).ok().map(|u| u.to_string()),
        None => Url::parse(href).ok().map(|u| u.to_string()),
    }
}

fn summarize(document: &Html) -> Option<String> {
    let root = document
        .select(&BODY)
        .next()
        .unwrap_or_else(|| document.root_element());

    let text: Vec<&str> = root
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node.ancestors().any(|a| {
                ElementRef::wrap(a).is_some_and(|el| NON_CONTENT.contains(&el.value().name()))
            });
            (!hidden).then_some(&**text)
        })
        .collect();

    let collapsed = collapse_whitespace(&text.join(" "));
    if collapsed.is_empty() {
        return None;
    }
    Some(truncate_chars(&collapsed, MAX_SUMMARY_CHARS))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max_chars` characters on a char boundary.
fn truncate_chars(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((end, _)) => content[..end].to_string(),
        None => content.to_string(),
    }
}
