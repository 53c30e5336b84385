//! HTML metadata extraction and content fingerprinting.
//!
//! Ported field-for-field from the original crawler's `extract_metadata`:
//! title/description/heading/main-text extraction rules and the layered
//! SHA-256 fingerprint scheme (`metadata_hash`, `headings_hash`,
//! `text_hash`, and their composite `content_hash`) are unchanged in
//! meaning. Parsing uses `scraper` rather than a server-side DOM, matching
//! how this codebase's static-HTML tooling already depends on it.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use url::Url;

const MAX_HEADINGS: usize = 20;
const MAX_DESCRIPTION_LEN: usize = 300;
const MIN_DESCRIPTION_CANDIDATE_LEN: usize = 50;
const MAX_TEXT_LEN: usize = 50_000;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct PageMetadata {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content_hash: String,
    pub metadata_hash: String,
    pub headings_hash: String,
    pub text_hash: String,
    pub links: Vec<String>,
    pub canonical_url: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub http_status: u16,
    pub not_modified: bool,
}

/// Extract title, description, headings, main text, links, canonical URL,
/// and the four SHA-256 fingerprints from a page's raw HTML.
#[must_use]
pub fn extract_metadata(
    url: &str,
    html: &str,
    etag: Option<String>,
    last_modified: Option<String>,
    http_status: u16,
) -> PageMetadata {
    let document = Html::parse_document(html);

    let title = extract_title(&document);
    let description = extract_description(&document);
    let headings = extract_headings(&document);
    let main_text = extract_main_text(&document);
    let links = extract_links(&document, url);
    let canonical_url = extract_canonical_url(&document, url);

    let metadata_hash = sha256_hex(&format!(
        "{}{}",
        title.as_deref().unwrap_or(""),
        description.as_deref().unwrap_or("")
    ));
    let headings_hash = sha256_hex(&headings.join("||"));
    let text_hash = sha256_hex(&main_text);
    let content_hash = sha256_hex(&format!("{metadata_hash}{headings_hash}{text_hash}"));

    PageMetadata {
        url: url.to_string(),
        title,
        description,
        content_hash,
        metadata_hash,
        headings_hash,
        text_hash,
        links,
        canonical_url,
        etag,
        last_modified,
        http_status,
        not_modified: false,
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

fn text_of(element: scraper::ElementRef) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

fn extract_title(document: &Html) -> Option<String> {
    static OG_TITLE: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"meta[property="og:title"]"#).expect("valid selector"));
    static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("valid selector"));
    static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").expect("valid selector"));

    if let Some(el) = document.select(&OG_TITLE).next() {
        if let Some(content) = el.value().attr("content") {
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    if let Some(el) = document.select(&TITLE).next() {
        let text = text_of(el);
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    if let Some(el) = document.select(&H1).next() {
        let text = text_of(el).trim().to_string();
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

fn extract_description(document: &Html) -> Option<String> {
    static OG_DESC: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"meta[property="og:description"]"#).expect("valid selector"));
    static META_DESC: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"meta[name="description"]"#).expect("valid selector"));
    static P: Lazy<Selector> = Lazy::new(|| Selector::parse("p").expect("valid selector"));

    if let Some(el) = document.select(&OG_DESC).next() {
        if let Some(content) = el.value().attr("content") {
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    if let Some(el) = document.select(&META_DESC).next() {
        if let Some(content) = el.value().attr("content") {
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    for el in document.select(&P) {
        let text = text_of(el).trim().to_string();
        if text.chars().count() >= MIN_DESCRIPTION_CANDIDATE_LEN {
            return Some(text.chars().take(MAX_DESCRIPTION_LEN).collect());
        }
    }
    None
}

fn extract_headings(document: &Html) -> Vec<String> {
    static HEADINGS: Lazy<Selector> =
        Lazy::new(|| Selector::parse("h1, h2, h3").expect("valid selector"));

    document
        .select(&HEADINGS)
        .filter_map(|el| {
            let text = text_of(el).trim().to_string();
            (!text.is_empty()).then_some(text)
        })
        .take(MAX_HEADINGS)
        .collect()
}

/// The candidate content root: `<main>`, else `<article>`, else
/// `[role=main]`, else `<body>`, else the whole document.
fn extract_main_text(document: &Html) -> String {
    static MAIN: Lazy<Selector> = Lazy::new(|| Selector::parse("main").expect("valid selector"));
    static ARTICLE: Lazy<Selector> =
        Lazy::new(|| Selector::parse("article").expect("valid selector"));
    static ROLE_MAIN: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"[role="main"]"#).expect("valid selector"));
    static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("valid selector"));
    static CONTENT_TAGS: Lazy<Selector> =
        Lazy::new(|| Selector::parse("h1, h2, h3, p, li, pre, code, td").expect("valid selector"));

    let candidate = document
        .select(&MAIN)
        .next()
        .or_else(|| document.select(&ARTICLE).next())
        .or_else(|| document.select(&ROLE_MAIN).next())
        .or_else(|| document.select(&BODY).next());

    let raw = if let Some(candidate) = candidate {
        let chunks: Vec<String> = candidate
            .select(&CONTENT_TAGS)
            .filter_map(|el| {
                let text = text_of(el).trim().to_string();
                (!text.is_empty()).then_some(text)
            })
            .collect();
        if chunks.is_empty() {
            text_of(candidate)
        } else {
            chunks.join(" ")
        }
    } else {
        document.root_element().text().collect::<Vec<_>>().join(" ")
    };

    let normalized = WHITESPACE.replace_all(raw.trim(), " ").to_lowercase();
    normalized.chars().take(MAX_TEXT_LEN).collect()
}

fn canonicalize_absolute(base: &str, href: &str) -> Option<String> {
    let base_url = Url::parse(base).ok()?;
    let absolute = base_url.join(href).ok()?;
    if !matches!(absolute.scheme(), "http" | "https") || absolute.host_str().is_none() {
        return None;
    }
    let path = absolute.path();
    let path = if path.len() > 1 && path.ends_with('/') {
        &path[..path.len() - 1]
    } else if path.is_empty() {
        "/"
    } else {
        path
    };
    Some(format!(
        "{}://{}{}",
        absolute.scheme().to_lowercase(),
        absolute.host_str()?.to_lowercase(),
        path
    ))
}

fn extract_canonical_url(document: &Html, base_url: &str) -> Option<String> {
    static CANONICAL: Lazy<Selector> =
        Lazy::new(|| Selector::parse(r#"link[rel~="canonical"]"#).expect("valid selector"));

    let href = document
        .select(&CANONICAL)
        .next()
        .and_then(|el| el.value().attr("href"))?;
    canonicalize_absolute(base_url, href)
}

fn extract_links(document: &Html, base_url: &str) -> Vec<String> {
    static ANCHORS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("valid selector"));

    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();
    for el in document.select(&ANCHORS) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let Some(clean) = canonicalize_absolute(base_url, href) else {
            continue;
        };
        if seen.insert(clean.clone()) {
            links.push(clean);
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_HTML: &str = r#"
        <html>
        <head>
            <title>Example Title</title>
            <meta name="description" content="A sufficiently long meta description that exceeds fifty characters easily.">
            <link rel="canonical" href="/docs/guide/">
        </head>
        <body>
            <main>
                <h1>Heading One</h1>
                <p>Some body text.</p>
                <a href="/docs/other">Other page</a>
                <a href="https://external.com/page">External</a>
            </main>
        </body>
        </html>
    "#;

    #[test]
    fn extracts_title_description_and_canonical() {
        let meta = extract_metadata("https://example.com/docs/guide", SAMPLE_HTML, None, None, 200);
        assert_eq!(meta.title.as_deref(), Some("Example Title"));
        assert!(meta.description.is_some());
        assert_eq!(
            meta.canonical_url.as_deref(),
            Some("https://example.com/docs/guide")
        );
    }

    #[test]
    fn content_hash_is_composite_of_the_three_layers() {
        let meta = extract_metadata("https://example.com/docs/guide", SAMPLE_HTML, None, None, 200);
        let expected = sha256_hex(&format!(
            "{}{}{}",
            meta.metadata_hash, meta.headings_hash, meta.text_hash
        ));
        assert_eq!(meta.content_hash, expected);
    }

    #[test]
    fn links_are_absolute_deduplicated_and_in_host_only() {
        let meta = extract_metadata("https://example.com/docs/guide", SAMPLE_HTML, None, None, 200);
        assert!(meta.links.contains(&"https://example.com/docs/other".to_string()));
        assert!(meta.links.contains(&"https://external.com/page".to_string()));
        assert_eq!(meta.links.len(), 2);
    }

    #[test]
    fn same_html_yields_same_fingerprints() {
        let a = extract_metadata("https://example.com/x", SAMPLE_HTML, None, None, 200);
        let b = extract_metadata("https://example.com/x", SAMPLE_HTML, None, None, 200);
        assert_eq!(a.content_hash, b.content_hash);
    }
}
