//! `llms.txt` artifact composition.
//!
//! `FallbackComposer` is ported 1:1 from the original `generate_llms_txt`:
//! the fixed section order, the optional-section relevance cutoff, and the
//! Markdown bullet format are unchanged in meaning. `ArtifactComposer` is a
//! trait so an LLM-backed composer (mirroring the original's
//! `generate_llms_txt_with_llm`) can be swapped in without touching callers.

use sha2::{Digest, Sha256};

use crate::db::{Page, Site};

const SECTION_ORDER: &[&str] = &[
    "Getting Started",
    "Documentation",
    "API Reference",
    "Guides",
    "Examples",
    "Core Pages",
    "FAQ",
    "Changelog",
    "About",
    "Blog",
    "Other",
];

const OPTIONAL_THRESHOLD: f64 = 0.3;

/// Result of composing an artifact: rendered content, its SHA-256 hash, and
/// an optional site description surfaced by the composer (an LLM-backed
/// composer may derive one; the fallback composer never does).
pub struct ComposedArtifact {
    pub content: String,
    pub content_hash: String,
    pub site_description: Option<String>,
}

/// Pluggable `llms.txt` renderer. Implementations must be deterministic
/// given the same `(site, pages)` input so `content_hash` is a reliable
/// change signal.
pub trait ArtifactComposer: Send + Sync {
    fn compose(&self, site: &Site, pages: &[Page]) -> ComposedArtifact;
}

/// The always-available composer: groups active pages by category into a
/// fixed section order, with a relevance-gated "Optional" section below
/// [`OPTIONAL_THRESHOLD`].
pub struct FallbackComposer;

impl ArtifactComposer for FallbackComposer {
    fn compose(&self, site: &Site, pages: &[Page]) -> ComposedArtifact {
        let mut lines = Vec::new();
        let mut seen = std::collections::HashSet::new();

        let title = site.title.clone().unwrap_or_else(|| site.domain.clone());
        lines.push(format!("# {title}"));
        if let Some(description) = &site.description {
            lines.push(format!("\n> {description}"));
        }
        lines.push(String::new());

        let mut sorted: Vec<&Page> = pages.iter().collect();
        sorted.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap_or(std::cmp::Ordering::Equal));

        let mut categorized: std::collections::HashMap<&str, Vec<&Page>> = std::collections::HashMap::new();
        let mut optional_pages: Vec<&Page> = Vec::new();

        for page in sorted {
            if !seen.insert(page.url.clone()) {
                continue;
            }
            if page.relevance_score < OPTIONAL_THRESHOLD {
                optional_pages.push(page);
            } else {
                categorized.entry(page.category.as_str()).or_default().push(page);
            }
        }

        for section in SECTION_ORDER {
            let Some(section_pages) = categorized.get(section) else {
                continue;
            };
            if section_pages.is_empty() {
                continue;
            }
            lines.push(format!("## {section}"));
            lines.push(String::new());
            for page in section_pages {
                lines.push(render_bullet(page));
            }
            lines.push(String::new());
        }

        if !optional_pages.is_empty() {
            lines.push("## Optional".to_string());
            lines.push(String::new());
            for page in &optional_pages {
                lines.push(render_bullet(page));
            }
            lines.push(String::new());
        }

        let content = lines.join("\n");
        let content_hash = sha256_hex(&content);

        ComposedArtifact { content, content_hash, site_description: None }
    }
}

fn render_bullet(page: &Page) -> String {
    let desc = page.description.as_deref().map(|d| format!(": {d}")).unwrap_or_default();
    let label = page.title.as_deref().unwrap_or(&page.url);
    let safe_url = page.url.replace('(', "%28").replace(')', "%29");
    format!("- [{label}]({safe_url}){desc}")
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn site() -> Site {
        let now = Utc::now();
        Site {
            id: 1,
            url: "https://example.com".to_string(),
            domain: "example.com".to_string(),
            title: Some("Example".to_string()),
            description: Some("An example site".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    fn page(url: &str, category: &str, relevance: f64) -> Page {
        let now = Utc::now();
        Page {
            id: 1,
            site_id: 1,
            url: url.to_string(),
            canonical_url: None,
            title: Some(format!("Title for {url}")),
            description: None,
            content_hash: "h".to_string(),
            metadata_hash: "h".to_string(),
            headings_hash: "h".to_string(),
            text_hash: "h".to_string(),
            links_json: "[]".to_string(),
            etag: None,
            last_modified: None,
            http_status: 200,
            is_active: true,
            category: category.to_string(),
            relevance_score: relevance,
            depth: 0,
            first_seen_at: now,
            last_seen_at: now,
            last_checked_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn groups_sections_in_fixed_order_and_gates_optional() {
        let pages = vec![
            page("https://example.com/docs", "Documentation", 0.8),
            page("https://example.com/getting-started", "Getting Started", 0.9),
            page("https://example.com/low", "Other", 0.1),
        ];
        let composed = FallbackComposer.compose(&site(), &pages);
        let getting_started_pos = composed.content.find("## Getting Started").unwrap();
        let docs_pos = composed.content.find("## Documentation").unwrap();
        let optional_pos = composed.content.find("## Optional").unwrap();
        assert!(getting_started_pos < docs_pos);
        assert!(docs_pos < optional_pos);
    }

    #[test]
    fn content_hash_is_deterministic() {
        let pages = vec![page("https://example.com/a", "Documentation", 0.7)];
        let a = FallbackComposer.compose(&site(), &pages);
        let b = FallbackComposer.compose(&site(), &pages);
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn escapes_parentheses_in_urls() {
        let p = page("https://example.com/a(b)", "Documentation", 0.7);
        let bullet = render_bullet(&p);
        assert!(bullet.contains("%28b%29"));
    }
}
