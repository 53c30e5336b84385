//! Page categorization and relevance scoring.
//!
//! Ported 1:1 from the original `categorizer.py`: the ordered regex→category
//! table, the per-category base scores, and the relevance formula are
//! unchanged in meaning.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static CATEGORY_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"/docs?(/|$)", "Documentation"),
        (r"/documentation(/|$)", "Documentation"),
        (r"/api(-ref|reference|docs)?(/|$)", "API Reference"),
        (r"/guide", "Guides"),
        (r"/tutorial", "Guides"),
        (r"/getting[_-]?started", "Getting Started"),
        (r"/quick[_-]?start", "Getting Started"),
        (r"/install", "Getting Started"),
        (r"/setup", "Getting Started"),
        (r"/blog(/|$)", "Blog"),
        (r"/news(/|$)", "Blog"),
        (r"/example", "Examples"),
        (r"/demo", "Examples"),
        (r"/sample", "Examples"),
        (r"/faq", "FAQ"),
        (r"/changelog", "Changelog"),
        (r"/release", "Changelog"),
        (r"/about", "About"),
        (r"/team", "About"),
        (r"/contact", "About"),
        (r"/pricing", "About"),
    ]
    .into_iter()
    .map(|(pattern, category)| (Regex::new(pattern).expect("category pattern must compile"), category))
    .collect()
});

fn category_base_score(category: &str) -> f64 {
    match category {
        "Getting Started" => 0.9,
        "Documentation" => 0.85,
        "API Reference" => 0.8,
        "Guides" => 0.75,
        "Examples" => 0.7,
        "Core Pages" => 0.6,
        "FAQ" => 0.5,
        "Changelog" | "About" => 0.4,
        "Blog" => 0.35,
        _ => 0.3,
    }
}

/// Assign a category label to a page based on its URL path and crawl depth.
#[must_use]
pub fn categorize_page(url: &str, depth: u32) -> &'static str {
    let path = Url::parse(url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_default();

    for (pattern, category) in CATEGORY_PATTERNS.iter() {
        if pattern.is_match(&path) {
            return category;
        }
    }
    if depth <= 1 { "Core Pages" } else { "Other" }
}

/// Compute a relevance score in `[0, 1]`, rounded to 2 decimals.
#[must_use]
pub fn compute_relevance(url: &str, depth: u32, category: &str, in_sitemap: bool) -> f64 {
    let base = category_base_score(category);
    let depth_penalty = f64::from(depth) * 0.1;
    let sitemap_bonus = if in_sitemap { 0.1 } else { 0.0 };

    let path = Url::parse(url).map(|u| u.path().to_string()).unwrap_or_default();
    let path_segments = path.split('/').count().saturating_sub(1);
    let length_penalty = ((path_segments as f64) - 3.0).max(0.0) * 0.05;

    let score = base - depth_penalty + sitemap_bonus - length_penalty;
    (score.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_by_path_pattern() {
        assert_eq!(categorize_page("https://x.com/docs/intro", 1), "Documentation");
        assert_eq!(categorize_page("https://x.com/api/v1", 2), "API Reference");
        assert_eq!(categorize_page("https://x.com/blog/post-1", 3), "Blog");
        assert_eq!(categorize_page("https://x.com/getting-started", 1), "Getting Started");
    }

    #[test]
    fn falls_back_to_core_pages_or_other_by_depth() {
        assert_eq!(categorize_page("https://x.com/", 0), "Core Pages");
        assert_eq!(categorize_page("https://x.com/random/deep/path", 4), "Other");
    }

    #[test]
    fn relevance_is_clamped_and_rounded() {
        let score = compute_relevance("https://x.com/docs/a/b/c/d", 5, "Documentation", false);
        assert!((0.0..=1.0).contains(&score));
        assert_eq!(score, (score * 100.0).round() / 100.0);
    }

    #[test]
    fn sitemap_bonus_increases_score() {
        let without = compute_relevance("https://x.com/docs", 1, "Documentation", false);
        let with = compute_relevance("https://x.com/docs", 1, "Documentation", true);
        assert!(with > without);
    }
}
