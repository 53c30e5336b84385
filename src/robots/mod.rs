//! robots.txt and sitemap discovery.
//!
//! Ported from the original crawler's `_load_robots`/`_load_sitemap_urls`
//! pair: fetch `robots.txt`, evaluate its directives with the `robotstxt`
//! crate (as seen elsewhere in the retrieved corpus), follow any declared
//! `Sitemap:` URLs (falling back to the conventional `/sitemap.xml`), and
//! parse sitemap XML (including one level of sitemap-index recursion) with
//! `quick-xml`.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::Client;
use robotstxt::DefaultMatcher;
use tracing::{debug, warn};

const USER_AGENT: &str = "llmstxt-crawler";
const MAX_SITEMAP_INDEX_DEPTH: u32 = 2;

#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    robots_txt: Option<String>,
    pub sitemap_urls: Vec<String>,
}

impl RobotsRules {
    /// Returns true when the rules permit `url` for the crawler's user agent.
    /// Absence of a `robots.txt` is treated as "allow everything".
    #[must_use]
    pub fn is_allowed(&self, url: &str) -> bool {
        match &self.robots_txt {
            Some(content) => {
                DefaultMatcher::default().one_agent_allowed_by_robots(content, USER_AGENT, url)
            }
            None => true,
        }
    }
}

/// Fetch and parse `scheme://host/robots.txt`, returning empty (permissive)
/// rules on any fetch failure rather than blocking the crawl.
pub async fn load_robots(client: &Client, root_url: &str) -> RobotsRules {
    let Ok(parsed) = url::Url::parse(root_url) else {
        return RobotsRules::default();
    };
    let robots_url = format!(
        "{}://{}/robots.txt",
        parsed.scheme(),
        parsed.host_str().unwrap_or_default()
    );

    let content = match client.get(&robots_url).send().await {
        Ok(resp) if resp.status().is_success() => resp.text().await.ok(),
        Ok(resp) => {
            debug!(status = %resp.status(), robots_url, "robots.txt not available");
            None
        }
        Err(e) => {
            warn!(error = %e, robots_url, "failed to fetch robots.txt");
            None
        }
    };

    let sitemap_urls = content
        .as_deref()
        .map(extract_sitemap_directives)
        .unwrap_or_default();

    RobotsRules {
        robots_txt: content,
        sitemap_urls,
    }
}

fn extract_sitemap_directives(robots_txt: &str) -> Vec<String> {
    robots_txt
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line
                .strip_prefix("Sitemap:")
                .or_else(|| line.strip_prefix("sitemap:"))?;
            Some(rest.trim().to_string())
        })
        .collect()
}

/// Fetch and parse every sitemap URL declared in `rules`, falling back to the
/// conventional `/sitemap.xml` when none were declared. Sitemap indexes are
/// followed up to [`MAX_SITEMAP_INDEX_DEPTH`] levels deep. Truncated to
/// `max_pages` URLs.
pub async fn load_sitemap_urls(
    client: &Client,
    root_url: &str,
    rules: &RobotsRules,
    max_pages: usize,
) -> Vec<String> {
    let mut roots = rules.sitemap_urls.clone();
    if roots.is_empty() {
        if let Ok(parsed) = url::Url::parse(root_url) {
            roots.push(format!(
                "{}://{}/sitemap.xml",
                parsed.scheme(),
                parsed.host_str().unwrap_or_default()
            ));
        }
    }

    let mut urls = Vec::new();
    for sitemap_url in roots {
        fetch_sitemap_recursive(client, &sitemap_url, 0, &mut urls, max_pages).await;
        if urls.len() >= max_pages {
            break;
        }
    }
    urls.truncate(max_pages);
    urls
}

async fn fetch_sitemap_recursive(
    client: &Client,
    sitemap_url: &str,
    depth: u32,
    out: &mut Vec<String>,
    max_pages: usize,
) {
    if depth > MAX_SITEMAP_INDEX_DEPTH || out.len() >= max_pages {
        return;
    }

    let body = match client.get(sitemap_url).send().await {
        Ok(resp) if resp.status().is_success() => match resp.text().await {
            Ok(text) => text,
            Err(_) => return,
        },
        _ => return,
    };

    let (child_sitemaps, locs) = parse_sitemap_xml(&body);

    for loc in locs {
        out.push(loc);
        if out.len() >= max_pages {
            return;
        }
    }

    for child in child_sitemaps {
        Box::pin(fetch_sitemap_recursive(client, &child, depth + 1, out, max_pages)).await;
        if out.len() >= max_pages {
            return;
        }
    }
}

/// Parse sitemap XML, returning `(nested_sitemap_urls, page_urls)`.
/// Handles both `<urlset>` and `<sitemapindex>` documents by tracking which
/// enclosing tag (`<sitemap>` vs `<url>`) each `<loc>` belongs to.
fn parse_sitemap_xml(xml: &str) -> (Vec<String>, Vec<String>) {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut sitemaps = Vec::new();
    let mut urls = Vec::new();
    let mut in_sitemap_entry = false;
    let mut in_url_entry = false;
    let mut in_loc = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"sitemap" => in_sitemap_entry = true,
                b"url" => in_url_entry = true,
                b"loc" => in_loc = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"sitemap" => in_sitemap_entry = false,
                b"url" => in_url_entry = false,
                b"loc" => in_loc = false,
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if in_loc {
                    if let Ok(text) = t.unescape() {
                        let text = text.trim().to_string();
                        if !text.is_empty() {
                            if in_sitemap_entry {
                                sitemaps.push(text);
                            } else if in_url_entry {
                                urls.push(text);
                            }
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(error = %e, "malformed sitemap XML");
                break;
            }
            _ => {}
        }
    }

    (sitemaps, urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_sitemap_directives_case_insensitively() {
        let robots = "User-agent: *\nDisallow: /admin\nSitemap: https://example.com/sitemap.xml\nsitemap: https://example.com/sitemap2.xml\n";
        assert_eq!(
            extract_sitemap_directives(robots),
            vec![
                "https://example.com/sitemap.xml".to_string(),
                "https://example.com/sitemap2.xml".to_string(),
            ]
        );
    }

    #[test]
    fn parses_urlset_locs() {
        let xml = r#"<?xml version="1.0"?>
        <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
            <url><loc>https://example.com/a</loc></url>
            <url><loc>https://example.com/b</loc></url>
        </urlset>"#;
        let (sitemaps, urls) = parse_sitemap_xml(xml);
        assert!(sitemaps.is_empty());
        assert_eq!(urls, vec!["https://example.com/a", "https://example.com/b"]);
    }

    #[test]
    fn parses_sitemap_index_locs() {
        let xml = r#"<?xml version="1.0"?>
        <sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
            <sitemap><loc>https://example.com/sitemap-a.xml</loc></sitemap>
            <sitemap><loc>https://example.com/sitemap-b.xml</loc></sitemap>
        </sitemapindex>"#;
        let (sitemaps, urls) = parse_sitemap_xml(xml);
        assert!(urls.is_empty());
        assert_eq!(
            sitemaps,
            vec![
                "https://example.com/sitemap-a.xml".to_string(),
                "https://example.com/sitemap-b.xml".to_string(),
            ]
        );
    }

    #[test]
    fn default_rules_allow_everything() {
        let rules = RobotsRules::default();
        assert!(rules.is_allowed("https://example.com/anything"));
    }
}
