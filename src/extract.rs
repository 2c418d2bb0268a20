use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::content::ContentUnit;
use crate::types::{DiscoveredFrom, Subject, UnitRef};

pub const DEFAULT_BASE_URL: &str = "https://www.facebook.com";

const MIN_ID_LEN: usize = 3;
const MAX_ID_LEN: usize = 50;

/// Paths that never lead to an advertiser page.
const DENIED_PREFIXES: &[&str] = &[
    "/ads",
    "/help",
    "/login",
    "/policies",
    "/privacy",
    "/settings",
    "/business",
    "/l.php",
    "/watch",
    "/groups",
    "/events",
    "/marketplace",
    "/hashtag",
    "/stories",
];

const RESERVED_NAMES: &[&str] = &[
    "home",
    "pages",
    "profile.php",
    "photo",
    "photos",
    "video",
    "videos",
    "reel",
    "reels",
    "share",
    "sharer",
    "permalink.php",
    "people",
    "search",
];

/// Domain-looking token in free text, e.g. `STORE1.COM`.
static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b((?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+(?:com|net|org|shop|store|co|io|biz|info))\b",
    )
    .expect("valid regex")
});

/// Pulls advertiser identifiers out of a content unit.
#[derive(Debug, Clone)]
pub struct SubjectExtractor {
    base: Url,
    host: String,
}

impl SubjectExtractor {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base = Url::parse(base_url)?;
        let host = base
            .host_str()
            .map(strip_www)
            .ok_or_else(|| anyhow::anyhow!("base url has no host: {base_url}"))?
            .to_ascii_lowercase();
        Ok(Self { base, host })
    }

    /// Link-derived identifiers first (document order, deduplicated); the text
    /// fallback runs only when no link qualifies.
    pub fn extract(&self, unit: &dyn ContentUnit, unit_ref: UnitRef) -> Vec<Subject> {
        let mut seen = HashSet::new();
        let mut subjects = Vec::new();

        for href in unit.links() {
            let Some(id) = self.identifier_from_link(&href) else {
                continue;
            };
            if seen.insert(id.clone()) {
                subjects.push(Subject {
                    id,
                    unit: unit_ref,
                    discovered_from: DiscoveredFrom::Link,
                });
            }
        }

        if subjects.is_empty() {
            if let Some(id) = self.identifier_from_text(&unit.text()) {
                subjects.push(Subject {
                    id,
                    unit: unit_ref,
                    discovered_from: DiscoveredFrom::Text,
                });
            }
        }

        subjects
    }

    fn identifier_from_link(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            return None;
        }
        let url = self.base.join(href).ok()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return None;
        }
        let host = url.host_str().map(strip_www)?.to_ascii_lowercase();
        if host != self.host {
            return None;
        }

        let path = url.path();
        if DENIED_PREFIXES.iter().any(|p| has_path_prefix(path, p)) {
            return None;
        }

        let segment = path.trim_start_matches('/').split('/').next()?;
        if RESERVED_NAMES.contains(&segment.to_ascii_lowercase().as_str()) {
            return None;
        }
        valid_identifier(segment).then(|| segment.to_string())
    }

    fn identifier_from_text(&self, text: &str) -> Option<String> {
        let caps = DOMAIN_RE.captures(text)?;
        let domain = caps.get(1)?.as_str().to_ascii_lowercase();
        if strip_www(&domain) == self.host {
            return None;
        }
        valid_length(&domain).then_some(domain)
    }
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

fn has_path_prefix(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn valid_length(id: &str) -> bool {
    (MIN_ID_LEN..=MAX_ID_LEN).contains(&id.chars().count())
}

fn valid_identifier(id: &str) -> bool {
    valid_length(id) && !id.chars().all(|c| c.is_ascii_digit())
}
