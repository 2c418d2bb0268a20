use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info};

use crate::cache::{cache_key, ResultCache};
use crate::error::CountError;
use crate::service::{CountQuery, CountService};
use crate::types::{CheckResult, SearchParameters, Subject};

/// One way of finding a count in a response body. The first capture group
/// holds the number, possibly with thousands separators.
pub struct CountPattern {
    pub name: &'static str,
    pub regex: Regex,
}

/// Tried in order; the first pattern that matches wins.
pub static COUNT_PATTERNS: LazyLock<Vec<CountPattern>> = LazyLock::new(|| {
    let pattern = |name, re: &str| CountPattern {
        name,
        regex: Regex::new(re).expect("valid regex"),
    };
    vec![
        pattern(
            "results_phrase",
            r"(?i)~?\s*(\d[\d.,]*)\s+(?:results?|resultados|résultats|ergebnisse)\b",
        ),
        pattern("json_count", r#""count"\s*:\s*(\d+)"#),
        pattern("ads_phrase", r"(?i)~?\s*(\d[\d.,]*)\s+ads?\b"),
    ]
});

/// Strip `~` and `.`/`,` separators; `"~50.000"` becomes 50000.
pub fn normalize_number(raw: &str) -> Option<u64> {
    let digits: String = raw
        .trim()
        .trim_start_matches('~')
        .chars()
        .filter(|c| !matches!(c, '.' | ','))
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Count found by the first matching pattern, or 0 when none match.
pub fn parse_count(body: &str) -> u64 {
    for p in COUNT_PATTERNS.iter() {
        if let Some(raw) = p.regex.captures(body).and_then(|c| c.get(1)) {
            let count = normalize_number(raw.as_str()).unwrap_or(0);
            debug!(pattern = p.name, raw = raw.as_str(), count, "Count pattern matched");
            return count;
        }
    }
    0
}

/// Resolves a subject's ad count, cache first.
#[derive(Clone)]
pub struct RemoteCounter {
    cache: Arc<ResultCache>,
    service: Arc<dyn CountService>,
}

impl RemoteCounter {
    pub fn new(cache: Arc<ResultCache>, service: Arc<dyn CountService>) -> Self {
        Self { cache, service }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub async fn resolve_count(
        &self,
        subject: &Subject,
        params: &SearchParameters,
    ) -> Result<CheckResult, CountError> {
        let key = cache_key(&subject.id, params);
        if let Some(hit) = self.cache.get(&key) {
            debug!(subject = %subject.id, count = hit.result.count, "Cache hit");
            return Ok(hit.result);
        }

        let query = CountQuery {
            subject: subject.id.clone(),
            region: params.region().to_string(),
            start: params.start().to_string(),
            end: params.end().to_string(),
        };
        let resp = self
            .service
            .fetch(&query)
            .await
            .map_err(|source| CountError::Service {
                subject: subject.id.clone(),
                source,
            })?;

        let result = CheckResult {
            subject_id: subject.id.clone(),
            count: parse_count(&resp.body),
            source_url: resp.url,
        };
        info!(subject = %subject.id, count = result.count, "Count resolved");
        self.cache.put(&key, result.clone());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousands_separators_are_stripped() {
        assert_eq!(parse_count("50.000 results"), 50_000);
        assert_eq!(parse_count("50,000 results"), 50_000);
        assert_eq!(parse_count("~1,234 results"), 1_234);
        assert_eq!(parse_count("About ~ 7 results found"), 7);
    }

    #[test]
    fn patterns_are_tried_in_order() {
        // The results phrase outranks the ads phrase even when it comes later.
        assert_eq!(parse_count("3 ads shown · 120 results"), 120);
        assert_eq!(parse_count(r#"{"count": 42}"#), 42);
        assert_eq!(parse_count("12 ads use this creative"), 12);
    }

    #[test]
    fn localized_phrases_match() {
        assert_eq!(parse_count("~2.500 resultados"), 2_500);
        assert_eq!(parse_count("1.000 Ergebnisse"), 1_000);
    }

    #[test]
    fn no_match_is_zero() {
        assert_eq!(parse_count("<html>No ads match</html>"), 0);
        assert_eq!(parse_count(""), 0);
    }

    #[test]
    fn singular_result_matches() {
        assert_eq!(parse_count("1 result"), 1);
    }

    #[test]
    fn normalize_rejects_empty_and_overflow() {
        assert_eq!(normalize_number("~"), None);
        assert_eq!(normalize_number("99999999999999999999999"), None);
        assert_eq!(normalize_number(" ~12.345 "), Some(12_345));
    }
}
