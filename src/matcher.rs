use crate::content::ContentUnit;

/// Button labels that mark a card as an ad with an inspectable advertiser.
pub const DEFAULT_MARKERS: &[&str] = &[
    "see ad details",
    "see summary details",
    "ver detalles del anuncio",
    "voir les détails de la publicité",
];

/// Decides whether a content unit qualifies for a check.
#[derive(Debug, Clone)]
pub struct Matcher {
    markers: Vec<String>,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(DEFAULT_MARKERS.iter().copied())
    }
}

impl Matcher {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let markers = markers
            .into_iter()
            .map(|m| m.as_ref().trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        Self { markers }
    }

    /// True iff some clickable's text, aria-label or title contains a marker phrase.
    pub fn matches(&self, unit: &dyn ContentUnit) -> bool {
        let clickables = unit.clickables();
        if clickables.is_empty() {
            return false;
        }
        let mut haystack = String::new();
        for c in &clickables {
            for part in [
                Some(c.text.as_str()),
                c.aria_label.as_deref(),
                c.title.as_deref(),
            ]
            .into_iter()
            .flatten()
            {
                haystack.push_str(part);
                haystack.push(' ');
            }
        }
        let haystack = haystack.to_lowercase();
        self.markers.iter().any(|m| haystack.contains(m.as_str()))
    }
}
