//! Content units: the page elements a scan walks over.
//!
//! A live page is an external collaborator; this module fixes the small query
//! surface the scanner needs (clickables, links, text, annotation) and ships a
//! `scraper`-backed snapshot of a saved ad-library page.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::types::Tier;

/// Default selector for ad cards in a saved ad-library page.
pub const DEFAULT_CARD_SELECTOR: &str = r#"div[role="article"], div[data-ad-card]"#;

const CLICKABLE_SELECTOR: &str = r#"a, button, [role="button"], [role="link"]"#;

/// One clickable descendant as seen by the matcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clickable {
    pub text: String,
    pub aria_label: Option<String>,
    pub title: Option<String>,
}

impl Clickable {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }
}

/// Marker left on a unit once its subject has been checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Annotation {
    Count { count: u64, tier: Tier, url: String },
    Unknown,
}

impl Annotation {
    /// Short label as shown next to the card. Unknown never renders as zero.
    pub fn label(&self) -> String {
        match self {
            Annotation::Count { count, tier, .. } => match tier {
                Tier::High => format!("{count} ads (high)"),
                Tier::Low => format!("{count} ads"),
            },
            Annotation::Unknown => "? ads".to_string(),
        }
    }
}

pub trait ContentUnit: Send + Sync {
    fn clickables(&self) -> Vec<Clickable>;

    /// Raw `href` values in document order.
    fn links(&self) -> Vec<String>;

    fn text(&self) -> String;

    fn annotate(&self, annotation: Annotation);
}

/// Produces the current units of a page, in document order.
pub trait ContentSource: Send + Sync {
    fn units(&self) -> Result<Vec<Arc<dyn ContentUnit>>>;
}

/// Owned snapshot of one card.
#[derive(Debug, Default)]
pub struct CardSnapshot {
    clickables: Vec<Clickable>,
    links: Vec<String>,
    text: String,
    annotation: Mutex<Option<Annotation>>,
}

impl CardSnapshot {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn with_clickable(mut self, clickable: Clickable) -> Self {
        self.clickables.push(clickable);
        self
    }

    pub fn with_link(mut self, href: &str) -> Self {
        self.links.push(href.to_string());
        self
    }

    pub fn annotation(&self) -> Option<Annotation> {
        self.annotation.lock().ok().and_then(|a| a.clone())
    }

    fn from_element(card: ElementRef<'_>, clickable_sel: &Selector) -> Self {
        let mut clickables = Vec::new();
        let mut links = Vec::new();
        for el in card.select(clickable_sel) {
            let attrs = el.value();
            if let Some(href) = attrs.attr("href") {
                links.push(href.trim().to_string());
            }
            clickables.push(Clickable {
                text: collapse_ws(el.text()),
                aria_label: attrs.attr("aria-label").map(str::to_string),
                title: attrs.attr("title").map(str::to_string),
            });
        }
        Self {
            clickables,
            links,
            text: collapse_ws(card.text()),
            annotation: Mutex::new(None),
        }
    }
}

impl ContentUnit for CardSnapshot {
    fn clickables(&self) -> Vec<Clickable> {
        self.clickables.clone()
    }

    fn links(&self) -> Vec<String> {
        self.links.clone()
    }

    fn text(&self) -> String {
        self.text.clone()
    }

    fn annotate(&self, annotation: Annotation) {
        if let Ok(mut slot) = self.annotation.lock() {
            *slot = Some(annotation);
        }
    }
}

/// A parsed page split into card snapshots.
#[derive(Debug, Default)]
pub struct HtmlPage {
    cards: Vec<Arc<CardSnapshot>>,
}

impl HtmlPage {
    pub fn parse(html: &str, card_selector: &str) -> Result<Self> {
        let cards_sel = Selector::parse(card_selector)
            .map_err(|e| anyhow!("invalid card selector {card_selector:?}: {e}"))?;
        let clickable_sel = Selector::parse(CLICKABLE_SELECTOR).expect("valid selector");
        let document = Html::parse_document(html);
        let cards = document
            .select(&cards_sel)
            .map(|card| Arc::new(CardSnapshot::from_element(card, &clickable_sel)))
            .collect();
        Ok(Self { cards })
    }

    pub fn cards(&self) -> &[Arc<CardSnapshot>] {
        &self.cards
    }
}

impl ContentSource for HtmlPage {
    fn units(&self) -> Result<Vec<Arc<dyn ContentUnit>>> {
        Ok(self
            .cards
            .iter()
            .map(|c| c.clone() as Arc<dyn ContentUnit>)
            .collect())
    }
}

/// Re-reads a saved page on every fresh scan, so edits between scans are picked up.
#[derive(Debug, Clone)]
pub struct HtmlFileSource {
    path: PathBuf,
    card_selector: String,
    last: Arc<Mutex<Vec<Arc<CardSnapshot>>>>,
}

impl HtmlFileSource {
    pub fn new(path: impl Into<PathBuf>, card_selector: &str) -> Self {
        Self {
            path: path.into(),
            card_selector: card_selector.to_string(),
            last: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Cards handed out by the most recent `units()` call, with their annotations.
    pub fn last_cards(&self) -> Vec<Arc<CardSnapshot>> {
        self.last.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl ContentSource for HtmlFileSource {
    fn units(&self) -> Result<Vec<Arc<dyn ContentUnit>>> {
        let html = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read page snapshot: {}", self.path.display()))?;
        let page = HtmlPage::parse(&html, &self.card_selector)?;
        if let Ok(mut last) = self.last.lock() {
            *last = page.cards().to_vec();
        }
        page.units()
    }
}

fn collapse_ws<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
