#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use ad_scan_rs::cache::ResultCache;
use ad_scan_rs::content::{CardSnapshot, Clickable, ContentSource, ContentUnit};
use ad_scan_rs::counter::RemoteCounter;
use ad_scan_rs::error::ServiceError;
use ad_scan_rs::extract::{SubjectExtractor, DEFAULT_BASE_URL};
use ad_scan_rs::matcher::Matcher;
use ad_scan_rs::progress::{NoopReporter, ProgressReporter};
use ad_scan_rs::scanner::{ScanDeps, ScanSettings};
use ad_scan_rs::service::{CountQuery, CountResponse, CountService};
use ad_scan_rs::types::{Progress, SearchParameters};

pub enum Reply {
    Body(String),
    Status(u16),
}

/// Count service answering from a script and recording every call.
#[derive(Default)]
pub struct ScriptedService {
    replies: HashMap<String, Reply>,
    calls: Mutex<Vec<String>>,
    gate: Option<Arc<Semaphore>>,
    pub entered: Arc<Notify>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(mut self, subject: &str, body: &str) -> Self {
        self.replies
            .insert(subject.to_string(), Reply::Body(body.to_string()));
        self
    }

    pub fn status(mut self, subject: &str, status: u16) -> Self {
        self.replies
            .insert(subject.to_string(), Reply::Status(status));
        self
    }

    /// Every fetch waits for one permit from `gate`.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CountService for ScriptedService {
    async fn fetch(&self, query: &CountQuery) -> Result<CountResponse, ServiceError> {
        self.calls.lock().unwrap().push(query.subject.clone());
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }
        match self.replies.get(&query.subject) {
            Some(Reply::Status(status)) => Err(ServiceError::Api {
                status: *status,
                message: "scripted failure".into(),
            }),
            Some(Reply::Body(body)) => Ok(CountResponse {
                body: body.clone(),
                url: format!("https://ads.test/?q={}", query.subject),
            }),
            None => Ok(CountResponse {
                body: String::new(),
                url: format!("https://ads.test/?q={}", query.subject),
            }),
        }
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    seen: Mutex<Vec<Progress>>,
}

impl RecordingReporter {
    pub fn seen(&self) -> Vec<Progress> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressReporter for RecordingReporter {
    async fn report(&self, progress: &Progress) -> Result<()> {
        self.seen.lock().unwrap().push(*progress);
        Ok(())
    }
}

/// Reporter whose observer is gone: every delivery fails.
pub struct FailingReporter;

#[async_trait]
impl ProgressReporter for FailingReporter {
    async fn report(&self, _: &Progress) -> Result<()> {
        anyhow::bail!("progress observer went away")
    }
}

pub struct StaticSource(pub Vec<Arc<dyn ContentUnit>>);

impl ContentSource for StaticSource {
    fn units(&self) -> Result<Vec<Arc<dyn ContentUnit>>> {
        Ok(self.0.clone())
    }
}

pub struct BrokenSource;

impl ContentSource for BrokenSource {
    fn units(&self) -> Result<Vec<Arc<dyn ContentUnit>>> {
        anyhow::bail!("page is gone")
    }
}

/// An ad card carrying the marker button and, optionally, an advertiser link.
pub fn ad_card(link: Option<&str>) -> Arc<CardSnapshot> {
    let mut card =
        CardSnapshot::new("Sponsored").with_clickable(Clickable::text("See ad details"));
    if let Some(link) = link {
        card = card.with_link(link);
    }
    Arc::new(card)
}

pub fn units(cards: &[Arc<CardSnapshot>]) -> Vec<Arc<dyn ContentUnit>> {
    cards
        .iter()
        .map(|c| c.clone() as Arc<dyn ContentUnit>)
        .collect()
}

pub fn params() -> SearchParameters {
    SearchParameters::parse("US", "2024-01-01", "2024-01-14").unwrap()
}

pub fn deps(
    source: Arc<dyn ContentSource>,
    service: Arc<dyn CountService>,
    reporter: Arc<dyn ProgressReporter>,
) -> ScanDeps {
    ScanDeps {
        counter: RemoteCounter::new(Arc::new(ResultCache::default()), service),
        extractor: SubjectExtractor::new(DEFAULT_BASE_URL).unwrap(),
        matcher: Matcher::default(),
        source,
        reporter,
        params: params(),
        settings: ScanSettings::default(),
    }
}

pub fn quiet() -> Arc<dyn ProgressReporter> {
    Arc::new(NoopReporter)
}

/// Worklist A (30 ads), B (no identifier), C (5 ads).
pub fn abc() -> (Vec<Arc<CardSnapshot>>, Arc<ScriptedService>) {
    let cards = vec![
        ad_card(Some("/storea")),
        ad_card(None),
        ad_card(Some("/storec")),
    ];
    let service = Arc::new(
        ScriptedService::new()
            .body("storea", "~30 results")
            .body("storec", "5 results"),
    );
    (cards, service)
}
