use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use crate::types::Progress;

/// Receives incremental scan progress. Delivery is fire-and-forget: the scan
/// ignores whatever a reporter returns.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, progress: &Progress) -> Result<()>;
}

pub struct TracingReporter;

#[async_trait]
impl ProgressReporter for TracingReporter {
    async fn report(&self, p: &Progress) -> Result<()> {
        info!(
            checked = p.checked,
            high = p.high_count,
            low = p.low_count,
            index = p.current_index,
            total = p.total,
            "Scan progress"
        );
        Ok(())
    }
}

/// Forwards progress into a channel, e.g. for a UI task.
pub struct ChannelReporter {
    tx: UnboundedSender<Progress>,
}

impl ChannelReporter {
    pub fn new(tx: UnboundedSender<Progress>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ProgressReporter for ChannelReporter {
    async fn report(&self, p: &Progress) -> Result<()> {
        self.tx
            .send(*p)
            .map_err(|_| anyhow!("progress receiver dropped"))
    }
}

pub struct NoopReporter;

#[async_trait]
impl ProgressReporter for NoopReporter {
    async fn report(&self, _: &Progress) -> Result<()> {
        Ok(())
    }
}
