//! Drives [`BlockProcessor`] across blocks.
//!
//! Two modes, picked by whether an end block is given:
//!
//! - **Bounded replay** processes `[from_block - 1, to_block)` one block at a
//!   time and finishes in [`LoopState::Done`]. The block before `from_block`
//!   is included so the first requested block has a neighbour to compare with.
//! - **Live tail** follows the chain head: read the head, process every block
//!   up to it, sleep for the poll interval, repeat. It only stops when the
//!   cancellation token fires.
//!
//! Cancellation is observed between blocks and while sleeping, never in the
//! middle of a block.

use indicatif::{ProgressBar, ProgressStyle};
use pricemon_data::{ChainClient, TrackedPair};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::MonitorError;
use crate::processor::BlockProcessor;

/// Default sleep between live-tail polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Loop states. `Done` and `Cancelled` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Polling,
    Done,
    Cancelled,
}

/// Summary returned when the loop stops.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopOutcome {
    pub state: LoopState,
    pub blocks_processed: u64,
    pub blocks_skipped: u64,
    /// Highest block handed to the processor, whether it succeeded or not.
    pub last_block: Option<u64>,
}

impl LoopOutcome {
    fn new() -> Self {
        Self {
            state: LoopState::Running,
            blocks_processed: 0,
            blocks_skipped: 0,
            last_block: None,
        }
    }

    fn finish(mut self, state: LoopState) -> Self {
        tracing::debug!(?state, "monitor loop stopped");
        self.state = state;
        self
    }
}

pub struct MonitorLoop {
    processor: BlockProcessor,
    chain: Arc<dyn ChainClient>,
    pairs: Vec<TrackedPair>,
    poll_interval: Duration,
    cancel: CancellationToken,
    show_progress: bool,
}

impl MonitorLoop {
    pub fn new(
        processor: BlockProcessor,
        chain: Arc<dyn ChainClient>,
        pairs: Vec<TrackedPair>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            processor,
            chain,
            pairs,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel,
            show_progress: false,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Show an indicatif bar during bounded replay.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn processor(&self) -> &BlockProcessor {
        &self.processor
    }

    /// Runs until the range is exhausted (`to_block` given) or cancellation.
    ///
    /// # Errors
    /// Returns [`MonitorError::Fatal`] if replay has no `from_block` and the
    /// chain head cannot be read. Per-block failures never surface here.
    pub async fn run(
        &self,
        from_block: Option<u64>,
        to_block: Option<u64>,
    ) -> Result<LoopOutcome, MonitorError> {
        match to_block {
            Some(to_block) => {
                let from_block = match from_block {
                    Some(from_block) => from_block,
                    None => self.chain.block_number().await.map_err(|e| {
                        MonitorError::Fatal(format!("cannot read chain head for replay: {e}"))
                    })?,
                };
                Ok(self.replay(from_block, to_block).await)
            }
            None => Ok(self.live_tail(from_block).await),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn replay(&self, from_block: u64, to_block: u64) -> LoopOutcome {
        let start = from_block.saturating_sub(1);
        let mut outcome = LoopOutcome::new();

        if start >= to_block {
            tracing::warn!(start, to_block, "empty replay range");
            return outcome.finish(LoopState::Done);
        }

        tracing::info!(
            start,
            end = to_block,
            pairs = self.pairs.len(),
            "starting bounded replay"
        );
        let progress = self.progress_bar(to_block - start);

        for block_number in start..to_block {
            if self.cancel.is_cancelled() {
                progress.abandon_with_message("cancelled");
                return outcome.finish(LoopState::Cancelled);
            }
            self.process_block(block_number, &mut outcome).await;
            progress.inc(1);
        }

        progress.finish_with_message("replay complete");
        tracing::info!(
            processed = outcome.blocks_processed,
            skipped = outcome.blocks_skipped,
            "replay complete"
        );
        outcome.finish(LoopState::Done)
    }

    #[tracing::instrument(skip(self))]
    async fn live_tail(&self, from_block: Option<u64>) -> LoopOutcome {
        let mut outcome = LoopOutcome::new();
        let mut current = from_block;
        let mut state = LoopState::Running;

        tracing::info!(
            pairs = self.pairs.len(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "starting live tail"
        );

        loop {
            if self.cancel.is_cancelled() {
                return outcome.finish(LoopState::Cancelled);
            }
            if state != LoopState::Running {
                state = LoopState::Running;
                tracing::trace!(?state, "monitor loop state");
            }

            match self.chain.block_number().await {
                Ok(head) => {
                    let next = current.get_or_insert(head);
                    while *next <= head {
                        if self.cancel.is_cancelled() {
                            return outcome.finish(LoopState::Cancelled);
                        }
                        self.process_block(*next, &mut outcome).await;
                        *next += 1;
                    }
                }
                Err(error) => {
                    tracing::warn!(error = %error, "failed to read chain head; retrying next poll");
                }
            }

            state = LoopState::Polling;
            tracing::trace!(?state, "monitor loop state");
            tokio::select! {
                _ = self.cancel.cancelled() => return outcome.finish(LoopState::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn process_block(&self, block_number: u64, outcome: &mut LoopOutcome) {
        outcome.last_block = Some(block_number);
        match self.processor.process(block_number, &self.pairs).await {
            Ok(_) => outcome.blocks_processed += 1,
            Err(error) => {
                tracing::warn!(block_number, error = %error, "skipping block");
                outcome.blocks_skipped += 1;
            }
        }
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let progress = ProgressBar::new(len);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} blocks {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress.set_style(style);
        progress
    }
}
