//! Background cover downloads for list rows.
//!
//! The scheduler lives on the UI task and is the only writer of its pending
//! map. Fetches run as spawned tasks and report back over a channel; the UI
//! loop hands every [`FetchOutcome`] to [`PrefetchScheduler::complete`], which
//! applies the result to the row's record and says which row to redraw.

use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use super::error::{CatalogueError, Result};
use super::rawg::{DownloadState, GameRecord};

/// Fetches allowed to run at the same time.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 2;

/// Source of image bytes for a cover URL.
pub trait ImageFetcher: Send + Sync + 'static {
    fn fetch_image(&self, url: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Row-indexed access to the records a scheduler fills in.
pub trait RowSource {
    fn record_mut(&mut self, row: usize) -> Option<&mut GameRecord>;
}

impl RowSource for Vec<GameRecord> {
    fn record_mut(&mut self, row: usize) -> Option<&mut GameRecord> {
        self.get_mut(row)
    }
}

impl RowSource for [GameRecord] {
    fn record_mut(&mut self, row: usize) -> Option<&mut GameRecord> {
        self.get_mut(row)
    }
}

#[derive(Debug)]
enum FetchResult {
    Cancelled,
    Finished(Result<Vec<u8>>),
}

/// Message a fetch task sends back when it is done, cancelled or not.
#[derive(Debug)]
pub struct FetchOutcome {
    row: usize,
    ticket: u64,
    result: FetchResult,
}

struct PendingDownload {
    ticket: u64,
    record_id: i64,
    cancelled: Arc<AtomicBool>,
}

struct QueuedFetch {
    row: usize,
    ticket: u64,
    url: String,
    cancelled: Arc<AtomicBool>,
}

pub struct PrefetchScheduler<F> {
    fetcher: Arc<F>,
    outcomes: mpsc::UnboundedSender<FetchOutcome>,
    pending: HashMap<usize, PendingDownload>,
    queue: VecDeque<QueuedFetch>,
    running: usize,
    suspended: bool,
    next_ticket: u64,
}

impl<F: ImageFetcher> PrefetchScheduler<F> {
    pub fn new(fetcher: Arc<F>, outcomes: mpsc::UnboundedSender<FetchOutcome>) -> Self {
        Self {
            fetcher,
            outcomes,
            pending: HashMap::new(),
            queue: VecDeque::new(),
            running: 0,
            suspended: false,
            next_ticket: 0,
        }
    }

    /// Queue a cover download for `row` unless the record is already
    /// resolved or the row has one queued or running. Returns whether a new
    /// download was queued.
    pub fn ensure_loading(&mut self, row: usize, record: &GameRecord) -> bool {
        if record.state != DownloadState::Pending || self.pending.contains_key(&row) {
            return false;
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let cancelled = Arc::new(AtomicBool::new(false));

        self.pending.insert(
            row,
            PendingDownload {
                ticket,
                record_id: record.id,
                cancelled: Arc::clone(&cancelled),
            },
        );
        self.queue.push_back(QueuedFetch {
            row,
            ticket,
            url: record.cover_url.clone(),
            cancelled,
        });

        self.pump();
        true
    }

    /// Apply a finished fetch to `rows`. Returns the row that needs a redraw,
    /// or `None` when the fetch had been cancelled in the meantime.
    pub fn complete<R>(&mut self, outcome: FetchOutcome, rows: &mut R) -> Option<usize>
    where
        R: RowSource + ?Sized,
    {
        self.running = self.running.saturating_sub(1);
        let redraw = self.apply(outcome, rows);
        self.pump();
        redraw
    }

    fn apply<R>(&mut self, outcome: FetchOutcome, rows: &mut R) -> Option<usize>
    where
        R: RowSource + ?Sized,
    {
        let FetchOutcome { row, ticket, result } = outcome;

        let current = match self.pending.get(&row) {
            Some(p) if p.ticket == ticket && !p.cancelled.load(Ordering::Acquire) => p.record_id,
            _ => {
                debug!("Discarding cover for row {} (ticket {})", row, ticket);
                return None;
            }
        };
        let fetched = match result {
            FetchResult::Cancelled => return None,
            FetchResult::Finished(fetched) => fetched,
        };
        self.pending.remove(&row);

        let Some(record) = rows.record_mut(row).filter(|r| r.id == current) else {
            debug!("Row {} no longer holds game {}, dropping cover", row, current);
            return None;
        };

        match fetched {
            Ok(bytes) if !bytes.is_empty() => {
                record.image = Some(bytes);
                record.state = DownloadState::Loaded;
            }
            Ok(_) => {
                warn!("Cover for {:?} failed: {}", record.name, CatalogueError::EmptyPayload);
                record.state = DownloadState::Failed;
            }
            Err(e) => {
                warn!(
                    "Cover for {:?} failed (retryable: {}): {}",
                    record.name,
                    e.is_retryable(),
                    e
                );
                record.state = DownloadState::Failed;
            }
        }
        Some(row)
    }

    /// Drop the download for `row`. A queued job never starts; a running one
    /// keeps its slot until it reports back, and its result is discarded.
    pub fn cancel(&mut self, row: usize) {
        if let Some(pending) = self.pending.remove(&row) {
            pending.cancelled.store(true, Ordering::Release);
            self.queue.retain(|job| job.ticket != pending.ticket);
        }
    }

    /// Cancel every download whose row is not in `rows`.
    pub fn cancel_outside(&mut self, rows: Range<usize>) {
        let stale: Vec<usize> = self
            .pending
            .keys()
            .copied()
            .filter(|row| !rows.contains(row))
            .collect();
        for row in stale {
            self.cancel(row);
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.cancelled.store(true, Ordering::Release);
        }
        self.queue.clear();
    }

    /// Stop admitting queued downloads. Running ones are left alone.
    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    pub fn resume(&mut self) {
        self.suspended = false;
        self.pump();
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    #[cfg(test)]
    pub fn is_pending(&self, row: usize) -> bool {
        self.pending.contains_key(&row)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fetch tasks started and not yet reported back.
    pub fn in_flight(&self) -> usize {
        self.running
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn pump(&mut self) {
        while !self.suspended && self.running < MAX_CONCURRENT_DOWNLOADS {
            let Some(job) = self.queue.pop_front() else {
                break;
            };
            self.running += 1;
            self.spawn(job);
        }
    }

    fn spawn(&self, job: QueuedFetch) {
        let fetcher = Arc::clone(&self.fetcher);
        let outcomes = self.outcomes.clone();

        tokio::spawn(async move {
            let QueuedFetch {
                row,
                ticket,
                url,
                cancelled,
            } = job;

            let result = if cancelled.load(Ordering::Acquire) {
                FetchResult::Cancelled
            } else {
                let fetched = fetcher.fetch_image(&url).await;
                if cancelled.load(Ordering::Acquire) {
                    FetchResult::Cancelled
                } else {
                    FetchResult::Finished(fetched)
                }
            };

            if outcomes.send(FetchOutcome { row, ticket, result }).is_err() {
                debug!("Cover outcome for row {} dropped, receiver gone", row);
            }
        });
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{GatedFetcher, settle};
    use super::*;

    fn game(id: i64) -> GameRecord {
        GameRecord {
            id,
            slug: format!("game-{}", id),
            name: format!("Game {}", id),
            released: "2020-10-17".to_string(),
            cover_url: format!("https://x/{}.png", id),
            rating: 4.0,
            image: None,
            state: DownloadState::Pending,
        }
    }

    fn setup(
        rows: usize,
    ) -> (
        Arc<GatedFetcher>,
        PrefetchScheduler<GatedFetcher>,
        mpsc::UnboundedReceiver<FetchOutcome>,
        Vec<GameRecord>,
    ) {
        let fetcher = GatedFetcher::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = PrefetchScheduler::new(Arc::clone(&fetcher), tx);
        let games = (0..rows as i64).map(game).collect();
        (fetcher, scheduler, rx, games)
    }

    #[tokio::test]
    async fn loads_non_empty_cover_and_redraws_row_once() {
        let (fetcher, mut scheduler, mut rx, mut games) = setup(1);
        games[0].cover_url = "https://x/img.png".to_string();
        fetcher.respond("https://x/img.png", Ok(vec![7; 1024]));

        assert!(scheduler.ensure_loading(0, &games[0]));
        settle().await;
        fetcher.release(1);

        let outcome = rx.recv().await.unwrap();
        assert_eq!(scheduler.complete(outcome, &mut games), Some(0));

        assert_eq!(games[0].state, DownloadState::Loaded);
        assert_eq!(games[0].image.as_ref().map(Vec::len), Some(1024));
        assert!(!scheduler.is_pending(0));
        assert_eq!(scheduler.in_flight(), 0);

        settle().await;
        assert!(rx.try_recv().is_err(), "exactly one notification per fetch");
    }

    #[tokio::test]
    async fn empty_cover_fails_without_retry() {
        let (fetcher, mut scheduler, mut rx, mut games) = setup(1);
        fetcher.respond(&games[0].cover_url.clone(), Ok(Vec::new()));

        scheduler.ensure_loading(0, &games[0]);
        settle().await;
        fetcher.release(1);
        let outcome = rx.recv().await.unwrap();
        assert_eq!(scheduler.complete(outcome, &mut games), Some(0));

        assert_eq!(games[0].state, DownloadState::Failed);
        assert!(games[0].image.is_none());

        assert!(!scheduler.ensure_loading(0, &games[0]));
        assert_eq!(scheduler.pending_count(), 0);
        assert_eq!(fetcher.started().len(), 1);
    }

    #[tokio::test]
    async fn fetch_error_marks_only_that_row_failed() {
        let (fetcher, mut scheduler, mut rx, mut games) = setup(2);
        fetcher.respond(
            &games[0].cover_url.clone(),
            Err(CatalogueError::Status(reqwest::StatusCode::NOT_FOUND)),
        );

        scheduler.ensure_loading(0, &games[0]);
        scheduler.ensure_loading(1, &games[1]);
        settle().await;
        fetcher.release(2);

        for _ in 0..2 {
            let outcome = rx.recv().await.unwrap();
            assert!(scheduler.complete(outcome, &mut games).is_some());
        }

        assert_eq!(games[0].state, DownloadState::Failed);
        assert_eq!(games[1].state, DownloadState::Loaded);
    }

    #[tokio::test]
    async fn repeated_ensure_dispatches_one_fetch() {
        let (fetcher, mut scheduler, _rx, games) = setup(1);

        assert!(scheduler.ensure_loading(0, &games[0]));
        assert!(!scheduler.ensure_loading(0, &games[0]));
        assert!(!scheduler.ensure_loading(0, &games[0]));
        settle().await;

        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(fetcher.started().len(), 1);
    }

    #[tokio::test]
    async fn resolved_records_are_never_dispatched() {
        let (fetcher, mut scheduler, _rx, mut games) = setup(2);
        games[0].state = DownloadState::Loaded;
        games[1].state = DownloadState::Failed;

        assert!(!scheduler.ensure_loading(0, &games[0]));
        assert!(!scheduler.ensure_loading(1, &games[1]));
        settle().await;

        assert_eq!(scheduler.pending_count(), 0);
        assert!(fetcher.started().is_empty());
    }

    #[tokio::test]
    async fn never_more_than_two_fetches_run_at_once() {
        let (fetcher, mut scheduler, mut rx, mut games) = setup(6);

        for (row, game) in games.iter().enumerate() {
            scheduler.ensure_loading(row, game);
        }
        settle().await;
        assert_eq!(scheduler.in_flight(), 2);
        assert_eq!(scheduler.queued(), 4);

        let mut redrawn = Vec::new();
        while redrawn.len() < games.len() {
            fetcher.release(1);
            let outcome = rx.recv().await.unwrap();
            redrawn.extend(scheduler.complete(outcome, &mut games));
            settle().await;
            assert!(scheduler.in_flight() <= MAX_CONCURRENT_DOWNLOADS);
        }

        assert_eq!(fetcher.max_running.load(Ordering::SeqCst), 2);
        assert!(games.iter().all(|g| g.state == DownloadState::Loaded));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn suspended_queue_admits_fifo_after_resume() {
        let (fetcher, mut scheduler, mut rx, mut games) = setup(5);

        scheduler.suspend();
        for (row, game) in games.iter().enumerate() {
            assert!(scheduler.ensure_loading(row, game));
        }
        settle().await;
        assert!(fetcher.started().is_empty());
        assert_eq!(scheduler.queued(), 5);

        scheduler.resume();
        settle().await;
        assert_eq!(fetcher.started(), vec!["https://x/0.png", "https://x/1.png"]);
        assert_eq!(scheduler.queued(), 3);

        fetcher.release(1);
        let outcome = rx.recv().await.unwrap();
        scheduler.complete(outcome, &mut games);
        settle().await;
        assert_eq!(fetcher.started()[2], "https://x/2.png");
        assert_eq!(scheduler.queued(), 2);
    }

    #[tokio::test]
    async fn suspend_leaves_running_fetches_alone() {
        let (fetcher, mut scheduler, mut rx, mut games) = setup(3);

        for (row, game) in games.iter().enumerate() {
            scheduler.ensure_loading(row, game);
        }
        settle().await;
        scheduler.suspend();

        fetcher.release(1);
        let outcome = rx.recv().await.unwrap();
        assert!(scheduler.complete(outcome, &mut games).is_some());
        settle().await;

        // the freed slot stays empty while suspended
        assert_eq!(scheduler.in_flight(), 1);
        assert_eq!(scheduler.queued(), 1);
        assert_eq!(fetcher.started().len(), 2);
    }

    #[tokio::test]
    async fn cancel_during_io_discards_result() {
        let (fetcher, mut scheduler, mut rx, mut games) = setup(1);

        scheduler.ensure_loading(0, &games[0]);
        settle().await;
        scheduler.cancel(0);
        fetcher.release(1);

        let outcome = rx.recv().await.unwrap();
        assert_eq!(scheduler.complete(outcome, &mut games), None);
        assert_eq!(games[0].state, DownloadState::Pending);
        assert!(games[0].image.is_none());
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancel_after_io_completed_still_discards() {
        let (fetcher, mut scheduler, mut rx, mut games) = setup(1);

        scheduler.ensure_loading(0, &games[0]);
        settle().await;
        fetcher.release(1);
        let outcome = rx.recv().await.unwrap();

        scheduler.cancel(0);
        assert_eq!(scheduler.complete(outcome, &mut games), None);
        assert_eq!(games[0].state, DownloadState::Pending);
        assert!(games[0].image.is_none());
    }

    #[tokio::test]
    async fn cancelled_queued_job_never_starts() {
        let (fetcher, mut scheduler, mut rx, mut games) = setup(3);

        for (row, game) in games.iter().enumerate() {
            scheduler.ensure_loading(row, game);
        }
        settle().await;
        scheduler.cancel(2);
        assert_eq!(scheduler.queued(), 0);

        fetcher.release(2);
        for _ in 0..2 {
            let outcome = rx.recv().await.unwrap();
            scheduler.complete(outcome, &mut games);
        }
        settle().await;

        assert_eq!(fetcher.started().len(), 2);
        assert_eq!(games[2].state, DownloadState::Pending);
    }

    #[tokio::test]
    async fn cancel_all_then_redispatch_ignores_stale_outcome() {
        let (fetcher, mut scheduler, mut rx, mut games) = setup(1);

        scheduler.ensure_loading(0, &games[0]);
        settle().await;
        scheduler.cancel_all();
        assert_eq!(scheduler.pending_count(), 0);

        // same row ensured again while the old fetch still holds its slot
        assert!(scheduler.ensure_loading(0, &games[0]));
        assert_eq!(scheduler.in_flight(), 2);
        settle().await;

        fetcher.release(2);
        let mut redraws = Vec::new();
        for _ in 0..2 {
            let outcome = rx.recv().await.unwrap();
            redraws.push(scheduler.complete(outcome, &mut games));
        }
        redraws.sort();

        assert_eq!(redraws, vec![None, Some(0)]);
        assert_eq!(games[0].state, DownloadState::Loaded);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn rows_scrolled_away_are_cancelled() {
        let (fetcher, mut scheduler, mut rx, mut games) = setup(6);

        for (row, game) in games.iter().enumerate().take(4) {
            scheduler.ensure_loading(row, game);
        }
        settle().await;
        scheduler.cancel_outside(2..6);

        assert!(!scheduler.is_pending(0));
        assert!(!scheduler.is_pending(1));
        assert!(scheduler.is_pending(2));
        assert!(scheduler.is_pending(3));
        // rows 0 and 1 were running and still hold the slots
        assert_eq!(scheduler.in_flight(), 2);
        assert_eq!(scheduler.queued(), 2);

        fetcher.release(4);
        let mut redraws = Vec::new();
        for _ in 0..4 {
            let outcome = rx.recv().await.unwrap();
            redraws.extend(scheduler.complete(outcome, &mut games));
            settle().await;
        }
        redraws.sort();

        assert_eq!(redraws, vec![2, 3]);
        assert_eq!(games[0].state, DownloadState::Pending);
        assert_eq!(games[3].state, DownloadState::Loaded);
    }

    #[tokio::test]
    async fn replaced_record_is_left_untouched() {
        let (fetcher, mut scheduler, mut rx, mut games) = setup(1);

        scheduler.ensure_loading(0, &games[0]);
        settle().await;
        games[0] = game(42);
        fetcher.release(1);

        let outcome = rx.recv().await.unwrap();
        assert_eq!(scheduler.complete(outcome, &mut games), None);
        assert_eq!(games[0].state, DownloadState::Pending);
        assert!(!scheduler.is_pending(0));
    }
}
