//! The batch extraction queue.
//!
//! A batch moves `idle → running → idle`. While running, the queue is the
//! only writer of record status; the caller may poll [`progress`] and
//! [`cancel`] from another task. Cancellation is checked between items.
//!
//! [`progress`]: ExtractionQueue::progress
//! [`cancel`]: ExtractionQueue::cancel

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use receipt_core::{ExtractedData, Status};
use receipt_store::{SaveOutcome, UpdateOutcome, WorkspaceStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::ExtractionClient;
use crate::error::{ExtractionError, QueueError};
use crate::normalize::ImageNormalizer;

/// What a batch did, for batches that ran to the end or were cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

struct QueueState {
    pending: Vec<PathBuf>,
    running: bool,
    cancel: CancellationToken,
}

pub struct ExtractionQueue {
    client: Option<Arc<dyn ExtractionClient>>,
    normalizer: Arc<dyn ImageNormalizer>,
    state: Mutex<QueueState>,
    current: AtomicUsize,
    total: AtomicUsize,
}

impl ExtractionQueue {
    /// `client` is `None` when no credentials are configured; batches are
    /// then rejected with [`QueueError::ClientNotInitialized`].
    pub fn new(
        client: Option<Arc<dyn ExtractionClient>>,
        normalizer: Arc<dyn ImageNormalizer>,
    ) -> Self {
        Self {
            client,
            normalizer,
            state: Mutex::new(QueueState {
                pending: Vec::new(),
                running: false,
                cancel: CancellationToken::new(),
            }),
            current: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append images (relative keys or absolute paths) to the pending list.
    /// A previous cancellation is cleared.
    pub fn enqueue<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut state = self.state();
        let before = state.pending.len();
        state.pending.extend(paths.into_iter().map(Into::into));
        if state.cancel.is_cancelled() {
            state.cancel = CancellationToken::new();
        }
        info!(added = state.pending.len() - before, "images queued");
    }

    /// Drop everything pending and signal the running batch to stop before
    /// its next item.
    pub fn cancel(&self) {
        let mut state = self.state();
        state.pending.clear();
        state.cancel.cancel();
        info!("queue cleared");
    }

    /// The token [`cancel`](Self::cancel) fires. A batch captures the
    /// current token when it starts; an `enqueue` after a cancel installs a
    /// fresh one, so tokens handed out earlier never reach a later batch.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.state().cancel.clone()
    }

    pub fn pending(&self) -> Vec<PathBuf> {
        self.state().pending.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    /// `(current, total)`; `total` is fixed when the batch starts.
    pub fn progress(&self) -> (usize, usize) {
        (
            self.current.load(Ordering::Acquire),
            self.total.load(Ordering::Acquire),
        )
    }

    /// Run every pending image through normalization and extraction.
    ///
    /// The store lock is taken per store call and never held across an
    /// await on the client. A fatal error marks the failing image and stops
    /// the batch; images after it keep their previous status. Whatever
    /// happens, the queue is idle and empty afterwards.
    pub async fn run_batch(
        &self,
        store: &tokio::sync::Mutex<WorkspaceStore>,
    ) -> Result<BatchSummary, QueueError> {
        let (items, client, cancel) = {
            let mut state = self.state();
            if state.running {
                warn!("a batch is already running");
                return Err(QueueError::AlreadyRunning);
            }
            if state.pending.is_empty() {
                warn!("the queue is empty");
                return Err(QueueError::EmptyQueue);
            }
            let Some(client) = self.client.clone() else {
                error!("extraction client is not initialized");
                return Err(QueueError::ClientNotInitialized);
            };
            state.running = true;
            (state.pending.clone(), client, state.cancel.clone())
        };
        let _reset = ResetOnExit(self);

        self.current.store(0, Ordering::Release);
        self.total.store(items.len(), Ordering::Release);
        info!(total = items.len(), "batch started");

        let summary = self
            .run_items(store, items, client.as_ref(), &cancel)
            .await?;
        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "batch finished"
        );
        Ok(summary)
    }

    async fn run_items(
        &self,
        store: &tokio::sync::Mutex<WorkspaceStore>,
        items: Vec<PathBuf>,
        client: &dyn ExtractionClient,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary, QueueError> {
        let mut summary = BatchSummary::default();
        for path in items {
            if cancel.is_cancelled() {
                info!("batch cancelled");
                summary.cancelled = true;
                break;
            }

            let resolved = {
                let mut store = store.lock().await;
                let resolved = resolve(&store, &path);
                if let Some((key, _)) = &resolved {
                    log_update(key, store.update_status(key, Status::Processing, None));
                }
                resolved
            };
            let Some((key, file)) = resolved else {
                warn!(path = %path.display(), "image not in workspace, skipped");
                summary.failed += 1;
                self.current.fetch_add(1, Ordering::AcqRel);
                continue;
            };
            summary.attempted += 1;
            info!(key = %key, "processing image");

            match self.extract_one(client, &file).await {
                Ok(data) => {
                    let outcome = store.lock().await.update_extracted_data(&key, data);
                    log_update(&key, outcome);
                    self.state().pending.retain(|p| p != &path);
                    summary.succeeded += 1;
                    self.current.fetch_add(1, Ordering::AcqRel);
                    info!(key = %key, "image completed");
                }
                Err(e) => {
                    let status_error = e.to_status_error();
                    let outcome = store.lock().await.update_status(
                        &key,
                        Status::Error,
                        Some(&status_error),
                    );
                    log_update(&key, outcome);
                    if e.is_fatal() {
                        error!(key = %key, error = %e, "fatal extraction error, batch aborted");
                        return Err(QueueError::Fatal(e));
                    }
                    warn!(key = %key, error = %e, "image failed");
                    summary.failed += 1;
                    self.current.fetch_add(1, Ordering::AcqRel);
                }
            }
        }
        Ok(summary)
    }

    async fn extract_one(
        &self,
        client: &dyn ExtractionClient,
        file: &Path,
    ) -> Result<ExtractedData, ExtractionError> {
        let normalizer = Arc::clone(&self.normalizer);
        let path = file.to_path_buf();
        let image = tokio::task::spawn_blocking(move || normalizer.normalize(&path))
            .await
            .map_err(|e| ExtractionError::Processing(format!("normalization task failed: {e}")))??;

        let fields = client.extract(&image).await?;
        Ok(ExtractedData::from_fields(&fields))
    }
}

/// Returns the queue to idle on every exit path, including a dropped future.
struct ResetOnExit<'a>(&'a ExtractionQueue);

impl Drop for ResetOnExit<'_> {
    fn drop(&mut self) {
        let queue = self.0;
        let mut state = queue.state();
        state.running = false;
        state.pending.clear();
        if state.cancel.is_cancelled() {
            state.cancel = CancellationToken::new();
        }
        queue.current.store(0, Ordering::Release);
        queue.total.store(0, Ordering::Release);
    }
}

/// Status writes are best-effort; a skipped or unsaved write does not stop
/// the batch.
fn log_update(key: &str, outcome: UpdateOutcome) {
    match outcome {
        UpdateOutcome::Applied(SaveOutcome::Saved { .. }) => {}
        UpdateOutcome::Applied(SaveOutcome::Degraded { reason }) => {
            warn!(key, reason = %reason, "record updated in memory only");
        }
        UpdateOutcome::Skipped(reason) => warn!(key, ?reason, "record update skipped"),
    }
}

/// Document key and on-disk path for a queued image.
fn resolve(store: &WorkspaceStore, path: &Path) -> Option<(String, PathBuf)> {
    let key = store.key_of(&path.to_string_lossy())?;
    let file = store.folder()?.join(&key);
    Some((key, file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RawFields;
    use crate::error::NormalizeError;
    use crate::normalize::NormalizedImage;
    use async_trait::async_trait;
    use receipt_core::BackupSettings;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    /// Hands back the file name as the image bytes.
    struct NameNormalizer;

    impl ImageNormalizer for NameNormalizer {
        fn normalize(&self, path: &Path) -> Result<NormalizedImage, NormalizeError> {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            Ok(NormalizedImage {
                bytes: name.as_bytes().to_vec(),
                mime_type: "image/jpeg".to_string(),
                width: 1,
                height: 1,
            })
        }
    }

    /// Fails on images whose name is listed, succeeds otherwise.
    struct FakeClient {
        failures: Vec<(&'static str, ExtractionError)>,
        calls: AtomicUsize,
    }

    impl FakeClient {
        fn new(failures: Vec<(&'static str, ExtractionError)>) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ExtractionClient for FakeClient {
        async fn extract(&self, image: &NormalizedImage) -> Result<RawFields, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = String::from_utf8_lossy(&image.bytes).into_owned();
            if let Some((_, e)) = self.failures.iter().find(|(n, _)| *n == name) {
                return Err(e.clone());
            }
            let fields = json!({
                "Transaction Date (yyyy/mm/dd only)": "2024/03/15",
                "Store Name": name,
                "Total Amount (currency symbol removed)": 1100,
                "10% Tax Amount": 100,
            });
            Ok(fields.as_object().cloned().unwrap())
        }
    }

    /// Cancels the queue the first time it is called, then queues
    /// `requeue` again.
    struct CancellingClient {
        queue: std::sync::OnceLock<Arc<ExtractionQueue>>,
        fired: AtomicBool,
        requeue: Vec<&'static str>,
    }

    #[async_trait]
    impl ExtractionClient for CancellingClient {
        async fn extract(&self, _image: &NormalizedImage) -> Result<RawFields, ExtractionError> {
            if !self.fired.swap(true, Ordering::SeqCst) {
                if let Some(queue) = self.queue.get() {
                    queue.cancel();
                    if !self.requeue.is_empty() {
                        queue.enqueue(self.requeue.iter().copied());
                    }
                }
            }
            Ok(RawFields::new())
        }
    }

    fn cancelling_queue(requeue: Vec<&'static str>) -> Arc<ExtractionQueue> {
        let client = Arc::new(CancellingClient {
            queue: std::sync::OnceLock::new(),
            fired: AtomicBool::new(false),
            requeue,
        });
        let queue = Arc::new(queue_with(client.clone()));
        let _ = client.queue.set(Arc::clone(&queue));
        queue
    }

    /// Records `progress()` as seen from inside each extraction call and
    /// fails on `fail`.
    struct ProgressClient {
        queue: std::sync::OnceLock<Arc<ExtractionQueue>>,
        seen: Mutex<Vec<(usize, usize)>>,
        fail: &'static str,
    }

    #[async_trait]
    impl ExtractionClient for ProgressClient {
        async fn extract(&self, image: &NormalizedImage) -> Result<RawFields, ExtractionError> {
            if let Some(queue) = self.queue.get() {
                self.seen.lock().unwrap().push(queue.progress());
            }
            if image.bytes == self.fail.as_bytes() {
                return Err(ExtractionError::Processing("unreadable".into()));
            }
            Ok(RawFields::new())
        }
    }

    fn workspace(names: &[&str]) -> (TempDir, tokio::sync::Mutex<WorkspaceStore>) {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::write(dir.path().join(name), b"img").unwrap();
        }
        let mut store = WorkspaceStore::new(BackupSettings::default());
        store.open(dir.path()).unwrap();
        (dir, tokio::sync::Mutex::new(store))
    }

    fn queue_with(client: Arc<dyn ExtractionClient>) -> ExtractionQueue {
        ExtractionQueue::new(Some(client), Arc::new(NameNormalizer))
    }

    async fn status_of(store: &tokio::sync::Mutex<WorkspaceStore>, key: &str) -> Status {
        store.lock().await.record(key).unwrap().status()
    }

    #[tokio::test]
    async fn successful_batch_completes_every_item() {
        let (_dir, store) = workspace(&["a.jpg", "b.jpg"]);
        let queue = queue_with(FakeClient::new(vec![]));
        queue.enqueue(["a.jpg", "b.jpg"]);

        let summary = queue.run_batch(&store).await.unwrap();
        assert_eq!(
            summary,
            BatchSummary {
                attempted: 2,
                succeeded: 2,
                failed: 0,
                cancelled: false
            }
        );

        let guard = store.lock().await;
        let record = guard.record("a.jpg").unwrap();
        assert_eq!(record.status(), Status::Completed);
        assert_eq!(record.extracted_data.store_name.as_deref(), Some("a.jpg"));
        assert_eq!(record.extracted_data.tax_10_amount, Some(100));
        assert_eq!(record.extracted_data.representative_item, None);
        assert!(record.validation.is_valid);
    }

    #[tokio::test]
    async fn absolute_paths_are_accepted() {
        let (_dir, store) = workspace(&["a.jpg"]);
        let queue = queue_with(FakeClient::new(vec![]));
        let folder = store.lock().await.folder().unwrap().to_path_buf();
        queue.enqueue([folder.join("a.jpg")]);

        queue.run_batch(&store).await.unwrap();
        assert_eq!(status_of(&store, "a.jpg").await, Status::Completed);
    }

    #[tokio::test]
    async fn non_fatal_failure_continues_the_batch() {
        let (_dir, store) = workspace(&["a.jpg", "b.jpg", "c.jpg"]);
        let client = FakeClient::new(vec![(
            "b.jpg",
            ExtractionError::Processing("bad json".into()),
        )]);
        let queue = queue_with(client.clone());
        queue.enqueue(["a.jpg", "b.jpg", "c.jpg"]);

        let summary = queue.run_batch(&store).await.unwrap();
        assert_eq!((summary.attempted, summary.succeeded, summary.failed), (3, 2, 1));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);

        let guard = store.lock().await;
        let failed = guard.record("b.jpg").unwrap();
        assert_eq!(failed.status(), Status::Error);
        assert_eq!(
            failed.processing_status.error_type.as_deref(),
            Some("PROCESSING_ERROR")
        );
        assert_eq!(
            failed.processing_status.error_details.as_deref(),
            Some("bad json")
        );
        assert_eq!(guard.record("c.jpg").unwrap().status(), Status::Completed);
    }

    #[tokio::test]
    async fn fatal_failure_stops_and_leaves_the_rest_untouched() {
        let (_dir, store) = workspace(&["a.jpg", "b.jpg", "c.jpg"]);
        let client = FakeClient::new(vec![(
            "b.jpg",
            ExtractionError::QuotaExceeded("429".into()),
        )]);
        let queue = queue_with(client.clone());
        queue.enqueue(["a.jpg", "b.jpg", "c.jpg"]);

        let err = queue.run_batch(&store).await.unwrap_err();
        assert!(matches!(err, QueueError::Fatal(ExtractionError::QuotaExceeded(_))));
        assert!(!err.is_rejection());
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);

        assert_eq!(status_of(&store, "a.jpg").await, Status::Completed);
        assert_eq!(status_of(&store, "b.jpg").await, Status::Error);
        assert_eq!(status_of(&store, "c.jpg").await, Status::Pending);

        assert!(!queue.is_running());
        assert!(queue.pending().is_empty());
        assert_eq!(queue.progress(), (0, 0));
    }

    #[tokio::test]
    async fn cancel_stops_before_the_next_item() {
        let (_dir, store) = workspace(&["a.jpg", "b.jpg", "c.jpg"]);
        let queue = cancelling_queue(vec![]);
        queue.enqueue(["a.jpg", "b.jpg", "c.jpg"]);

        let summary = queue.run_batch(&store).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.attempted, 1);
        assert_eq!(status_of(&store, "a.jpg").await, Status::Completed);
        assert_eq!(status_of(&store, "b.jpg").await, Status::Pending);
        assert_eq!(status_of(&store, "c.jpg").await, Status::Pending);

        // The next enqueue starts from a clean token.
        assert!(!queue.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn enqueue_during_a_batch_does_not_undo_its_cancel() {
        let (_dir, store) = workspace(&["a.jpg", "b.jpg", "c.jpg"]);
        let queue = cancelling_queue(vec!["c.jpg"]);
        queue.enqueue(["a.jpg", "b.jpg", "c.jpg"]);

        let summary = queue.run_batch(&store).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.attempted, 1);
        assert_eq!(status_of(&store, "b.jpg").await, Status::Pending);
        assert_eq!(status_of(&store, "c.jpg").await, Status::Pending);
        assert!(queue.pending().is_empty());
    }

    #[tokio::test]
    async fn token_from_before_a_cancel_does_not_stop_the_next_batch() {
        let (_dir, store) = workspace(&["a.jpg", "b.jpg"]);
        let queue = queue_with(FakeClient::new(vec![]));
        let earlier = queue.cancellation_token();
        queue.enqueue(["a.jpg"]);
        queue.cancel();
        assert!(earlier.is_cancelled());

        queue.enqueue(["a.jpg", "b.jpg"]);
        let summary = queue.run_batch(&store).await.unwrap();
        assert!(!summary.cancelled);
        assert_eq!((summary.attempted, summary.succeeded), (2, 2));
        assert_eq!(status_of(&store, "b.jpg").await, Status::Completed);
    }

    #[tokio::test]
    async fn progress_counts_failures_and_keeps_total_fixed() {
        let (_dir, store) = workspace(&["a.jpg", "b.jpg", "c.jpg"]);
        let client = Arc::new(ProgressClient {
            queue: std::sync::OnceLock::new(),
            seen: Mutex::new(Vec::new()),
            fail: "b.jpg",
        });
        let queue = Arc::new(queue_with(client.clone()));
        let _ = client.queue.set(Arc::clone(&queue));
        queue.enqueue(["a.jpg", "b.jpg", "c.jpg"]);

        let summary = queue.run_batch(&store).await.unwrap();
        assert_eq!((summary.succeeded, summary.failed), (2, 1));
        assert_eq!(
            *client.seen.lock().unwrap(),
            vec![(0, 3), (1, 3), (2, 3)]
        );
        assert_eq!(queue.progress(), (0, 0));
    }

    #[tokio::test]
    async fn unsaved_store_does_not_stop_the_batch() {
        let (_dir, store) = workspace(&["a.jpg", "b.jpg"]);
        let folder = store.lock().await.folder().unwrap().to_path_buf();
        std::fs::create_dir(folder.join(format!("{}.tmp", receipt_store::DOCUMENT_FILE))).unwrap();
        let queue = queue_with(FakeClient::new(vec![]));
        queue.enqueue(["a.jpg", "b.jpg"]);

        let summary = queue.run_batch(&store).await.unwrap();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(status_of(&store, "b.jpg").await, Status::Completed);
    }

    #[tokio::test]
    async fn retry_after_failure_clears_the_error() {
        let (_dir, store) = workspace(&["a.jpg"]);
        let failing = queue_with(FakeClient::new(vec![(
            "a.jpg",
            ExtractionError::Processing("timeout".into()),
        )]));
        failing.enqueue(["a.jpg"]);
        failing.run_batch(&store).await.unwrap();
        assert_eq!(status_of(&store, "a.jpg").await, Status::Error);

        let queue = queue_with(FakeClient::new(vec![]));
        queue.enqueue(["a.jpg"]);
        queue.run_batch(&store).await.unwrap();

        let guard = store.lock().await;
        let status = &guard.record("a.jpg").unwrap().processing_status;
        assert_eq!(status.status, Status::Completed);
        assert!(status.last_processed.is_some());
        assert_eq!(status.error_type, None);
        assert_eq!(status.error_details, None);
    }

    #[tokio::test]
    async fn rejections_leave_state_alone() {
        let (_dir, store) = workspace(&["a.jpg"]);

        let queue = queue_with(FakeClient::new(vec![]));
        let err = queue.run_batch(&store).await.unwrap_err();
        assert_eq!(err, QueueError::EmptyQueue);
        assert!(err.is_rejection());

        let uninitialized = ExtractionQueue::new(None, Arc::new(NameNormalizer));
        uninitialized.enqueue(["a.jpg"]);
        let err = uninitialized.run_batch(&store).await.unwrap_err();
        assert_eq!(err, QueueError::ClientNotInitialized);
        assert_eq!(uninitialized.pending(), vec![PathBuf::from("a.jpg")]);
        assert_eq!(status_of(&store, "a.jpg").await, Status::Pending);
    }

    #[tokio::test]
    async fn second_batch_while_running_is_rejected() {
        let (_dir, store) = workspace(&["a.jpg"]);
        let queue = queue_with(FakeClient::new(vec![]));
        queue.enqueue(["a.jpg"]);
        queue.state().running = true;

        let err = queue.run_batch(&store).await.unwrap_err();
        assert_eq!(err, QueueError::AlreadyRunning);
        assert_eq!(queue.pending().len(), 1);
    }

    #[tokio::test]
    async fn unreadable_image_is_a_processing_error() {
        struct Failing;
        impl ImageNormalizer for Failing {
            fn normalize(&self, path: &Path) -> Result<NormalizedImage, NormalizeError> {
                Err(NormalizeError::Decode {
                    path: path.to_path_buf(),
                    source: image::ImageError::IoError(std::io::Error::other("corrupt")),
                })
            }
        }

        let (_dir, store) = workspace(&["a.jpg"]);
        let client = FakeClient::new(vec![]);
        let queue = ExtractionQueue::new(Some(client.clone()), Arc::new(Failing));
        queue.enqueue(["a.jpg"]);

        let summary = queue.run_batch(&store).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        let guard = store.lock().await;
        assert_eq!(
            guard
                .record("a.jpg")
                .unwrap()
                .processing_status
                .error_type
                .as_deref(),
            Some("PROCESSING_ERROR")
        );
    }

    #[tokio::test]
    async fn progress_is_reset_after_the_batch() {
        let (_dir, store) = workspace(&["a.jpg", "b.jpg"]);
        let queue = queue_with(FakeClient::new(vec![]));
        queue.enqueue(["a.jpg", "b.jpg"]);
        assert_eq!(queue.progress(), (0, 0));

        queue.run_batch(&store).await.unwrap();
        assert_eq!(queue.progress(), (0, 0));
        assert!(queue.pending().is_empty());
        assert!(!queue.is_running());
    }
}
