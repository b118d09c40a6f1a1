//! Rotation scheduler: one background task that steps the display through
//! the ready list round-robin, one image per tick.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::display::DisplayDriver;
use crate::store::MIN_ROTATION_SECONDS;

pub struct RotationScheduler {
    catalog: Catalog,
    display: Arc<dyn DisplayDriver>,
    worker: Option<Worker>,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

impl RotationScheduler {
    pub fn new(catalog: Catalog, display: Arc<dyn DisplayDriver>) -> Self {
        Self {
            catalog,
            display,
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Spawn the rotation loop. Calling this while a loop is already
    /// running does nothing; there is never more than one timer.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            debug!("rotation scheduler already running");
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            self.catalog.clone(),
            self.display.clone(),
            cancel.clone(),
        ));
        self.worker = Some(Worker { cancel, handle });
        info!("rotation scheduler started");
    }

    /// Cancel the loop and wait for its current iteration to finish. A
    /// cancellation that lands during the inter-tick sleep ends the loop
    /// without another display call. No-op when already stopped.
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.cancel.cancel();
        match worker.handle.await {
            Ok(Ok(())) => info!("rotation scheduler stopped"),
            Ok(Err(err)) => error!("rotation task failed: {err:?}"),
            Err(err) => error!("rotation task join error: {err}"),
        }
    }
}

/// The loop body. Each iteration runs exactly one store transaction (the
/// cursor advance); display errors are logged and swallowed, storage errors
/// end the task.
async fn run(
    catalog: Catalog,
    display: Arc<dyn DisplayDriver>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        match catalog
            .get_and_advance_next_image()
            .context("advancing rotation cursor")?
        {
            Some(image) => match image.processed_path.as_deref() {
                Some(processed) => {
                    let path = catalog.resolve_asset(processed);
                    debug!(id = %image.id, path = %path.display(), "rotating display");
                    if let Err(err) = display.render(&path) {
                        warn!(id = %image.id, "display render failed: {err:?}");
                    }
                }
                None => warn!(id = %image.id, "ready image has no processed asset; skipping"),
            },
            None => debug!("no ready images; rotation idle"),
        }

        let interval = catalog
            .rotation_seconds()
            .context("reading rotation interval")?
            .max(MIN_ROTATION_SECONDS);
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting rotation task");
                break;
            }
            _ = sleep(Duration::from_secs(interval)) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NewImage;
    use crate::files::AssetStore;
    use crate::store::{Settings, StateStore};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingDisplay {
        rendered: Mutex<Vec<PathBuf>>,
    }

    impl DisplayDriver for RecordingDisplay {
        fn render(&self, path: &Path) -> Result<()> {
            self.rendered.lock().expect("lock").push(path.to_path_buf());
            Ok(())
        }
    }

    struct FailingDisplay;

    impl DisplayDriver for FailingDisplay {
        fn render(&self, _path: &Path) -> Result<()> {
            anyhow::bail!("panel unplugged")
        }
    }

    fn catalog_with_ready(dir: &Path, count: usize) -> (Catalog, Vec<String>) {
        let store = Arc::new(StateStore::new(
            dir.join("data").join("state.json"),
            Settings::default(),
        ));
        let assets = Arc::new(AssetStore::new(dir));
        let catalog = Catalog::new(store, assets);
        let mut ids = Vec::new();
        for n in 0..count {
            let record = catalog
                .add_pending(NewImage::draft(
                    format!("{n}.jpg"),
                    format!("data/images/originals/{n}.jpg"),
                ))
                .expect("add");
            assert!(catalog
                .mark_ready(&record.id, &format!("data/images/processed/{n}.png"), "fit_crop")
                .expect("mark"));
            ids.push(record.id);
        }
        (catalog, ids)
    }

    #[tokio::test]
    async fn first_tick_renders_immediately_and_stop_is_clean() {
        let dir = tempdir().expect("tempdir");
        let (catalog, ids) = catalog_with_ready(dir.path(), 2);
        let display = Arc::new(RecordingDisplay::default());

        let mut scheduler = RotationScheduler::new(catalog.clone(), display.clone());
        scheduler.start();
        scheduler.start(); // idempotent
        assert!(scheduler.is_running());

        // The first iteration renders before the first sleep.
        for _ in 0..100 {
            if !display.rendered.lock().expect("lock").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scheduler.stop().await;
        assert!(!scheduler.is_running());

        let rendered = display.rendered.lock().expect("lock");
        assert_eq!(rendered.len(), 1);
        assert_eq!(
            rendered[0],
            dir.path().join("data").join("images").join("processed").join("0.png")
        );

        drop(rendered);
        // The cursor sits on the shown image, so the next advance wraps to
        // the second one.
        let next = catalog
            .get_and_advance_next_image()
            .expect("advance")
            .expect("non-empty");
        assert_eq!(next.id, ids[1]);
    }

    #[tokio::test]
    async fn render_failure_does_not_kill_the_loop() {
        let dir = tempdir().expect("tempdir");
        let (catalog, ids) = catalog_with_ready(dir.path(), 1);

        let mut scheduler = RotationScheduler::new(catalog.clone(), Arc::new(FailingDisplay));
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.is_running());
        scheduler.stop().await;

        // The advance still happened despite the render failure: with a
        // single ready image the cursor wraps back onto it.
        let next = catalog
            .get_and_advance_next_image()
            .expect("advance")
            .expect("non-empty");
        assert_eq!(next.id, ids[0]);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let dir = tempdir().expect("tempdir");
        let (catalog, _) = catalog_with_ready(dir.path(), 0);
        let mut scheduler = RotationScheduler::new(catalog, Arc::new(RecordingDisplay::default()));
        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }
}
