//! Bounded-concurrency fan-out over a batch of images.

use std::future::Future;
use std::sync::Arc;

use image_syncer_core::config::DEFAULT_CONCURRENCY;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Outcome of one image's task.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    /// The task ran and produced a value.
    Completed(T),
    /// Cancellation arrived while waiting for a slot; the image was not tried.
    Abandoned,
}

/// One image and what happened to it.
#[derive(Debug)]
pub struct TaskResult<T> {
    pub image: String,
    pub outcome: TaskOutcome<T>,
}

/// Runs one task per image with at most `concurrency` running at a time.
#[derive(Debug, Clone, Copy)]
pub struct BoundedExecutor {
    concurrency: usize,
}

impl Default for BoundedExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl BoundedExecutor {
    /// A ceiling of zero is raised to one.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `task` for every image and wait for all of them.
    ///
    /// Every image gets its own result; a failing task never stops the others.
    /// Results are in completion order.
    pub async fn run<T, F, Fut>(
        &self,
        images: Vec<String>,
        cancel: &CancellationToken,
        task: F,
    ) -> Vec<TaskResult<T>>
    where
        T: Send + 'static,
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let slots = Arc::new(Semaphore::new(self.concurrency));
        let task = Arc::new(task);
        let total = images.len();
        let mut tasks = JoinSet::new();

        for image in images {
            let slots = slots.clone();
            let cancel = cancel.clone();
            let task = task.clone();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = slots.acquire_owned() => permit.ok(),
                };

                let outcome = match permit {
                    Some(_permit) => TaskOutcome::Completed(task(image.clone()).await),
                    None => {
                        tracing::debug!(image = %image, "Cancelled before a slot was free");
                        TaskOutcome::Abandoned
                    }
                };
                TaskResult { image, outcome }
            });
        }

        let mut results = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!(error = %e, "Image task panicked"),
            }
        }
        results
    }
}
