//! Named background queue running forum jobs off the request path.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bridge::{Bridge, Outcome};
use crate::error::{BridgeError, Result};
use crate::event::LifecycleEvent;

type Job = (LifecycleEvent, oneshot::Sender<Outcome>);

/// Submission side of the queue. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Queue {
    name: Arc<str>,
    sender: mpsc::Sender<Job>,
}

/// Task consuming the queue.
#[derive(Debug)]
pub struct Worker {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl Queue {
    /// Spawn the worker of a new queue holding at most `capacity` jobs.
    pub fn start(name: &str, capacity: usize, bridge: Bridge) -> (Self, Worker) {
        let name: Arc<str> = Arc::from(name);
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let shutdown = Arc::new(Notify::new());

        let handle = tokio::spawn(run(
            Arc::clone(&name),
            receiver,
            bridge,
            Arc::clone(&shutdown),
        ));
        tracing::debug!(queue = %name, capacity, "queue started");

        (Self { name, sender }, Worker { handle, shutdown })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue `event`. The receiver resolves once the job ran; dropping it
    /// does not cancel the job.
    pub fn submit(&self, event: LifecycleEvent) -> Result<oneshot::Receiver<Outcome>> {
        let (reply, outcome) = oneshot::channel();

        match self.sender.try_send((event, reply)) {
            Ok(()) => Ok(outcome),
            Err(TrySendError::Full(_)) => Err(BridgeError::QueueFull(self.name.to_string())),
            Err(TrySendError::Closed(_)) => {
                Err(BridgeError::QueueClosed(self.name.to_string()))
            },
        }
    }
}

impl Worker {
    /// Refuse new jobs, run the pending ones, then stop.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.handle.await {
            tracing::error!(error = %err, "queue worker panicked");
        }
    }
}

async fn run(
    name: Arc<str>,
    mut receiver: mpsc::Receiver<Job>,
    bridge: Bridge,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            job = receiver.recv() => match job {
                Some(job) => process(&bridge, job).await,
                None => break,
            },
            _ = shutdown.notified() => {
                receiver.close();
                while let Some(job) = receiver.recv().await {
                    process(&bridge, job).await;
                }
                break;
            },
        }
    }

    tracing::info!(queue = %name, "queue drained");
}

async fn process(bridge: &Bridge, (event, reply): Job) {
    let outcome = bridge.handle(event).await;
    // Nobody waiting is fine, jobs are fire-and-forget.
    let _ = reply.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::testing::{self, MockForum, alice};

    #[tokio::test]
    async fn test_submit_runs_job() {
        let forum = MockForum::start().await;
        let (queue, worker) = Queue::start("flarum", 8, testing::bridge(&forum.url));
        assert_eq!(queue.name(), "flarum");

        let outcome = queue
            .submit(LifecycleEvent::Registered(alice()))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(outcome.event, EventKind::Registered);
        assert!(outcome.is_success());
        assert_eq!(forum.requests().len(), 1);

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_jobs_keep_submission_order() {
        let forum = MockForum::start().await;
        let (queue, worker) = Queue::start("flarum", 8, testing::bridge(&forum.url));

        let registered = queue.submit(LifecycleEvent::Registered(alice())).unwrap();
        let activated = queue.submit(LifecycleEvent::Activated(alice())).unwrap();
        let login = queue.submit(LifecycleEvent::Login(alice())).unwrap();

        // Dropped receivers must not cancel anything.
        drop(registered);
        drop(activated);
        let outcome = login.await.unwrap();
        assert_eq!(outcome.cookies[0].value(), "tok123");

        let paths: Vec<_> = forum.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/api/users", "/api/users/7", "/api/token"]);

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_closes() {
        let forum = MockForum::start().await;
        let (queue, worker) = Queue::start("flarum", 8, testing::bridge(&forum.url));

        let pending = queue.submit(LifecycleEvent::Registered(alice())).unwrap();
        worker.shutdown().await;

        assert!(pending.await.unwrap().is_success());
        assert!(matches!(
            queue.submit(LifecycleEvent::Logout),
            Err(BridgeError::QueueClosed(name)) if name == "flarum"
        ));
    }

    #[tokio::test]
    async fn test_full_queue() {
        let (queue, worker) = Queue::start("flarum", 1, testing::bridge(testing::UNREACHABLE));

        let mut full = false;
        for _ in 0..64 {
            if let Err(BridgeError::QueueFull(_)) =
                queue.submit(LifecycleEvent::Registered(alice()))
            {
                full = true;
                break;
            }
        }
        assert!(full);

        worker.shutdown().await;
    }
}
