//! Route each lifecycle event inline or to the queue.

use std::collections::HashSet;

use tokio::sync::oneshot;

use crate::bridge::{Bridge, Outcome};
use crate::event::{EventKind, LifecycleEvent};
use crate::queue::Queue;

/// How an event was handled.
#[derive(Debug)]
pub enum Dispatched {
    /// Ran inline.
    Done(Outcome),
    /// Accepted by the queue.
    Queued(oneshot::Receiver<Outcome>),
}

#[derive(Clone, Debug)]
pub struct Dispatcher {
    bridge: Bridge,
    queue: Option<Queue>,
    deferred: HashSet<EventKind>,
}

impl Dispatcher {
    /// Run every event inline.
    pub fn inline(bridge: Bridge) -> Self {
        Self {
            bridge,
            queue: None,
            deferred: HashSet::new(),
        }
    }

    /// Send `deferred` events to `queue`, run the others inline.
    ///
    /// Events answering with cookies always run inline.
    pub fn with_queue(
        bridge: Bridge,
        queue: Queue,
        deferred: impl IntoIterator<Item = EventKind>,
    ) -> Self {
        let deferred = deferred
            .into_iter()
            .filter(|kind| {
                if !kind.is_deferrable() {
                    tracing::warn!(event = %kind, "event cannot be deferred, running inline");
                }
                kind.is_deferrable()
            })
            .collect();

        Self {
            bridge,
            queue: Some(queue),
            deferred,
        }
    }

    pub fn queue(&self) -> Option<&Queue> {
        self.queue.as_ref()
    }

    pub fn is_deferred(&self, kind: EventKind) -> bool {
        self.queue.is_some() && self.deferred.contains(&kind)
    }

    /// Handle `event`. A queue refusing the job falls back to inline.
    pub async fn dispatch(&self, event: LifecycleEvent) -> Dispatched {
        let kind = event.kind();

        if let Some(queue) = self.queue.as_ref().filter(|_| self.is_deferred(kind)) {
            match queue.submit(event.clone()) {
                Ok(outcome) => return Dispatched::Queued(outcome),
                Err(err) => tracing::warn!(
                    event = %kind,
                    error = %err,
                    "queue refused job, running inline"
                ),
            }
        }

        Dispatched::Done(self.bridge.handle(event).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, MockForum, alice};

    #[tokio::test]
    async fn test_inline() {
        let forum = MockForum::start().await;
        let dispatcher = Dispatcher::inline(testing::bridge(&forum.url));
        assert!(!dispatcher.is_deferred(EventKind::Registered));

        match dispatcher.dispatch(LifecycleEvent::Registered(alice())).await {
            Dispatched::Done(outcome) => assert!(outcome.is_success()),
            Dispatched::Queued(_) => panic!("expected inline execution"),
        }
        assert_eq!(forum.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_deferred_events() {
        let forum = MockForum::start().await;
        let bridge = testing::bridge(&forum.url);
        let (queue, worker) = Queue::start("flarum", 8, bridge.clone());
        let dispatcher = Dispatcher::with_queue(bridge, queue, [EventKind::Registered]);

        match dispatcher.dispatch(LifecycleEvent::Registered(alice())).await {
            Dispatched::Queued(outcome) => assert!(outcome.await.unwrap().is_success()),
            Dispatched::Done(_) => panic!("expected queued execution"),
        }

        match dispatcher.dispatch(LifecycleEvent::Logout).await {
            Dispatched::Done(outcome) => assert_eq!(outcome.cookies.len(), 3),
            Dispatched::Queued(_) => panic!("expected inline execution"),
        }

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_login_never_queued() {
        let forum = MockForum::start().await;
        let bridge = testing::bridge(&forum.url);
        let (queue, worker) = Queue::start("flarum", 8, bridge.clone());
        let dispatcher = Dispatcher::with_queue(
            bridge,
            queue,
            [EventKind::Registered, EventKind::Login, EventKind::Logout],
        );
        assert!(dispatcher.is_deferred(EventKind::Registered));
        assert!(!dispatcher.is_deferred(EventKind::Login));
        assert!(!dispatcher.is_deferred(EventKind::Logout));

        match dispatcher.dispatch(LifecycleEvent::Login(alice())).await {
            Dispatched::Done(outcome) => {
                assert_eq!(outcome.cookies.len(), 1);
                assert_eq!(outcome.cookies[0].value(), "tok123");
            },
            Dispatched::Queued(_) => panic!("login was queued"),
        }

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_closed_queue_falls_back_inline() {
        let forum = MockForum::start().await;
        let bridge = testing::bridge(&forum.url);
        let (queue, worker) = Queue::start("flarum", 8, bridge.clone());
        worker.shutdown().await;

        let dispatcher = Dispatcher::with_queue(bridge, queue, [EventKind::Activated]);
        match dispatcher.dispatch(LifecycleEvent::Activated(alice())).await {
            Dispatched::Done(outcome) => assert!(outcome.is_success()),
            Dispatched::Queued(_) => panic!("closed queue accepted a job"),
        }
        assert_eq!(forum.requests()[0].path, "/api/users/7");
    }
}
