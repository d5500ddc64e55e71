//! Celebration queue.
//!
//! A FIFO of transient, user-facing events (completion, achievement,
//! badge). Only the head is shown. It leaves the queue when the user
//! dismisses it or when its auto-dismiss delay elapses; the delay starts
//! when the event becomes the head. Nothing here is persisted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::model::Badge;

/// Delay before the head is dismissed automatically.
pub const DEFAULT_DISMISS_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CelebrationKind {
    Completion,
    Achievement,
    Badge,
    Grade,
}

/// Badge shown alongside a celebration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BadgeDescriptor {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub color: Option<String>,
}

impl From<&Badge> for BadgeDescriptor {
    fn from(badge: &Badge) -> Self {
        Self {
            id: badge.id.clone(),
            name: badge.name.clone(),
            icon: badge.icon.clone(),
            color: badge.color.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CelebrationEvent {
    pub kind: CelebrationKind,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<BadgeDescriptor>,
}

impl CelebrationEvent {
    #[must_use]
    pub fn new(kind: CelebrationKind, title: &str, message: &str) -> Self {
        Self {
            kind,
            title: title.to_string(),
            message: message.to_string(),
            icon: None,
            color: None,
            xp: None,
            badge: None,
        }
    }

    #[must_use]
    pub fn with_xp(mut self, xp: u64) -> Self {
        self.xp = (xp > 0).then_some(xp);
        self
    }

    #[must_use]
    pub fn with_badge(mut self, badge: &Badge) -> Self {
        self.icon.clone_from(&badge.icon);
        self.color.clone_from(&badge.color);
        self.badge = Some(BadgeDescriptor::from(badge));
        self
    }
}

/// The queue itself; time is read from the tokio clock.
#[derive(Debug)]
pub struct CelebrationQueue {
    events: VecDeque<CelebrationEvent>,
    head_since: Option<Instant>,
    dismiss_after: Duration,
}

impl Default for CelebrationQueue {
    fn default() -> Self {
        Self::new(DEFAULT_DISMISS_AFTER)
    }
}

impl CelebrationQueue {
    #[must_use]
    pub fn new(dismiss_after: Duration) -> Self {
        Self {
            events: VecDeque::new(),
            head_since: None,
            dismiss_after,
        }
    }

    pub fn enqueue(&mut self, event: CelebrationEvent) {
        self.expire();
        if self.events.is_empty() {
            self.head_since = Some(Instant::now());
        }
        self.events.push_back(event);
    }

    /// The event to show now, after dropping any whose delay elapsed.
    pub fn head(&mut self) -> Option<&CelebrationEvent> {
        self.expire();
        self.events.front()
    }

    /// Dismiss the head; the next event's delay starts now.
    pub fn dismiss_head(&mut self) -> Option<CelebrationEvent> {
        self.expire();
        let dismissed = self.events.pop_front();
        self.head_since = (!self.events.is_empty()).then(Instant::now);
        dismissed
    }

    /// When the current head will auto-dismiss.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.head_since.map(|since| since + self.dismiss_after)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drop heads whose delay elapsed. Each successor became head at
    /// its predecessor's deadline.
    fn expire(&mut self) {
        let now = Instant::now();
        while let Some(deadline) = self.deadline() {
            if deadline > now {
                break;
            }
            self.events.pop_front();
            self.head_since = (!self.events.is_empty()).then_some(deadline);
        }
    }
}

/// Shared handle publishing the visible head on a `watch` channel.
#[derive(Debug, Clone)]
pub struct Celebrations {
    queue: Arc<Mutex<CelebrationQueue>>,
    head: Arc<watch::Sender<Option<CelebrationEvent>>>,
    wake: Arc<Notify>,
}

impl Default for Celebrations {
    fn default() -> Self {
        Self::new(DEFAULT_DISMISS_AFTER)
    }
}

impl Celebrations {
    #[must_use]
    pub fn new(dismiss_after: Duration) -> Self {
        Self {
            queue: Arc::new(Mutex::new(CelebrationQueue::new(dismiss_after))),
            head: Arc::new(watch::Sender::new(None)),
            wake: Arc::new(Notify::new()),
        }
    }

    fn with_queue<R>(&self, f: impl FnOnce(&mut CelebrationQueue) -> R) -> R {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut queue);
        let head = queue.head().cloned();
        self.head.send_if_modified(|current| {
            if *current == head {
                false
            } else {
                *current = head;
                true
            }
        });
        result
    }

    pub fn enqueue(&self, event: CelebrationEvent) {
        self.with_queue(|q| q.enqueue(event));
        self.wake.notify_one();
    }

    #[must_use]
    pub fn head(&self) -> Option<CelebrationEvent> {
        self.with_queue(|q| q.head().cloned())
    }

    pub fn dismiss_head(&self) -> Option<CelebrationEvent> {
        let dismissed = self.with_queue(CelebrationQueue::dismiss_head);
        self.wake.notify_one();
        dismissed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.with_queue(|q| q.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver for the currently visible event.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<CelebrationEvent>> {
        self.head.subscribe()
    }

    /// Spawn the timer that auto-dismisses heads as their delay elapses.
    pub fn spawn_auto_dismiss(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let deadline = this.with_queue(|q| q.deadline());
                match deadline {
                    Some(deadline) => {
                        tokio::select! {
                            () = tokio::time::sleep_until(deadline) => {
                                this.with_queue(|q| q.head().is_some());
                            }
                            () = this.wake.notified() => {}
                        }
                    }
                    None => this.wake.notified().await,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(title: &str) -> CelebrationEvent {
        CelebrationEvent::new(CelebrationKind::Achievement, title, "well done")
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_event_waits_for_first() {
        let mut queue = CelebrationQueue::default();
        queue.enqueue(event("first"));
        queue.enqueue(event("second"));

        assert_eq!(queue.head().unwrap().title, "first");
        tokio::time::advance(Duration::from_millis(4999)).await;
        assert_eq!(queue.head().unwrap().title, "first");

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(queue.head().unwrap().title, "second");
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_dismiss_restarts_timer() {
        let mut queue = CelebrationQueue::default();
        queue.enqueue(event("first"));
        queue.enqueue(event("second"));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(queue.dismiss_head().unwrap().title, "first");

        // The second became head just now and gets its full delay.
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(queue.head().unwrap().title, "second");
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(queue.head().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_observation_chains_deadlines() {
        let mut queue = CelebrationQueue::default();
        for title in ["a", "b", "c"] {
            queue.enqueue(event(title));
        }
        tokio::time::advance(Duration::from_secs(12)).await;
        assert_eq!(queue.head().unwrap().title, "c");
        assert_eq!(queue.deadline(), Some(queue.head_since.unwrap() + DEFAULT_DISMISS_AFTER));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_dismiss_task_publishes_heads() {
        let celebrations = Celebrations::default();
        let mut rx = celebrations.subscribe();
        let task = celebrations.spawn_auto_dismiss();

        celebrations.enqueue(event("badge"));
        celebrations.enqueue(event("achievement"));
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().title, "badge");

        // Wake just after each deadline so the timer task runs first.
        tokio::time::sleep(Duration::from_millis(5001)).await;
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().title, "achievement");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.borrow().is_none());
        task.abort();
    }

    #[test]
    fn test_zero_xp_is_omitted() {
        assert_eq!(event("x").with_xp(0).xp, None);
        assert_eq!(event("x").with_xp(25).xp, Some(25));
    }
}
