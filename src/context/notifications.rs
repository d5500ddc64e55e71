//! Persisted per-user notifications.

use std::cmp::Reverse;

use crate::error::Result;
use crate::gateway::RemoteGateway;
use crate::model::{Notification, NotificationKind};
use crate::sync::Mutator;

pub struct Notifications<'a, G> {
    mutator: &'a Mutator<G>,
}

impl<'a, G: RemoteGateway> Notifications<'a, G> {
    #[must_use]
    pub fn new(mutator: &'a Mutator<G>) -> Self {
        Self { mutator }
    }

    /// `user_id`'s notifications, newest first.
    #[must_use]
    pub fn list(&self, user_id: &str, unread_only: bool) -> Vec<Notification> {
        let mut items = self
            .mutator
            .store()
            .filter(|n: &Notification| n.user_id == user_id && (!unread_only || !n.is_read));
        items.sort_by_key(|n| (Reverse(n.created_at), Reverse(n.id.clone())));
        items
    }

    #[must_use]
    pub fn unread_count(&self, user_id: &str) -> usize {
        self.list(user_id, true).len()
    }

    /// # Errors
    ///
    /// Returns the write error.
    pub async fn notify(
        &self,
        user_id: &str,
        title: &str,
        message: &str,
        kind: NotificationKind,
        link: Option<&str>,
    ) -> Result<Notification> {
        let mut notification = Notification::new(user_id, title, message, kind);
        if let Some(link) = link {
            notification = notification.with_link(link);
        }
        self.mutator.create(notification).await
    }

    /// # Errors
    ///
    /// Returns `Error::NotFound` or the write error.
    pub async fn mark_read(&self, id: &str) -> Result<Notification> {
        self.mutator
            .update(id, |n: &mut Notification| n.is_read = true)
            .await
    }

    /// Mark every unread notification of `user_id` read; returns how many.
    ///
    /// Each one is its own mutation, so a failure leaves the others read.
    ///
    /// # Errors
    ///
    /// Returns the first write error.
    pub async fn mark_all_read(&self, user_id: &str) -> Result<usize> {
        let unread = self.list(user_id, true);
        for notification in &unread {
            self.mark_read(&notification.id).await?;
        }
        Ok(unread.len())
    }

    /// # Errors
    ///
    /// Returns `Error::NotFound` or the remote error.
    pub async fn delete(&self, id: &str) -> Result<Notification> {
        self.mutator.delete::<Notification>(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::fixtures::fixture;

    #[tokio::test]
    async fn test_newest_first_and_unread_count() {
        let f = fixture().await;
        let notifications = Notifications::new(&f.mutator);

        let first = notifications
            .notify("u1", "First", "m", NotificationKind::Info, None)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = notifications
            .notify("u1", "Second", "m", NotificationKind::Grade, Some("/grades"))
            .await
            .unwrap();
        notifications
            .notify("u2", "Someone else", "m", NotificationKind::Info, None)
            .await
            .unwrap();

        let ids: Vec<String> = notifications.list("u1", false).into_iter().map(|n| n.id).collect();
        assert_eq!(ids, [second.id.clone(), first.id.clone()]);
        assert_eq!(notifications.unread_count("u1"), 2);

        notifications.mark_read(&first.id).await.unwrap();
        assert_eq!(notifications.unread_count("u1"), 1);
        assert_eq!(notifications.list("u1", true)[0].link.as_deref(), Some("/grades"));
    }

    #[tokio::test]
    async fn test_mark_all_read_and_delete() {
        let f = fixture().await;
        let notifications = Notifications::new(&f.mutator);
        for title in ["a", "b", "c"] {
            notifications
                .notify("u1", title, "m", NotificationKind::Info, None)
                .await
                .unwrap();
        }

        assert_eq!(notifications.mark_all_read("u1").await.unwrap(), 3);
        assert_eq!(notifications.unread_count("u1"), 0);
        assert_eq!(notifications.mark_all_read("u1").await.unwrap(), 0);

        let id = notifications.list("u1", false)[0].id.clone();
        notifications.delete(&id).await.unwrap();
        assert_eq!(notifications.list("u1", false).len(), 2);
    }
}
