//! Inbox-backed notification channel.
//!
//! The single-process stand-in for an external messaging service: every
//! notification becomes an unread inbox item for the recipient, which is
//! exactly what the daemon's inbox poll consumes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Delivery, Notifier, NotifyMeta, Store};
use crate::models::inbox::{InboxItem, InboxSource};
use crate::Result;

/// Notifier that appends inbox items to the element store.
pub struct InboxNotifier {
    inbox: Arc<dyn Store<InboxItem>>,
    channel_id: String,
}

impl InboxNotifier {
    /// Create a notifier posting into the given channel id.
    #[must_use]
    pub fn new(inbox: Arc<dyn Store<InboxItem>>, channel_id: impl Into<String>) -> Self {
        Self {
            inbox,
            channel_id: channel_id.into(),
        }
    }
}

#[async_trait]
impl Notifier for InboxNotifier {
    async fn notify_agent(
        &self,
        agent_id: &str,
        content: &str,
        meta: &NotifyMeta,
    ) -> Result<Delivery> {
        let item = InboxItem::new(
            agent_id.to_owned(),
            self.channel_id.clone(),
            meta.kind,
            InboxSource::Direct,
            content.to_owned(),
        );
        let created = self.inbox.create(item).await?;
        debug!(
            agent_id,
            message_id = %created.message_id,
            kind = ?created.kind,
            "notification queued"
        );
        Ok(Delivery {
            message_id: created.message_id,
            channel_id: created.channel_id,
        })
    }
}
