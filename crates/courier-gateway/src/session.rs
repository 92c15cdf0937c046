use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use courier_db::{CourierError, Database, Result};
use courier_types::events::ResumePoint;
use courier_types::models::{Booking, Message};

use crate::dispatcher::{Delivery, Dispatcher, Subscription};
use crate::live::{Applied, LiveConversation};

/// An open chat screen: the persisted log plus the live feed on top of it.
///
/// The feed is subscribed before the log is loaded, so nothing written in
/// between is lost; anything delivered twice is dropped by message id.
pub struct ConversationSession {
    db: Arc<Database>,
    viewer_id: Uuid,
    subscription: Subscription,
    view: LiveConversation,
}

impl ConversationSession {
    pub async fn open(
        db: Arc<Database>,
        dispatcher: &Dispatcher,
        booking_id: Uuid,
        viewer_id: Uuid,
    ) -> Result<Self> {
        let subscription = dispatcher.subscribe(booking_id);
        let (booking, messages) = load(db.clone(), booking_id, viewer_id).await?;
        let view = LiveConversation::new(&booking, messages, subscription.start());
        debug!(
            "{} opened conversation {} with {} messages",
            viewer_id,
            booking_id,
            view.messages().len()
        );

        Ok(Self {
            db,
            viewer_id,
            subscription,
            view,
        })
    }

    pub fn view(&self) -> &LiveConversation {
        &self.view
    }

    /// Wait for the next change and fold it into the view. Gaps and lag
    /// trigger a reload. Returns `None` once the feed has closed.
    pub async fn next_change(&mut self) -> Option<Result<Applied>> {
        loop {
            let applied = match self.subscription.recv().await? {
                Delivery::Event(envelope) => self.view.apply(&envelope),
                Delivery::Lagged(missed) => {
                    warn!(
                        "Conversation {} feed lagged by {} events, reloading",
                        self.view.booking_id(),
                        missed
                    );
                    Applied::NeedsReload
                }
            };

            match applied {
                Applied::NeedsReload => return Some(self.reload().await.map(|_| Applied::NeedsReload)),
                Applied::Duplicate | Applied::Ignored => continue,
                other => return Some(Ok(other)),
            }
        }
    }

    /// Re-read the log and re-anchor the view at the topic's current position.
    pub async fn reload(&mut self) -> Result<()> {
        let anchor: ResumePoint = self.subscription.current();
        let (booking, messages) = load(self.db.clone(), self.view.booking_id(), self.viewer_id).await?;
        self.view.reload(&booking, messages, anchor);
        Ok(())
    }

    /// Leave the screen. Releases the subscription.
    pub fn close(self) {
        debug!("{} closed conversation {}", self.viewer_id, self.view.booking_id());
    }
}

async fn load(db: Arc<Database>, booking_id: Uuid, viewer_id: Uuid) -> Result<(Booking, Vec<Message>)> {
    tokio::task::spawn_blocking(move || -> Result<(Booking, Vec<Message>)> {
        let booking = db.get_booking(booking_id, viewer_id)?;
        let messages = db.list_messages(booking_id, viewer_id)?;
        Ok((booking, messages))
    })
    .await
    .map_err(|e| CourierError::storage_msg(format!("conversation load task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup;
    use courier_types::events::ChangeEvent;
    use courier_types::models::HandoffStep;

    #[tokio::test]
    async fn message_written_during_open_shows_up_once() {
        let s = setup();
        let mut session = ConversationSession::open(s.db.clone(), &s.dispatcher, s.booking_id, s.sender)
            .await
            .unwrap();

        // persisted and published after the snapshot was taken
        let message = s.db.send_message(s.booking_id, s.traveler, "landed").unwrap();
        s.dispatcher
            .publish(s.booking_id, ChangeEvent::MessageCreate { message: message.clone() });

        assert_eq!(session.next_change().await.unwrap().unwrap(), Applied::Appended);
        assert_eq!(session.view().messages().len(), 1);
        assert_eq!(session.view().unread_count(s.sender), 1);

        // same message again from a second publisher is dropped silently
        s.dispatcher
            .publish(s.booking_id, ChangeEvent::MessageCreate { message });
        let outcome = s.db.confirm_handoff(s.booking_id, s.sender, HandoffStep::SenderConfirmed).unwrap();
        s.dispatcher.publish(
            s.booking_id,
            ChangeEvent::BookingUpdate {
                status: outcome.booking.status,
                handoff_step: outcome.booking.handoff_step,
            },
        );
        assert_eq!(session.next_change().await.unwrap().unwrap(), Applied::BookingChanged);
        assert_eq!(session.view().messages().len(), 1);
        assert_eq!(session.view().handoff_step(), HandoffStep::SenderConfirmed);
    }

    #[tokio::test]
    async fn closing_releases_the_topic() {
        let s = setup();
        let session = ConversationSession::open(s.db.clone(), &s.dispatcher, s.booking_id, s.traveler)
            .await
            .unwrap();
        assert_eq!(s.dispatcher.open_topics(), 1);
        session.close();
        assert_eq!(s.dispatcher.open_topics(), 0);
    }

    #[tokio::test]
    async fn outsiders_cannot_open_a_conversation() {
        let s = setup();
        let err = ConversationSession::open(s.db.clone(), &s.dispatcher, s.booking_id, Uuid::new_v4())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CourierError::NotFound(_)));
        assert_eq!(s.dispatcher.open_topics(), 0);
    }

    #[tokio::test]
    async fn reload_reanchors_after_a_gap() {
        let s = setup();
        let mut session = ConversationSession::open(s.db.clone(), &s.dispatcher, s.booking_id, s.sender)
            .await
            .unwrap();

        s.db.send_message(s.booking_id, s.traveler, "one").unwrap();
        s.db.send_message(s.booking_id, s.traveler, "two").unwrap();
        session.reload().await.unwrap();
        assert_eq!(session.view().messages().len(), 2);

        let third = s.db.send_message(s.booking_id, s.traveler, "three").unwrap();
        s.dispatcher
            .publish(s.booking_id, ChangeEvent::MessageCreate { message: third });
        assert_eq!(session.next_change().await.unwrap().unwrap(), Applied::Appended);
        assert_eq!(session.view().messages().len(), 3);
    }
}
