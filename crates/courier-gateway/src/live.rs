use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_types::events::{ChangeEvent, Envelope, ResumePoint};
use courier_types::models::{Booking, BookingStatus, HandoffStep, Message};

/// Result of applying one envelope to a [`LiveConversation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Appended,
    /// Read receipts applied to this many local messages.
    Patched(usize),
    BookingChanged,
    /// Already applied, or the message was already loaded.
    Duplicate,
    /// Addressed to a different conversation.
    Ignored,
    /// The stream has a hole; the view must be reloaded from storage.
    NeedsReload,
}

/// Client-side copy of one open conversation, kept current by applying
/// gateway envelopes on top of a REST snapshot.
#[derive(Debug, Clone)]
pub struct LiveConversation {
    booking_id: Uuid,
    status: BookingStatus,
    handoff_step: HandoffStep,
    messages: Vec<Message>,
    index: HashMap<Uuid, usize>,
    /// Receipts for messages whose create has not arrived yet. Publishers
    /// race, so a read can be sequenced ahead of the message it covers.
    pending_reads: HashMap<Uuid, DateTime<Utc>>,
    position: Option<ResumePoint>,
}

impl LiveConversation {
    pub fn new(booking: &Booking, messages: Vec<Message>, position: ResumePoint) -> Self {
        let mut view = Self {
            booking_id: booking.id,
            status: booking.status,
            handoff_step: booking.handoff_step,
            messages: Vec::new(),
            index: HashMap::new(),
            pending_reads: HashMap::new(),
            position: Some(position),
        };
        view.replace_messages(messages);
        view
    }

    pub fn booking_id(&self) -> Uuid {
        self.booking_id
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn handoff_step(&self) -> HandoffStep {
        self.handoff_step
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Last applied stream position.
    pub fn position(&self) -> Option<ResumePoint> {
        self.position
    }

    /// Messages from the other party the viewer has not read yet.
    pub fn unread_count(&self, viewer_id: Uuid) -> usize {
        self.messages
            .iter()
            .filter(|m| m.sender_id != viewer_id && m.read_at.is_none())
            .count()
    }

    /// Swap in a fresh snapshot. Events after `position` apply on top of it.
    pub fn reload(&mut self, booking: &Booking, messages: Vec<Message>, position: ResumePoint) {
        self.status = booking.status;
        self.handoff_step = booking.handoff_step;
        self.position = Some(position);
        self.replace_messages(messages);
    }

    pub fn apply(&mut self, envelope: &Envelope) -> Applied {
        if envelope.booking_id != self.booking_id {
            return Applied::Ignored;
        }

        match self.position {
            Some(at) if at.epoch == envelope.epoch => {
                if envelope.seq <= at.seq {
                    return Applied::Duplicate;
                }
                if envelope.seq != at.seq + 1 {
                    self.position = None;
                    return Applied::NeedsReload;
                }
            }
            _ => {
                self.position = None;
                return Applied::NeedsReload;
            }
        }
        self.position = Some(envelope.position());

        match &envelope.event {
            ChangeEvent::MessageCreate { message } => self.insert(message.clone()),
            ChangeEvent::MessageRead {
                message_ids,
                read_at,
            } => {
                let mut patched = 0;
                for id in message_ids {
                    match self.index.get(id) {
                        Some(&i) => {
                            let message = &mut self.messages[i];
                            if message.read_at.is_none() {
                                message.read_at = Some(*read_at);
                                patched += 1;
                            }
                        }
                        None => {
                            self.pending_reads.insert(*id, *read_at);
                        }
                    }
                }
                Applied::Patched(patched)
            }
            ChangeEvent::BookingUpdate {
                status,
                handoff_step,
            } => {
                // Steps only move forward; a stale update never rewinds the view.
                if *handoff_step < self.handoff_step {
                    return Applied::Duplicate;
                }
                self.status = *status;
                self.handoff_step = *handoff_step;
                Applied::BookingChanged
            }
        }
    }

    fn insert(&mut self, mut message: Message) -> Applied {
        if self.index.contains_key(&message.id) {
            return Applied::Duplicate;
        }
        if let Some(read_at) = self.pending_reads.remove(&message.id) {
            message.read_at = message.read_at.or(Some(read_at));
        }

        let in_order = self
            .messages
            .last()
            .is_none_or(|last| last.created_at <= message.created_at);
        if in_order {
            self.index.insert(message.id, self.messages.len());
            self.messages.push(message);
        } else {
            let at = self
                .messages
                .partition_point(|m| m.created_at <= message.created_at);
            self.messages.insert(at, message);
            self.reindex();
        }
        Applied::Appended
    }

    fn replace_messages(&mut self, messages: Vec<Message>) {
        self.pending_reads.clear();
        self.messages = messages;
        self.reindex();
    }

    fn reindex(&mut self) {
        self.index = self
            .messages
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id, i))
            .collect();
    }
}
