use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{trace, warn};
use uuid::Uuid;

use courier_db::Database;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Inbox badge for one user: the unread total, polled on an interval and
/// recomputed on demand. Stops polling when dropped.
pub struct UnreadBadge {
    rx: watch::Receiver<u64>,
    refresh: Arc<Notify>,
    task: JoinHandle<()>,
}

impl UnreadBadge {
    pub fn spawn(db: Arc<Database>, user_id: Uuid, interval: Duration) -> Self {
        let (tx, rx) = watch::channel(0);
        let refresh = Arc::new(Notify::new());
        let task = tokio::spawn(run_badge_loop(db, user_id, interval, tx, refresh.clone()));
        Self { rx, refresh, task }
    }

    /// Last computed total.
    pub fn current(&self) -> u64 {
        *self.rx.borrow()
    }

    /// Recompute now, e.g. after the user read a conversation.
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    /// Detached trigger for [`refresh`](Self::refresh), for code that does
    /// not own the badge.
    pub fn refresh_handle(&self) -> BadgeRefresh {
        BadgeRefresh(self.refresh.clone())
    }

    /// Wait until the total changes. `None` if the poller has stopped.
    pub async fn changed(&mut self) -> Option<u64> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

#[derive(Clone)]
pub struct BadgeRefresh(Arc<Notify>);

impl BadgeRefresh {
    pub fn refresh(&self) {
        self.0.notify_one();
    }
}

impl Drop for UnreadBadge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_badge_loop(
    db: Arc<Database>,
    user_id: Uuid,
    interval: Duration,
    tx: watch::Sender<u64>,
    refresh: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = refresh.notified() => {}
        }

        let db = db.clone();
        let total = match tokio::task::spawn_blocking(move || db.unread_total(user_id)).await {
            Ok(total) => total,
            Err(e) => {
                warn!("Unread poll for {} failed: {}", user_id, e);
                continue;
            }
        };

        trace!("Unread total for {} is {}", user_id, total);
        tx.send_if_modified(|current| {
            let changed = *current != total;
            *current = total;
            changed
        });
        if tx.is_closed() {
            break;
        }
    }
}
