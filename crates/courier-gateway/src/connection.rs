use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use courier_db::Database;
use courier_types::events::{GatewayCommand, GatewayEvent};

use crate::badge::{BadgeRefresh, UnreadBadge};
use crate::dispatcher::{Delivery, Dispatcher, Subscription};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Frames queued for one socket before forwarders start waiting.
const OUTBOUND_CAPACITY: usize = 256;

type Forwarders = Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>;

/// Handle a pre-authenticated WebSocket connection. The token was checked
/// at the HTTP upgrade, so the client goes straight to Ready.
pub async fn handle_connection_authenticated(
    socket: WebSocket,
    db: Arc<Database>,
    dispatcher: Dispatcher,
    user_id: Uuid,
    badge_interval: Duration,
) {
    let (mut sink, mut receiver) = socket.split();
    info!("{} connected to gateway", user_id);

    if send_event(&mut sink, &GatewayEvent::Ready { user_id }).await.is_err() {
        return;
    }

    // Everything bound for the client funnels through one queue so the
    // forwarders never contend for the socket.
    let (out_tx, mut out_rx) = mpsc::channel::<GatewayEvent>(OUTBOUND_CAPACITY);
    let forwarders: Forwarders = Arc::new(Mutex::new(HashMap::new()));

    let mut badge = UnreadBadge::spawn(db.clone(), user_id, badge_interval);
    let badge_refresh = badge.refresh_handle();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = out_rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                total = badge.changed() => {
                    let Some(total) = total else { break };
                    if send_event(&mut sink, &GatewayEvent::UnreadTotal { total }).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sink.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_forwarders = forwarders.clone();
    let recv_dispatcher = dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &db,
                            &recv_dispatcher,
                            user_id,
                            cmd,
                            &recv_forwarders,
                            &out_tx,
                            &badge_refresh,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        let _ = out_tx
                            .send(GatewayEvent::Error {
                                message: "unrecognized command".into(),
                            })
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Aborting the forwarders drops their subscriptions, which releases
    // any topic this connection was the last reader of.
    for (_, task) in forwarders.lock().await.drain() {
        task.abort();
    }
    info!("{} disconnected from gateway", user_id);
}

async fn handle_command(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    user_id: Uuid,
    cmd: GatewayCommand,
    forwarders: &Forwarders,
    out_tx: &mpsc::Sender<GatewayEvent>,
    badge_refresh: &BadgeRefresh,
) {
    match cmd {
        GatewayCommand::Subscribe { booking_id, resume } => {
            let allowed = {
                let db = db.clone();
                tokio::task::spawn_blocking(move || db.get_booking(booking_id, user_id)).await
            };
            match allowed {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    debug!("{} denied subscription to {}: {}", user_id, booking_id, e);
                    let _ = out_tx
                        .send(GatewayEvent::Error {
                            message: format!("cannot subscribe to {booking_id}: {e}"),
                        })
                        .await;
                    return;
                }
                Err(e) => {
                    warn!("Subscription check for {} failed: {}", booking_id, e);
                    return;
                }
            }

            // Subscribe before dropping a previous forwarder so the topic
            // survives a resubscribe.
            let mut forwarders = forwarders.lock().await;
            let subscription = dispatcher.subscribe(booking_id);
            if let Some(previous) = forwarders.remove(&booking_id) {
                stop_forwarder(previous).await;
            }

            let start = subscription.start();
            let resync = !resume.is_some_and(|r| subscription.continues_from(r));
            info!("{} subscribed to {} (resync: {})", user_id, booking_id, resync);

            if out_tx
                .send(GatewayEvent::Subscribed {
                    booking_id,
                    epoch: start.epoch,
                    seq: start.seq,
                    resync,
                })
                .await
                .is_err()
            {
                return;
            }

            let task = tokio::spawn(forward_subscription(subscription, out_tx.clone()));
            forwarders.insert(booking_id, task);
        }

        GatewayCommand::Unsubscribe { booking_id } => {
            let removed = forwarders.lock().await.remove(&booking_id);
            if let Some(task) = removed {
                stop_forwarder(task).await;
                debug!("{} unsubscribed from {}", user_id, booking_id);
            }
            let _ = out_tx.send(GatewayEvent::Unsubscribed { booking_id }).await;
        }

        GatewayCommand::RefreshUnread => {
            badge_refresh.refresh();
        }
    }
}

/// Abort a forwarder and wait until its subscription has been dropped.
async fn stop_forwarder(task: JoinHandle<()>) {
    task.abort();
    let _ = task.await;
}

/// Pump one subscription into the connection's outbound queue.
async fn forward_subscription(mut subscription: Subscription, out_tx: mpsc::Sender<GatewayEvent>) {
    let booking_id = subscription.booking_id();
    while let Some(delivery) = subscription.recv().await {
        let event = match delivery {
            Delivery::Event(envelope) => {
                trace!("Forwarding seq {} on {}", envelope.seq, booking_id);
                GatewayEvent::Event(envelope)
            }
            Delivery::Lagged(missed) => {
                warn!("Subscription to {} lagged by {} events", booking_id, missed);
                GatewayEvent::Lagged { booking_id, missed }
            }
        };
        if out_tx.send(event).await.is_err() {
            break;
        }
    }
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sink.send(Message::Text(text.into())).await.map_err(|_| ())
}
