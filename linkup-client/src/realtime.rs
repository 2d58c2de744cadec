//! Live change-event subscription.
//!
//! One subscription covers one entity kind. The socket task decodes the
//! platform's change frames into [`RawChange`]s and forwards them into an
//! unbounded channel: a lazy, non-restartable sequence with a single
//! consumer. Releasing the handle (or dropping it) cancels the task and
//! closes the channel; realtime delivery is best-effort, so a dead socket
//! ends the stream quietly rather than erroring the consumer.

use crate::client::{ClientError, Result};
use futures_util::{SinkExt, StreamExt};
use linkup_common::change::{ChangeOp, EntityKind, RawChange};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live change feed for one entity kind.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<RawChange>,
    handle: SubscriptionHandle,
}

/// Owner of the underlying connection. Dropping it releases the
/// subscription; releasing twice is a no-op.
pub struct SubscriptionHandle {
    token: CancellationToken,
}

impl SubscriptionHandle {
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn release(&self) {
        self.token.cancel();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl Subscription {
    #[must_use]
    pub fn new(events: mpsc::UnboundedReceiver<RawChange>, handle: SubscriptionHandle) -> Self {
        Self { events, handle }
    }

    /// In-process subscription fed by the returned sender. Used by test
    /// backends; the stream ends when the sender is dropped or the
    /// subscription is released.
    #[must_use]
    pub fn channel() -> (mpsc::UnboundedSender<RawChange>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = Self::new(rx, SubscriptionHandle::new(CancellationToken::new()));
        (tx, subscription)
    }

    /// The next change, or `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Option<RawChange> {
        self.events.recv().await
    }

    pub fn release(&self) {
        self.handle.release();
    }

    #[must_use]
    pub fn split(self) -> (mpsc::UnboundedReceiver<RawChange>, SubscriptionHandle) {
        (self.events, self.handle)
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
struct OutboundFrame<'a> {
    topic: &'a str,
    event: &'a str,
    payload: Value,
    #[serde(rename = "ref")]
    reference: String,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    op: ChangeOp,
    table: String,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

/// Connects, joins the change channel for `kind`, and spawns the reader
/// task. Subscribing again for the same kind opens an independent stream;
/// the platform treats each join as its own channel.
pub async fn connect(url: Url, kind: EntityKind) -> Result<Subscription> {
    let (socket, _) = connect_async(url.as_str())
        .await
        .map_err(|err| ClientError::Realtime(err.to_string()))?;
    let (mut sink, stream) = socket.split();

    let topic = format!("realtime:public:{}", kind.table());
    let join = OutboundFrame {
        topic: &topic,
        event: "phx_join",
        payload: json!({
            "config": {
                "postgres_changes": [
                    { "event": "*", "schema": "public", "table": kind.table() },
                ],
            },
        }),
        reference: "1".to_owned(),
    };
    send_frame(&mut sink, &join).await?;
    debug!(table = kind.table(), "Joined realtime channel");

    let (tx, rx) = mpsc::unbounded_channel();
    let token = CancellationToken::new();
    tokio::spawn(run_subscription(
        sink,
        stream,
        topic,
        kind,
        tx,
        token.clone(),
    ));

    Ok(Subscription::new(rx, SubscriptionHandle::new(token)))
}

async fn send_frame(
    sink: &mut futures_util::stream::SplitSink<Socket, Message>,
    frame: &OutboundFrame<'_>,
) -> Result<()> {
    let text = serde_json::to_string(frame)
        .map_err(|err| ClientError::Realtime(err.to_string()))?;
    sink.send(Message::text(text))
        .await
        .map_err(|err| ClientError::Realtime(err.to_string()))
}

async fn run_subscription(
    mut sink: futures_util::stream::SplitSink<Socket, Message>,
    mut stream: futures_util::stream::SplitStream<Socket>,
    topic: String,
    kind: EntityKind,
    events: mpsc::UnboundedSender<RawChange>,
    token: CancellationToken,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut reference: u64 = 2;

    loop {
        tokio::select! {
            () = token.cancelled() => {
                debug!(%topic, "Subscription released");
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            _ = heartbeat.tick() => {
                let frame = OutboundFrame {
                    topic: "phoenix",
                    event: "heartbeat",
                    payload: json!({}),
                    reference: reference.to_string(),
                };
                reference += 1;
                if send_frame(&mut sink, &frame).await.is_err() {
                    warn!(%topic, "Heartbeat failed, ending subscription");
                    break;
                }
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(change) = decode_change(kind, text.as_str())
                        && events.send(change).is_err()
                    {
                        // Consumer gone; nothing left to deliver to.
                        break;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(%topic, error = %err, "Realtime socket failed");
                    break;
                }
                None => {
                    debug!(%topic, "Realtime socket closed by peer");
                    break;
                }
            }
        }
    }
}

/// Decodes one inbound frame into a [`RawChange`]. Control frames and
/// frames for other tables return `None`; malformed change frames are
/// logged and skipped, since one bad event must not interrupt the stream.
fn decode_change(kind: EntityKind, text: &str) -> Option<RawChange> {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = %err, "Dropping undecodable realtime frame");
            return None;
        }
    };

    if frame.event != "postgres_changes" {
        return None;
    }

    let data: ChangeData = match serde_json::from_value(frame.payload["data"].clone()) {
        Ok(data) => data,
        Err(err) => {
            warn!(error = %err, "Dropping malformed change frame");
            return None;
        }
    };

    if EntityKind::from_table(&data.table) != Some(kind) {
        debug!(table = %data.table, "Ignoring change for another table");
        return None;
    }

    Some(RawChange {
        kind,
        op: data.op,
        new: data.record,
        old: data.old_record,
    })
}
