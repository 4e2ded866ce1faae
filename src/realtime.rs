use crate::config::{Config, StoreCredentials};
use crate::error::StoreError;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PROTOCOL_VERSION: &str = "1.0.0";
const QUEUE_CAPACITY: usize = 64;
const JOIN_REF: &str = "1";

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Raw row from an INSERT on the watched table. Not validated yet.
    Insert(Value),
    /// The channel is gone and will not deliver anything else.
    Closed(String),
}

#[derive(Deserialize)]
struct InboundFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
}

/// Realtime websocket endpoint for a project URL.
pub fn socket_url(store_url: &str, key: &str) -> Result<Url, StoreError> {
    let mut url = Url::parse(store_url).map_err(|e| StoreError::InvalidUrl(e.to_string()))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(StoreError::InvalidUrl(format!("unsupported scheme {}", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| StoreError::InvalidUrl(store_url.to_string()))?;
    url.set_path("/realtime/v1/websocket");
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", key)
        .append_pair("vsn", PROTOCOL_VERSION);
    Ok(url)
}

pub fn channel_topic(channel: &str) -> String {
    format!("realtime:{}", channel)
}

fn join_frame(topic: &str, table: &str, key: &str, join_ref: &str) -> Value {
    json!({
        "topic": topic,
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "INSERT", "schema": "public", "table": table }
                ]
            },
            "access_token": key
        },
        "ref": join_ref,
        "join_ref": join_ref
    })
}

fn heartbeat_frame(reference: &str) -> Value {
    json!({ "topic": "phoenix", "event": "heartbeat", "payload": {}, "ref": reference })
}

fn leave_frame(topic: &str, reference: &str) -> Value {
    json!({ "topic": topic, "event": "phx_leave", "payload": {}, "ref": reference })
}

/// Maps one text frame to a feed event. Anything not about our channel's
/// inserts, or its failure, yields `None`.
pub fn parse_frame(text: &str, topic: &str, table: &str) -> Option<FeedEvent> {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Skipping unreadable realtime frame: {}", e);
            return None;
        }
    };
    if frame.topic != topic {
        return None;
    }

    match frame.event.as_str() {
        "postgres_changes" => {
            let data = frame.payload.get("data")?;
            let is_insert = data.get("type").and_then(Value::as_str) == Some("INSERT");
            let same_table = data.get("table").and_then(Value::as_str) == Some(table);
            if !(is_insert && same_table) {
                return None;
            }
            data.get("record").cloned().map(FeedEvent::Insert)
        }
        "phx_reply" => {
            let status = frame.payload.get("status").and_then(Value::as_str);
            if status == Some("error") {
                let response = frame.payload.get("response").cloned().unwrap_or(Value::Null);
                Some(FeedEvent::Closed(format!("join rejected: {}", response)))
            } else {
                None
            }
        }
        "system" => {
            let status = frame.payload.get("status").and_then(Value::as_str);
            if status == Some("error") {
                let message = frame
                    .payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                Some(FeedEvent::Closed(message.to_string()))
            } else {
                None
            }
        }
        "phx_error" => Some(FeedEvent::Closed("channel error".to_string())),
        "phx_close" => Some(FeedEvent::Closed("channel closed".to_string())),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct FeedSettings {
    topic: String,
    table: String,
    key: String,
    heartbeat: Duration,
}

/// Subscription to INSERT events on the feedback table.
///
/// Events are queued until [`LiveFeed::recv`] drains them. [`LiveFeed::close`]
/// leaves the channel cleanly; dropping the feed aborts the socket task.
pub struct LiveFeed {
    events: mpsc::Receiver<FeedEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LiveFeed {
    pub async fn connect(credentials: &StoreCredentials, config: &Config) -> Result<Self, StoreError> {
        let url = socket_url(&credentials.url, &credentials.key)?;
        let settings = FeedSettings {
            topic: channel_topic(&config.channel),
            table: config.table.clone(),
            key: credentials.key.clone(),
            heartbeat: Duration::from_secs(config.heartbeat_secs.max(1)),
        };

        // The join is on the wire before this returns, so a bulk load started
        // afterwards cannot miss rows inserted in between.
        let limit = Duration::from_secs(config.timeout_secs);
        let socket = tokio::time::timeout(limit, open_and_join(url.as_str(), &settings))
            .await
            .map_err(|_| StoreError::Realtime("handshake timed out".to_string()))??;
        info!("Live feed connected ({})", settings.topic);

        let (tx, events) = mpsc::channel(QUEUE_CAPACITY);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run(socket, settings, tx, shutdown_rx));

        Ok(Self {
            events,
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }

    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!("Live feed task ended abnormally: {}", e);
        }
        info!("Live feed closed");
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn open_and_join(url: &str, settings: &FeedSettings) -> Result<Socket, StoreError> {
    let (mut socket, _) = connect_async(url)
        .await
        .map_err(|e| StoreError::Realtime(e.to_string()))?;
    let join = join_frame(&settings.topic, &settings.table, &settings.key, JOIN_REF);
    socket
        .send(Message::Text(join.to_string()))
        .await
        .map_err(|e| StoreError::Realtime(e.to_string()))?;
    Ok(socket)
}

async fn run(
    socket: Socket,
    settings: FeedSettings,
    tx: mpsc::Sender<FeedEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let (mut sink, mut stream) = socket.split();
    let mut next_ref: u64 = 2;
    let mut take_ref = || {
        let reference = next_ref.to_string();
        next_ref += 1;
        reference
    };

    let mut heartbeat = tokio::time::interval(settings.heartbeat);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let leave = leave_frame(&settings.topic, &take_ref());
                let _ = sink.send(Message::Text(leave.to_string())).await;
                let _ = sink.close().await;
                break;
            }
            _ = heartbeat.tick() => {
                let beat = heartbeat_frame(&take_ref());
                if let Err(e) = sink.send(Message::Text(beat.to_string())).await {
                    let _ = tx.send(FeedEvent::Closed(e.to_string())).await;
                    break;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Some(event) = parse_frame(&text, &settings.topic, &settings.table) else {
                        continue;
                    };
                    let closed = matches!(event, FeedEvent::Closed(_));
                    if tx.send(event).await.is_err() || closed {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    let _ = tx.send(FeedEvent::Closed("server closed the socket".to_string())).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = tx.send(FeedEvent::Closed(e.to_string())).await;
                    break;
                }
                None => {
                    let _ = tx.send(FeedEvent::Closed("socket ended".to_string())).await;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const TOPIC: &str = "realtime:ratings-live-feed";

    fn insert_frame(topic: &str, table: &str, kind: &str, id: Value) -> String {
        json!({
            "topic": topic,
            "event": "postgres_changes",
            "payload": {
                "ids": [1],
                "data": {
                    "schema": "public",
                    "table": table,
                    "type": kind,
                    "commit_timestamp": "2024-01-01T00:00:00Z",
                    "record": {
                        "id": id,
                        "name": "Ana",
                        "rating": 5,
                        "comment": "Great",
                        "created_at": "2024-01-01T00:00:00Z"
                    },
                    "errors": null
                }
            },
            "ref": null
        })
        .to_string()
    }

    #[test]
    fn socket_url_switches_scheme_and_path() {
        let url = socket_url("https://demo.supabase.co", "anon").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://demo.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );

        let url = socket_url("http://127.0.0.1:54321", "k").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://127.0.0.1:54321/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
    }

    #[test]
    fn socket_url_rejects_garbage() {
        assert!(matches!(
            socket_url("not a url", "k"),
            Err(StoreError::InvalidUrl(_))
        ));
        assert!(matches!(
            socket_url("ftp://demo.supabase.co", "k"),
            Err(StoreError::InvalidUrl(_))
        ));
    }

    #[test]
    fn join_subscribes_to_inserts_only() {
        let frame = join_frame(TOPIC, "ratings", "anon", "1");
        assert_eq!(frame["event"], "phx_join");
        let changes = &frame["payload"]["config"]["postgres_changes"];
        assert_eq!(changes.as_array().unwrap().len(), 1);
        assert_eq!(changes[0]["event"], "INSERT");
        assert_eq!(changes[0]["table"], "ratings");
    }

    #[test]
    fn parses_insert_record() {
        let text = insert_frame(TOPIC, "ratings", "INSERT", json!(3));
        match parse_frame(&text, TOPIC, "ratings") {
            Some(FeedEvent::Insert(record)) => assert_eq!(record["id"], 3),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn passes_malformed_ids_through_for_the_roster_to_drop() {
        let text = insert_frame(TOPIC, "ratings", "INSERT", json!("abc"));
        assert!(matches!(
            parse_frame(&text, TOPIC, "ratings"),
            Some(FeedEvent::Insert(_))
        ));
    }

    #[test]
    fn ignores_other_topics_tables_and_events() {
        let other_topic = insert_frame("realtime:other", "ratings", "INSERT", json!(1));
        assert_eq!(parse_frame(&other_topic, TOPIC, "ratings"), None);

        let other_table = insert_frame(TOPIC, "works", "INSERT", json!(1));
        assert_eq!(parse_frame(&other_table, TOPIC, "ratings"), None);

        let update = insert_frame(TOPIC, "ratings", "UPDATE", json!(1));
        assert_eq!(parse_frame(&update, TOPIC, "ratings"), None);

        let ok_reply = json!({"topic": TOPIC, "event": "phx_reply", "payload": {"status": "ok", "response": {}}, "ref": "1"});
        assert_eq!(parse_frame(&ok_reply.to_string(), TOPIC, "ratings"), None);

        assert_eq!(parse_frame("not json", TOPIC, "ratings"), None);
    }

    #[test]
    fn join_errors_close_the_feed() {
        let reply = json!({
            "topic": TOPIC,
            "event": "phx_reply",
            "payload": {"status": "error", "response": {"reason": "unauthorized"}},
            "ref": "1"
        });
        assert!(matches!(
            parse_frame(&reply.to_string(), TOPIC, "ratings"),
            Some(FeedEvent::Closed(reason)) if reason.contains("unauthorized")
        ));

        let system = json!({
            "topic": TOPIC,
            "event": "system",
            "payload": {"status": "error", "message": "table not replicated"},
            "ref": null
        });
        assert_eq!(
            parse_frame(&system.to_string(), TOPIC, "ratings"),
            Some(FeedEvent::Closed("table not replicated".to_string()))
        );
    }

    #[tokio::test]
    async fn stalled_handshake_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            // accept and never answer the upgrade
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let credentials = StoreCredentials {
            url: format!("http://{}", addr),
            key: "anon".to_string(),
        };
        let mut config = Config::default();
        config.timeout_secs = 1;

        let started = std::time::Instant::now();
        let result = LiveFeed::connect(&credentials, &config).await;
        assert!(matches!(
            result,
            Err(StoreError::Realtime(ref reason)) if reason.contains("timed out")
        ));
        assert!(started.elapsed() < Duration::from_secs(4));
        server.abort();
    }

    #[tokio::test]
    async fn join_is_sent_before_connect_returns() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (joined_tx, joined_rx) = oneshot::channel();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let join = ws.next().await.unwrap().unwrap();
            let join: Value = serde_json::from_str(join.to_text().unwrap()).unwrap();
            let _ = joined_tx.send(join["event"].clone());
            while let Some(Ok(_)) = ws.next().await {}
        });

        let credentials = StoreCredentials {
            url: format!("http://{}", addr),
            key: "anon".to_string(),
        };
        let feed = LiveFeed::connect(&credentials, &Config::default())
            .await
            .unwrap();
        drop(feed);

        assert_eq!(joined_rx.await.unwrap(), "phx_join");
        server.abort();
    }

    #[tokio::test]
    async fn delivers_inserts_from_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let join = ws.next().await.unwrap().unwrap();
            let join: Value = serde_json::from_str(join.to_text().unwrap()).unwrap();
            assert_eq!(join["event"], "phx_join");
            assert_eq!(join["topic"], TOPIC);

            let frame = insert_frame(TOPIC, "ratings", "INSERT", json!(11));
            ws.send(Message::Text(frame)).await.unwrap();

            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if value["event"] == "phx_leave" {
                        return true;
                    }
                }
            }
            false
        });

        let credentials = StoreCredentials {
            url: format!("http://{}", addr),
            key: "anon".to_string(),
        };
        let mut feed = LiveFeed::connect(&credentials, &Config::default())
            .await
            .unwrap();

        match feed.recv().await {
            Some(FeedEvent::Insert(record)) => assert_eq!(record["id"], 11),
            other => panic!("unexpected: {other:?}"),
        }

        feed.close().await;
        assert!(server.await.unwrap());
    }
}
