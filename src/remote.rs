//! Realtime event channel over the dealer websocket.
//!
//! One [`Client`] is one dealer connection. `start()` mints a fresh web
//! credential, opens the socket, performs the connection-id subscription
//! handshake and then pumps frames until the socket closes, the peer errors
//! or the caller cancels. There is no automatic reconnect: the caller that
//! wants a long-lived channel re-runs `start()` in its own restart loop.
//!
//! Events fan out through [`crate::events::Publisher`]; observers subscribe
//! before `start()` and pick the [`Topic`]s they care about.

use std::{ops::ControlFlow, sync::Arc, time::Duration};

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::Config,
    error::{Error, Result},
    events::{Event, Publisher, Topic},
    http,
    protocol::Frame,
    session::WebSession,
    tokens::TokenManager,
};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Lifecycle of one dealer connection.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum State {
    /// No connection attempted yet.
    Idle,
    /// Minting the web credential.
    Authenticating,
    /// Opening the socket.
    Connecting,
    /// Socket open, waiting for the connection-id frame.
    AwaitingConnectionId,
    /// Subscription handshake done; push events flowing.
    Ready,
    /// Torn down, by request or by the peer.
    Closed,
}

/// One dealer connection: socket, heartbeat and event fan-out.
pub struct Client {
    /// Credential minter; a fresh credential per connection attempt.
    session: WebSession,

    /// Bearer source for the subscription handshake.
    tokens: Arc<TokenManager>,

    /// HTTP client for the subscription handshake.
    http: http::Client,

    /// Base of the REST API (subscription endpoint).
    api_url: Url,

    /// The dealer websocket endpoint.
    dealer_url: Url,

    /// Event fan-out to observers.
    publisher: Publisher,

    state: State,

    /// Write half of the open socket, `None` outside a connection.
    ws_tx: Option<WsSink>,

    /// Cancels the frame pump from any task.
    shutdown: CancellationToken,

    /// Heartbeat period.
    heartbeat: Duration,
}

impl Client {
    /// Heartbeat period the dealer expects.
    const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(15_000);

    /// Frames larger than this are dropped unparsed.
    const MAX_FRAME_SIZE: usize = 64 * 1024;

    /// Heartbeat message; the dealer answers with a `pong` frame.
    const PING: &'static str = r#"{"type":"ping"}"#;

    /// Creates a channel client. Nothing connects until [`Self::start`].
    ///
    /// # Errors
    ///
    /// Returns error if an HTTP client cannot be built.
    pub fn new(config: &Config, tokens: Arc<TokenManager>) -> Result<Self> {
        Ok(Self {
            session: WebSession::new(config)?,
            tokens,
            http: http::Client::without_cookies(config)?,
            api_url: config.api_url.clone(),
            dealer_url: config.dealer_url.clone(),
            publisher: Publisher::default(),
            state: State::Idle,
            ws_tx: None,
            shutdown: CancellationToken::new(),
            heartbeat: Self::HEARTBEAT_INTERVAL,
        })
    }

    /// The current connection state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Registers an observer; subscribe before [`Self::start`].
    pub fn subscribe(&mut self, topic: Topic) -> tokio::sync::mpsc::UnboundedReceiver<Event> {
        self.publisher.subscribe(topic)
    }

    /// A handle that cancels the running frame pump from another task.
    #[must_use]
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Connects and pumps frames until closed.
    ///
    /// Emits [`Event::Connected`] once the socket is open,
    /// [`Event::Ready`] exactly once after the subscription handshake, and
    /// push events under their own type names. Returns after teardown.
    ///
    /// # Errors
    ///
    /// Returns error when the credential mint, the socket connect or a
    /// heartbeat write fails. The caller decides whether to start over.
    pub async fn start(&mut self) -> Result<()> {
        if self.ws_tx.is_some() {
            return Err(Error::Connection("channel already started".to_owned()));
        }
        if self.shutdown.is_cancelled() {
            self.shutdown = CancellationToken::new();
        }

        self.state = State::Authenticating;
        let credential = self.session.client_credential().await?;

        self.state = State::Connecting;
        let url = format!("{}?access_token={}", self.dealer_url, credential.token);
        let (socket, _) = tokio_tungstenite::connect_async(url).await?;
        let (ws_tx, ws_rx) = socket.split();
        self.ws_tx = Some(ws_tx);
        self.state = State::AwaitingConnectionId;
        info!("dealer connected");
        self.publisher.publish(&Event::Connected);

        // The dealer drops connections that do not ping right away.
        let result = match self.send_ping().await {
            Ok(()) => self.pump(ws_rx).await,
            Err(e) => Err(e),
        };
        self.stop().await;
        result
    }

    /// Stops the channel; safe to call from any state, repeatedly.
    pub async fn stop(&mut self) {
        if matches!(self.state, State::Idle | State::Closed) {
            return;
        }

        self.shutdown.cancel();
        if let Some(mut ws_tx) = self.ws_tx.take() {
            if let Err(e) = ws_tx.send(Message::Close(None)).await {
                debug!("socket already gone on close: {e}");
            }
        }

        self.state = State::Closed;
        info!("dealer disconnected");
        self.publisher.publish(&Event::Closed);
        self.publisher.clear();
    }

    async fn pump(&mut self, mut ws_rx: WsStream) -> Result<()> {
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + self.heartbeat,
            self.heartbeat,
        );
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,

                _ = heartbeat.tick() => self.send_ping().await?,

                message = ws_rx.next() => match message {
                    Some(Ok(message)) => {
                        if self.handle_message(message).await.is_break() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("dealer socket failed: {e}");
                        self.publisher.publish(&Event::Error(e.to_string()));
                        break;
                    }
                    None => break,
                },
            }
        }

        Ok(())
    }

    async fn handle_message(&mut self, message: Message) -> ControlFlow<()> {
        match message {
            Message::Text(text) => {
                if text.len() > Self::MAX_FRAME_SIZE {
                    warn!("dropping oversized frame ({} bytes)", text.len());
                    return ControlFlow::Continue(());
                }
                match serde_json::from_str::<Frame>(text.as_str()) {
                    Ok(frame) => self.handle_frame(frame).await,
                    Err(e) => {
                        trace!("dropping unrecognizable frame: {e}");
                        ControlFlow::Continue(())
                    }
                }
            }

            Message::Ping(payload) => {
                if let Some(ws_tx) = self.ws_tx.as_mut() {
                    if let Err(e) = ws_tx.send(Message::Pong(payload)).await {
                        debug!("pong failed: {e}");
                    }
                }
                ControlFlow::Continue(())
            }

            Message::Close(frame) => {
                debug!("dealer closed the connection: {frame:?}");
                ControlFlow::Break(())
            }

            _ => ControlFlow::Continue(()),
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> ControlFlow<()> {
        if let Some(connection_id) = frame.connection_id() {
            // Re-announced connection ids do not restart the handshake.
            if self.state != State::Ready {
                match self.subscribe_connection(connection_id).await {
                    Ok(()) => {
                        self.state = State::Ready;
                        info!("dealer subscription ready");
                        self.publisher.publish(&Event::Ready);
                    }
                    Err(e) => {
                        error!("dealer subscription failed: {e}");
                        self.publisher.publish(&Event::Error(e.to_string()));
                    }
                }
            }
            return ControlFlow::Continue(());
        }

        if let Some(event) = frame.into_first_event() {
            trace!("push event: {}", event.kind);
            self.publisher.publish(&Event::Push {
                kind: event.kind,
                payload: event.event,
            });
        }

        ControlFlow::Continue(())
    }

    /// Binds the connection id to the account's player notifications.
    async fn subscribe_connection(&self, connection_id: &str) -> Result<()> {
        let token = match self.tokens.access_token().await {
            Some(token) => token,
            None => self.tokens.refresh().await?,
        };

        let mut url = self.api_url.join("me/notifications/player")?;
        url.query_pairs_mut()
            .append_pair("connection_id", connection_id);

        let request = self.http.unlimited.put(url).bearer_auth(token);
        self.http.send(request).await?.error_for_status()?;
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<()> {
        let ws_tx = self
            .ws_tx
            .as_mut()
            .ok_or_else(|| Error::Connection("no open socket".to_owned()))?;
        trace!("ping");
        ws_tx.send(Message::text(Self::PING)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::timeout;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use crate::{
        config::Secrets,
        store::{keys, MemoryStore, SecretStore},
    };

    const RECV_WINDOW: Duration = Duration::from_secs(5);

    fn config(rest_url: &str, dealer_url: &str) -> Config {
        let mut config = Config::with_secrets(Secrets {
            client_id: "id".to_owned(),
            client_secret: "secret".to_owned(),
            sp_dc: "cookie".to_owned(),
            redirect_uri: None,
            access_token: None,
            refresh_token: None,
        });
        config.web_url = Url::parse(rest_url).unwrap();
        config.api_url = config.web_url.clone();
        config.dealer_url = Url::parse(dealer_url).unwrap();
        config
    }

    async fn mount_mint_endpoints(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/server-time"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "serverTime": 1_700_000_000u64,
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/get_access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "web-token",
            })))
            .mount(server)
            .await;
    }

    /// In-process dealer: sends the given frames on connect, then counts
    /// incoming pings until the peer closes.
    async fn loopback_dealer(
        frames: Vec<String>,
        pings: Arc<AtomicUsize>,
    ) -> (String, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            for frame in frames {
                socket.send(Message::text(frame)).await.unwrap();
            }
            while let Some(Ok(message)) = socket.next().await {
                match message {
                    Message::Text(text) if text.as_str().contains("ping") => {
                        pings.fetch_add(1, Ordering::SeqCst);
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        (format!("ws://{addr}/"), server)
    }

    fn connection_id_frame(id: &str) -> String {
        serde_json::json!({
            "headers": { "Spotify-Connection-Id": id },
        })
        .to_string()
    }

    fn push_frame(kind: &str) -> String {
        serde_json::json!({
            "payloads": [ { "events": [ { "type": kind, "event": { "seq": 7 } } ] } ],
        })
        .to_string()
    }

    async fn client(rest_url: &str, dealer_url: &str) -> Client {
        let config = config(rest_url, dealer_url);
        let store = MemoryStore::shared();
        store.set(keys::ACCESS_TOKEN, "bearer-token", true);
        let tokens = Arc::new(TokenManager::new(&config, store).unwrap());
        Client::new(&config, tokens).unwrap()
    }

    #[tokio::test]
    async fn handshake_emits_ready_exactly_once() {
        let rest = MockServer::start().await;
        mount_mint_endpoints(&rest).await;
        Mock::given(method("PUT"))
            .and(path("/me/notifications/player"))
            .and(query_param("connection_id", "conn-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&rest)
            .await;

        let (dealer_url, server) = loopback_dealer(
            vec![
                connection_id_frame("conn-1"),
                connection_id_frame("conn-1"),
                push_frame("PLAYER_STATE_CHANGED"),
            ],
            Arc::new(AtomicUsize::new(0)),
        )
        .await;

        let mut client = client(&format!("{}/", rest.uri()), &dealer_url).await;
        let mut opened = client.subscribe(Topic::Open);
        let mut ready = client.subscribe(Topic::Ready);
        let mut pushes = client.subscribe(Topic::Type("PLAYER_STATE_CHANGED".to_owned()));
        let mut closed = client.subscribe(Topic::Close);
        let shutdown = client.shutdown_handle();

        let pump = tokio::spawn(async move {
            client.start().await.unwrap();
            client.state()
        });

        assert!(matches!(
            timeout(RECV_WINDOW, opened.recv()).await.unwrap(),
            Some(Event::Connected)
        ));
        assert!(matches!(
            timeout(RECV_WINDOW, ready.recv()).await.unwrap(),
            Some(Event::Ready)
        ));

        // The push frame trails the re-announced connection id, so once it
        // arrives the handshake can no longer fire again.
        let Some(Event::Push { kind, payload }) =
            timeout(RECV_WINDOW, pushes.recv()).await.unwrap()
        else {
            panic!("expected a push event");
        };
        assert_eq!(kind, "PLAYER_STATE_CHANGED");
        assert_eq!(payload["seq"], 7);
        assert!(ready.try_recv().is_err());

        shutdown.cancel();
        assert_eq!(pump.await.unwrap(), State::Closed);
        assert!(matches!(
            timeout(RECV_WINDOW, closed.recv()).await.unwrap(),
            Some(Event::Closed)
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn failed_handshake_keeps_socket_open() {
        let rest = MockServer::start().await;
        mount_mint_endpoints(&rest).await;
        Mock::given(method("PUT"))
            .and(path("/me/notifications/player"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&rest)
            .await;

        let (dealer_url, server) = loopback_dealer(
            vec![
                connection_id_frame("conn-1"),
                push_frame("DEVICE_STATE_CHANGED"),
            ],
            Arc::new(AtomicUsize::new(0)),
        )
        .await;

        let mut client = client(&format!("{}/", rest.uri()), &dealer_url).await;
        let mut errors = client.subscribe(Topic::Error);
        let mut pushes = client.subscribe(Topic::Type("DEVICE_STATE_CHANGED".to_owned()));
        let shutdown = client.shutdown_handle();

        let pump = tokio::spawn(async move { client.start().await });

        assert!(matches!(
            timeout(RECV_WINDOW, errors.recv()).await.unwrap(),
            Some(Event::Error(_))
        ));
        // Push events still flow after the failed handshake.
        assert!(matches!(
            timeout(RECV_WINDOW, pushes.recv()).await.unwrap(),
            Some(Event::Push { .. })
        ));

        shutdown.cancel();
        pump.await.unwrap().unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_pings_until_stopped() {
        let rest = MockServer::start().await;
        mount_mint_endpoints(&rest).await;

        let pings = Arc::new(AtomicUsize::new(0));
        let (dealer_url, server) = loopback_dealer(Vec::new(), Arc::clone(&pings)).await;

        let mut client = client(&format!("{}/", rest.uri()), &dealer_url).await;
        client.heartbeat = Duration::from_millis(50);
        let shutdown = client.shutdown_handle();

        let pump = tokio::spawn(async move { client.start().await });

        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.cancel();
        pump.await.unwrap().unwrap();
        server.await.unwrap();

        // One immediate ping on connect plus recurring heartbeats.
        assert!(pings.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn stop_is_idempotent_without_a_socket() {
        let rest = MockServer::start().await;
        let mut client = client(&format!("{}/", rest.uri()), "ws://127.0.0.1:9/").await;
        let mut closed = client.subscribe(Topic::Close);

        client.stop().await;
        client.stop().await;

        assert_eq!(client.state(), State::Idle);
        assert!(matches!(
            closed.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Empty)
        ));
    }
}
