//! The WebSocket connection to the realtime API.

use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use relay_core::{
    link::{LinkError, Upstream},
    protocol::realtime::ClientEvent,
};
use thiserror::Error;
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self, client::IntoClientRequest, http::header::InvalidHeaderValue,
        protocol::Message as WsMessage,
    },
};
use tracing::{debug, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Realtime link is not connected")]
    NotConnected,
    #[error("Realtime API closed the connection")]
    Closed,
    #[error("Invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// Client side of the realtime API socket.
///
/// The sink and the stream are locked separately: the session's upstream loop
/// parks in [`UpstreamLink::receive`] while the other loop keeps sending.
pub struct UpstreamLink {
    url: String,
    api_key: String,
    sink: Mutex<Option<SplitSink<WsStream, WsMessage>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
    log_payloads: bool,
}

impl UpstreamLink {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, log_payloads: bool) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            sink: Mutex::new(None),
            stream: Mutex::new(None),
            log_payloads,
        }
    }

    /// Opens the socket. Calling it on a connected link does nothing.
    pub async fn connect(&self) -> Result<(), UpstreamError> {
        let mut sink = self.sink.lock().await;
        if sink.is_some() {
            return Ok(());
        }

        let mut request = self.url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert("Authorization", format!("Bearer {}", self.api_key).parse()?);
        request
            .headers_mut()
            .insert("OpenAI-Beta", "realtime=v1".parse()?);

        let (ws_stream, _) = connect_async(request).await?;
        let (tx, rx) = ws_stream.split();
        *sink = Some(tx);
        *self.stream.lock().await = Some(rx);
        info!(url = %self.url, "Connected to the realtime API");
        Ok(())
    }

    /// Waits for the next text frame.
    ///
    /// Returns [`UpstreamError::Closed`] when the API ends the connection
    /// cleanly; any other error is a transport failure.
    pub async fn receive(&self) -> Result<String, UpstreamError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(UpstreamError::NotConnected)?;
        loop {
            match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    if self.log_payloads {
                        debug!(payload = %text, "Received realtime event");
                    }
                    return Ok(text.as_str().to_owned());
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    info!(?frame, "Realtime API closed the connection");
                    return Err(UpstreamError::Closed);
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    warn!(bytes = data.len(), "Ignoring binary frame from the realtime API");
                }
                Some(Ok(_)) => continue,
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                    return Err(UpstreamError::Closed);
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Closes the socket, ignoring failures. Safe to call more than once.
    pub async fn close(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.send(WsMessage::Close(None)).await {
                debug!(error = %e, "Failed to send close frame to the realtime API");
            }
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Failed to close the realtime API socket");
            }
            info!("Realtime API connection closed");
        }
        // The receive loop may still hold the stream; it goes away with the link.
        if let Ok(mut stream) = self.stream.try_lock() {
            stream.take();
        }
    }
}

#[async_trait]
impl Upstream for UpstreamLink {
    async fn send(&self, event: ClientEvent) -> Result<(), LinkError> {
        let payload = serde_json::to_string(&event)?;
        if self.log_payloads && !event.carries_audio() {
            debug!(%payload, "Sending realtime event");
        } else {
            trace!(kind = event.kind(), "Sending realtime event");
        }

        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(LinkError::NotConnected)?;
        sink.send(WsMessage::Text(payload.into()))
            .await
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    LinkError::Closed
                }
                other => LinkError::Transport(other.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{net::TcpListener, sync::oneshot};
    use tokio_tungstenite::{
        accept_hdr_async,
        tungstenite::handshake::server::{ErrorResponse, Request, Response},
    };

    /// Accepts one connection, reports its auth headers and first text frame,
    /// replies with one event and closes.
    async fn one_shot_server() -> (String, oneshot::Receiver<(String, String, String)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/v1/realtime?model=test", listener.local_addr().unwrap());
        let (report_tx, report_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let (headers_tx, headers_rx) = oneshot::channel();
            let mut ws = accept_hdr_async(tcp, |req: &Request, resp: Response| {
                let header = |name: &str| {
                    req.headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                };
                let _ = headers_tx.send((header("authorization"), header("openai-beta")));
                Ok::<_, ErrorResponse>(resp)
            })
            .await
            .unwrap();
            let (auth, beta) = headers_rx.await.unwrap();

            let first = loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Text(text))) => break text.as_str().to_owned(),
                    Some(Ok(_)) => continue,
                    _ => break String::new(),
                }
            };
            let _ = report_tx.send((auth, beta, first));

            ws.send(WsMessage::Text(r#"{"type":"session.updated"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        });

        (url, report_rx)
    }

    #[tokio::test]
    async fn test_connect_send_receive_and_close() {
        let (url, report) = one_shot_server().await;
        let link = UpstreamLink::new(url, "secret", false);

        link.connect().await.unwrap();
        // Second connect is a no-op.
        link.connect().await.unwrap();

        link.send(ClientEvent::InputAudioBufferCommit { event_id: None })
            .await
            .unwrap();
        let (auth, beta, first) = report.await.unwrap();
        assert_eq!(auth, "Bearer secret");
        assert_eq!(beta, "realtime=v1");
        assert_eq!(first, r#"{"type":"input_audio_buffer.commit"}"#);

        assert_eq!(link.receive().await.unwrap(), r#"{"type":"session.updated"}"#);
        assert!(matches!(link.receive().await, Err(UpstreamError::Closed)));

        link.close().await;
        link.close().await;
        assert!(matches!(
            link.send(ClientEvent::InputAudioBufferClear { event_id: None })
                .await,
            Err(LinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let link = UpstreamLink::new("ws://127.0.0.1:9/v1/realtime", "k", false);
        assert!(matches!(
            link.send(ClientEvent::InputAudioBufferCommit { event_id: None })
                .await,
            Err(LinkError::NotConnected)
        ));
        assert!(matches!(
            link.receive().await,
            Err(UpstreamError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_link_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let link = UpstreamLink::new(format!("ws://{addr}/v1/realtime"), "k", false);
        assert!(matches!(
            link.connect().await,
            Err(UpstreamError::WebSocket(_))
        ));
        assert!(matches!(
            link.send(ClientEvent::InputAudioBufferCommit { event_id: None })
                .await,
            Err(LinkError::NotConnected)
        ));
    }
}
