//! WebSocket implementation of [`PushTransport`].

use std::future::Future;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use medsync_app::ports::{PushStream, PushTransport, TransportError, TransportEvent};
use medsync_domain::connection::AuthToken;

use crate::config::PushConfig;
use crate::error::PushError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens the push channel as a WebSocket connection.
#[derive(Debug, Clone)]
pub struct WsPushTransport {
    config: PushConfig,
}

impl WsPushTransport {
    #[must_use]
    pub fn new(config: PushConfig) -> Self {
        Self { config }
    }

    async fn handshake(&self, token: &AuthToken) -> Result<Socket, PushError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(PushError::InvalidRequest)?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
            .map_err(|_| PushError::InvalidToken)?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let connect = connect_async(request);
        match tokio::time::timeout(self.config.connect_timeout(), connect).await {
            Err(_) => Err(PushError::Timeout),
            Ok(Ok((socket, _))) => Ok(socket),
            Ok(Err(tungstenite::Error::Http(response)))
                if matches!(
                    response.status(),
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
                ) =>
            {
                Err(PushError::Rejected(response.status().as_u16()))
            }
            Ok(Err(err)) => Err(PushError::Connect(err)),
        }
    }
}

impl PushTransport for WsPushTransport {
    fn open(
        &self,
        token: &AuthToken,
    ) -> impl Future<Output = Result<PushStream, TransportError>> + Send {
        let token = token.clone();
        async move {
            let socket = self.handshake(&token).await.map_err(|err| {
                tracing::warn!(error = %err, url = %self.config.url, "push channel open failed");
                err.into_transport()
            })?;
            tracing::info!(url = %self.config.url, "push channel open");

            let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
            tokio::spawn(pump(socket, tx, self.config.idle_timeout()));
            Ok(rx)
        }
    }
}

/// Forward frames until the socket closes, the engine drops its receiver,
/// or two consecutive idle windows pass without any inbound message.
async fn pump(mut socket: Socket, tx: mpsc::Sender<TransportEvent>, idle: Duration) {
    let mut silent = false;
    loop {
        tokio::select! {
            () = tx.closed() => {
                if let Err(err) = socket.close(None).await {
                    tracing::debug!(error = %err, "push channel close failed");
                }
                return;
            }
            next = tokio::time::timeout(idle, socket.next()) => match next {
                Err(_) if silent => {
                    tracing::warn!(idle_secs = idle.as_secs(), "push channel silent, closing");
                    return;
                }
                Err(_) => {
                    silent = true;
                    let reason = format!("no traffic for {}s", idle.as_secs());
                    if tx.send(TransportEvent::Degraded(reason)).await.is_err() {
                        return;
                    }
                    if let Err(err) = socket.send(Message::Ping(Vec::new())).await {
                        tracing::warn!(error = %err, "push channel ping failed");
                        return;
                    }
                }
                Ok(None) => {
                    tracing::info!("push channel closed by server");
                    return;
                }
                Ok(Some(Err(err))) => {
                    tracing::warn!(error = %err, "push channel read failed");
                    return;
                }
                Ok(Some(Ok(message))) => {
                    silent = false;
                    match message {
                        Message::Text(text) => {
                            if tx.send(TransportEvent::Frame(text)).await.is_err() {
                                return;
                            }
                        }
                        Message::Close(frame) => {
                            tracing::info!(?frame, "push channel close frame");
                            return;
                        }
                        Message::Binary(bytes) => {
                            tracing::debug!(len = bytes.len(), "ignoring binary push frame");
                        }
                        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::accept_hdr_async;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    use super::*;

    async fn server<F, Fut>(authorized: &'static str, session: F) -> String
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let check = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let header = req
                    .headers()
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok());
                if header == Some(authorized) {
                    Ok(resp)
                } else {
                    let mut denied = ErrorResponse::new(Some("unauthorized".to_string()));
                    *denied.status_mut() = StatusCode::UNAUTHORIZED;
                    Err(denied)
                }
            };
            if let Ok(socket) = accept_hdr_async(stream, check).await {
                session(socket).await;
            }
        });
        format!("ws://{addr}")
    }

    fn transport(url: String, idle_timeout_secs: u64) -> WsPushTransport {
        WsPushTransport::new(PushConfig {
            url,
            idle_timeout_secs,
            connect_timeout_secs: 5,
            channel_capacity: 8,
        })
    }

    #[tokio::test]
    async fn should_forward_text_frames() {
        let url = server("Bearer secret", |mut socket| async move {
            let frame = r#"{"topic":"hospital:bed-status","hospitalId":"H1","payload":{},"timestamp":1}"#;
            socket.send(Message::Text(frame.to_string())).await.unwrap();
            socket.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
            socket.send(Message::Text("second".to_string())).await.unwrap();
            let _ = socket.next().await;
        })
        .await;

        let mut rx = transport(url, 30)
            .open(&AuthToken::new("secret"))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, TransportEvent::Frame(ref text) if text.contains("hospital:bed-status")));
        assert_eq!(rx.recv().await, Some(TransportEvent::Frame("second".to_string())));
    }

    #[tokio::test]
    async fn should_report_rejected_credentials_as_unauthorized() {
        let url = server("Bearer secret", |_| async {}).await;

        let result = transport(url, 30).open(&AuthToken::new("wrong")).await;

        assert!(matches!(result, Err(TransportError::Unauthorized)));
    }

    #[tokio::test]
    async fn should_report_unreachable_server_as_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let result = transport(url, 30).open(&AuthToken::new("secret")).await;

        assert!(matches!(result, Err(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn should_end_stream_when_server_closes() {
        let url = server("Bearer secret", |mut socket| async move {
            socket.close(None).await.unwrap();
        })
        .await;

        let mut rx = transport(url, 30)
            .open(&AuthToken::new("secret"))
            .await
            .unwrap();

        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn should_degrade_then_close_on_silence() {
        let (hold_tx, hold_rx) = oneshot::channel::<()>();
        let url = server("Bearer secret", |socket| async move {
            let _socket = socket;
            let _ = hold_rx.await;
        })
        .await;

        let mut rx = transport(url, 1)
            .open(&AuthToken::new("secret"))
            .await
            .unwrap();

        assert!(matches!(rx.recv().await, Some(TransportEvent::Degraded(_))));
        assert_eq!(rx.recv().await, None);
        drop(hold_tx);
    }
}
