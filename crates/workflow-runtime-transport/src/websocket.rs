//! WebSocket transport to the execution backend.

use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::{
    protocol::{InboundEvent, OutboundMessage},
    transport::{ConnectRequest, Connector, Transport, TransportError, TransportEvent},
};

/// Connects to the backend over WebSocket. One connection per call, no
/// automatic reconnection.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn connect(
        &self,
        request: ConnectRequest,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Box<dyn Transport> {
        let (tx, rx) = mpsc::unbounded_channel::<OutboundMessage>();
        let task = tokio::spawn(run_connection(request, rx, events));
        Box::new(WebSocketTransport {
            tx: Some(tx),
            task: Some(task),
        })
    }
}

/// Handle to a WebSocket connection task.
pub struct WebSocketTransport {
    tx: Option<mpsc::UnboundedSender<OutboundMessage>>,
    task: Option<JoinHandle<()>>,
}

impl Transport for WebSocketTransport {
    fn emit(&mut self, message: OutboundMessage) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(message).map_err(|_| TransportError::Closed)
    }

    fn disconnect(&mut self) {
        self.tx = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn is_open(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run_connection(
    request: ConnectRequest,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let epoch = request.epoch;
    let deliver = |event: InboundEvent| {
        let _ = events.send(TransportEvent { epoch, event });
    };

    let connect = connect_async(request.url.as_str());
    let socket = match tokio::time::timeout(request.connect_timeout, connect).await {
        Ok(Ok((socket, _response))) => socket,
        Ok(Err(e)) => {
            tracing::warn!(url = %request.url, "WebSocket connect failed: {e}");
            deliver(InboundEvent::ConnectError {
                error: e.to_string(),
            });
            return;
        }
        Err(_) => {
            tracing::warn!(url = %request.url, "WebSocket connect timed out");
            deliver(InboundEvent::ConnectError {
                error: format!(
                    "connection timed out after {}s",
                    request.connect_timeout.as_secs()
                ),
            });
            return;
        }
    };

    tracing::debug!(url = %request.url, epoch, "WebSocket connected");
    deliver(InboundEvent::Connect);

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            out = outbound.recv() => {
                let Some(message) = out else {
                    // Handle dropped: local close, no disconnect event.
                    let _ = sink.close().await;
                    break;
                };
                let json = match message.encode() {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize {}: {e}", message.name());
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    deliver(InboundEvent::Disconnect { reason: e.to_string() });
                    break;
                }
            }
            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::debug!("Ignoring non-UTF-8 binary frame: {e}");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "server closed connection".to_string());
                        deliver(InboundEvent::Disconnect { reason });
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {e}");
                        deliver(InboundEvent::Disconnect { reason: e.to_string() });
                        break;
                    }
                    None => {
                        deliver(InboundEvent::Disconnect {
                            reason: "connection closed".to_string(),
                        });
                        break;
                    }
                };

                match InboundEvent::decode(&text) {
                    Ok(event) => deliver(event),
                    Err(e) => tracing::debug!("Ignoring malformed frame: {e}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_connect_error_is_reported_once() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = WebSocketConnector::new().connect(
            ConnectRequest {
                url: format!("ws://{addr}/ws"),
                epoch: 3,
                connect_timeout: Duration::from_secs(5),
            },
            tx,
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.epoch, 3);
        assert!(matches!(event.event, InboundEvent::ConnectError { .. }));
        drop(transport);
    }

    #[tokio::test]
    async fn test_exchange_with_local_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let Some(Ok(Message::Text(start))) = ws.next().await else {
                panic!("expected start frame");
            };
            ws.send(Message::Text("garbage".into())).await.unwrap();
            ws.send(Message::Binary(vec![0xff, 0xfe, 0xfd].into()))
                .await
                .unwrap();
            ws.send(Message::Binary(
                br#"{"event":"warning","data":{"message":"binary"}}"#.to_vec().into(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text(
                r#"{"event":"info","data":{"message":"hello"}}"#.into(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
            start.as_str().to_owned()
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WebSocketConnector::new().connect(
            ConnectRequest {
                url: format!("ws://{addr}/ws"),
                epoch: 7,
                connect_timeout: Duration::from_secs(5),
            },
            tx,
        );

        assert_eq!(rx.recv().await.unwrap().event, InboundEvent::Connect);
        transport
            .emit(OutboundMessage::StartProcess(serde_json::json!({"nodes": []})))
            .unwrap();

        let warning = rx.recv().await.unwrap();
        assert!(matches!(warning.event, InboundEvent::Warning(ref p) if p.text() == "binary"));

        let info = rx.recv().await.unwrap();
        assert_eq!(info.epoch, 7);
        assert!(matches!(info.event, InboundEvent::Info(ref p) if p.text() == "hello"));
        assert!(matches!(
            rx.recv().await.unwrap().event,
            InboundEvent::Disconnect { .. }
        ));

        let start = server.await.unwrap();
        assert!(start.contains("start_process"));
    }

    #[tokio::test]
    async fn test_emit_after_disconnect_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = WebSocketConnector::new().connect(
            ConnectRequest {
                url: "ws://127.0.0.1:9/ws".to_string(),
                epoch: 1,
                connect_timeout: Duration::from_millis(100),
            },
            tx,
        );
        transport.disconnect();
        assert!(!transport.is_open());
        assert!(matches!(
            transport.emit(OutboundMessage::StartProcess(serde_json::json!({}))),
            Err(TransportError::Closed)
        ));
    }
}
