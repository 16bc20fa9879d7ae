use std::future::Future;
use std::pin::Pin;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use runlink_protocol::WireFrame;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{Connector, TransportParts, TransportSender};
use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens real websocket connections with `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
	fn connect<'a>(&'a self, url: &'a Url) -> Pin<Box<dyn Future<Output = Result<TransportParts>> + Send + 'a>> {
		Box::pin(async move {
			tracing::debug!(url = %url, "opening websocket");
			let (stream, response) = connect_async(url.as_str()).await.map_err(|e| Error::ConnectionFailed {
				url: url.to_string(),
				reason: e.to_string(),
			})?;
			tracing::debug!(status = %response.status(), "websocket handshake complete");

			let (sink, mut source) = stream.split();
			let (tx, rx) = mpsc::unbounded_channel();

			tokio::spawn(async move {
				while let Some(message) = source.next().await {
					let frame = match message {
						Ok(Message::Text(text)) => WireFrame::Text(text),
						Ok(Message::Binary(data)) => WireFrame::Binary(data),
						Ok(Message::Close(close)) => {
							tracing::debug!(?close, "websocket closed by server");
							break;
						}
						Ok(_) => continue,
						Err(e) => {
							let _ = tx.send(Err(Error::Transport(e.to_string())));
							break;
						}
					};
					if tx.send(Ok(frame)).is_err() {
						break;
					}
				}
			});

			Ok(TransportParts {
				sender: Box::new(WebSocketSender { sink, closed: false }),
				receiver: rx,
			})
		})
	}
}

struct WebSocketSender {
	sink: SplitSink<WsStream, Message>,
	closed: bool,
}

impl TransportSender for WebSocketSender {
	fn send(&mut self, frame: WireFrame) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			let message = match frame {
				WireFrame::Text(text) => Message::Text(text),
				WireFrame::Binary(data) => Message::Binary(data),
			};
			self.sink.send(message).await.map_err(|e| Error::Transport(e.to_string()))
		})
	}

	fn close(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
		Box::pin(async move {
			if self.closed {
				return;
			}
			self.closed = true;
			if let Err(e) = self.sink.close().await {
				tracing::debug!(error = %e, "websocket close failed");
			}
		})
	}
}
