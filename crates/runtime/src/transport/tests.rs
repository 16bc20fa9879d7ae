use futures_util::{SinkExt, StreamExt};
use runlink_protocol::{Frame, Payload, WireFrame};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use super::*;
use crate::error::Error;

fn url(raw: &str) -> Url {
	Url::parse(raw).unwrap()
}

#[tokio::test]
async fn memory_connector_pairs_client_and_server() {
	let (connector, mut servers) = MemoryConnector::new();
	let parts = connector.connect(&url("ws://memory/socket/websocket")).await.unwrap();
	let mut server = servers.recv().await.unwrap();
	assert_eq!(server.url().as_str(), "ws://memory/socket/websocket");
	assert_eq!(connector.connect_count(), 1);

	let TransportParts { mut sender, mut receiver } = parts;
	let frame = Frame::new("pipelines:1:2", "start", json!({"alias": "nightly"})).with_refs(Some("1".into()), Some("2".into()));
	sender.send(frame.encode().unwrap()).await.unwrap();
	assert_eq!(server.recv().await.unwrap(), frame);

	server.broadcast("pipelines:1:2", "output:llm:text", json!({"value": "hi"}));
	let wire = receiver.recv().await.unwrap().unwrap();
	assert!(matches!(wire, WireFrame::Text(_)));
}

#[tokio::test]
async fn memory_server_skips_heartbeats() {
	let (connector, mut servers) = MemoryConnector::new();
	let TransportParts { mut sender, .. } = connector.connect(&url("ws://memory/socket")).await.unwrap();
	let mut server = servers.recv().await.unwrap();

	let heartbeat = Frame::new("phoenix", "heartbeat", Payload::empty()).with_refs(None, Some("1".into()));
	let push = Frame::new("pipelines:1:2", "input:a:b", json!("x")).with_refs(Some("3".into()), Some("4".into()));
	sender.send(heartbeat.encode().unwrap()).await.unwrap();
	sender.send(push.encode().unwrap()).await.unwrap();

	assert_eq!(server.recv().await.unwrap().topic, "pipelines:1:2");
	assert!(server.try_recv().is_none());
}

#[tokio::test]
async fn refused_connect_reports_url() {
	let (connector, _servers) = MemoryConnector::new();
	connector.refuse("connection refused");
	let err = connector.connect(&url("ws://memory/socket")).await.err().unwrap();
	match err {
		Error::ConnectionFailed { url, reason } => {
			assert_eq!(url, "ws://memory/socket");
			assert_eq!(reason, "connection refused");
		}
		other => panic!("unexpected error: {other}"),
	}
	assert_eq!(connector.connect_count(), 0);
}

#[tokio::test]
async fn server_failure_arrives_as_error_item() {
	let (connector, mut servers) = MemoryConnector::new();
	let TransportParts { mut receiver, .. } = connector.connect(&url("ws://memory/socket")).await.unwrap();
	let server = servers.recv().await.unwrap();
	server.fail("reset by peer");
	server.close();

	assert!(matches!(receiver.recv().await, Some(Err(Error::Transport(_)))));
	assert!(receiver.recv().await.is_none());
}

#[tokio::test]
async fn websocket_connector_exchanges_text_and_binary() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();

	let server = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
		while let Some(Ok(message)) = ws.next().await {
			match message {
				Message::Text(_) | Message::Binary(_) => ws.send(message).await.unwrap(),
				Message::Close(_) => break,
				_ => {}
			}
		}
	});

	let parts = WebSocketConnector.connect(&url(&format!("ws://{addr}/socket/websocket"))).await.unwrap();
	let TransportParts { mut sender, mut receiver } = parts;

	sender.send(WireFrame::Text("[null,null,\"phoenix\",\"heartbeat\",{}]".into())).await.unwrap();
	assert_eq!(
		receiver.recv().await.unwrap().unwrap(),
		WireFrame::Text("[null,null,\"phoenix\",\"heartbeat\",{}]".into())
	);

	sender.send(WireFrame::Binary(vec![0, 1, 2])).await.unwrap();
	assert_eq!(receiver.recv().await.unwrap().unwrap(), WireFrame::Binary(vec![0, 1, 2]));

	sender.close().await;
	sender.close().await;
	assert!(receiver.recv().await.is_none());
	server.await.unwrap();
}

#[tokio::test]
async fn websocket_connector_reports_refused_socket() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	drop(listener);

	let err = WebSocketConnector.connect(&url(&format!("ws://{addr}/socket/websocket"))).await.err().unwrap();
	assert!(matches!(err, Error::ConnectionFailed { .. }));
}
