use serde_json::json;

use super::*;
use crate::transport::{MemoryConnector, MemoryServer};

const LONG: Duration = Duration::from_secs(3600);

async fn connected(heartbeat: Duration) -> (Arc<Connection>, Arc<MemoryConnector>, MemoryServer) {
	let (connector, mut servers) = MemoryConnector::new();
	let url = Url::parse("ws://memory/socket/websocket?vsn=2.0.0&id=sock").unwrap();
	let connection = Arc::new(Connection::new(url, "sock".into(), heartbeat, connector.clone()));
	connection.connect().await.unwrap();
	let server = servers.recv().await.unwrap();
	(connection, connector, server)
}

#[tokio::test]
async fn connect_is_idempotent() {
	let (connection, connector, _server) = connected(LONG).await;
	assert_eq!(connection.status(), ConnectionStatus::Connected);
	connection.connect().await.unwrap();
	assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn refused_connect_sets_error_status() {
	let (connector, _servers) = MemoryConnector::new();
	connector.refuse("nope");
	let connection = Connection::new(Url::parse("ws://memory/socket").unwrap(), "sock".into(), LONG, connector);

	let err = connection.connect().await.unwrap_err();
	assert!(matches!(err, Error::ConnectionFailed { .. }));
	assert_eq!(connection.status(), ConnectionStatus::Error);
	assert!(connection.last_error().unwrap().contains("nope"));
}

#[tokio::test]
async fn refs_are_unique_and_increasing() {
	let (connection, _connector, _server) = connected(LONG).await;
	let a: u64 = connection.next_ref().parse().unwrap();
	let b: u64 = connection.next_ref().parse().unwrap();
	assert!(b > a);
}

#[tokio::test]
async fn request_resolves_with_matching_reply() {
	let (connection, _connector, mut server) = connected(LONG).await;

	let msg_ref = connection.next_ref();
	let frame = Frame::new("pipelines:1:2", events::JOIN, json!({})).with_refs(Some(msg_ref.clone()), Some(msg_ref));
	let pending = {
		let connection = connection.clone();
		tokio::spawn(async move { connection.request(frame, Duration::from_secs(5)).await })
	};

	let join = server.recv().await.unwrap();
	assert_eq!(join.event, events::JOIN);
	server.reply(&join, "ok", json!({"run": {"id": 7}}));

	let reply = pending.await.unwrap().unwrap();
	assert!(reply.is_ok());
	assert_eq!(reply.response.as_json().unwrap()["run"]["id"], 7);
}

#[tokio::test]
async fn request_times_out_without_reply() {
	let (connection, _connector, _server) = connected(LONG).await;
	let frame = Frame::new("pipelines:1:2", events::JOIN, json!({})).with_refs(Some("9".into()), Some("9".into()));

	let err = connection.request(frame, Duration::from_millis(20)).await.unwrap_err();
	assert!(err.is_timeout());
}

#[tokio::test]
async fn events_reach_registered_channel_only() {
	let (connection, _connector, server) = connected(LONG).await;
	let mut events_rx = connection.register_channel("pipelines:1:2", "5");

	server.push("pipelines:9:9", None, "output:a:b", json!("elsewhere"));
	server.push("pipelines:1:2", Some("5"), "output:llm:text", json!({"value": "hi"}));

	let event = events_rx.recv().await.unwrap();
	assert_eq!(
		event,
		ChannelEvent::Message {
			event: "output:llm:text".into(),
			payload: json!({"value": "hi"}).into(),
		}
	);
}

#[tokio::test]
async fn events_from_stale_join_are_dropped() {
	let (connection, _connector, server) = connected(LONG).await;
	let mut events_rx = connection.register_channel("pipelines:1:2", "5");

	server.push("pipelines:1:2", Some("3"), "output:llm:text", json!("old"));
	server.broadcast("pipelines:1:2", "start:llm", json!({}));

	let event = events_rx.recv().await.unwrap();
	assert!(matches!(event, ChannelEvent::Message { ref event, .. } if event == "start:llm"));
}

#[tokio::test]
async fn unregistering_an_old_join_keeps_the_new_one() {
	let (connection, _connector, server) = connected(LONG).await;
	let _old = connection.register_channel("pipelines:1:2", "3");
	let mut current = connection.register_channel("pipelines:1:2", "5");

	connection.unregister_channel("pipelines:1:2", "3");
	server.push("pipelines:1:2", Some("5"), "start:llm", json!({}));
	let event = tokio::time::timeout(Duration::from_secs(2), current.recv()).await.unwrap().unwrap();
	assert!(matches!(event, ChannelEvent::Message { ref event, .. } if event == "start:llm"));

	connection.unregister_channel("pipelines:1:2", "5");
	assert!(current.recv().await.is_none());
}

#[tokio::test]
async fn undecodable_frames_are_dropped() {
	let (connection, _connector, server) = connected(LONG).await;
	let mut events_rx = connection.register_channel("pipelines:1:2", "5");

	server.send_wire(WireFrame::Text("{\"not\": \"an array\"}".into()));
	server.send_wire(WireFrame::Binary(vec![9, 0, 0]));
	server.push("pipelines:1:2", Some("5"), "stop:llm", json!({}));

	let event = tokio::time::timeout(Duration::from_secs(2), events_rx.recv()).await.unwrap().unwrap();
	assert!(matches!(event, ChannelEvent::Message { ref event, .. } if event == "stop:llm"));
	assert_eq!(connection.status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn channel_control_events_are_mapped() {
	let (connection, _connector, server) = connected(LONG).await;
	let mut events_rx = connection.register_channel("pipelines:1:2", "5");

	server.push("pipelines:1:2", Some("5"), events::ERROR, json!({}));
	server.push("pipelines:1:2", Some("5"), events::CLOSE, json!({}));

	assert_eq!(events_rx.recv().await.unwrap(), ChannelEvent::Errored);
	assert_eq!(events_rx.recv().await.unwrap(), ChannelEvent::Closed);
}

#[tokio::test]
async fn binary_broadcast_is_delivered_as_bytes() {
	let (connection, _connector, server) = connected(LONG).await;
	let mut events_rx = connection.register_channel("pipelines:1:2", "5");

	server.broadcast("pipelines:1:2", "output:img:png", vec![137u8, 80, 78, 71]);

	match events_rx.recv().await.unwrap() {
		ChannelEvent::Message { payload, .. } => assert_eq!(payload.as_bytes(), Some(&[137u8, 80, 78, 71][..])),
		other => panic!("unexpected event: {other:?}"),
	}
}

#[tokio::test]
async fn transport_failure_sets_error_status() {
	let (connection, _connector, server) = connected(LONG).await;
	let mut status = connection.subscribe();

	server.fail("reset by peer");
	status.wait_for(|s| *s == ConnectionStatus::Error).await.unwrap();
	assert!(connection.last_error().unwrap().contains("reset by peer"));
}

#[tokio::test]
async fn server_close_is_reported_as_failure() {
	let (connection, _connector, server) = connected(LONG).await;
	let mut status = connection.subscribe();

	server.close();
	status.wait_for(|s| *s == ConnectionStatus::Error).await.unwrap();
	assert!(!connection.is_connected());
}

#[tokio::test]
async fn disconnect_closes_socket() {
	let (connection, _connector, mut server) = connected(LONG).await;
	connection.disconnect();
	connection.disconnect();

	assert_eq!(connection.status(), ConnectionStatus::Disconnected);
	assert!(server.recv().await.is_none());
	assert!(matches!(connection.send(&Frame::new("t", "e", json!({}))), Err(Error::ChannelClosed)));
}

#[tokio::test]
async fn heartbeat_is_sent_and_acknowledged() {
	let (connection, _connector, mut server) = connected(Duration::from_millis(30)).await;

	for _ in 0..3 {
		let beat = server.recv_raw().await.unwrap();
		assert_eq!(beat.topic, events::SOCKET_TOPIC);
		assert_eq!(beat.event, events::HEARTBEAT);
		server.reply(&beat, "ok", json!({}));
	}
	assert!(connection.is_connected());
}

#[tokio::test]
async fn unanswered_heartbeat_fails_connection() {
	let (connection, _connector, _server) = connected(Duration::from_millis(20)).await;
	let mut status = connection.subscribe();

	status.wait_for(|s| *s == ConnectionStatus::Error).await.unwrap();
	assert_eq!(connection.last_error().as_deref(), Some("heartbeat timeout"));
}

#[tokio::test]
async fn reconnect_after_failure_opens_new_socket() {
	let (connector, mut servers) = MemoryConnector::new();
	let connection = Connection::new(Url::parse("ws://memory/socket").unwrap(), "sock".into(), LONG, connector.clone());
	connection.connect().await.unwrap();
	let first = servers.recv().await.unwrap();

	let mut status = connection.subscribe();
	first.fail("gone");
	status.wait_for(|s| *s == ConnectionStatus::Error).await.unwrap();

	connection.connect().await.unwrap();
	assert_eq!(connector.connect_count(), 2);
	assert!(connection.is_connected());
	assert!(connection.last_error().is_none());
}
