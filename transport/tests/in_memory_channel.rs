use std::io::IsTerminal;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing_subscriber::EnvFilter;

use transport::{
    message::{PING_REQUEST, PING_RESPONSE},
    Channel, ChannelConfig, ChannelError, ChannelEvent, InMemoryTransport, IpcCodec, IpcMessage,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

struct FakeInterpreter {
    framed: Framed<DuplexStream, IpcCodec>,
}

impl FakeInterpreter {
    async fn recv(&mut self) -> IpcMessage {
        let frame = tokio::time::timeout(RECV_TIMEOUT, self.framed.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream closed")
            .expect("codec error");
        frame.expect("malformed frame from channel")
    }

    async fn send(&mut self, message: IpcMessage) {
        self.framed.send(message).await.unwrap();
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        let stream = self.framed.get_mut();
        stream.write_all(bytes).await.unwrap();
        stream.flush().await.unwrap();
    }
}

fn config() -> ChannelConfig {
    ChannelConfig {
        write_delay: Duration::from_millis(5),
        ..Default::default()
    }
}

fn setup_with(config: ChannelConfig) -> (Channel, FakeInterpreter, mpsc::UnboundedReceiver<ChannelEvent>) {
    let codec = IpcCodec::new(config.delimiter, config.max_frames_per_chunk);
    let (client, interpreter) = InMemoryTransport::pair();
    let (tx, rx) = mpsc::unbounded_channel();
    let channel = Channel::with_transport(client, config, tx).unwrap();
    let interpreter = FakeInterpreter {
        framed: interpreter.framed(codec),
    };
    (channel, interpreter, rx)
}

fn setup() -> (Channel, FakeInterpreter, mpsc::UnboundedReceiver<ChannelEvent>) {
    setup_with(config())
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
    tokio::time::timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

async fn assert_no_event(events: &mut mpsc::UnboundedReceiver<ChannelEvent>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    if let Ok(event) = events.try_recv() {
        panic!("unexpected event {event:?}");
    }
}

#[tokio::test]
async fn ping_is_answered_and_not_surfaced() {
    let (_channel, mut interpreter, mut events) = setup();

    interpreter
        .send(IpcMessage::new(PING_REQUEST, "7", Value::Null))
        .await;

    let pong = interpreter.recv().await;
    assert_eq!(pong.r#type, PING_RESPONSE);
    assert_eq!(pong.reply.as_deref(), Some("7"));
    let timestamp = pong.data.as_str().unwrap();
    assert!(timestamp.parse::<u128>().is_ok());

    assert_no_event(&mut events).await;
}

#[tokio::test]
async fn unmatched_pong_is_dropped() {
    let (_channel, mut interpreter, mut events) = setup();

    interpreter
        .send(IpcMessage::new(PING_RESPONSE, "1", json!("123")).reply_to("99"))
        .await;

    assert_no_event(&mut events).await;
}

#[tokio::test]
async fn send_async_resolves_with_reply_data() {
    let (channel, mut interpreter, mut events) = setup();

    let request = tokio::spawn({
        let channel = channel.clone();
        async move {
            channel
                .send_async("interpreter/state", Value::Null, Some(Duration::from_secs(2)))
                .await
        }
    });

    let outgoing = interpreter.recv().await;
    assert_eq!(outgoing.r#type, "interpreter/state");
    assert_eq!(outgoing.reply, None);
    interpreter
        .send(IpcMessage::new("interpreter/state", "100", json!("CodeExecuted")).reply_to(outgoing.id))
        .await;

    let data = request.await.unwrap().unwrap();
    assert_eq!(data, json!("CodeExecuted"));
    assert_no_event(&mut events).await;
}

#[tokio::test]
async fn replies_may_arrive_out_of_order() {
    let (channel, mut interpreter, _events) = setup();

    let first = tokio::spawn({
        let channel = channel.clone();
        async move { channel.send_async("interpreter/registers", Value::Null, None).await }
    });
    let a = interpreter.recv().await;
    let second = tokio::spawn({
        let channel = channel.clone();
        async move { channel.send_async("interpreter/stack", Value::Null, None).await }
    });
    let b = interpreter.recv().await;
    assert_ne!(a.id, b.id);

    interpreter
        .send(IpcMessage::new(b.r#type.clone(), "50", json!("stack")).reply_to(b.id))
        .await;
    interpreter
        .send(IpcMessage::new(a.r#type.clone(), "51", json!("registers")).reply_to(a.id))
        .await;

    assert_eq!(first.await.unwrap().unwrap(), json!("registers"));
    assert_eq!(second.await.unwrap().unwrap(), json!("stack"));
}

#[tokio::test]
async fn request_times_out_and_late_reply_is_surfaced() {
    let (channel, mut interpreter, mut events) = setup();

    let result = tokio::join!(
        channel.send_async("interpreter/callstack", Value::Null, Some(Duration::from_millis(100))),
        interpreter.recv(),
    );
    let (reply, outgoing) = result;

    match reply {
        Err(ChannelError::Timeout { id, after }) => {
            assert_eq!(id, outgoing.id);
            assert_eq!(after, Duration::from_millis(100));
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    interpreter
        .send(IpcMessage::new("interpreter/callstack", "9", json!([])).reply_to(outgoing.id.clone()))
        .await;

    match next_event(&mut events).await {
        ChannelEvent::Message(message) => assert_eq!(message.reply, Some(outgoing.id)),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn ids_are_unique_and_written_in_order() {
    let (channel, mut interpreter, _events) = setup();

    channel.send("compiler/debuginfo", Value::Null).unwrap();
    channel.send("compiler/code", Value::Null).unwrap();
    channel.reply("stdin", json!("input"), "4").unwrap();

    let received = [
        interpreter.recv().await,
        interpreter.recv().await,
        interpreter.recv().await,
    ];

    let types: Vec<&str> = received.iter().map(|m| m.r#type.as_str()).collect();
    assert_eq!(types, ["compiler/debuginfo", "compiler/code", "stdin"]);
    let ids: Vec<&str> = received.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["1", "2", "3"]);
    assert_eq!(received[2].reply.as_deref(), Some("4"));
}

#[tokio::test]
async fn unsolicited_message_is_emitted() {
    let (_channel, mut interpreter, mut events) = setup();

    interpreter
        .send(IpcMessage::new("stdout", "1", json!("hello")))
        .await;

    match next_event(&mut events).await {
        ChannelEvent::Message(message) => {
            assert_eq!(message.r#type, "stdout");
            assert_eq!(message.data, json!("hello"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn frames_split_across_writes() {
    let (_channel, mut interpreter, mut events) = setup();

    interpreter.send_raw(b"\x04{\"type\":\"stdout\",").await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    interpreter
        .send_raw(b"\"id\":\"1\",\"data\":\"a\"}\x04{\"type\":\"stderr\",\"id\":\"2\",\"data\":\"b\"}\x04")
        .await;

    let mut types = Vec::new();
    for _ in 0..2 {
        match next_event(&mut events).await {
            ChannelEvent::Message(message) => types.push(message.r#type),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(types, ["stdout", "stderr"]);
}

#[tokio::test]
async fn malformed_frame_is_reported_and_stream_continues() {
    let (_channel, mut interpreter, mut events) = setup();

    interpreter.send_raw(b"garbage\x04").await;
    interpreter
        .send(IpcMessage::new("stdout", "1", json!("after")))
        .await;

    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::UnknownMessage("garbage".to_string())
    );
    assert!(matches!(
        next_event(&mut events).await,
        ChannelEvent::Message(_)
    ));
}

#[tokio::test]
async fn newline_delimiter() {
    let (channel, mut interpreter, mut events) = setup_with(ChannelConfig {
        delimiter: b'\n',
        ..config()
    });

    interpreter.send_raw(b"{\"type\":\"stdout\",\"id\":\"1\",\"data\":\"x\"}\n").await;
    assert!(matches!(
        next_event(&mut events).await,
        ChannelEvent::Message(_)
    ));

    channel.send("eval", json!("1 + 1")).unwrap();
    let eval = interpreter.recv().await;
    assert_eq!(eval.data, json!("1 + 1"));
}

#[tokio::test]
async fn closing_the_stream_fails_pending_requests() {
    let (channel, interpreter, mut events) = setup();

    let pending = tokio::spawn({
        let channel = channel.clone();
        async move { channel.send_async("interpreter/state", Value::Null, None).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(interpreter);

    assert_eq!(next_event(&mut events).await, ChannelEvent::Closed(None));
    assert_eq!(pending.await.unwrap(), Err(ChannelError::Closed));
    assert!(!channel.is_running());
}

#[tokio::test]
async fn requests_after_the_interpreter_exits_fail_immediately() {
    let (channel, interpreter, mut events) = setup();
    drop(interpreter);
    assert_eq!(next_event(&mut events).await, ChannelEvent::Closed(None));

    let result = tokio::time::timeout(
        RECV_TIMEOUT,
        channel.send_async("interpreter/state", Value::Null, None),
    )
    .await
    .expect("request left pending after close");

    assert_eq!(result, Err(ChannelError::Closed));
}

#[tokio::test]
async fn stop_shuts_the_channel_down() {
    let (channel, _interpreter, mut events) = setup();
    assert!(channel.is_running());

    channel.stop();
    let result = channel
        .send_async("interpreter/state", Value::Null, None)
        .await;

    assert_eq!(result, Err(ChannelError::Closed));
    assert!(!channel.is_running());
    assert_eq!(next_event(&mut events).await, ChannelEvent::Closed(None));
}

#[ctor::ctor]
fn init() {
    let in_ci = std::env::var("CI")
        .map(|val| val == "true")
        .unwrap_or(false);

    if std::io::stderr().is_terminal() || in_ci {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .json()
            .try_init();
    }

    let _ = color_eyre::install();
}
