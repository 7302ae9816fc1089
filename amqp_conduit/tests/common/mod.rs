use amqp_conduit::{
    broker::MemoryBroker,
    channel::{BasicPublishArguments, Channel, QueueDeclareArguments},
    connection::{Connection, OpenConnectionArguments},
    frame::{
        CloseChannelOk, CloseOk, ConsumeOk, Frame, OpenChannelOk, QosOk, SelectOk,
    },
    net::loopback::{LoopbackConnector, PeerEnd, PeerSender},
    BasicProperties,
};
use tokio::time::{self, Duration};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// construct a subscriber that prints formatted traces to stdout
pub fn setup_logging() {
    // global subscriber with log level according to RUST_LOG
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

pub fn build_conn_args() -> OpenConnectionArguments {
    OpenConnectionArguments::new("localhost", 5672, "guest", "guest")
}

/// Open a connection to `broker` and one channel on it.
pub async fn open_channel(broker: &MemoryBroker) -> (Connection, Channel) {
    let connection = Connection::open(&build_conn_args(), &broker.connector())
        .await
        .unwrap();
    let channel = connection.open_channel().await.unwrap();
    (connection, channel)
}

pub async fn declare_queue(channel: &Channel, queue: &str) {
    channel
        .queue_declare(QueueDeclareArguments::new(queue))
        .await
        .unwrap();
}

/// Publish through the default exchange without confirmation tracking.
pub async fn publish_to_queue(channel: &Channel, queue: &str, content: &'static str) {
    channel
        .basic_publish_untracked(
            BasicProperties::default(),
            content,
            BasicPublishArguments::new("", queue),
        )
        .await
        .unwrap();
}

/// Poll `condition` for up to one second.
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if condition() {
            return true;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Answer the handshakes of a client the way a broker would, and nothing else: publishes
/// are never confirmed and consumers never get deliveries.
///
/// The peer ends, dropping the transport, once `publish_budget` publishes were received.
pub async fn run_scripted_peer(mut peer: PeerEnd, publish_budget: Option<usize>) {
    let mut published = 0;
    while let Some((channel_id, frame)) = peer.recv().await {
        let reply = match frame {
            Frame::OpenChannel(..) => Some(OpenChannelOk.into_frame()),
            Frame::Select(..) => Some(SelectOk.into_frame()),
            Frame::Qos(..) => Some(QosOk.into_frame()),
            Frame::Consume(_, consume) => Some(
                ConsumeOk {
                    consumer_tag: consume.consumer_tag,
                }
                .into_frame(),
            ),
            Frame::CloseChannel(..) => Some(CloseChannelOk.into_frame()),
            Frame::Close(..) => Some(CloseOk.into_frame()),
            Frame::Publish(..) => {
                published += 1;
                if publish_budget == Some(published) {
                    return;
                }
                None
            }
            _ => None,
        };
        if let Some(reply) = reply {
            if peer.send(channel_id, reply).is_err() {
                return;
            }
        }
    }
}

/// Connection to a scripted peer, with a handle to inject frames as the broker.
pub async fn scripted_connection(publish_budget: Option<usize>) -> (Connection, PeerSender) {
    let (connector, peer) = LoopbackConnector::new(0);
    let injector = peer.sender();
    tokio::spawn(run_scripted_peer(peer, publish_budget));
    let connection = Connection::open(&build_conn_args(), &connector)
        .await
        .unwrap();
    (connection, injector)
}
