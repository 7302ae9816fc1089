use amqp_conduit::{
    broker::MemoryBroker,
    channel::{
        BasicAckArguments, BasicConsumeArguments, BasicPublishArguments, BasicQosArguments,
        ConfirmSelectArguments, QueueDeclareArguments,
    },
    connection::{Connection, OpenConnectionArguments},
    BasicProperties,
};
use tokio::time;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const BATCH_SIZE: usize = 50;
const PREFETCH_COUNT: u16 = 5;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() {
    // construct a subscriber that prints formatted traces to stdout
    // global subscriber with log level according to RUST_LOG
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let broker = MemoryBroker::new();
    let args = OpenConnectionArguments::new("localhost", 5672, "guest", "guest")
        .connection_name("publisher_confirms")
        .finish();

    //////////////////////////////////////////////////////////////////////////////
    // publish a batch, then wait for all of its confirmations
    let publisher = Connection::open(&args, &broker.connector()).await.unwrap();
    let channel = publisher.open_channel().await.unwrap();
    let queue = channel
        .queue_declare(QueueDeclareArguments::new("conduit.demos.confirms"))
        .await
        .unwrap()
        .unwrap();
    channel
        .confirm_select(ConfirmSelectArguments::default())
        .await
        .unwrap();

    let mut pending = Vec::with_capacity(BATCH_SIZE);
    for i in 0..BATCH_SIZE {
        let handle = channel
            .basic_publish(
                BasicProperties::default()
                    .with_message_id(&i.to_string())
                    .finish(),
                format!("message {}", i),
                BasicPublishArguments::new("", &queue.name),
            )
            .await
            .unwrap();
        pending.push(handle);
    }
    for handle in pending {
        handle
            .wait(time::Duration::from_secs(5))
            .await
            .unwrap()
            .into_result()
            .unwrap();
    }
    info!("batch confirmed: {:?}", channel.confirm_stats());

    //////////////////////////////////////////////////////////////////////////////
    // consume with a prefetch window, acking in small groups
    let consumer_conn = Connection::open(&args, &broker.connector()).await.unwrap();
    let consumer_channel = consumer_conn.open_channel().await.unwrap();
    consumer_channel
        .basic_qos(BasicQosArguments::new(0, PREFETCH_COUNT, false))
        .await
        .unwrap();
    let mut consumer = consumer_channel
        .basic_consume(
            BasicConsumeArguments::new(&queue.name, "throttled")
                .manual_ack(true)
                .finish(),
        )
        .await
        .unwrap();

    let mut received = 0;
    while received < BATCH_SIZE {
        let Some(delivery) = consumer.recv().await else {
            break;
        };
        received += 1;
        let outstanding = consumer_channel.outstanding_deliveries();
        assert!(outstanding <= PREFETCH_COUNT as usize);
        if received % PREFETCH_COUNT as usize == 0 {
            info!("received {}, {} awaiting ack", received, outstanding);
            consumer_channel
                .basic_ack(BasicAckArguments::new(delivery.delivery_tag(), true))
                .await
                .unwrap();
        }
    }
    info!("consumed {} of {} messages", received, BATCH_SIZE);

    consumer.cancel().await.unwrap();
    consumer_conn.close().await.unwrap();
    channel.close().await.unwrap();
    publisher.close().await.unwrap();
}
