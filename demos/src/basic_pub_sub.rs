use amqp_conduit::{
    broker::MemoryBroker,
    callbacks::{DefaultChannelCallback, DefaultConnectionCallback},
    channel::{
        BasicConsumeArguments, BasicPublishArguments, ConfirmSelectArguments, QueueBindArguments,
        QueueDeclareArguments,
    },
    connection::{Connection, OpenConnectionArguments},
    consumer::DefaultConsumer,
    BasicProperties,
};
use tokio::time;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() {
    // construct a subscriber that prints formatted traces to stdout
    // global subscriber with log level according to RUST_LOG
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // start an in-process broker and open a connection to it
    let broker = MemoryBroker::new();
    let connection = Connection::open(
        &OpenConnectionArguments::new("localhost", 5672, "guest", "guest")
            .connection_name("basic_pub_sub")
            .finish(),
        &broker.connector(),
    )
    .await
    .unwrap();
    connection
        .register_callback(DefaultConnectionCallback)
        .await
        .unwrap();

    // open a channel on the connection
    let channel = connection.open_channel().await.unwrap();
    channel
        .register_callback(DefaultChannelCallback)
        .await
        .unwrap();

    // declare a durable queue
    let queue = channel
        .queue_declare(
            QueueDeclareArguments::new("conduit.demos.basic")
                .durable(true)
                .finish(),
        )
        .await
        .unwrap()
        .unwrap();

    // bind the queue to exchange
    let routing_key = "conduit.demo";
    let exchange_name = "amq.topic";
    channel
        .queue_bind(QueueBindArguments::new(
            &queue.name,
            exchange_name,
            routing_key,
        ))
        .await
        .unwrap();

    //////////////////////////////////////////////////////////////////////////////
    // start consumer with given name, manual ack
    let args = BasicConsumeArguments::new(&queue.name, "demo_basic_pub_sub")
        .manual_ack(true)
        .finish();
    channel
        .basic_consume_with(DefaultConsumer::new(args.no_ack), args)
        .await
        .unwrap();

    //////////////////////////////////////////////////////////////////////////////
    // publish message with confirms
    channel
        .confirm_select(ConfirmSelectArguments::default())
        .await
        .unwrap();

    let content = String::from(
        r#"
            {
                "publisher": "demo",
                "data": "Hello, amqp_conduit!"
            }
        "#,
    )
    .into_bytes();

    let props = BasicProperties::default()
        .with_app_id("basic_pub_sub")
        .with_content_type("application/json")
        .with_correlation_id("correlation_id")
        .with_message_id("message_id")
        .with_persistence(true)
        .with_header("key", "value")
        .finish();

    let confirmation = channel
        .basic_publish(
            props,
            content,
            BasicPublishArguments::new(exchange_name, routing_key),
        )
        .await
        .unwrap();
    let delivery_tag = confirmation.delivery_tag();
    let outcome = confirmation
        .wait(time::Duration::from_secs(1))
        .await
        .unwrap();
    tracing::info!("publish {} confirmed: {:?}", delivery_tag, outcome);

    // keep the `channel` and `connection` object from dropping before pub/sub is done.
    time::sleep(time::Duration::from_secs(1)).await;
    // explicitly close
    channel.close().await.unwrap();
    connection.close().await.unwrap();
}
