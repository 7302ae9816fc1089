use amqp_conduit::{
    broker::MemoryBroker,
    channel::{
        BasicConsumeArguments, BasicPublishArguments, ExchangeDeclareArguments, ExchangeType,
        QueueBindArguments, QueueDeclareArguments, QueueDeleteArguments, QueuePurgeArguments,
        QueueUnbindArguments,
    },
    connection::Connection,
    error::Error,
    state::ChannelState,
    BasicProperties,
};
use tokio::time::{self, Duration};
mod common;

fn reply_code(result: Result<impl Sized, Error>) -> Option<u16> {
    match result {
        Err(Error::DeclareError { reply_code, .. }) => Some(reply_code),
        _ => None,
    }
}

#[tokio::test]
async fn test_redeclare_is_idempotent() {
    common::setup_logging();
    let broker = MemoryBroker::new();
    let (connection, channel) = common::open_channel(&broker).await;

    let args = QueueDeclareArguments::new("orders").durable(true).finish();
    let info = channel.queue_declare(args.clone()).await.unwrap().unwrap();
    assert_eq!("orders", info.name);
    assert_eq!(0, info.message_count);

    common::publish_to_queue(&channel, "orders", "first").await;
    let info = channel.queue_declare(args).await.unwrap().unwrap();
    assert_eq!(1, info.message_count);
    assert!(channel.is_open());

    // passive declare ignores the other flags
    let passive = QueueDeclareArguments::new("orders").passive(true).finish();
    assert!(channel.queue_declare(passive).await.is_ok());

    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_conflicting_redeclare_closes_only_its_channel() {
    common::setup_logging();
    let broker = MemoryBroker::new();
    let (connection, first) = common::open_channel(&broker).await;
    let second = connection.open_channel().await.unwrap();

    first
        .queue_declare(QueueDeclareArguments::new("invoices").durable(true).finish())
        .await
        .unwrap();
    let result = second
        .queue_declare(QueueDeclareArguments::new("invoices"))
        .await;
    assert_eq!(Some(406), reply_code(result));

    second.listen_closed().await;
    assert_eq!(ChannelState::Closed, second.state());
    assert!(connection.is_open());
    assert!(first.is_open());
    let info = first
        .queue_declare(QueueDeclareArguments::new("invoices").durable(true).finish())
        .await
        .unwrap();
    assert!(info.is_some());

    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_passive_declare_of_missing_queue() {
    common::setup_logging();
    let broker = MemoryBroker::new();
    let (connection, channel) = common::open_channel(&broker).await;

    let result = channel
        .queue_declare(QueueDeclareArguments::new("ghost").passive(true).finish())
        .await;
    assert_eq!(Some(404), reply_code(result));
    assert!(!channel.is_open());

    let result = channel.queue_declare(QueueDeclareArguments::new("ghost")).await;
    assert!(matches!(result, Err(Error::ChannelError(_))));

    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_server_named_queue() {
    common::setup_logging();
    let broker = MemoryBroker::new();
    let (connection, channel) = common::open_channel(&broker).await;

    let info = channel
        .queue_declare(QueueDeclareArguments::new("").exclusive(true).finish())
        .await
        .unwrap()
        .unwrap();
    assert!(info.name.starts_with("amq.gen-"));
    assert_eq!(Some(0), broker.queue_depth(&info.name));

    let reserved = channel
        .queue_declare(QueueDeclareArguments::new("amq.custom"))
        .await;
    assert_eq!(Some(403), reply_code(reserved));

    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_topic_exchange_routing() {
    common::setup_logging();
    let broker = MemoryBroker::new();
    let (connection, channel) = common::open_channel(&broker).await;

    channel
        .exchange_declare(ExchangeDeclareArguments::new("logs", ExchangeType::Topic))
        .await
        .unwrap();
    for (queue, key) in [("logs.kernel", "kern.*"), ("logs.all", "#")] {
        common::declare_queue(&channel, queue).await;
        channel
            .queue_bind(QueueBindArguments::new(queue, "logs", key))
            .await
            .unwrap();
    }

    for key in ["kern.critical", "auth.info"] {
        channel
            .basic_publish_untracked(
                BasicProperties::default(),
                "entry",
                BasicPublishArguments::new("logs", key),
            )
            .await
            .unwrap();
    }
    assert!(common::eventually(|| broker.queue_depth("logs.all") == Some(2)).await);
    assert_eq!(Some(1), broker.queue_depth("logs.kernel"));

    channel
        .queue_unbind(QueueUnbindArguments::new("logs.kernel", "logs", "kern.*"))
        .await
        .unwrap();
    channel
        .basic_publish_untracked(
            BasicProperties::default(),
            "entry",
            BasicPublishArguments::new("logs", "kern.warning"),
        )
        .await
        .unwrap();
    assert!(common::eventually(|| broker.queue_depth("logs.all") == Some(3)).await);
    assert_eq!(Some(1), broker.queue_depth("logs.kernel"));

    let conflict = channel
        .exchange_declare(ExchangeDeclareArguments::new("logs", ExchangeType::Fanout))
        .await;
    assert_eq!(Some(406), reply_code(conflict));

    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_bind_to_default_exchange_is_refused() {
    common::setup_logging();
    let broker = MemoryBroker::new();
    let (connection, channel) = common::open_channel(&broker).await;
    common::declare_queue(&channel, "plain").await;

    let result = channel
        .queue_bind(QueueBindArguments::new("plain", "", "plain"))
        .await;
    assert_eq!(Some(403), reply_code(result));

    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_purge_and_delete() {
    common::setup_logging();
    let broker = MemoryBroker::new();
    let (connection, channel) = common::open_channel(&broker).await;
    common::declare_queue(&channel, "scratch").await;

    for content in ["a", "b", "c"] {
        common::publish_to_queue(&channel, "scratch", content).await;
    }
    let purged = channel
        .queue_purge(QueuePurgeArguments::new("scratch"))
        .await
        .unwrap();
    assert_eq!(Some(3), purged);

    common::publish_to_queue(&channel, "scratch", "d").await;
    let mut if_empty = QueueDeleteArguments::new("scratch");
    if_empty.if_empty = true;
    let result = channel.queue_delete(if_empty).await;
    assert_eq!(Some(406), reply_code(result));

    let channel = connection.open_channel().await.unwrap();
    let deleted = channel
        .queue_delete(QueueDeleteArguments::new("scratch"))
        .await
        .unwrap();
    assert_eq!(Some(1), deleted);
    assert_eq!(None, broker.queue_depth("scratch"));

    // deleting a missing queue is not an error
    let deleted = channel
        .queue_delete(QueueDeleteArguments::new("scratch"))
        .await
        .unwrap();
    assert_eq!(Some(0), deleted);

    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_exclusive_queue_belongs_to_its_connection() {
    common::setup_logging();
    let broker = MemoryBroker::new();
    let (owner, owner_channel) = common::open_channel(&broker).await;
    owner_channel
        .queue_declare(QueueDeclareArguments::new("private").exclusive(true).finish())
        .await
        .unwrap();

    let (other, other_channel) = common::open_channel(&broker).await;
    let result = other_channel
        .queue_declare(QueueDeclareArguments::new("private").exclusive(true).finish())
        .await;
    assert_eq!(Some(405), reply_code(result));

    owner.close().await.unwrap();
    assert!(common::eventually(|| broker.queue_depth("private").is_none()).await);
    other.close().await.unwrap();
}

#[tokio::test]
async fn test_delete_queue_cancels_its_consumers() {
    common::setup_logging();
    let broker = MemoryBroker::new();
    let (connection, channel) = common::open_channel(&broker).await;
    common::declare_queue(&channel, "doomed").await;
    let mut consumer = channel
        .basic_consume(BasicConsumeArguments::new("doomed", ""))
        .await
        .unwrap();

    let admin = Connection::open(&common::build_conn_args(), &broker.connector())
        .await
        .unwrap();
    admin
        .open_channel()
        .await
        .unwrap()
        .queue_delete(QueueDeleteArguments::new("doomed"))
        .await
        .unwrap();

    let ended = time::timeout(Duration::from_secs(1), consumer.recv()).await;
    assert!(matches!(ended, Ok(None)));
    assert!(channel.is_open());

    admin.close().await.unwrap();
    connection.close().await.unwrap();
}
