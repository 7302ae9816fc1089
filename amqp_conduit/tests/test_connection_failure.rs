use amqp_conduit::{
    broker::MemoryBroker,
    channel::{
        BasicConsumeArguments, BasicPublishArguments, ConfirmSelectArguments, Confirmation,
        NackReason,
    },
    connection::Connection,
    error::{ChannelError, Error},
    state::{ChannelState, ConnectionState},
    BasicProperties,
};
use tokio::time::{self, Duration};
mod common;

#[tokio::test]
async fn test_transport_failure_nacks_pending_confirmations() {
    common::setup_logging();
    // the scripted peer drops the transport on the third publish
    let (connection, injector) = common::scripted_connection(Some(3)).await;
    drop(injector);
    let channel = connection.open_channel().await.unwrap();
    channel
        .confirm_select(ConfirmSelectArguments::default())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..3 {
        let handle = channel
            .basic_publish(
                BasicProperties::default(),
                "in flight",
                BasicPublishArguments::new("", "any"),
            )
            .await
            .unwrap();
        handles.push(handle);
    }

    let network_failure = time::timeout(Duration::from_secs(1), connection.listen_closed())
        .await
        .unwrap();
    assert!(network_failure);
    assert_eq!(ConnectionState::Closed, connection.state());

    for handle in handles {
        assert_eq!(
            Confirmation::Nacked(NackReason::ChannelClosed),
            handle.wait(Duration::from_secs(1)).await.unwrap()
        );
    }
    channel.listen_closed().await;
    assert_eq!(ChannelState::Closed, channel.state());

    let result = channel
        .basic_publish_untracked(
            BasicProperties::default(),
            "after failure",
            BasicPublishArguments::new("", "any"),
        )
        .await;
    assert_eq!(Err(Error::ChannelError(ChannelError::ChannelClosed)), result);
    assert!(connection.open_channel().await.is_err());
}

#[tokio::test]
async fn test_severed_connection_requeues_unacked_messages() {
    common::setup_logging();
    let broker = MemoryBroker::new();
    let (connection, channel) = common::open_channel(&broker).await;
    common::declare_queue(&channel, "durable.work").await;
    common::publish_to_queue(&channel, "durable.work", "job").await;

    let mut consumer = channel
        .basic_consume(
            BasicConsumeArguments::new("durable.work", "")
                .manual_ack(true)
                .finish(),
        )
        .await
        .unwrap();
    let delivery = time::timeout(Duration::from_secs(1), consumer.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(!delivery.redelivered());
    assert_eq!(Some(1), broker.queue_unacked("durable.work"));

    broker.sever_connections();
    assert!(time::timeout(Duration::from_secs(1), connection.listen_closed())
        .await
        .unwrap());
    channel.listen_closed().await;
    assert_eq!(0, channel.outstanding_deliveries());
    let ended = time::timeout(Duration::from_secs(1), consumer.recv()).await;
    assert!(matches!(ended, Ok(None)));

    // the broker gave the message back to the queue
    assert!(common::eventually(|| broker.connection_count() == 0).await);
    assert_eq!(Some(1), broker.queue_depth("durable.work"));

    let (connection, channel) = common::open_channel(&broker).await;
    let mut consumer = channel
        .basic_consume(BasicConsumeArguments::new("durable.work", "").no_ack(true).finish())
        .await
        .unwrap();
    let redelivery = time::timeout(Duration::from_secs(1), consumer.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(redelivery.redelivered());
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_open_is_refused_with_bad_credentials_or_vhost() {
    common::setup_logging();
    let broker = MemoryBroker::new();

    let args = amqp_conduit::connection::OpenConnectionArguments::new(
        "localhost",
        5672,
        "guest",
        "not the password",
    );
    let result = Connection::open(&args, &broker.connector()).await;
    assert!(matches!(result, Err(Error::ConnectionOpenError(_))));

    let args = common::build_conn_args().virtual_host("staging").finish();
    let result = Connection::open(&args, &broker.connector()).await;
    assert!(matches!(result, Err(Error::ConnectionOpenError(_))));

    broker.add_vhost("staging");
    let connection = Connection::open(&args, &broker.connector()).await.unwrap();
    assert!(connection.is_open());

    broker.require_tls(true);
    let result = Connection::open(&common::build_conn_args(), &broker.connector()).await;
    assert!(matches!(result, Err(Error::ConnectionOpenError(_))));

    connection.close().await.unwrap();
}
