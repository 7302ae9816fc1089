use amqp_conduit::{
    broker::MemoryBroker,
    channel::{
        BasicPublishArguments, Channel, ConfirmSelectArguments, Confirmation, ConfirmationHandle,
        NackReason,
    },
    error::{ChannelError, Error, PublishError},
    frame::{Ack, Nack, Return},
    BasicProperties,
};
use tokio::time::Duration;
mod common;

const WAIT: Duration = Duration::from_secs(1);

#[tokio::test]
async fn test_confirm_sequence_numbers() {
    common::setup_logging();
    let broker = MemoryBroker::new();
    let (connection, channel) = common::open_channel(&broker).await;
    common::declare_queue(&channel, "confirm.sequence").await;
    channel
        .confirm_select(ConfirmSelectArguments::default())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for content in ["one", "two", "three"] {
        let handle = channel
            .basic_publish(
                BasicProperties::default(),
                content,
                BasicPublishArguments::new("", "confirm.sequence"),
            )
            .await
            .unwrap();
        handles.push(handle);
    }
    assert_eq!(
        vec![1, 2, 3],
        handles.iter().map(|h| h.delivery_tag()).collect::<Vec<_>>()
    );
    for handle in handles {
        assert_eq!(Confirmation::Acked, handle.wait(WAIT).await.unwrap());
    }

    let stats = channel.confirm_stats();
    assert_eq!(3, stats.published);
    assert_eq!(3, stats.acked);
    assert_eq!(0, stats.pending);
    assert_eq!(Some(3), broker.queue_depth("confirm.sequence"));

    channel.close().await.unwrap();
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_publish_requires_confirm_mode() {
    common::setup_logging();
    let broker = MemoryBroker::new();
    let (connection, channel) = common::open_channel(&broker).await;
    common::declare_queue(&channel, "confirm.none").await;

    let result = channel
        .basic_publish(
            BasicProperties::default(),
            "tracked",
            BasicPublishArguments::new("", "confirm.none"),
        )
        .await;
    assert!(matches!(result, Err(Error::ChannelUseError(_))));

    common::publish_to_queue(&channel, "confirm.none", "untracked").await;
    assert!(common::eventually(|| broker.queue_depth("confirm.none") == Some(1)).await);
    assert_eq!(0, channel.confirm_stats().published);

    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_mandatory_unroutable_is_nacked() {
    common::setup_logging();
    let broker = MemoryBroker::new();
    let (connection, channel) = common::open_channel(&broker).await;
    common::declare_queue(&channel, "confirm.routable").await;
    channel
        .confirm_select(ConfirmSelectArguments::default())
        .await
        .unwrap();

    let unroutable = channel
        .basic_publish(
            BasicProperties::default(),
            "lost",
            BasicPublishArguments::new("", "nowhere").mandatory(true).finish(),
        )
        .await
        .unwrap();
    let outcome = unroutable.wait(WAIT).await.unwrap();
    assert_eq!(Confirmation::Nacked(NackReason::Unroutable), outcome);
    assert_eq!(
        Err(Error::PublishError(PublishError::Unroutable)),
        outcome.into_result()
    );

    // the return was consumed by the previous confirmation
    let routable = channel
        .basic_publish(
            BasicProperties::default(),
            "kept",
            BasicPublishArguments::new("", "confirm.routable")
                .mandatory(true)
                .finish(),
        )
        .await
        .unwrap();
    assert!(routable.wait(WAIT).await.unwrap().is_acked());

    // not mandatory, silently dropped but still acked
    let dropped = channel
        .basic_publish(
            BasicProperties::default(),
            "dropped",
            BasicPublishArguments::new("", "nowhere"),
        )
        .await
        .unwrap();
    assert!(dropped.wait(WAIT).await.unwrap().is_acked());

    let stats = channel.confirm_stats();
    assert_eq!((2, 1), (stats.acked, stats.nacked));
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_multiple_ack_and_nack() {
    common::setup_logging();
    let (connection, injector) = common::scripted_connection(None).await;
    let channel = connection.open_channel().await.unwrap();
    channel
        .confirm_select(ConfirmSelectArguments::default())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let handle = channel
            .basic_publish(
                BasicProperties::default(),
                "payload",
                BasicPublishArguments::new("", "any"),
            )
            .await
            .unwrap();
        handles.push(handle);
    }
    let channel_id = channel.channel_id();
    injector
        .send(channel_id, Ack::new(3, true).into_frame())
        .unwrap();
    injector
        .send(channel_id, Nack::new(4, false, false).into_frame())
        .unwrap();

    let nacked = handles.pop().unwrap();
    for handle in handles {
        assert_eq!(Confirmation::Acked, handle.wait(WAIT).await.unwrap());
    }
    assert_eq!(
        Confirmation::Nacked(NackReason::BrokerRejected),
        nacked.wait(WAIT).await.unwrap()
    );
    let stats = channel.confirm_stats();
    assert_eq!((4, 3, 1, 0), (stats.published, stats.acked, stats.nacked, stats.pending));

    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_close_nacks_pending_confirmations() {
    common::setup_logging();
    let (connection, _injector) = common::scripted_connection(None).await;
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
                "never confirmed",
                BasicPublishArguments::new("", "any"),
            )
            .await
            .unwrap();
        handles.push(handle);
    }
    assert_eq!(3, channel.confirm_stats().pending);

    channel.close().await.unwrap();
    for handle in handles {
        assert_eq!(
            Confirmation::Nacked(NackReason::ChannelClosed),
            handle.wait(WAIT).await.unwrap()
        );
    }
    let stats = channel.confirm_stats();
    assert_eq!((3, 0), (stats.nacked, stats.pending));

    let result = channel
        .basic_publish(
            BasicProperties::default(),
            "too late",
            BasicPublishArguments::new("", "any"),
        )
        .await;
    assert_eq!(
        Err(Error::ChannelError(ChannelError::ChannelClosed)),
        result.map(|_| ())
    );

    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_confirm_timeout_then_late_ack() {
    common::setup_logging();
    let (connection, injector) = common::scripted_connection(None).await;
    let channel = connection.open_channel().await.unwrap();
    channel
        .confirm_select(ConfirmSelectArguments::default())
        .await
        .unwrap();

    let handle = channel
        .basic_publish(
            BasicProperties::default(),
            "slow",
            BasicPublishArguments::new("", "any"),
        )
        .await
        .unwrap();
    let delivery_tag = handle.delivery_tag();
    assert_eq!(
        Err(Error::PublishError(PublishError::ConfirmTimeout)),
        handle.wait(Duration::from_millis(50)).await
    );
    assert_eq!(1, channel.confirm_stats().pending);

    injector
        .send(channel.channel_id(), Ack::new(delivery_tag, false).into_frame())
        .unwrap();
    assert!(common::eventually(|| channel.confirm_stats().late == 1).await);
    let stats = channel.confirm_stats();
    assert_eq!((1, 0), (stats.acked, stats.pending));

    connection.close().await.unwrap();
}

async fn publish_tracked(channel: &Channel, count: usize) -> Vec<ConfirmationHandle> {
    let mut handles = Vec::new();
    for _ in 0..count {
        let handle = channel
            .basic_publish(
                BasicProperties::default(),
                "payload",
                BasicPublishArguments::new("", "any").mandatory(true).finish(),
            )
            .await
            .unwrap();
        handles.push(handle);
    }
    handles
}

fn no_route(routing_key: &str) -> Return {
    Return {
        reply_code: 312,
        reply_text: "NO_ROUTE".to_owned(),
        routing_key: routing_key.to_owned(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_returned_then_nacked_is_unroutable() {
    common::setup_logging();
    let (connection, injector) = common::scripted_connection(None).await;
    let channel = connection.open_channel().await.unwrap();
    channel
        .confirm_select(ConfirmSelectArguments::default())
        .await
        .unwrap();

    let mut handles = publish_tracked(&channel, 2).await;
    let channel_id = channel.channel_id();
    injector
        .send(channel_id, no_route("any").into_frame())
        .unwrap();
    injector
        .send(channel_id, Nack::new(1, false, false).into_frame())
        .unwrap();
    injector
        .send(channel_id, Nack::new(2, false, false).into_frame())
        .unwrap();

    let rejected = handles.pop().unwrap();
    let returned = handles.pop().unwrap();
    assert_eq!(
        Confirmation::Nacked(NackReason::Unroutable),
        returned.wait(WAIT).await.unwrap()
    );
    assert_eq!(
        Confirmation::Nacked(NackReason::BrokerRejected),
        rejected.wait(WAIT).await.unwrap()
    );

    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_returns_before_multiple_ack() {
    common::setup_logging();
    let (connection, injector) = common::scripted_connection(None).await;
    let channel = connection.open_channel().await.unwrap();
    channel
        .confirm_select(ConfirmSelectArguments::default())
        .await
        .unwrap();

    let handles = publish_tracked(&channel, 3).await;
    let channel_id = channel.channel_id();
    for frame in [
        no_route("any").into_frame(),
        no_route("any").into_frame(),
        Ack::new(2, true).into_frame(),
        Ack::new(3, false).into_frame(),
    ] {
        injector.send(channel_id, frame).unwrap();
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.wait(WAIT).await.unwrap());
    }
    assert_eq!(
        vec![
            Confirmation::Nacked(NackReason::Unroutable),
            Confirmation::Nacked(NackReason::Unroutable),
            Confirmation::Acked,
        ],
        outcomes
    );
    let stats = channel.confirm_stats();
    assert_eq!((1, 2, 0), (stats.acked, stats.nacked, stats.pending));

    connection.close().await.unwrap();
}
