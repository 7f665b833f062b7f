//! Outbound dispatch of canonical replies.

use std::sync::Arc;

use kaisy::feishu::client::PlatformApi;
use kaisy::feishu::media::encode_image;
use kaisy::message::{Conversation, Message, Segment};
use kaisy::outbound::OutboundDispatcher;

use crate::common::{ApiCall, RecordingApi};

fn reply(conversation: Option<Conversation>, segments: Vec<Segment>) -> Message {
    Message {
        platform: "feishu".to_owned(),
        message_id: String::new(),
        timestamp: 1_700_000_000,
        sender: None,
        conversation,
        segments,
        reply_target: None,
        mentions_self: false,
        mentioned_self_id: None,
        synthetic: false,
    }
}

fn dispatcher(api: RecordingApi) -> (OutboundDispatcher, Arc<RecordingApi>) {
    let api = Arc::new(api);
    let dispatcher = OutboundDispatcher::new(Arc::clone(&api) as Arc<dyn PlatformApi>);
    (dispatcher, api)
}

#[tokio::test]
async fn text_then_image_goes_out_in_order() {
    let (dispatcher, api) = dispatcher(RecordingApi::new());
    let message = reply(
        Some(Conversation::Group("g1".to_owned())),
        vec![
            Segment::Text("hi".to_owned()),
            Segment::Image(encode_image(b"png")),
        ],
    );

    dispatcher.dispatch(message).await;

    let calls = api.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(
        calls[0],
        ApiCall::Send {
            receive_id: "g1".to_owned(),
            receive_id_type: "chat_id".to_owned(),
            msg_type: "text".to_owned(),
            content: r#"{"text":"hi"}"#.to_owned(),
        }
    );
    assert_eq!(calls[1], ApiCall::Upload { size: 3 });
    assert_eq!(
        calls[2],
        ApiCall::Send {
            receive_id: "g1".to_owned(),
            receive_id_type: "chat_id".to_owned(),
            msg_type: "image".to_owned(),
            content: r#"{"image_key":"img_v2_test"}"#.to_owned(),
        }
    );
}

#[tokio::test]
async fn text_still_sent_when_the_upload_fails() {
    let (dispatcher, api) = dispatcher(RecordingApi::new().with_failing_upload());
    let message = reply(
        Some(Conversation::Group("g1".to_owned())),
        vec![
            Segment::Image(encode_image(b"png")),
            Segment::Text("hi".to_owned()),
        ],
    );

    dispatcher.dispatch(message).await;

    let calls = api.calls();
    // Upload attempted, image send dropped, text still delivered.
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], ApiCall::Upload { size: 3 });
    assert!(matches!(&calls[1], ApiCall::Send { msg_type, .. } if msg_type == "text"));
}

#[tokio::test]
async fn blank_text_is_skipped() {
    let (dispatcher, api) = dispatcher(RecordingApi::new());
    let message = reply(
        Some(Conversation::Direct("u9".to_owned())),
        vec![Segment::Text("   ".to_owned())],
    );

    dispatcher.dispatch(message).await;

    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn reply_target_threads_only_the_first_text() {
    let (dispatcher, api) = dispatcher(RecordingApi::new());
    let mut message = reply(
        Some(Conversation::Direct("u9".to_owned())),
        vec![Segment::Text("first".to_owned()), Segment::Text("second".to_owned())],
    );
    message.reply_target = Some("om_orig".to_owned());

    dispatcher.dispatch(message).await;

    let calls = api.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0],
        ApiCall::Reply {
            message_id: "om_orig".to_owned(),
            msg_type: "text".to_owned(),
            content: r#"{"text":"first"}"#.to_owned(),
        }
    );
    assert!(matches!(&calls[1], ApiCall::Send { msg_type, .. } if msg_type == "text"));
}

#[tokio::test]
async fn direct_conversations_route_by_open_id() {
    let (dispatcher, api) = dispatcher(RecordingApi::new());
    let message = reply(
        Some(Conversation::Direct("u9".to_owned())),
        vec![Segment::Text("hi".to_owned())],
    );

    dispatcher.dispatch(message).await;

    assert!(matches!(
        &api.calls()[..],
        [ApiCall::Send { receive_id, receive_id_type, .. }]
            if receive_id == "u9" && receive_id_type == "open_id"
    ));
}

#[tokio::test]
async fn emoji_and_unsupported_segments_are_skipped() {
    let (dispatcher, api) = dispatcher(RecordingApi::new());
    let message = reply(
        Some(Conversation::Direct("u9".to_owned())),
        vec![
            Segment::Emoji("smile".to_owned()),
            Segment::Unsupported("poll".to_owned()),
            Segment::Text("still here".to_owned()),
        ],
    );

    dispatcher.dispatch(message).await;

    let calls = api.calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(&calls[0], ApiCall::Send { msg_type, .. } if msg_type == "text"));
}

#[tokio::test]
async fn undecodable_image_payload_is_dropped_without_upload() {
    let (dispatcher, api) = dispatcher(RecordingApi::new());
    let message = reply(
        Some(Conversation::Direct("u9".to_owned())),
        vec![Segment::Image("not base64!".to_owned())],
    );

    dispatcher.dispatch(message).await;

    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn synthetic_messages_are_dropped() {
    let (dispatcher, api) = dispatcher(RecordingApi::new());
    let message = Message::registration("feishu", "ou_bot", "Kaisy");

    dispatcher.dispatch(message).await;

    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn reply_without_receiver_is_dropped() {
    let (dispatcher, api) = dispatcher(RecordingApi::new());
    let message = reply(None, vec![Segment::Text("orphan".to_owned())]);

    dispatcher.dispatch(message).await;

    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn base64_reference_prefix_is_accepted() {
    let (dispatcher, api) = dispatcher(RecordingApi::new());
    let payload = format!("base64://{}", encode_image(b"png"));
    let message = reply(
        Some(Conversation::Group("g1".to_owned())),
        vec![Segment::Image(payload)],
    );

    dispatcher.dispatch(message).await;

    let calls = api.calls();
    assert_eq!(calls[0], ApiCall::Upload { size: 3 });
}
