//! Normalization of raw events into canonical messages.

use std::sync::Arc;

use kaisy::feishu::client::PlatformApi;
use kaisy::inbound::{parse_timestamp, InboundNormalizer, FALLBACK_SENDER_NAME};
use kaisy::message::{Conversation, Segment};

use crate::common::{parse_event, ApiCall, RecordingApi};

fn text_envelope(chat_type: &str, text: &str, mentions_json: &str) -> String {
    let content = serde_json::json!({ "text": text }).to_string();
    let content = serde_json::to_string(&content).expect("escape content");
    format!(
        r#"{{"header": {{"event_type": "im.message.receive_v1"}},
            "event": {{
                "sender": {{"sender_id": {{"open_id": "u1"}}, "sender_type": "user", "tenant_key": "t1"}},
                "message": {{"message_id": "om_1", "create_time": "1609073151345",
                            "chat_id": "g1", "chat_type": "{chat_type}",
                            "message_type": "text", "content": {content},
                            "mentions": {mentions_json}}}
            }}}}"#
    )
}

fn normalizer(api: RecordingApi) -> (InboundNormalizer, Arc<RecordingApi>) {
    let api = Arc::new(api);
    let normalizer = InboundNormalizer::new("feishu", Arc::clone(&api) as Arc<dyn PlatformApi>);
    (normalizer, api)
}

#[tokio::test]
async fn text_without_mentions_yields_single_text_segment() {
    let (normalizer, _api) = normalizer(RecordingApi::new());
    let event = parse_event(&text_envelope("p2p", "hello there", "[]"));

    let message = normalizer.normalize(&event).await.expect("message");

    assert_eq!(message.segments, vec![Segment::Text("hello there".to_owned())]);
    assert!(!message.mentions_self);
    assert_eq!(message.reply_target.as_deref(), Some("om_1"));
    assert_eq!(message.timestamp, 1_609_073_151);
    assert!(!message.synthetic);
}

#[tokio::test]
async fn automated_sender_yields_no_message() {
    let (normalizer, api) = normalizer(RecordingApi::new());
    let event = parse_event(
        r#"{"header": {"event_type": "im.message.receive_v1"},
            "event": {
                "sender": {"sender_id": {"open_id": "ou_bot"}, "sender_type": "app"},
                "message": {"message_id": "om_echo", "chat_id": "g1", "chat_type": "group",
                            "message_type": "text", "content": "{\"text\":\"echo\"}"}
            }}"#,
    );

    assert!(normalizer.normalize(&event).await.is_none());
    assert!(api.calls().is_empty(), "discarded event must trigger no API calls");
}

#[tokio::test]
async fn group_mention_of_the_bot_is_rewritten_and_flagged() {
    let (normalizer, _api) = normalizer(RecordingApi::new());
    let mentions = r#"[{"key": "@_user_1", "id": {"open_id": "bot1"}, "name": "Kaisy", "tenant_key": "t1"}]"#;
    let event = parse_event(&text_envelope("group", "hello @_user_1", mentions));

    let message = normalizer.normalize(&event).await.expect("message");

    assert_eq!(
        message.conversation,
        Some(Conversation::Group("g1".to_owned()))
    );
    assert_eq!(
        message.segments,
        vec![Segment::Text("hello @<Kaisy:bot1>".to_owned())]
    );
    assert!(message.mentions_self);
    assert_eq!(message.mentioned_self_id.as_deref(), Some("bot1"));
}

#[tokio::test]
async fn direct_chat_routes_to_the_sender() {
    let (normalizer, _api) = normalizer(RecordingApi::new());
    let event = parse_event(&text_envelope("p2p", "hi", "[]"));

    let message = normalizer.normalize(&event).await.expect("message");

    assert_eq!(
        message.conversation,
        Some(Conversation::Direct("u1".to_owned()))
    );
}

#[tokio::test]
async fn declined_user_lookup_falls_back_to_generic_label() {
    let (normalizer, _api) = normalizer(RecordingApi::new().with_user_name(None));
    let event = parse_event(&text_envelope("p2p", "hi", "[]"));

    let message = normalizer.normalize(&event).await.expect("message");
    let sender = message.sender.expect("sender");
    assert_eq!(sender.user_id, "u1");
    assert_eq!(sender.display_name, FALLBACK_SENDER_NAME);
}

fn image_envelope() -> String {
    r#"{"header": {"event_type": "im.message.receive_v1"},
        "event": {
            "sender": {"sender_id": {"open_id": "u1"}, "sender_type": "user"},
            "message": {"message_id": "om_img", "create_time": "1609073151345",
                        "chat_id": "g1", "chat_type": "group",
                        "message_type": "image",
                        "content": "{\"image_key\":\"img_k1\"}"}
        }}"#
    .to_owned()
}

#[tokio::test]
async fn image_event_carries_encoded_bytes() {
    let (normalizer, api) = normalizer(RecordingApi::new());
    let event = parse_event(&image_envelope());

    let message = normalizer.normalize(&event).await.expect("message");

    match &message.segments[..] {
        [Segment::Image(payload)] => {
            assert!(!payload.is_empty());
            assert!(!payload.starts_with("base64://"));
        }
        other => panic!("expected one image segment, got {other:?}"),
    }
    assert!(api.calls().contains(&ApiCall::Download {
        message_id: "om_img".to_owned(),
        file_key: "img_k1".to_owned(),
    }));
}

#[tokio::test]
async fn failed_download_yields_placeholder_text() {
    let (normalizer, _api) = normalizer(
        RecordingApi::new().with_download_error("download of img_k1 failed with HTTP 404"),
    );
    let event = parse_event(&image_envelope());

    let message = normalizer.normalize(&event).await.expect("message");

    assert_eq!(
        message.segments,
        vec![Segment::Text("[image download failed]".to_owned())]
    );
}

#[tokio::test]
async fn unknown_content_type_becomes_bracketed_label() {
    let (normalizer, _api) = normalizer(RecordingApi::new());
    let event = parse_event(
        r#"{"header": {"event_type": "im.message.receive_v1"},
            "event": {
                "sender": {"sender_id": {"open_id": "u1"}, "sender_type": "user"},
                "message": {"message_id": "om_s", "chat_id": "g1", "chat_type": "group",
                            "message_type": "sticker", "content": "{}"}
            }}"#,
    );

    let message = normalizer.normalize(&event).await.expect("message");
    assert_eq!(message.segments, vec![Segment::Text("[sticker]".to_owned())]);
}

#[test]
fn unparseable_timestamp_falls_back_to_wall_clock() {
    let before = chrono::Utc::now().timestamp();
    let parsed = parse_timestamp("not-a-number");
    let after = chrono::Utc::now().timestamp();
    assert!(parsed >= before && parsed <= after);

    assert_eq!(parse_timestamp("1609073151345"), 1_609_073_151);
}
