//! Bus wire contract: the JSON field names the agent side also implements.

use kaisy::message::{Conversation, Message, Segment, Sender};

#[test]
fn canonical_message_serializes_with_contract_field_names() {
    let message = Message {
        platform: "feishu".to_owned(),
        message_id: "om_1".to_owned(),
        timestamp: 1_609_073_151,
        sender: Some(Sender {
            user_id: "u1".to_owned(),
            display_name: "Al".to_owned(),
        }),
        conversation: Some(Conversation::Group("g1".to_owned())),
        segments: vec![Segment::Text("hi".to_owned())],
        reply_target: Some("om_1".to_owned()),
        mentions_self: true,
        mentioned_self_id: Some("bot1".to_owned()),
        synthetic: false,
    };

    let value = serde_json::to_value(&message).expect("serialize");

    assert_eq!(value["platform"], "feishu");
    assert_eq!(value["message_id"], "om_1");
    assert_eq!(value["timestamp"], 1_609_073_151);
    assert_eq!(value["sender"]["user_id"], "u1");
    assert_eq!(value["sender"]["display_name"], "Al");
    assert_eq!(value["conversation"]["kind"], "group");
    assert_eq!(value["conversation"]["id"], "g1");
    assert_eq!(value["segments"][0]["type"], "text");
    assert_eq!(value["segments"][0]["data"], "hi");
    assert_eq!(value["reply_target"], "om_1");
    assert_eq!(value["mentions_self"], true);
    assert_eq!(value["mentioned_self_id"], "bot1");
    assert_eq!(value["synthetic"], false);
}

#[test]
fn agent_reply_with_only_mandatory_fields_deserializes() {
    let frame = r#"{
        "platform": "feishu",
        "message_id": "",
        "timestamp": 1700000000,
        "segments": [
            {"type": "text", "data": "answer"},
            {"type": "image", "data": "base64://aGk="}
        ]
    }"#;

    let message: Message = serde_json::from_str(frame).expect("deserialize");

    assert!(message.sender.is_none());
    assert!(message.conversation.is_none());
    assert!(message.reply_target.is_none());
    assert!(!message.mentions_self);
    assert!(!message.synthetic);
    assert_eq!(message.segments.len(), 2);
    assert_eq!(message.segments[0], Segment::Text("answer".to_owned()));
}

#[test]
fn conversation_variants_are_mutually_exclusive_on_the_wire() {
    let direct: Conversation =
        serde_json::from_str(r#"{"kind": "direct", "id": "u1"}"#).expect("direct");
    assert_eq!(direct, Conversation::Direct("u1".to_owned()));

    let group: Conversation =
        serde_json::from_str(r#"{"kind": "group", "id": "g1"}"#).expect("group");
    assert_eq!(group, Conversation::Group("g1".to_owned()));

    assert!(serde_json::from_str::<Conversation>(r#"{"kind": "both", "id": "x"}"#).is_err());
}
