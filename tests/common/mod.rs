//! Shared test doubles and fixtures for the platform API seam.
#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use kaisy::feishu::client::{BotIdentity, PlatformApi, ReceiveIdType};
use kaisy::feishu::event::{decode_envelope, MessageEvent};
use kaisy::feishu::FeishuError;

/// One recorded platform call, in invocation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Send {
        receive_id: String,
        receive_id_type: String,
        msg_type: String,
        content: String,
    },
    Reply {
        message_id: String,
        msg_type: String,
        content: String,
    },
    Upload {
        size: usize,
    },
    Download {
        message_id: String,
        file_key: String,
    },
    UserLookup {
        open_id: String,
    },
    BotInfo,
}

/// Recording double behind the [`PlatformApi`] seam.
///
/// Records every call; behavior is configured through the builder-style
/// setters before the double is shared.
pub struct RecordingApi {
    calls: Mutex<Vec<ApiCall>>,
    user_name: Option<String>,
    download: Result<Vec<u8>, String>,
    fail_upload: bool,
    fail_send: bool,
}

impl Default for RecordingApi {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingApi {
    /// A double where every call succeeds.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            user_name: Some("Tester".to_owned()),
            download: Ok(b"image-bytes".to_vec()),
            fail_upload: false,
            fail_send: false,
        }
    }

    /// Set the display name the user lookup resolves; `None` means declined.
    pub fn with_user_name(mut self, name: Option<&str>) -> Self {
        self.user_name = name.map(str::to_owned);
        self
    }

    /// Make every asset download fail with the given message.
    pub fn with_download_error(mut self, message: &str) -> Self {
        self.download = Err(message.to_owned());
        self
    }

    /// Make every upload fail.
    pub fn with_failing_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    /// Make every send and reply fail.
    pub fn with_failing_send(mut self) -> Self {
        self.fail_send = true;
        self
    }

    /// Snapshot of all recorded calls.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().expect("calls lock poisoned").push(call);
    }
}

#[async_trait]
impl PlatformApi for RecordingApi {
    async fn send_message(
        &self,
        receive_id: &str,
        receive_id_type: ReceiveIdType,
        msg_type: &str,
        content: &str,
    ) -> Result<(), FeishuError> {
        self.record(ApiCall::Send {
            receive_id: receive_id.to_owned(),
            receive_id_type: receive_id_type.as_str().to_owned(),
            msg_type: msg_type.to_owned(),
            content: content.to_owned(),
        });
        if self.fail_send {
            return Err(FeishuError::Api {
                code: 99991668,
                msg: "send rejected".to_owned(),
            });
        }
        Ok(())
    }

    async fn reply_message(
        &self,
        message_id: &str,
        msg_type: &str,
        content: &str,
    ) -> Result<(), FeishuError> {
        self.record(ApiCall::Reply {
            message_id: message_id.to_owned(),
            msg_type: msg_type.to_owned(),
            content: content.to_owned(),
        });
        if self.fail_send {
            return Err(FeishuError::Api {
                code: 99991668,
                msg: "reply rejected".to_owned(),
            });
        }
        Ok(())
    }

    async fn upload_image(&self, image: Vec<u8>) -> Result<String, FeishuError> {
        self.record(ApiCall::Upload { size: image.len() });
        if self.fail_upload {
            return Err(FeishuError::Asset("upload rejected".to_owned()));
        }
        Ok("img_v2_test".to_owned())
    }

    async fn download_resource(
        &self,
        message_id: &str,
        file_key: &str,
    ) -> Result<Vec<u8>, FeishuError> {
        self.record(ApiCall::Download {
            message_id: message_id.to_owned(),
            file_key: file_key.to_owned(),
        });
        self.download
            .clone()
            .map_err(FeishuError::Asset)
    }

    async fn user_display_name(&self, open_id: &str) -> Result<Option<String>, FeishuError> {
        self.record(ApiCall::UserLookup {
            open_id: open_id.to_owned(),
        });
        Ok(self.user_name.clone())
    }

    async fn bot_identity(&self) -> Result<BotIdentity, FeishuError> {
        self.record(ApiCall::BotInfo);
        Ok(BotIdentity {
            open_id: "ou_bot".to_owned(),
            app_name: "Kaisy".to_owned(),
        })
    }
}

/// Decode a full event envelope fixture into its message event.
pub fn parse_event(envelope_json: &str) -> MessageEvent {
    decode_envelope(envelope_json)
        .expect("fixture envelope should decode")
        .event
        .expect("fixture envelope should carry an event")
}
