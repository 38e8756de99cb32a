//! Caller-visible response envelope
//!
//! Every operation resolves to a `{code, msg, data?}` envelope. Code `0` is
//! success; non-zero codes are grouped in stable 1000-wide bands per feature
//! so existing clients keep working: 3000s for forum posting, 4000s for
//! follow/collect actions, 7000s for notifications, `-1` for requests with
//! no authenticated principal.

use serde::Serialize;
use serde_json::Value as JsonValue;

/// Stable response codes, grouped by feature band.
pub mod codes {
    pub const SUCCESS: i32 = 0;
    pub const NO_PERMISSION: i32 = -1;

    // 3000s: forum posting
    pub const FORUM_GENERAL: i32 = 3000;
    pub const TITLE_TOO_LONG: i32 = 3001;
    pub const TITLE_FORBIDDEN: i32 = 3002;
    pub const CONTENT_TOO_LONG: i32 = 3003;
    pub const CONTENT_FORBIDDEN: i32 = 3004;
    // The source assigned 3005 to both the bad-type and bad-id cases;
    // kept as-is for client compatibility.
    pub const BAD_POST_TARGET: i32 = 3005;

    // 4000s: follow / collect actions
    pub const ACTION_GENERAL: i32 = 4000;
    pub const BAD_FOLLOW_TARGET: i32 = 4001;
    pub const ALREADY_FOLLOWING: i32 = 4002;
    pub const NOT_FOLLOWING: i32 = 4003;
    pub const MARKET_NOT_FOUND: i32 = 4004;
    pub const ALREADY_COLLECTED: i32 = 4005;
    pub const NOT_COLLECTED: i32 = 4006;

    // 7000s: notifications
    pub const NOTIFY_GENERAL: i32 = 7000;
    pub const BAD_NOTIFY_ID: i32 = 7001;
}

/// JSON response envelope shared by every operation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Envelope {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl Envelope {
    /// Success envelope with no payload.
    pub fn ok() -> Self {
        Self {
            code: codes::SUCCESS,
            msg: "ok".to_string(),
            data: None,
        }
    }

    /// Success envelope carrying a payload.
    pub fn ok_with(data: JsonValue) -> Self {
        Self {
            code: codes::SUCCESS,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    /// Error envelope with a stable code.
    pub fn err(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data: None,
        }
    }

    /// Envelope for requests with no authenticated principal.
    pub fn no_permission() -> Self {
        Self::err(codes::NO_PERMISSION, "no permission for this operation")
    }

    pub fn is_success(&self) -> bool {
        self.code == codes::SUCCESS
    }
}
