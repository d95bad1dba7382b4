//! XML messages exchanged with the official-account platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DeliveryId, UserId};

/// Message type of plain text messages.
pub const MSG_TYPE_TEXT: &str = "text";

/// A message pushed to the bot.
///
/// Only the fields the bot uses are decoded; others (media ids, event keys)
/// are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename = "xml")]
pub struct InboundMessage {
    /// The official account that received the message.
    #[serde(rename = "ToUserName")]
    pub to_user_name: String,

    /// The sender's open id.
    #[serde(rename = "FromUserName")]
    pub from_user_name: String,

    #[serde(rename = "CreateTime", default)]
    pub create_time: i64,

    #[serde(rename = "MsgType")]
    pub msg_type: String,

    #[serde(rename = "Content", default)]
    pub content: String,

    /// Absent on event pushes.
    #[serde(rename = "MsgId", default)]
    pub msg_id: String,
}

impl InboundMessage {
    pub fn parse(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }

    /// Identity of this delivery, stable across platform retries.
    ///
    /// Event pushes carry no `MsgId`; the platform identifies those by sender
    /// and creation time instead.
    pub fn delivery_id(&self) -> DeliveryId {
        if self.msg_id.is_empty() {
            DeliveryId::new(format!("{}:{}", self.from_user_name, self.create_time))
        } else {
            DeliveryId::new(self.msg_id.clone())
        }
    }

    pub fn sender(&self) -> UserId {
        UserId::new(self.from_user_name.clone())
    }

    pub fn is_text(&self) -> bool {
        self.msg_type == MSG_TYPE_TEXT
    }

    /// Builds the text reply to this message.
    pub fn reply(&self, content: impl Into<String>, now: DateTime<Utc>) -> OutboundMessage {
        OutboundMessage {
            to_user_name: self.from_user_name.clone(),
            from_user_name: self.to_user_name.clone(),
            create_time: now.timestamp(),
            msg_type: MSG_TYPE_TEXT.to_string(),
            content: content.into(),
        }
    }
}

/// A passive text reply, returned as the body of the callback response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "xml")]
pub struct OutboundMessage {
    #[serde(rename = "ToUserName")]
    pub to_user_name: String,

    #[serde(rename = "FromUserName")]
    pub from_user_name: String,

    #[serde(rename = "CreateTime")]
    pub create_time: i64,

    #[serde(rename = "MsgType")]
    pub msg_type: String,

    #[serde(rename = "Content")]
    pub content: String,
}

impl OutboundMessage {
    pub fn to_xml(&self) -> Result<String, quick_xml::SeError> {
        quick_xml::se::to_string(self)
    }
}
