// Inbound realtime frames.
//
// Every text frame is a JSON object discriminated on `event`. Only two
// events carry state; everything else (including the server's periodic
// "Internal server error" noise) is dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::rest::Characteristic;

pub const DEVICE_UPDATE_EVENT: &str = "gateway:managementpoint:characteristic";
pub const GROUP_UPDATE_EVENT: &str = "group:characteristic";

/// One characteristic changed on one management point of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceUpdate {
    pub device_id: String,
    pub embedded_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_point_id: Option<String>,
    pub characteristic_name: String,
    pub data: Characteristic,
}

/// A group-level change, forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdate {
    pub group_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characteristic_name: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event")]
pub(crate) enum Frame {
    #[serde(rename = "gateway:managementpoint:characteristic")]
    DeviceUpdate(DeviceUpdate),
    #[serde(rename = "group:characteristic")]
    GroupUpdate(GroupUpdate),
}

/// Parse one text frame. `None` for anything that is not a known update.
pub(crate) fn parse_frame(text: &str) -> Option<Frame> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "ignoring non-JSON realtime frame");
            return None;
        }
    };

    if value.get("event").is_none() {
        if value.get("message").and_then(Value::as_str) == Some("Internal server error") {
            trace!("ignoring server error notice on realtime channel");
        } else {
            debug!("ignoring realtime frame without event");
        }
        return None;
    }

    match serde_json::from_value::<Frame>(value) {
        Ok(frame) => Some(frame),
        Err(e) => {
            debug!(error = %e, "ignoring unrecognized realtime frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn device_update_frame() {
        let text = json!({
            "event": DEVICE_UPDATE_EVENT,
            "deviceId": "dev-1",
            "embeddedId": "climateControl",
            "characteristicName": "onOffMode",
            "data": { "value": "off", "settable": true }
        })
        .to_string();

        match parse_frame(&text) {
            Some(Frame::DeviceUpdate(update)) => {
                assert_eq!(update.device_id, "dev-1");
                assert_eq!(update.embedded_id, "climateControl");
                assert_eq!(update.management_point_id, None);
                assert_eq!(update.data.as_str(), Some("off"));
                assert_eq!(update.data.settable, Some(true));
                assert_eq!(update.data.values, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn group_update_frame() {
        let text = json!({
            "event": GROUP_UPDATE_EVENT,
            "groupId": "g-1",
            "data": { "anything": [1, 2] }
        })
        .to_string();

        match parse_frame(&text) {
            Some(Frame::GroupUpdate(update)) => {
                assert_eq!(update.group_id, "g-1");
                assert_eq!(update.data["anything"][1], 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn noise_is_ignored() {
        assert!(parse_frame("not json").is_none());
        assert!(parse_frame(r#"{"message":"Internal server error","connectionId":"x"}"#).is_none());
        assert!(parse_frame(r#"{"event":"user:logout"}"#).is_none());
        assert!(parse_frame(&json!({"event": DEVICE_UPDATE_EVENT}).to_string()).is_none());
    }
}
