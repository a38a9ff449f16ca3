// Wire types for the gateway-devices API.
//
// The cloud returns deeply nested, loosely typed JSON. Only the fields the
// client reasons about are named; everything else is kept verbatim in the
// flattened maps so a device can be written back or inspected unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One device as returned by `GET /v1/gateway-devices`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayDevice {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_cloud_connection_up: Option<Characteristic>,
    #[serde(default)]
    pub management_points: Vec<ManagementPoint>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GatewayDevice {
    pub fn management_point(&self, embedded_id: &str) -> Option<&ManagementPoint> {
        self.management_points
            .iter()
            .find(|mp| mp.embedded_id == embedded_id)
    }
}

/// A named sub-resource of a device. Every key besides the two named
/// fields is a characteristic (or an opaque field kept as-is).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementPoint {
    pub embedded_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_point_type: Option<String>,
    #[serde(flatten)]
    pub characteristics: Map<String, Value>,
}

/// A single named value with optional bounds or enumeration.
///
/// A default `Characteristic` (every field `None`) is the "absent" result
/// of a lookup that found nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Characteristic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settable: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Characteristic {
    pub fn with_value(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    pub fn is_absent(&self) -> bool {
        self.value.is_none()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_ref().and_then(Value::as_f64)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_ref().and_then(Value::as_str)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_ref().and_then(Value::as_bool)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "id": "dev-1",
            "deviceModel": "dx4",
            "type": "dx4",
            "isCloudConnectionUp": { "settable": false, "value": true },
            "timestamp": "2024-01-01T00:00:00Z",
            "managementPoints": [
                {
                    "embeddedId": "gateway",
                    "managementPointType": "gateway",
                    "name": { "settable": true, "value": "Living room", "maxLength": 32 }
                },
                {
                    "embeddedId": "climateControl",
                    "managementPointType": "climateControl",
                    "onOffMode": { "settable": true, "value": "on", "values": ["on", "off"] },
                    "temperatureControl": {
                        "settable": true,
                        "value": {
                            "operationModes": {
                                "heating": {
                                    "setpoints": {
                                        "roomTemperature": {
                                            "value": 21.5, "minValue": 10, "maxValue": 30, "stepValue": 0.5, "settable": true
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            ]
        })
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let raw = sample();
        let device: GatewayDevice = serde_json::from_value(raw.clone()).unwrap();

        assert_eq!(device.id, "dev-1");
        assert_eq!(device.device_type.as_deref(), Some("dx4"));
        assert_eq!(device.extra["timestamp"], "2024-01-01T00:00:00Z");
        assert_eq!(device.management_points.len(), 2);

        let gateway = device.management_point("gateway").unwrap();
        assert_eq!(gateway.characteristics["name"]["maxLength"], 32);

        assert_eq!(serde_json::to_value(&device).unwrap(), raw);
    }

    #[test]
    fn characteristic_keeps_bounds_and_extras() {
        let c: Characteristic = serde_json::from_value(json!({
            "value": 21.5, "minValue": 10, "maxValue": 30, "stepValue": 0.5,
            "settable": true, "requiresReboot": false
        }))
        .unwrap();

        assert_eq!(c.as_f64(), Some(21.5));
        assert_eq!(c.min_value, Some(10.0));
        assert_eq!(c.step_value, Some(0.5));
        assert_eq!(c.extra["requiresReboot"], false);
        assert!(Characteristic::default().is_absent());
    }
}
