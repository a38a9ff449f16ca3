// Slash-path access into nested characteristic values.
//
// Cloud characteristics nest their payload under `value`, and nested
// nodes may do the same: `temperatureControl.value.operationModes.heating
// .setpoints.roomTemperature.value`. A path like
// `/operationModes/heating/setpoints/roomTemperature` walks that tree,
// stepping through a node's `value` wrapper first and falling back to a
// direct key.

use serde_json::Value;

use onecta_api::Characteristic;

const CHARACTERISTIC_KEYS: [&str; 6] = [
    "value",
    "values",
    "minValue",
    "maxValue",
    "stepValue",
    "settable",
];

/// Split a path into its non-empty segments.
pub(crate) fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Walk `path` from `root`. `None` as soon as a segment is missing.
pub(crate) fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path).try_fold(root, step)
}

fn step<'a>(node: &'a Value, segment: &str) -> Option<&'a Value> {
    let object = node.as_object()?;
    if let Some(child) = object
        .get("value")
        .and_then(Value::as_object)
        .and_then(|inner| inner.get(segment))
    {
        return Some(child);
    }
    object.get(segment)
}

/// View a node as a characteristic.
///
/// Objects carrying characteristic fields are parsed as one; anything
/// else (a bare leaf, or a container without those fields) becomes the
/// `value` of an otherwise empty characteristic.
pub(crate) fn to_characteristic(node: &Value) -> Characteristic {
    let looks_like_characteristic = node
        .as_object()
        .is_some_and(|o| CHARACTERISTIC_KEYS.iter().any(|k| o.contains_key(*k)));

    if looks_like_characteristic {
        if let Ok(characteristic) = serde_json::from_value::<Characteristic>(node.clone()) {
            return characteristic;
        }
    }
    Characteristic::with_value(node.clone())
}

/// Copy the fields present in `update` onto the characteristic object at
/// `target`, leaving the others alone. A non-object target is replaced.
pub(crate) fn merge_characteristic(target: &mut Value, update: &Characteristic) {
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    let Some(object) = target.as_object_mut() else {
        return;
    };

    if let Some(value) = &update.value {
        object.insert("value".into(), value.clone());
    }
    if let Some(values) = &update.values {
        object.insert("values".into(), Value::Array(values.clone()));
    }
    if let Some(settable) = update.settable {
        object.insert("settable".into(), Value::Bool(settable));
    }
    for (key, bound) in [
        ("minValue", update.min_value),
        ("maxValue", update.max_value),
        ("stepValue", update.step_value),
    ] {
        let Some(bound) = bound else {
            continue;
        };
        // Same number in another JSON form (10 vs 10.0) is left as is.
        if object.get(key).and_then(Value::as_f64) == Some(bound) {
            continue;
        }
        if let Some(number) = bound_number(bound) {
            object.insert(key.into(), Value::Number(number));
        }
    }
}

/// Integral bounds go back out as JSON integers.
#[allow(clippy::cast_possible_truncation)]
fn bound_number(bound: f64) -> Option<serde_json::Number> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if bound.fract() == 0.0 && bound.abs() <= MAX_EXACT {
        Some(serde_json::Number::from(bound as i64))
    } else {
        serde_json::Number::from_f64(bound)
    }
}
