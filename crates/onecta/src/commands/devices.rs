//! Device command handlers.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use onecta_api::GatewayDevice;
use onecta_core::{Controller, Device};

use crate::cli::{GetArgs, GlobalOpts, OutputFormat, SetArgs, Target};
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Clone, Serialize, Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Online")]
    online: String,
    #[tabled(rename = "Management points")]
    management_points: String,
}

impl From<&Arc<Device>> for DeviceRow {
    fn from(d: &Arc<Device>) -> Self {
        Self {
            id: d.id().to_owned(),
            name: d.name().unwrap_or_default(),
            model: d.model().unwrap_or_default(),
            online: if d.is_online() { "yes" } else { "no" }.into(),
            management_points: d.management_point_ids().join(", "),
        }
    }
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn list(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    let devices = controller.devices().await?;

    let out = match global.output {
        // Structured output carries the full device tree.
        OutputFormat::Json | OutputFormat::JsonCompact => {
            let snapshots: Vec<GatewayDevice> = devices.iter().map(|d| d.snapshot()).collect();
            output::render_single(global.output, &snapshots, |_| String::new())?
        }
        OutputFormat::Table | OutputFormat::Plain => {
            let rows: Vec<DeviceRow> = devices.iter().map(DeviceRow::from).collect();
            output::render_list(global.output, &rows, DeviceRow::clone, |r| r.id.clone())?
        }
    };
    output::print_output(&out, global.quiet);
    Ok(())
}

fn describe(target: &Target) -> String {
    let mut path = format!("{}/{}", target.management_point, target.characteristic);
    if let Some(ref sub) = target.path {
        if !sub.starts_with('/') {
            path.push('/');
        }
        path.push_str(sub);
    }
    path
}

pub async fn get(controller: &Controller, args: &GetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let t = &args.target;
    let characteristic = controller
        .get_data(&t.device, &t.management_point, &t.characteristic, t.path.as_deref())
        .await?;

    if characteristic.is_absent() {
        return Err(CliError::NoValue {
            device: t.device.clone(),
            path: describe(t),
        });
    }

    let out = output::render_single(global.output, &characteristic, |c| {
        let mut text = c.value.as_ref().map(output::display_value).unwrap_or_default();
        if global.output == OutputFormat::Table {
            if let (Some(min), Some(max)) = (c.min_value, c.max_value) {
                text.push_str(&format!("  (range {min}..{max}"));
                if let Some(step) = c.step_value {
                    text.push_str(&format!(", step {step}"));
                }
                text.push(')');
            }
            if let Some(ref values) = c.values {
                let choices: Vec<String> = values.iter().map(output::display_value).collect();
                text.push_str(&format!("  [{}]", choices.join(", ")));
            }
        }
        text
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Parse a value from the command line: JSON when it parses, else a string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

#[derive(Serialize)]
struct SetReport<'a> {
    device: &'a str,
    path: String,
    value: &'a Value,
}

pub async fn set(controller: &Controller, args: &SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let t = &args.target;
    let value = parse_value(&args.value);

    controller
        .set_data(
            &t.device,
            &t.management_point,
            &t.characteristic,
            value.clone(),
            t.path.as_deref(),
        )
        .await?;

    let report = SetReport {
        device: &t.device,
        path: describe(t),
        value: &value,
    };
    let out = output::render_single(global.output, &report, |r| {
        format!("{} {} = {}", r.device, r.path, output::display_value(r.value))
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn target(path: Option<&str>) -> Target {
        Target {
            device: "dev".into(),
            management_point: "climateControl".into(),
            characteristic: "temperatureControl".into(),
            path: path.map(str::to_owned),
        }
    }

    #[test]
    fn values_parse_as_json_first() {
        assert_eq!(parse_value("21.5"), json!(21.5));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(parse_value("on"), json!("on"));
        assert_eq!(parse_value("\"off\""), json!("off"));
    }

    #[test]
    fn describe_joins_path() {
        assert_eq!(describe(&target(None)), "climateControl/temperatureControl");
        assert_eq!(
            describe(&target(Some("/operationModes/auto"))),
            "climateControl/temperatureControl/operationModes/auto"
        );
        assert_eq!(
            describe(&target(Some("operationModes"))),
            "climateControl/temperatureControl/operationModes"
        );
    }
}
