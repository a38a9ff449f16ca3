//! `watch`: stream controller events to stdout until Ctrl-C.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use onecta_core::{Controller, ControllerEvent, RealtimeState};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

/// Whether `event` concerns `device`. Events not tied to a device always pass.
fn concerns(event: &ControllerEvent, device: Option<&str>) -> bool {
    let Some(device) = device else {
        return true;
    };
    match event {
        ControllerEvent::DeviceUpdated(update) => update.device_id == device,
        ControllerEvent::DeviceChanged { id } => id == device,
        ControllerEvent::GroupUpdated(_) => false,
        _ => true,
    }
}

fn describe(event: &ControllerEvent) -> String {
    match event {
        ControllerEvent::TokenChanged { mode, expires_at } => match expires_at {
            Some(at) => format!("token refreshed ({mode}), valid until {at}"),
            None => format!("token refreshed ({mode})"),
        },
        ControllerEvent::RateLimit(status) => format!(
            "rate limit: {}/{} per minute, {}/{} per day",
            opt(status.remaining_minute),
            opt(status.limit_minute),
            opt(status.remaining_day),
            opt(status.limit_day),
        ),
        ControllerEvent::Error { source, message } => format!("{source} error: {message}"),
        ControllerEvent::RealtimeConnected => "realtime connected".into(),
        ControllerEvent::RealtimeDisconnected { reason } => {
            format!("realtime disconnected: {reason}")
        }
        ControllerEvent::DeviceUpdated(update) => format!(
            "{} {}/{} = {}",
            update.device_id,
            update.embedded_id,
            update.characteristic_name,
            update
                .data
                .value
                .as_ref()
                .map_or_else(|| "(no value)".to_owned(), output::display_value),
        ),
        ControllerEvent::GroupUpdated(update) => format!("group {} updated", update.group_id),
        ControllerEvent::DeviceChanged { id } => format!("{id} changed"),
        ControllerEvent::ReauthRequired { mode } => {
            format!("credentials rejected ({mode}); log in again")
        }
    }
}

fn opt(v: Option<u32>) -> String {
    v.map_or_else(|| "?".to_owned(), |v| v.to_string())
}

fn render(event: &ControllerEvent, format: OutputFormat) -> Result<String, CliError> {
    Ok(match format {
        // One JSON object per line, whatever the JSON flavour.
        OutputFormat::Json | OutputFormat::JsonCompact => serde_json::to_string(event)?,
        OutputFormat::Table | OutputFormat::Plain => {
            format!("{} {}", chrono::Local::now().format("%H:%M:%S"), describe(event))
        }
    })
}

pub async fn handle(
    controller: &Controller,
    args: &WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut events = controller.events();

    controller.devices().await?;
    if !args.no_realtime {
        controller.enable_realtime().await?;
    }

    let mut poll = tokio::time::interval(Duration::from_secs(args.poll.unwrap_or(3600)));
    poll.reset();
    let polling = args.poll.is_some();

    info!("watching for events, press Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = poll.tick(), if polling => {
                if let Err(e) = controller.devices().await {
                    warn!(error = %e, "poll failed");
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if concerns(&event, args.device.as_deref()) {
                        output::print_output(&render(&event, global.output)?, global.quiet);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    if controller.realtime_state() != RealtimeState::Disconnected {
        controller.disable_realtime().await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use onecta_api::DeviceUpdate;
    use onecta_core::Characteristic;
    use serde_json::json;

    use super::*;

    fn update(device: &str) -> ControllerEvent {
        ControllerEvent::DeviceUpdated(DeviceUpdate {
            device_id: device.into(),
            embedded_id: "climateControl".into(),
            management_point_id: None,
            characteristic_name: "onOffMode".into(),
            data: Characteristic::with_value(json!("on")),
        })
    }

    #[test]
    fn device_filter_keeps_global_events() {
        assert!(concerns(&update("a"), Some("a")));
        assert!(!concerns(&update("b"), Some("a")));
        assert!(concerns(&ControllerEvent::RealtimeConnected, Some("a")));
        assert!(concerns(&update("b"), None));
    }

    #[test]
    fn describes_updates() {
        assert_eq!(describe(&update("a")), "a climateControl/onOffMode = on");
    }

    #[test]
    fn json_output_is_one_line() {
        let line = render(&update("a"), OutputFormat::Json).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.starts_with(r#"{"event":"device_updated""#));
    }
}
