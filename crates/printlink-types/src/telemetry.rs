//! The telemetry slot record.
//!
//! Telemetry carries at most the single most recent value per field. The
//! producer thread merges partial updates into a pending slot; the loop
//! takes the whole slot when it is time to send. Nothing here queues.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CommandId, PrinterState};

/// Latest-value printer metrics, merged field-wise.
///
/// All fields are optional; a producer reports only what it knows. Unknown
/// metrics travel in `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Nozzle temperature, °C.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_nozzle: Option<f64>,
    /// Nozzle target temperature, °C.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_nozzle: Option<f64>,
    /// Bed temperature, °C.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_bed: Option<f64>,
    /// Bed target temperature, °C.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_bed: Option<f64>,
    /// X axis position, mm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub axis_x: Option<f64>,
    /// Y axis position, mm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub axis_y: Option<f64>,
    /// Z axis position, mm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub axis_z: Option<f64>,
    /// Print speed multiplier, percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Extrusion flow multiplier, percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<f64>,
    /// Hotend fan, RPM.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_hotend: Option<f64>,
    /// Print fan, RPM.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_print: Option<f64>,
    /// Job progress, percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Seconds printed so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_printing: Option<i64>,
    /// Estimated seconds remaining.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<i64>,
    /// Filament sensor: 1 present, 0 absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filament_sensor: Option<i64>,
    /// Anything the model reports beyond the named fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Telemetry {
    /// Merges `update` into `self`, field-wise: a `Some` in the update wins,
    /// a `None` leaves the previous value in place. Extra keys overwrite.
    pub fn merge(&mut self, update: Telemetry) {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if update.$field.is_some() {
                    self.$field = update.$field;
                })*
            };
        }
        take!(
            temp_nozzle,
            target_nozzle,
            temp_bed,
            target_bed,
            axis_x,
            axis_y,
            axis_z,
            speed,
            flow,
            fan_hotend,
            fan_print,
            progress,
            time_printing,
            time_remaining,
            filament_sensor,
        );
        for (k, v) in update.extra {
            self.extra.insert(k, v);
        }
    }

    /// True when no field carries a value.
    pub fn is_empty(&self) -> bool {
        *self == Telemetry::default()
    }

    /// Builds the wire body for `POST /p/telemetry`.
    ///
    /// The state always travels; `command_id` is attached while a command is
    /// in progress so the service can correlate.
    pub fn to_body(&self, state: PrinterState, command_id: Option<CommandId>) -> Value {
        let mut body = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            // Telemetry serializes to an object by construction.
            _ => Map::new(),
        };
        body.insert("state".into(), Value::from(state.as_str()));
        if let Some(id) = command_id {
            body.insert("command_id".into(), Value::from(u32::from(id)));
        }
        Value::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_old_values_for_none() {
        let mut slot = Telemetry {
            temp_nozzle: Some(215.0),
            temp_bed: Some(60.0),
            ..Telemetry::default()
        };
        slot.merge(Telemetry {
            temp_nozzle: Some(220.0),
            progress: Some(12.5),
            ..Telemetry::default()
        });
        assert_eq!(slot.temp_nozzle, Some(220.0));
        assert_eq!(slot.temp_bed, Some(60.0));
        assert_eq!(slot.progress, Some(12.5));
    }

    #[test]
    fn merge_overwrites_extra_keys() {
        let mut slot = Telemetry::default();
        let mut first = Telemetry::default();
        first.extra.insert("chamber_temp".into(), Value::from(40));
        slot.merge(first);

        let mut second = Telemetry::default();
        second.extra.insert("chamber_temp".into(), Value::from(42));
        slot.merge(second);

        assert_eq!(slot.extra["chamber_temp"], Value::from(42));
    }

    #[test]
    fn body_carries_state_and_command_id() {
        let t = Telemetry {
            progress: Some(50.0),
            ..Telemetry::default()
        };
        let body = t.to_body(PrinterState::Printing, Some(CommandId::new(9)));
        assert_eq!(body["state"], Value::from("PRINTING"));
        assert_eq!(body["command_id"], Value::from(9));
        assert_eq!(body["progress"], Value::from(50.0));
    }

    #[test]
    fn body_omits_absent_fields() {
        let body = Telemetry::default().to_body(PrinterState::Idle, None);
        let obj = body.as_object().unwrap();
        assert_eq!(obj.len(), 1, "only state should be present: {obj:?}");
    }

    #[test]
    fn default_is_empty() {
        assert!(Telemetry::default().is_empty());
        let t = Telemetry {
            speed: Some(100.0),
            ..Telemetry::default()
        };
        assert!(!t.is_empty());
    }
}
