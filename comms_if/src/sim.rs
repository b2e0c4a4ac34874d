//! # Simulator interface
//!
//! The driving simulator talks a minimal SocketIO dialect over a websocket. Every event is a text
//! frame starting with `42` (`4` for a message, `2` for an event) followed by a JSON array
//! holding the event name and its data object, for example:
//!
//! ```text
//! 42["telemetry",{"cte":"0.7598","speed":"0.4380","steering_angle":"0.0000"}]
//! 42["steer",{"steering_angle":-0.25,"throttle":0.3}]
//! ```
//!
//! The simulator sends numbers inside telemetry as strings, both strings and numbers are accepted.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Prefix marking a SocketIO event frame.
pub const EVENT_PREFIX: &str = "42";

/// Name of the telemetry event sent by the simulator.
pub const TELEMETRY_EVENT: &str = "telemetry";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One telemetry sample from the simulated vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Telemetry {
    /// Cross track error, the signed lateral distance from the target path.
    #[serde(deserialize_with = "de_num_or_str")]
    pub cte: f64,

    /// Vehicle speed in miles per hour.
    #[serde(deserialize_with = "de_num_or_str")]
    pub speed: f64,

    /// Current steering angle in degrees.
    #[serde(deserialize_with = "de_num_or_str")]
    pub steering_angle: f64
}

/// A steering and throttle demand for the simulated vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SteerCmd {
    /// Normalised steering demand in `[-1, 1]`.
    pub steering_angle: f64,

    /// Normalised throttle demand.
    pub throttle: f64
}

/// Empty data object, serialized as `{}`.
#[derive(Serialize)]
struct Empty {}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// An event received from the simulator.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// A telemetry sample, the car is in autonomous mode.
    Telemetry(Telemetry),

    /// The event carried no data, the simulator is in manual driving mode.
    Manual,

    /// Any other named event.
    Other(String)
}

/// A command sent to the simulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimCmd {
    /// Drive with the given demands.
    Steer(SteerCmd),

    /// Restart the simulated episode from the start of the track.
    Reset,

    /// Hand control back to manual driving.
    Manual
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("The event payload is not valid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("The event payload does not start with an event name")]
    MissingEventName,

    #[error("Could not read the telemetry data: {0}")]
    InvalidTelemetry(serde_json::Error),

    #[error("Could not serialize the command: {0}")]
    Serialize(serde_json::Error)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimEvent {
    /// Decode a text frame received from the simulator.
    ///
    /// Returns `Ok(None)` if the frame is not an event frame at all (handshake or heartbeat
    /// traffic), these should be ignored.
    pub fn from_frame(frame: &str) -> Result<Option<Self>, FrameError> {
        if frame.len() <= EVENT_PREFIX.len() || !frame.starts_with(EVENT_PREFIX) {
            return Ok(None)
        }

        // No data means the simulator is being driven manually
        let payload = match event_payload(frame) {
            Some(p) => p,
            None => return Ok(Some(SimEvent::Manual))
        };

        let value: Value = serde_json::from_str(payload)
            .map_err(FrameError::InvalidJson)?;

        let name = value.get(0)
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingEventName)?;

        match name {
            TELEMETRY_EVENT => {
                let data = value.get(1).cloned().unwrap_or(Value::Null);
                let telem = serde_json::from_value(data)
                    .map_err(FrameError::InvalidTelemetry)?;

                Ok(Some(SimEvent::Telemetry(telem)))
            },
            other => Ok(Some(SimEvent::Other(other.to_string())))
        }
    }
}

impl SimCmd {
    /// Encode the command as a text frame for the simulator.
    pub fn to_frame(&self) -> Result<String, FrameError> {
        let payload = match self {
            SimCmd::Steer(cmd) => serde_json::to_string(&("steer", cmd)),
            SimCmd::Reset => serde_json::to_string(&("reset", Empty {})),
            SimCmd::Manual => serde_json::to_string(&("manual", Empty {}))
        }.map_err(FrameError::Serialize)?;

        Ok(format!("{}{}", EVENT_PREFIX, payload))
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Get the JSON array out of an event frame, or `None` if the event has no data.
fn event_payload(frame: &str) -> Option<&str> {
    if frame.contains("null") {
        return None
    }

    let start = frame.find('[')?;
    let end = frame.rfind(']')?;

    if end < start {
        return None
    }

    Some(&frame[start..=end])
}

/// Deserialize an `f64` sent either as a JSON number or as a string.
fn de_num_or_str<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(f64),
        Str(String)
    }

    match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => s.trim().parse().map_err(de::Error::custom)
    }
}
