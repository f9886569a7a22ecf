//! Value-delivery policies attached to every event.
//!
//! A control either sends one literal ([`ControlValue::Constant`]) or ramps a
//! number linearly over a duration ([`ControlValue::Interpolated`]) to mimic a
//! fader being pushed on the remote surface.

use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{MessageSink, Result, ShowlineError};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

const DEFAULT_UNIQUE_VALUE: i64 = 1;
const DEFAULT_ANIMATED_RANGE: (f64, f64) = (0.0, 1.0);
const DEFAULT_ANIMATED_DURATION: f64 = 2.0;

/// A single message argument. Integers, floats and strings stay distinct so
/// that they round-trip through JSON unchanged and reach the wire with the
/// matching OSC type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Converts a JSON number or string. Returns `None` for any other shape.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => match number.as_i64() {
                Some(int) => Some(Self::Int(int)),
                None => number.as_f64().map(Self::Float),
            },
            Value::String(text) => Some(Self::Text(text.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Int(int) => Value::from(*int),
            Self::Float(float) => Value::from(*float),
            Self::Text(text) => Value::String(text.clone()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(int) => Some(*int as f64),
            Self::Float(float) => Some(*float),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(int) => write!(f, "{int}"),
            Self::Float(float) => write!(f, "{float}"),
            Self::Text(text) => write!(f, "{text}"),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Persisted name of each control variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    Unique,
    Animated,
}

impl ControlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unique => "unique",
            Self::Animated => "animated",
        }
    }
}

impl FromStr for ControlMode {
    type Err = ShowlineError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "unique" => Ok(Self::Unique),
            "animated" => Ok(Self::Animated),
            other => Err(ShowlineError::UnknownControlMode(other.to_string())),
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an event delivers its value.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlValue {
    /// One message carrying the literal.
    Constant(Scalar),
    /// Linear ramp from `start` to `end` over `duration` seconds.
    Interpolated { start: f64, end: f64, duration: f64 },
}

impl Default for ControlValue {
    fn default() -> Self {
        Self::default_for(ControlMode::Unique)
    }
}

impl ControlValue {
    pub fn constant(value: impl Into<Scalar>) -> Result<Self> {
        let value = value.into();
        if let Scalar::Float(float) = value {
            if !float.is_finite() {
                return Err(invalid("for unique control, value must be a finite number"));
            }
        }
        Ok(Self::Constant(value))
    }

    pub fn interpolated(start: f64, end: f64, duration: f64) -> Result<Self> {
        if !start.is_finite() || !end.is_finite() {
            return Err(invalid(
                "for animated control, value should be two finite numbers",
            ));
        }
        check_duration(duration)?;
        Ok(Self::Interpolated {
            start,
            end,
            duration,
        })
    }

    /// Animated control whose bounds are both `value`.
    pub fn hold(value: f64, duration: f64) -> Result<Self> {
        Self::interpolated(value, value, duration)
    }

    /// The control an editor starts from after switching to `mode`.
    pub fn default_for(mode: ControlMode) -> Self {
        match mode {
            ControlMode::Unique => Self::Constant(Scalar::Int(DEFAULT_UNIQUE_VALUE)),
            ControlMode::Animated => Self::Interpolated {
                start: DEFAULT_ANIMATED_RANGE.0,
                end: DEFAULT_ANIMATED_RANGE.1,
                duration: DEFAULT_ANIMATED_DURATION,
            },
        }
    }

    pub fn mode(&self) -> ControlMode {
        match self {
            Self::Constant(_) => ControlMode::Unique,
            Self::Interpolated { .. } => ControlMode::Animated,
        }
    }

    pub fn duration(&self) -> Option<f64> {
        match self {
            Self::Constant(_) => None,
            Self::Interpolated { duration, .. } => Some(*duration),
        }
    }

    pub fn set_duration(&mut self, new_duration: f64) -> Result<()> {
        match self {
            Self::Constant(_) => Err(invalid("unique control has no duration")),
            Self::Interpolated { duration, .. } => {
                check_duration(new_duration)?;
                *duration = new_duration;
                Ok(())
            }
        }
    }

    /// Sends the control to `sink` using the default tick interval.
    pub fn emit(&self, sink: &dyn MessageSink, address: &str) -> Result<()> {
        self.emit_with(sink, address, &EmitOptions::default())
    }

    /// Sends the control to `sink`.
    ///
    /// Interpolation recomputes progress from a monotonic clock on every tick,
    /// so sleep overhead never accumulates. After the ramp the end value is
    /// always sent once more. If `options.cancel` becomes set the ramp stops
    /// before its next tick and the end value is not sent.
    pub fn emit_with(
        &self,
        sink: &dyn MessageSink,
        address: &str,
        options: &EmitOptions<'_>,
    ) -> Result<()> {
        match self {
            Self::Constant(value) => sink.send(address, value),
            Self::Interpolated {
                start,
                end,
                duration,
            } => {
                check_duration(*duration)?;
                let began = Instant::now();
                let total = Duration::from_secs_f64(*duration);

                loop {
                    let elapsed = began.elapsed();
                    if elapsed >= total {
                        break;
                    }
                    if options.is_cancelled() {
                        tracing::debug!(address, "interpolation cancelled");
                        return Ok(());
                    }

                    let progress = (elapsed.as_secs_f64() / duration).min(1.0);
                    let current = start + (end - start) * progress;
                    sink.send(address, &Scalar::Float(current))?;
                    thread::sleep(options.tick);
                }

                sink.send(address, &Scalar::Float(*end))
            }
        }
    }

    pub fn to_record(&self) -> ControlRecord {
        match self {
            Self::Constant(value) => ControlRecord {
                control_mode: ControlMode::Unique.to_string(),
                value: value.to_json(),
                duration: None,
            },
            Self::Interpolated {
                start,
                end,
                duration,
            } => ControlRecord {
                control_mode: ControlMode::Animated.to_string(),
                value: Value::Array(vec![json_number(*start), json_number(*end)]),
                duration: Some(json_number(*duration)),
            },
        }
    }

    pub fn from_record(record: &ControlRecord) -> Result<Self> {
        match record.control_mode.parse::<ControlMode>()? {
            ControlMode::Unique => match Scalar::from_json(&record.value) {
                Some(value) => Self::constant(value),
                None => Err(invalid(
                    "for unique control, value should be an integer, a float or a string",
                )),
            },
            ControlMode::Animated => {
                let duration = match &record.duration {
                    Some(Value::Number(number)) => number.as_f64().unwrap_or(f64::NAN),
                    Some(_) => {
                        return Err(invalid(
                            "for animated control, duration must be a positive numeric value",
                        ))
                    }
                    None => return Err(invalid("animated control requires a duration")),
                };

                match &record.value {
                    Value::Number(number) => {
                        Self::hold(number.as_f64().unwrap_or(f64::NAN), duration)
                    }
                    Value::Array(bounds) => match bounds.as_slice() {
                        [Value::Number(start), Value::Number(end)] => Self::interpolated(
                            start.as_f64().unwrap_or(f64::NAN),
                            end.as_f64().unwrap_or(f64::NAN),
                            duration,
                        ),
                        _ => Err(animated_value_error()),
                    },
                    _ => Err(animated_value_error()),
                }
            }
        }
    }
}

/// Knobs for [`ControlValue::emit_with`].
#[derive(Debug, Clone, Copy)]
pub struct EmitOptions<'a> {
    pub tick: Duration,
    pub cancel: Option<&'a AtomicBool>,
}

impl Default for EmitOptions<'_> {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK_INTERVAL,
            cancel: None,
        }
    }
}

impl EmitOptions<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

/// Persisted shape of a control: `{control_mode, value, [duration]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRecord {
    pub control_mode: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Value>,
}

/// Writes whole numbers as JSON integers so `2` stays `2` in saved files.
pub(crate) fn json_number(value: f64) -> Value {
    const EXACT_LIMIT: f64 = 9_007_199_254_740_992.0;
    if value.fract() == 0.0 && value.abs() < EXACT_LIMIT {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

fn check_duration(duration: f64) -> Result<()> {
    if !(duration.is_finite() && duration > 0.0) || Duration::try_from_secs_f64(duration).is_err()
    {
        return Err(invalid(
            "for animated control, duration must be a positive numeric value",
        ));
    }
    Ok(())
}

fn animated_value_error() -> ShowlineError {
    invalid("for animated control, value should be a number or a list of two numbers")
}

fn invalid(reason: &str) -> ShowlineError {
    ShowlineError::InvalidControlParameter(reason.to_string())
}
