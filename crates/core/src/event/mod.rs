use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    control::{json_number, ControlRecord, EmitOptions},
    schema, ControlValue, MessageSink, Result, ShowlineError,
};

/// Identifier handed out by a timeline. Ids start at 1 and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(u64);

impl EventId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cue: at `time` seconds after the timeline starts, deliver `control` to
/// `address`.
#[derive(Debug, Clone)]
pub struct Event {
    time: f64,
    address: String,
    control: ControlValue,
    sink: Option<Arc<dyn MessageSink>>,
}

impl Event {
    pub fn new(time: f64, address: impl Into<String>, control: ControlValue) -> Result<Self> {
        check_time(time)?;
        Ok(Self {
            time,
            address: address.into(),
            control,
            sink: None,
        })
    }

    /// Event carrying the default unique control.
    pub fn with_default_control(time: f64, address: impl Into<String>) -> Result<Self> {
        Self::new(time, address, ControlValue::default())
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn set_time(&mut self, time: f64) -> Result<()> {
        check_time(time)?;
        self.time = time;
        Ok(())
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn set_address(&mut self, address: impl Into<String>) {
        self.address = address.into();
    }

    pub fn control(&self) -> &ControlValue {
        &self.control
    }

    pub fn set_control(&mut self, control: ControlValue) {
        self.control = control;
    }

    pub fn attach_sink(&mut self, sink: Arc<dyn MessageSink>) {
        self.sink = Some(sink);
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Sends the control to the attached sink.
    pub fn trigger(&self) -> Result<()> {
        self.trigger_with(&EmitOptions::default())
    }

    pub fn trigger_with(&self, options: &EmitOptions<'_>) -> Result<()> {
        let sink = self.sink.as_deref().ok_or(ShowlineError::NoSinkConfigured)?;
        self.control.emit_with(sink, &self.address, options)
    }

    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            time: json_number(self.time),
            command: self.address.clone(),
            control: self.control.to_record(),
        }
    }

    pub fn from_record(record: &EventRecord) -> Result<Self> {
        let time = match &record.time {
            Value::Number(number) => number.as_f64().unwrap_or(f64::NAN),
            other => {
                return Err(ShowlineError::SchemaTypeMismatch {
                    key: "time".to_string(),
                    expected: "number".to_string(),
                    actual: schema::kind_name(other),
                })
            }
        };
        Self::new(
            time,
            record.command.clone(),
            ControlValue::from_record(&record.control)?,
        )
    }
}

/// Events compare by content; the attached sink is not part of identity.
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.address == other.address && self.control == other.control
    }
}

/// Persisted shape of an event: `{time, command, control}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub time: Value,
    pub command: String,
    pub control: ControlRecord,
}

fn check_time(time: f64) -> Result<()> {
    if time.is_finite() && time >= 0.0 {
        Ok(())
    } else {
        Err(ShowlineError::InvalidEventTime(time))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{sink::testing::MemorySink, Scalar};

    fn valid_events() -> Vec<Event> {
        vec![
            Event::new(3.0, "/str/test/acq/", ControlValue::constant(2).unwrap()).unwrap(),
            Event::new(
                5.0,
                "/str/test/3",
                ControlValue::interpolated(1.0, 2.0, 2.0).unwrap(),
            )
            .unwrap(),
        ]
    }

    fn valid_records() -> Vec<Value> {
        vec![
            json!({
                "time": 3,
                "command": "/str/test/acq/",
                "control": {"control_mode": "unique", "value": 2},
            }),
            json!({
                "time": 5,
                "command": "/str/test/3",
                "control": {"control_mode": "animated", "value": [1, 2], "duration": 2},
            }),
        ]
    }

    #[test]
    fn converts_events_to_records() {
        for (event, expected) in valid_events().iter().zip(valid_records()) {
            assert_eq!(serde_json::to_value(event.to_record()).unwrap(), expected);
        }
    }

    #[test]
    fn rebuilds_events_from_records() {
        for (expected, raw) in valid_events().into_iter().zip(valid_records()) {
            let record: EventRecord = serde_json::from_value(raw).unwrap();
            assert_eq!(Event::from_record(&record).unwrap(), expected);
        }
    }

    #[test]
    fn fractional_times_survive_a_round_trip() {
        let event = Event::with_default_control(1.25, "/cue").unwrap();
        assert_eq!(Event::from_record(&event.to_record()).unwrap(), event);
    }

    #[test]
    fn rejects_negative_or_non_finite_times() {
        assert!(matches!(
            Event::with_default_control(-0.5, "/cue"),
            Err(ShowlineError::InvalidEventTime(_))
        ));

        let mut event = Event::with_default_control(1.0, "/cue").unwrap();
        assert!(event.set_time(f64::INFINITY).is_err());
        assert_eq!(event.time(), 1.0);
    }

    #[test]
    fn triggering_without_a_sink_fails() {
        let event = Event::with_default_control(0.0, "/cue").unwrap();
        assert!(matches!(event.trigger(), Err(ShowlineError::NoSinkConfigured)));
    }

    #[test]
    fn triggering_sends_the_control_to_the_address() {
        let sink = MemorySink::new();
        let mut event = Event::with_default_control(0.0, "/cue").unwrap();
        event.attach_sink(sink.clone());
        event.trigger().unwrap();

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].address, "/cue");
        assert_eq!(sent[0].value, Scalar::Int(1));
    }

    #[test]
    fn equality_ignores_the_sink() {
        let mut attached = Event::with_default_control(2.0, "/cue").unwrap();
        attached.attach_sink(MemorySink::new());
        let detached = Event::with_default_control(2.0, "/cue").unwrap();
        assert_eq!(attached, detached);

        let mut moved = detached.clone();
        moved.set_address("/other");
        assert_ne!(moved, detached);
    }
}
