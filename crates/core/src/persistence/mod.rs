//! Flat JSON storage of a timeline.
//!
//! Documents are checked against [`crate::schema`] before anything is built,
//! and every event is constructed before the timeline exists, so a bad file
//! never yields a partially loaded timeline.

use std::{path::Path, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::PlaybackConfig, schema, Event, EventRecord, OscUdpSink, Result, ShowlineError,
    Timeline,
};

/// Persisted shape of a timeline. Field order is the on-disk key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineRecord {
    pub name: String,
    pub ip: String,
    pub listening_port: u16,
    pub timeline: Vec<EventRecord>,
}

impl TimelineRecord {
    /// Parses and validates a JSON document.
    pub fn parse(raw: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(raw)?;
        schema::validate(&document)?;
        check_port(&document["listening_port"])?;
        Ok(serde_json::from_value(document)?)
    }
}

fn check_port(port: &Value) -> Result<()> {
    match port.as_u64().map(u16::try_from) {
        Some(Ok(_)) => Ok(()),
        _ => Err(ShowlineError::InvalidPort(port.to_string())),
    }
}

impl Timeline {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_config(path, PlaybackConfig::default())
    }

    pub fn load_with_config(path: impl AsRef<Path>, playback: PlaybackConfig) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let timeline = Self::from_record(&TimelineRecord::parse(&raw)?, playback)?;
        tracing::info!(path = %path.display(), events = timeline.len()?, "timeline loaded");
        Ok(timeline)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Self::from_record(&TimelineRecord::parse(raw)?, PlaybackConfig::default())
    }

    /// Builds a timeline whose events get fresh ids in file order.
    pub fn from_record(record: &TimelineRecord, playback: PlaybackConfig) -> Result<Self> {
        let port = record.listening_port;
        let events = record
            .timeline
            .iter()
            .map(Event::from_record)
            .collect::<Result<Vec<_>>>()?;

        let timeline = Self::assemble(
            record.name.clone(),
            record.ip.clone(),
            port,
            Arc::new(OscUdpSink::new(record.ip.clone(), port)),
            playback,
        );
        for event in events {
            timeline.add(event)?;
        }
        Ok(timeline)
    }

    pub fn to_record(&self) -> Result<TimelineRecord> {
        Ok(TimelineRecord {
            name: self.name()?,
            ip: self.ip()?,
            listening_port: self.port()?,
            timeline: self
                .events()?
                .iter()
                .map(|(_, event)| event.to_record())
                .collect(),
        })
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_record()?)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json_string()?)?;
        tracing::info!(path = %path.display(), "timeline saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::{ControlValue, EventId};

    const PARSE_FIXTURE: &str = r#"{
        "name": "Resolume cues",
        "ip": "192.168.0.140",
        "listening_port": 6666,
        "timeline": [
            {
                "time": 1,
                "command": "/composition/layers/1/clips/1/connect",
                "control": { "control_mode": "unique", "value": 11 }
            },
            {
                "time": 2,
                "command": "/composition/layers/2/video/opacity",
                "control": { "control_mode": "animated", "value": [0, 1], "duration": 1 }
            }
        ]
    }"#;

    fn fixture(timeline: Value) -> String {
        json!({
            "name": "show",
            "ip": "192.168.0.140",
            "listening_port": 6666,
            "timeline": timeline,
        })
        .to_string()
    }

    #[test]
    fn loads_events_with_fresh_ids() {
        let timeline = Timeline::from_json_str(PARSE_FIXTURE).unwrap();

        assert_eq!(timeline.name().unwrap(), "Resolume cues");
        assert_eq!(timeline.ip().unwrap(), "192.168.0.140");
        assert_eq!(timeline.port().unwrap(), 6666);

        let expected: BTreeMap<EventId, Event> = [
            (
                EventId::new(1),
                Event::new(
                    1.0,
                    "/composition/layers/1/clips/1/connect",
                    ControlValue::constant(11).unwrap(),
                )
                .unwrap(),
            ),
            (
                EventId::new(2),
                Event::new(
                    2.0,
                    "/composition/layers/2/video/opacity",
                    ControlValue::interpolated(0.0, 1.0, 1.0).unwrap(),
                )
                .unwrap(),
            ),
        ]
        .into_iter()
        .collect();
        let loaded: BTreeMap<EventId, Event> = timeline.events().unwrap().into_iter().collect();
        assert_eq!(loaded, expected);
        assert!(loaded.values().all(Event::has_sink));
    }

    #[test]
    fn loads_the_bundled_demo() {
        let timeline =
            Timeline::from_json_str(include_str!("../../../../demos/resolume.json")).unwrap();
        assert_eq!(timeline.len().unwrap(), 4);
        assert_eq!(timeline.max_time().unwrap(), 6.0);
    }

    #[test]
    fn loads_empty_timelines() {
        let timeline = Timeline::from_json_str(&fixture(json!([]))).unwrap();
        assert!(timeline.is_empty().unwrap());
        assert_eq!(timeline.port().unwrap(), 6666);
    }

    #[test]
    fn saves_the_documented_shape() {
        let timeline = Timeline::new();
        timeline.set_name("Test123").unwrap();
        timeline.set_sink("123.345.123.123", 2222).unwrap();
        timeline
            .add(
                Event::new(
                    2.0,
                    "add/opacity/2/layers/1",
                    ControlValue::constant(0.75).unwrap(),
                )
                .unwrap(),
            )
            .unwrap();

        assert_eq!(
            timeline.to_json_string().unwrap(),
            r#"{"name":"Test123","ip":"123.345.123.123","listening_port":2222,"timeline":[{"time":2,"command":"add/opacity/2/layers/1","control":{"control_mode":"unique","value":0.75}}]}"#
        );
    }

    #[test]
    fn save_and_load_round_trip_through_disk() {
        let original = Timeline::from_json_str(PARSE_FIXTURE).unwrap();
        original
            .add(Event::new(2.5, "/cue/text", ControlValue::constant("go").unwrap()).unwrap())
            .unwrap();

        let path = std::env::temp_dir().join(format!(
            "showline-round-trip-{}.json",
            std::process::id()
        ));
        original.save(&path).unwrap();
        let reloaded = Timeline::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(reloaded.to_record().unwrap(), original.to_record().unwrap());
        assert_eq!(reloaded.events().unwrap(), original.events().unwrap());
    }

    #[test]
    fn rejects_invalid_documents_without_building_anything() {
        let cases = [
            json!({"name": "x", "ip": "1.2.3.4", "listening_port": "6666", "timeline": []})
                .to_string(),
            fixture(json!([{ "time": 0, "command": "/a",
                "control": {"control_mode": "animated", "value": 0.5, "duration": 0} }])),
            fixture(json!([{ "time": 0, "command": "/a",
                "control": {"control_mode": "animated", "value": [0, 1]} }])),
            fixture(json!([{ "time": 0, "command": "/a",
                "control": {"control_mode": "uniquee", "value": 1} }])),
            json!({"name": "x", "listening_port": 6666, "timeline": []}).to_string(),
            fixture(json!([
                { "time": 0, "command": "/a", "control": {"control_mode": "unique", "value": 1} },
                { "time": 1, "command": "/b", "control": {"control_mode": "unique"} },
            ])),
            fixture(json!([{ "time": -1, "command": "/a",
                "control": {"control_mode": "unique", "value": 1} }])),
        ];

        for (idx, raw) in cases.iter().enumerate() {
            let err = Timeline::from_json_str(raw).unwrap_err();
            assert!(err.is_validation(), "case {idx} produced {err:?}");
        }
    }

    #[test]
    fn rejects_out_of_range_ports() {
        for port in [json!(70000), json!(-1), json!(u64::MAX)] {
            let raw = json!({"name": "x", "ip": "1.2.3.4", "listening_port": port, "timeline": []})
                .to_string();
            match Timeline::from_json_str(&raw) {
                Err(ShowlineError::InvalidPort(written)) => assert_eq!(written, port.to_string()),
                other => panic!("port {port} gave {other:?}"),
            }
        }
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            Timeline::from_json_str("{ not json"),
            Err(ShowlineError::Json(_))
        ));
    }
}
