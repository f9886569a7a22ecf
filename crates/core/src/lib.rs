//! Core library for the Showline cue player.
//!
//! A [`Timeline`] holds [`Event`]s, each pairing a time offset and an OSC
//! address with a [`ControlValue`]. Playback runs on one background thread
//! that waits out every offset, honours pause/resume/stop and hands each
//! control to a [`MessageSink`]. Timelines are stored as flat JSON documents
//! checked by [`schema`] before anything is built.

pub mod config;
pub mod control;
pub mod error;
pub mod event;
pub mod persistence;
pub mod schema;
pub mod sink;
pub mod timeline;

pub use config::{AppConfig, PlaybackConfig, SinkConfig};
pub use control::{ControlMode, ControlRecord, ControlValue, EmitOptions, Scalar};
pub use error::{Result, ShowlineError};
pub use event::{Event, EventId, EventRecord};
pub use persistence::TimelineRecord;
pub use sink::{LogSink, MessageSink, OscUdpSink};
pub use timeline::{format_hms, Notification, PlaybackClock, PlaybackState, Timeline};
