//! Batch Monitoring
//!
//! - [`BatchTimeline`]: job start/end events for summaries and Gantt charts

pub mod timeline;

pub use timeline::{BatchTimeline, EventType, TimelineEvent};
