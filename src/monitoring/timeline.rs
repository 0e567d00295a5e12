//! Batch Timeline
//!
//! Records when each batch job starts and how it ends, for the job
//! summary and an ASCII Gantt chart of the batch.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

/// What happened to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Started,
    Completed,
    Failed,
    /// Never started because the batch was cancelled
    Cancelled,
}

impl EventType {
    fn ends_job(self) -> bool {
        !matches!(self, Self::Started)
    }
}

#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub job: String,
    pub event_type: EventType,
    pub timestamp: Instant,
    /// Wall-clock time of the event
    pub at: DateTime<Local>,
}

/// Ordered job events of one batch.
///
/// Only the thread collecting results writes to it.
#[derive(Debug, Clone)]
pub struct BatchTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl BatchTimeline {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn add_event(&mut self, job: impl Into<String>, event_type: EventType) {
        self.events.push(TimelineEvent {
            job: job.into(),
            event_type,
            timestamp: Instant::now(),
            at: Local::now(),
        });
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Events of one type, in the order they were recorded.
    pub fn jobs_with(&self, event_type: EventType) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .map(|e| e.job.as_str())
            .collect()
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Milliseconds between start and end of every finished job.
    pub fn durations(&self) -> HashMap<String, u128> {
        let mut starts: HashMap<&str, u128> = HashMap::new();
        let mut durations = HashMap::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();
            if event.event_type == EventType::Started {
                starts.insert(event.job.as_str(), elapsed);
            } else if let Some(start) = starts.get(event.job.as_str()) {
                durations.insert(event.job.clone(), elapsed - start);
            }
        }
        durations
    }

    /// Renders each job as a bar scaled to 50 columns.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nBatch Timeline:\n\n");

        let total_time = self.start_time.elapsed().as_millis();
        if total_time == 0 {
            return output;
        }
        let scale = 50.0 / total_time as f64;

        let mut job_times: Vec<(String, u128, u128)> = Vec::new();
        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();
            if event.event_type == EventType::Started {
                job_times.push((event.job.clone(), elapsed, 0));
            } else if event.event_type.ends_job() {
                if let Some(times) = job_times.iter_mut().find(|(job, _, _)| *job == event.job) {
                    times.2 = elapsed;
                }
            }
        }
        job_times.sort_by_key(|(_, start, _)| *start);

        for (job, start, end) in job_times {
            if end > start {
                let start_pos = (start as f64 * scale) as usize;
                let width = ((end - start) as f64 * scale).max(1.0) as usize;

                let mut bar = " ".repeat(start_pos);
                bar.push_str(&"#".repeat(width));
                output.push_str(&format!("{:12} |{}| ({} ms)\n", truncate(&job, 12), bar, end - start));
            }
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }
}

impl Default for BatchTimeline {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timeline_creation() {
        let timeline = BatchTimeline::new();
        assert!(timeline.events().is_empty());
    }

    #[test]
    fn test_durations() {
        let mut timeline = BatchTimeline::new();
        timeline.add_event("job-001", EventType::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.add_event("job-001", EventType::Failed);
        timeline.add_event("job-002", EventType::Started);

        let durations = timeline.durations();
        assert!(durations["job-001"] >= 30);
        assert!(!durations.contains_key("job-002"));
    }

    #[test]
    fn test_jobs_with() {
        let mut timeline = BatchTimeline::new();
        timeline.add_event("job-001", EventType::Started);
        timeline.add_event("job-001", EventType::Completed);
        timeline.add_event("job-002", EventType::Cancelled);
        timeline.add_event("job-003", EventType::Cancelled);

        assert_eq!(timeline.jobs_with(EventType::Cancelled), vec!["job-002", "job-003"]);
        assert_eq!(timeline.jobs_with(EventType::Completed), vec!["job-001"]);
    }

    #[test]
    fn test_gantt_chart() {
        let mut timeline = BatchTimeline::new();
        timeline.add_event("job-001", EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("job-001", EventType::Completed);
        timeline.add_event("job-002", EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("job-002", EventType::Failed);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("job-001"));
        assert!(chart.contains("job-002"));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 8), "short   ");
        assert_eq!(truncate("a-very-long-job-name", 8), "a-ver...");
    }
}
