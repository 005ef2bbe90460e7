//! Turns task lifecycle events into progress display updates.
//!
//! The engine reports each task's state changes as [`ProgressEvent`]s. The
//! [`ProgressMapper`] keeps one [`TaskLine`] per task id and repaints the
//! whole display after every event:
//!
//! | State     | Effect                                                    |
//! |-----------|-----------------------------------------------------------|
//! | `waiting` | payload only                                              |
//! | `running` | payload plus `current`/`total`                            |
//! | `stopped` | status `Done.`, bar filled to its total, marked complete  |
//! | `error`   | status `Error: <message>`, counters left as they were     |
//!
//! Events must reach the mapper from a single consumer; see
//! [`crate::engine::EngineRun`].

use serde::{Deserialize, Serialize};
use std::io::{self, Write};

use crate::config::DrawOrder;
use crate::progress::{BarData, MultiProgressBar};
use crate::target::Target;

/// Status shown once a task has stopped.
pub const DONE_STATUS: &str = "Done.";
/// Display names are padded or cut to this many columns.
pub const NAME_COLUMNS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Waiting,
    Running,
    Stopped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderInfo {
    pub name: String,
}

/// One state change of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub id: u64,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder: Option<BuilderInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn new(id: u64, state: TaskState) -> Self {
        Self {
            id,
            state,
            builder: None,
            target: None,
            current: None,
            total: None,
            status: None,
            error: None,
        }
    }

    pub fn with_counters(mut self, current: i64, total: u64) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_builder(mut self, name: impl Into<String>) -> Self {
        self.builder = Some(BuilderInfo { name: name.into() });
        self
    }

    /// Human-readable label: the target string, else the builder name.
    pub fn label(&self) -> String {
        match (&self.target, &self.builder) {
            (Some(target), _) => target.to_string(),
            (None, Some(builder)) => builder.name.clone(),
            (None, None) => format!("task {}", self.id),
        }
    }
}

/// Display payload for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLine {
    pub id: u64,
    /// Label padded or truncated to [`NAME_COLUMNS`]
    pub name: String,
    pub status: String,
}

impl TaskLine {
    fn from_event(event: &ProgressEvent) -> Self {
        Self {
            id: event.id,
            name: format!("{:<width$.width$}", event.label(), width = NAME_COLUMNS),
            status: String::new(),
        }
    }
}

impl BarData for TaskLine {
    fn tokens(&self) -> Vec<(&str, String)> {
        vec![
            ("name", self.name.clone()),
            ("status", self.status.clone()),
            ("id", self.id.to_string()),
        ]
    }
}

/// How the mapper repaints after each event.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderPolicy {
    pub max_lines: Option<usize>,
    pub order: DrawOrder,
}

/// Applies lifecycle events to a [`MultiProgressBar`].
pub struct ProgressMapper<W: Write> {
    bars: MultiProgressBar<u64, TaskLine, W>,
    policy: RenderPolicy,
}

impl<W: Write> ProgressMapper<W> {
    pub fn new(bars: MultiProgressBar<u64, TaskLine, W>) -> Self {
        Self::with_policy(bars, RenderPolicy::default())
    }

    pub fn with_policy(bars: MultiProgressBar<u64, TaskLine, W>, policy: RenderPolicy) -> Self {
        Self { bars, policy }
    }

    pub fn bars(&self) -> &MultiProgressBar<u64, TaskLine, W> {
        &self.bars
    }

    pub fn bars_mut(&mut self) -> &mut MultiProgressBar<u64, TaskLine, W> {
        &mut self.bars
    }

    /// Apply one event and repaint.
    pub fn handle(&mut self, event: &ProgressEvent) -> io::Result<()> {
        tracing::trace!(target: "progress", "task {} -> {:?}", event.id, event.state);

        let id = event.id;
        let mut line = self
            .bars
            .get(&id)
            .cloned()
            .unwrap_or_else(|| TaskLine::from_event(event));
        if let Some(status) = &event.status {
            line.status = status.clone();
        }

        match event.state {
            TaskState::Waiting => self.bars.update(id, line, None, None)?,
            TaskState::Running => self.bars.update(id, line, event.current, event.total)?,
            TaskState::Stopped => {
                line.status = DONE_STATUS.to_string();
                let total = event
                    .total
                    .or_else(|| self.bars.entry(&id).map(|entry| entry.total()))
                    .unwrap_or(1);
                let current = i64::try_from(total).unwrap_or(i64::MAX);
                self.bars.update(id, line, Some(current), Some(total))?;
                self.bars.complete(&id);
            }
            TaskState::Error => {
                let message = event.error.as_deref().unwrap_or("unknown error");
                line.status = format!("Error: {message}");
                self.bars.update(id, line, None, None)?;
            }
        }

        self.render()
    }

    fn render(&mut self) -> io::Result<()> {
        let max_lines = self.policy.max_lines.unwrap_or(usize::MAX);
        match self.policy.order {
            DrawOrder::Insertion => self.bars.render_limited(max_lines),
            DrawOrder::Name => self
                .bars
                .render_sorted_by(max_lines, |a, b| a.name.cmp(&b.name)),
        }
    }

    /// Tear down the display. The mapper can be reused afterwards.
    pub fn terminate(&mut self) -> io::Result<()> {
        self.bars.terminate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::BarOptions;

    fn mapper() -> ProgressMapper<Vec<u8>> {
        let options = BarOptions::default().hide_cursor(false);
        ProgressMapper::new(MultiProgressBar::with_options(
            ":name|:status",
            Vec::new(),
            options,
        ))
    }

    fn output(mapper: &ProgressMapper<Vec<u8>>) -> String {
        String::from_utf8(mapper.bars().get_ref().clone()).unwrap()
    }

    #[test]
    fn test_waiting_running_stopped() {
        let mut mapper = mapper();
        let target: Target = "app:build".parse().unwrap();

        mapper
            .handle(&ProgressEvent::new(1, TaskState::Waiting).with_target(target.clone()))
            .unwrap();
        mapper
            .handle(
                &ProgressEvent::new(1, TaskState::Running)
                    .with_counters(2, 10)
                    .with_status("compiling"),
            )
            .unwrap();
        {
            let entry = mapper.bars().entry(&1).unwrap();
            assert_eq!(entry.current(), Some(2));
            assert_eq!(entry.total(), 10);
            assert_eq!(entry.payload().status, "compiling");
        }

        mapper
            .handle(&ProgressEvent::new(1, TaskState::Stopped))
            .unwrap();

        let entry = mapper.bars().entry(&1).unwrap();
        assert!(entry.is_completed());
        assert_eq!(entry.current(), Some(10));
        assert_eq!(entry.total(), 10);
        assert_eq!(entry.payload().status, DONE_STATUS);
        assert!(entry.payload().name.starts_with("app:build "));
        assert_eq!(entry.payload().name.chars().count(), NAME_COLUMNS);
    }

    #[test]
    fn test_stopped_uses_event_total() {
        let mut mapper = mapper();
        mapper
            .handle(&ProgressEvent::new(5, TaskState::Running).with_counters(1, 3))
            .unwrap();
        let mut stopped = ProgressEvent::new(5, TaskState::Stopped);
        stopped.total = Some(7);
        mapper.handle(&stopped).unwrap();

        let entry = mapper.bars().entry(&5).unwrap();
        assert_eq!(entry.current(), Some(7));
        assert_eq!(entry.total(), 7);
    }

    #[test]
    fn test_error_keeps_counters() {
        let mut mapper = mapper();
        mapper
            .handle(&ProgressEvent::new(2, TaskState::Running).with_counters(1, 4))
            .unwrap();
        mapper
            .handle(&ProgressEvent::new(2, TaskState::Error).with_error("disk full"))
            .unwrap();

        let entry = mapper.bars().entry(&2).unwrap();
        assert!(!entry.is_completed());
        assert!(entry.payload().status.contains("disk full"));
        assert_eq!(entry.payload().status, "Error: disk full");
        assert_eq!(entry.current(), Some(1));
        assert_eq!(entry.total(), 4);
    }

    #[test]
    fn test_every_event_repaints() {
        let mut mapper = mapper();
        mapper
            .handle(&ProgressEvent::new(1, TaskState::Waiting).with_builder("@demo:sleep"))
            .unwrap();
        mapper
            .handle(&ProgressEvent::new(2, TaskState::Waiting).with_builder("@demo:copy"))
            .unwrap();

        let out = output(&mapper);
        // one move to the top of the region per event
        assert_eq!(out.matches("\x1b[1A").count(), 1);
        assert_eq!(out.matches("\x1b[2A").count(), 1);
        assert!(out.contains("@demo:sleep"));
        assert!(out.contains("@demo:copy"));
    }

    #[test]
    fn test_status_survives_later_events() {
        let mut mapper = mapper();
        mapper
            .handle(&ProgressEvent::new(3, TaskState::Waiting).with_status("queued"))
            .unwrap();
        mapper
            .handle(&ProgressEvent::new(3, TaskState::Running).with_counters(1, 2))
            .unwrap();
        assert_eq!(mapper.bars().get(&3).unwrap().status, "queued");
        assert_eq!(mapper.bars().get(&3).unwrap().name.trim_end(), "task 3");
    }

    #[test]
    fn test_sorted_policy_draws_by_name() {
        let options = BarOptions::default().hide_cursor(false);
        let bars = MultiProgressBar::with_options(":name", Vec::new(), options);
        let mut mapper = ProgressMapper::with_policy(
            bars,
            RenderPolicy {
                max_lines: None,
                order: DrawOrder::Name,
            },
        );
        mapper
            .handle(&ProgressEvent::new(1, TaskState::Waiting).with_builder("zeta"))
            .unwrap();
        mapper.bars_mut().get_mut().clear();
        mapper
            .handle(&ProgressEvent::new(2, TaskState::Waiting).with_builder("alpha"))
            .unwrap();

        let out = output(&mapper);
        let alpha = out.find("alpha").unwrap();
        let zeta = out.find("zeta").unwrap();
        assert!(alpha < zeta);
        let ids: Vec<u64> = mapper.bars().entries().map(|e| *e.key()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_long_labels_are_truncated() {
        let event = ProgressEvent::new(1, TaskState::Waiting).with_builder("x".repeat(60));
        let line = TaskLine::from_event(&event);
        assert_eq!(line.name, "x".repeat(NAME_COLUMNS));
    }

    #[test]
    fn test_event_json_shape() {
        let event: ProgressEvent = serde_json::from_str(
            r#"{"id":4,"state":"running","current":3,"total":9,"target":{"project":"app","target":"test"}}"#,
        )
        .unwrap();
        assert_eq!(event.state, TaskState::Running);
        assert_eq!(event.current, Some(3));
        assert_eq!(event.total, Some(9));
        assert_eq!(event.label(), "app:test");
    }
}
