// Ordering checks over the canonical event stream.
//
// Violations are logged, never raised: a misbehaving classifier should not
// take down a consumer that can cope with slightly odd framing.

use std::collections::HashSet;

use llm_conduit_types::{StreamEvent, StreamEventKind};

/// Watches emitted events and warns when the Start/Delta/Complete nesting or
/// the StreamStart/StreamEnd framing is broken.
#[derive(Debug, Default)]
pub struct StreamLifecycle {
    started: bool,
    ended: bool,
    open_text: HashSet<String>,
    closed_text: HashSet<String>,
    open_thinking: HashSet<String>,
    closed_thinking: HashSet<String>,
    violations: usize,
}

impl StreamLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one event, logging any ordering violation it introduces.
    pub fn observe(&mut self, event: &StreamEvent) {
        if self.ended {
            self.violation(format!("{:?} after STREAM_END", event.event_type()));
        }

        match &event.kind {
            StreamEventKind::StreamStart { .. } => {
                if self.started {
                    self.violation("duplicate STREAM_START".into());
                }
                self.started = true;
            }
            StreamEventKind::StreamEnd { .. } => {
                if !self.open_text.is_empty() || !self.open_thinking.is_empty() {
                    self.violation("STREAM_END with an open text or thinking block".into());
                }
                self.ended = true;
            }
            other => {
                if !self.started {
                    self.violation(format!("{:?} before STREAM_START", other.event_type()));
                }
                self.observe_block(other);
            }
        }
    }

    fn observe_block(&mut self, kind: &StreamEventKind) {
        match kind {
            StreamEventKind::TextStart { message_id } => {
                if !self.open_text.insert(message_id.clone()) {
                    self.violation(format!("TEXT_START repeated for {message_id}"));
                }
            }
            StreamEventKind::TextDelta { message_id, .. } => {
                if self.closed_text.contains(message_id) {
                    self.violation(format!("TEXT_DELTA after TEXT_COMPLETE for {message_id}"));
                } else if !self.open_text.contains(message_id) {
                    self.violation(format!("TEXT_DELTA without TEXT_START for {message_id}"));
                }
            }
            StreamEventKind::TextComplete { message_id } => {
                if !self.open_text.remove(message_id) {
                    self.violation(format!("TEXT_COMPLETE without TEXT_START for {message_id}"));
                }
                self.closed_text.insert(message_id.clone());
            }
            StreamEventKind::ThinkingStart { reasoning_id } => {
                if !self.open_thinking.insert(reasoning_id.clone()) {
                    self.violation(format!("THINKING_START repeated for {reasoning_id}"));
                }
            }
            StreamEventKind::ThinkingDelta { reasoning_id, .. } => {
                if self.closed_thinking.contains(reasoning_id) {
                    self.violation(format!(
                        "THINKING_DELTA after THINKING_COMPLETE for {reasoning_id}"
                    ));
                } else if !self.open_thinking.contains(reasoning_id) {
                    self.violation(format!(
                        "THINKING_DELTA without THINKING_START for {reasoning_id}"
                    ));
                }
            }
            StreamEventKind::ThinkingComplete { reasoning_id } => {
                if !self.open_thinking.remove(reasoning_id) {
                    self.violation(format!(
                        "THINKING_COMPLETE without THINKING_START for {reasoning_id}"
                    ));
                }
                self.closed_thinking.insert(reasoning_id.clone());
            }
            _ => {}
        }
    }

    /// Forget completed blocks so the next step may reuse a provider id.
    pub fn next_step(&mut self) {
        self.closed_text.clear();
        self.closed_thinking.clear();
    }

    fn violation(&mut self, message: String) {
        self.violations += 1;
        tracing::warn!(violation = %message, "stream event ordering violation");
    }

    /// Number of violations seen so far.
    pub fn violations(&self) -> usize {
        self.violations
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_conduit_types::{FinishReason, Usage};

    fn ev(kind: StreamEventKind) -> StreamEvent {
        StreamEvent::new(kind)
    }

    fn start() -> StreamEvent {
        ev(StreamEventKind::StreamStart {
            model: "m".into(),
            provider: "p".into(),
            metadata: Default::default(),
        })
    }

    fn end() -> StreamEvent {
        ev(StreamEventKind::StreamEnd {
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
        })
    }

    fn text(kind: &str, id: &str) -> StreamEvent {
        let id = id.to_string();
        ev(match kind {
            "start" => StreamEventKind::TextStart { message_id: id },
            "delta" => StreamEventKind::TextDelta {
                delta: "x".into(),
                message_id: id,
            },
            _ => StreamEventKind::TextComplete { message_id: id },
        })
    }

    #[test]
    fn test_well_formed_sequence_has_no_violations() {
        let mut lc = StreamLifecycle::new();
        for e in [
            start(),
            text("start", "m1"),
            text("delta", "m1"),
            text("delta", "m1"),
            text("complete", "m1"),
            ev(StreamEventKind::StepFinish {}),
            text("start", "m2"),
            text("delta", "m2"),
            text("complete", "m2"),
            end(),
        ] {
            lc.observe(&e);
        }
        assert_eq!(lc.violations(), 0);
        assert!(lc.is_ended());
    }

    #[test]
    fn test_delta_without_start_is_flagged() {
        let mut lc = StreamLifecycle::new();
        lc.observe(&start());
        lc.observe(&text("delta", "m1"));
        assert_eq!(lc.violations(), 1);
    }

    #[test]
    fn test_delta_after_complete_is_flagged() {
        let mut lc = StreamLifecycle::new();
        lc.observe(&start());
        lc.observe(&text("start", "m1"));
        lc.observe(&text("complete", "m1"));
        lc.observe(&text("delta", "m1"));
        assert_eq!(lc.violations(), 1);
    }

    #[test]
    fn test_duplicate_stream_start_and_events_after_end() {
        let mut lc = StreamLifecycle::new();
        lc.observe(&start());
        lc.observe(&start());
        lc.observe(&end());
        lc.observe(&ev(StreamEventKind::StepFinish {}));
        assert_eq!(lc.violations(), 2);
    }

    #[test]
    fn test_next_step_allows_id_reuse() {
        let mut lc = StreamLifecycle::new();
        lc.observe(&start());
        lc.observe(&text("start", "same"));
        lc.observe(&text("complete", "same"));
        lc.next_step();
        lc.observe(&text("start", "same"));
        lc.observe(&text("delta", "same"));
        assert_eq!(lc.violations(), 0);
    }

    #[test]
    fn test_event_before_stream_start_is_flagged() {
        let mut lc = StreamLifecycle::new();
        lc.observe(&ev(StreamEventKind::ThinkingStart {
            reasoning_id: "r".into(),
        }));
        assert_eq!(lc.violations(), 1);
    }

    #[test]
    fn test_error_before_stream_start_is_flagged() {
        let error = llm_conduit_types::Error::configuration("bad request");
        let mut lc = StreamLifecycle::new();
        lc.observe(&StreamEvent::from_error(&error));
        assert_eq!(lc.violations(), 1);

        let mut lc = StreamLifecycle::new();
        lc.observe(&start());
        lc.observe(&StreamEvent::from_error(&error));
        assert_eq!(lc.violations(), 0);
    }

    #[test]
    fn test_end_with_open_thinking_block_is_flagged() {
        let mut lc = StreamLifecycle::new();
        lc.observe(&start());
        lc.observe(&ev(StreamEventKind::ThinkingStart {
            reasoning_id: "r".into(),
        }));
        lc.observe(&end());
        assert_eq!(lc.violations(), 1);
    }
}
