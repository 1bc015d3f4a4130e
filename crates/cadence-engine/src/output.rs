use std::sync::Arc;

use parking_lot::Mutex;

/// Downstream consumer of emitted sentences (typically a TTS stage).
pub trait OutputSink: Send + Sync {
    /// Deliver `text`; `end_of_segment` closes the current turn's output.
    fn send_text(&self, text: &str, end_of_segment: bool);

    /// Discard anything delivered but not yet played.
    fn flush(&self);
}

/// Emits the empty end-of-segment marker when dropped, so every turn
/// closes its output exactly once on any exit path, cancellation included.
pub struct SegmentCloser {
    sink: Arc<dyn OutputSink>,
}

impl SegmentCloser {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self { sink }
    }
}

impl Drop for SegmentCloser {
    fn drop(&mut self) {
        self.sink.send_text("", true);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    Text { text: String, end_of_segment: bool },
    Flush,
}

/// Sink that records everything it receives.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    /// Non-empty texts, in delivery order.
    pub fn sentences(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Text { text, .. } if !text.is_empty() => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn end_of_segment_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, SinkEvent::Text { end_of_segment: true, .. }))
            .count()
    }

    pub fn flush_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, SinkEvent::Flush))
            .count()
    }
}

impl OutputSink for CollectingSink {
    fn send_text(&self, text: &str, end_of_segment: bool) {
        self.events.lock().push(SinkEvent::Text {
            text: text.to_string(),
            end_of_segment,
        });
    }

    fn flush(&self) {
        self.events.lock().push(SinkEvent::Flush);
    }
}
