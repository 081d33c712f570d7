use chrono::{DateTime, Duration, Utc};

/// Per-agent working memory for duplicate suppression.
///
/// Lives for the process lifetime only and is rebuilt empty after a restart;
/// the worst case after a crash is one redundant presentation or capture,
/// which downstream idempotency absorbs.
#[derive(Debug)]
pub struct MonitoringSession {
    pub last_foreground_app: Option<String>,
    pub last_locked_app: Option<String>,
    last_content_text: Option<String>,
    last_content_at: Option<DateTime<Utc>>,
    debounce_window: Duration,
}

/// Reference debounce window for captured content.
pub const DEFAULT_DEBOUNCE_MS: i64 = 2000;

impl Default for MonitoringSession {
    fn default() -> Self {
        Self::new(Duration::milliseconds(DEFAULT_DEBOUNCE_MS))
    }
}

impl MonitoringSession {
    pub fn new(debounce_window: Duration) -> Self {
        Self {
            last_foreground_app: None,
            last_locked_app: None,
            last_content_text: None,
            last_content_at: None,
            debounce_window,
        }
    }

    pub fn note_foreground(&mut self, app_id: &str) {
        self.last_foreground_app = Some(app_id.to_string());
    }

    /// Records that `app_id` is foreground and locked. Returns true when the
    /// block surface should be presented: only on the edge into a locked app,
    /// not on every tick while it stays foreground.
    pub fn note_locked(&mut self, app_id: &str) -> bool {
        if self.last_locked_app.as_deref() == Some(app_id) {
            return false;
        }
        self.last_locked_app = Some(app_id.to_string());
        true
    }

    /// Records that the current foreground app is not locked, re-arming the
    /// edge trigger.
    pub fn clear_locked(&mut self) {
        self.last_locked_app = None;
    }

    /// Debounce filter for captured content. An event is dropped only when
    /// its text is byte-identical to the previous accepted text AND it
    /// arrives inside the debounce window; accepted events update both.
    pub fn accept_content(&mut self, text: &str, now: DateTime<Utc>) -> bool {
        if let (Some(previous), Some(at)) = (&self.last_content_text, self.last_content_at) {
            if previous == text && now - at < self.debounce_window {
                return false;
            }
        }
        self.last_content_text = Some(text.to_string());
        self.last_content_at = Some(now);
        true
    }
}
