use log::{debug, info, warn};
use parking_lot::Mutex;

/// Receiver for progress marks and user-facing warnings.
pub trait ProgressSink: Send + Sync {
    fn mark(&self, text: &str);

    fn warning(&self, text: &str);
}

/// Forwards everything to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress {
    pub verbose: bool,
}

impl ProgressSink for LogProgress {
    fn mark(&self, text: &str) {
        if self.verbose {
            info!("{}", text);
        } else {
            debug!("{}", text);
        }
    }

    fn warning(&self, text: &str) {
        warn!("{}", text);
    }
}

/// Keeps marks and warnings so they can be shown (or asserted on) later.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    marks: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        RecordingProgress::default()
    }

    pub fn marks(&self) -> Vec<String> {
        self.marks.lock().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }

    pub fn clear(&self) {
        self.marks.lock().clear();
        self.warnings.lock().clear();
    }
}

impl ProgressSink for RecordingProgress {
    fn mark(&self, text: &str) {
        debug!("{}", text);
        self.marks.lock().push(text.to_string());
    }

    fn warning(&self, text: &str) {
        warn!("{}", text);
        self.warnings.lock().push(text.to_string());
    }
}
