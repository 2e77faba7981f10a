//! Progress reporting.

/// Receives progress percentages, 0 to 100.
pub type ProgressCallback = Box<dyn FnMut(u8) + Send>;

/// Turns processed row counts into percentages for a callback.
///
/// Reported values never decrease and never repeat, and a completed
/// conversion always ends with 100.
pub struct ProgressTracker {
    callback: Option<ProgressCallback>,
    total: Option<usize>,
    last: Option<u8>,
}

impl ProgressTracker {
    pub fn new(total: Option<usize>, callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            total,
            last: None,
        }
    }

    /// Last reported percentage.
    pub fn last(&self) -> Option<u8> {
        self.last
    }

    fn emit(&mut self, percent: u8) {
        if self.last.map_or(false, |last| percent <= last) {
            return;
        }
        self.last = Some(percent);
        if let Some(callback) = self.callback.as_mut() {
            callback(percent);
        }
    }

    /// Report `processed` rows out of the known total. Without a known
    /// total nothing is reported until [`finish`](Self::finish).
    pub fn update(&mut self, processed: usize) {
        let Some(total) = self.total.filter(|t| *t > 0) else {
            return;
        };
        let percent = (processed.saturating_mul(100) / total).min(100) as u8;
        self.emit(percent);
    }

    pub fn finish(&mut self) {
        self.emit(100);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recording(total: Option<usize>) -> (ProgressTracker, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let tracker = ProgressTracker::new(total, Some(Box::new(move |p| sink.lock().push(p))));
        (tracker, seen)
    }

    #[test]
    fn test_non_decreasing_without_repeats() {
        let (mut tracker, seen) = recording(Some(300));
        for processed in [1, 2, 3, 100, 100, 50, 200, 300] {
            tracker.update(processed);
        }
        tracker.finish();
        assert_eq!(*seen.lock(), vec![0, 1, 33, 66, 100]);
    }

    #[test]
    fn test_finish_reaches_100() {
        let (mut tracker, seen) = recording(Some(10));
        tracker.update(5);
        tracker.finish();
        assert_eq!(*seen.lock(), vec![50, 100]);
        assert_eq!(tracker.last(), Some(100));
    }

    #[test]
    fn test_unknown_or_undercounted_total() {
        let (mut tracker, seen) = recording(None);
        tracker.update(10);
        tracker.finish();
        assert_eq!(*seen.lock(), vec![100]);

        // A source that yields more rows than it announced is clamped.
        let (mut tracker, seen) = recording(Some(2));
        tracker.update(5);
        tracker.finish();
        assert_eq!(*seen.lock(), vec![100]);
    }
}
