//! # Change Detection
//!
//! Remembers the last reported observation of a stream and tells the caller
//! whether a new observation is worth reporting.
//!
//! Before anything has been reported the detector holds no value at all, so
//! the first observation is always a change, whatever it is.
//!
//! ```
//! use mag_cal_monitor::detector::ChangeDetector;
//!
//! let detector = ChangeDetector::new();
//! assert!(detector.observe(3));
//! assert!(!detector.observe(3));
//! assert!(detector.observe(4));
//! assert_eq!(detector.last(), Some(4));
//! ```

use std::sync::{Mutex, PoisonError};

/// Per-stream memory of the last reported value
///
/// Compare and update happen under one lock, so a detector may be shared by
/// several subscriptions without losing updates or reporting twice.
#[derive(Debug)]
pub struct ChangeDetector<T> {
    last: Mutex<Option<T>>,
}

impl<T> Default for ChangeDetector<T> {
    fn default() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }
}

impl<T: PartialEq + Clone> ChangeDetector<T> {
    /// Creates a detector that has not reported anything yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` if it differs from the last reported one.
    ///
    /// # Returns
    ///
    /// * `bool` - `true` when the value is new and should be reported
    pub fn observe(&self, value: T) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);

        if last.as_ref() == Some(&value) {
            return false;
        }

        *last = Some(value);
        true
    }

    /// Returns the last reported value, if any.
    #[must_use]
    pub fn last(&self) -> Option<T> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
