/// How a newly seen title relates to the last announced one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackChange {
    /// First title since startup.
    Initial,
    /// Replaces a previously announced title.
    Changed { previous: String },
}

/// Remembers the last announced display title and decides whether a new
/// one deserves a notification.
///
/// `previous` only moves through [`ChangeDetector::advance`], which the poll
/// loop calls once dispatch for a change has been attempted. A failed fetch
/// never reaches the detector.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    previous: Option<String>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous(&self) -> Option<&str> {
        self.previous.as_deref()
    }

    pub fn should_notify(&self, candidate: &str) -> bool {
        !candidate.is_empty() && self.previous.as_deref() != Some(candidate)
    }

    /// Like [`should_notify`](Self::should_notify), but says whether this is
    /// the first title or a change.
    pub fn classify(&self, candidate: &str) -> Option<TrackChange> {
        if !self.should_notify(candidate) {
            return None;
        }
        Some(match &self.previous {
            None => TrackChange::Initial,
            Some(previous) => TrackChange::Changed {
                previous: previous.clone(),
            },
        })
    }

    pub fn advance(&mut self, candidate: String) {
        self.previous = Some(candidate);
    }
}
