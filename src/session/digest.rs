use std::{
    collections::BTreeMap,
    fmt::Write,
    time::{Duration, Instant},
};

use itertools::Itertools;

use crate::protocol::SetValue;

#[derive(Debug, Default)]
struct KeyDigest {
    count: usize,
    last: Option<SetValue>,
}

/// Summarizes serial traffic over a window so busy controllers don't flood the log.
#[derive(Debug)]
pub(crate) struct Digest {
    window: Duration,
    max_keys: usize,
    started: Instant,
    lines: usize,
    json: usize,
    sets: usize,
    keys: BTreeMap<String, KeyDigest>,
}

impl Digest {
    pub(crate) fn new(window: Duration, max_keys: usize, now: Instant) -> Self {
        Self {
            window,
            max_keys: max_keys.max(1),
            started: now,
            lines: 0,
            json: 0,
            sets: 0,
            keys: BTreeMap::new(),
        }
    }

    pub(crate) fn line(&mut self) {
        self.lines += 1;
    }

    pub(crate) fn json(&mut self) {
        self.json += 1;
    }

    pub(crate) fn set(&mut self) {
        self.sets += 1;
    }

    pub(crate) fn key(&mut self, key: &str, value: Option<&SetValue>) {
        if key.is_empty() {
            return;
        }

        let entry = self.keys.entry(key.to_owned()).or_default();
        entry.count += 1;
        entry.last = value.cloned();
    }

    pub(crate) fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.window
    }

    /// The summary of the window so far, if anything was seen.
    /// Starts a new window either way.
    pub(crate) fn take(&mut self, now: Instant) -> Option<String> {
        let elapsed = now.saturating_duration_since(self.started);
        let fresh = Self::new(self.window, self.max_keys, now);
        let window = std::mem::replace(self, fresh);

        if window.lines == 0 {
            return None;
        }

        let mut summary = format!(
            "{} lines ({} json, {} set) in {:.1}s",
            window.lines,
            window.json,
            window.sets,
            elapsed.as_secs_f64()
        );

        let keys = window
            .keys
            .iter()
            .sorted_by(|(a_key, a), (b_key, b)| b.count.cmp(&a.count).then(a_key.cmp(b_key)))
            .take(window.max_keys)
            .map(|(key, digest)| match &digest.last {
                Some(last) => format!("{key}x{} last={last}", digest.count),
                None => format!("{key}x{}", digest.count),
            })
            .join(" | ");

        if !keys.is_empty() {
            let _ = write!(summary, " · {keys}");
        }

        Some(summary)
    }
}
