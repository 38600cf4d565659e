//! Channel liveness, inferred from how recently a liveness key (e.g. `rate`) was seen.
//!
//! This is independent of whether the serial link itself is up:
//! a controller can be connected while the encoder feeding one of its channels is silent.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use crate::{
    events::{ChannelStatus, EncoderStatus},
    router::SlotId,
};

/// Remembers when each channel last showed activity.
#[derive(Debug)]
pub struct LivenessTracker {
    offline_timeout: Duration,
    last_seen: BTreeMap<SlotId, Instant>,
}

impl LivenessTracker {
    /// A tracker where channels go offline after `offline_timeout` without activity.
    pub fn new(offline_timeout: Duration) -> Self {
        Self {
            offline_timeout,
            last_seen: BTreeMap::new(),
        }
    }

    /// Note activity on a channel.
    pub fn record(&mut self, channel: SlotId, at: Instant) {
        self.last_seen.insert(channel, at);
    }

    /// Forget activity on the given channels.
    pub fn clear<'a, I>(&mut self, channels: I)
    where
        I: IntoIterator<Item = &'a SlotId>,
    {
        for channel in channels {
            self.last_seen.remove(channel);
        }
    }

    /// Liveness of a single channel as of `now`.
    pub fn channel_status(&self, channel: &SlotId, now: Instant) -> ChannelStatus {
        match self.last_seen.get(channel) {
            None => ChannelStatus::unknown(),
            Some(last) => {
                let age = now.saturating_duration_since(*last);
                ChannelStatus {
                    online: age <= self.offline_timeout,
                    age_ms: Some(age.as_millis() as u64),
                }
            }
        }
    }

    /// Liveness of the given channels as of `now`.
    pub fn status<'a, I>(&self, channels: I, now: Instant) -> EncoderStatus
    where
        I: IntoIterator<Item = &'a SlotId>,
    {
        EncoderStatus {
            timeout_sec: self.offline_timeout.as_secs_f64(),
            channels: channels
                .into_iter()
                .map(|channel| (channel.clone(), self.channel_status(channel, now)))
                .collect(),
        }
    }
}

/// What subscribers last saw of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotView {
    /// A controller was streaming into the slot.
    pub connected: bool,

    /// The slot's channel was online.
    pub online: bool,
}

/// Decides when a status broadcast is due.
///
/// A broadcast is due when any slot's view changed since the last broadcast,
/// or when `refresh_interval` passed (so consumers see ages advance).
#[derive(Debug)]
pub struct StatusWatch {
    refresh_interval: Duration,
    last: Option<(BTreeMap<SlotId, SlotView>, Instant)>,
}

impl StatusWatch {
    /// A watch which forces a broadcast at least every `refresh_interval`.
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            refresh_interval,
            last: None,
        }
    }

    /// Given the current view, is a broadcast due?
    /// If so, the view is remembered as broadcast.
    pub fn poll(&mut self, view: BTreeMap<SlotId, SlotView>, now: Instant) -> bool {
        let due = match &self.last {
            None => true,
            Some((last_view, last_at)) => {
                *last_view != view
                    || now.saturating_duration_since(*last_at) >= self.refresh_interval
            }
        };

        if due {
            self.last = Some((view, now));
        }

        due
    }
}
