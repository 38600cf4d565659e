//! A controller session: owns one open serial port once the controller is identified
//! and assigned, and turns its lines into routed events.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures::StreamExt;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{
    config::SerialLogMode,
    control_center::{ControlCenterHandle, Inform},
    events::SetEvent,
    protocol::{json_object, ControllerIdentity, RawSet},
    router::{Assignment, SlotId},
    serial::codecs::lines::LinesCodec,
    transport::Transport,
};

mod digest;

use digest::Digest;

/// Session tunables which do not change per controller.
#[derive(Debug, Clone)]
pub(crate) struct SessionSettings {
    pub(crate) baud: u32,
    pub(crate) log: SerialLogMode,
    pub(crate) digest_window: Duration,
    pub(crate) digest_max_keys: usize,
    pub(crate) active_slots: Vec<SlotId>,
}

/// Turns `set` messages into events attributed to an engine slot.
#[derive(Debug, Clone)]
pub(crate) struct Routing {
    assignment: Assignment,
    active_slots: Vec<SlotId>,
}

impl Routing {
    pub(crate) fn new(assignment: Assignment, active_slots: Vec<SlotId>) -> Self {
        Self {
            assignment,
            active_slots,
        }
    }

    fn is_active(&self, channel: &str) -> bool {
        self.active_slots.iter().any(|slot| slot.as_str() == channel)
    }

    /// `None` if the message can't be attributed to a slot.
    pub(crate) fn route(&self, set: RawSet) -> Option<SetEvent> {
        let (channel, engine) = match (&self.assignment, set.channel) {
            (Assignment::Channels(_), None) => {
                trace!("Dropping set without channel");
                return None;
            }
            (Assignment::Channels(_), Some(channel)) => {
                if !self.is_active(&channel) {
                    trace!(%channel, "Dropping set on unknown channel");
                    return None;
                }
                let engine = SlotId::new(&channel);
                (channel, engine)
            }
            (Assignment::Slot(slot), None) => (slot.to_string(), slot.clone()),
            (Assignment::Slot(slot), Some(channel)) => {
                if !self.is_active(&channel) {
                    trace!(%channel, "Dropping set on unknown channel");
                    return None;
                }
                (channel, slot.clone())
            }
        };

        Some(SetEvent {
            channel,
            key: set.key,
            value: set.value,
            engine,
            extra: set.extra,
        })
    }
}

/// Parses lines, keeping count of what passed by.
#[derive(Debug)]
pub(crate) struct LineProcessor {
    routing: Routing,
    log: SerialLogMode,
    digest: Digest,
}

impl LineProcessor {
    pub(crate) fn new(routing: Routing, settings: &SessionSettings, now: Instant) -> Self {
        Self {
            routing,
            log: settings.log,
            digest: Digest::new(settings.digest_window, settings.digest_max_keys, now),
        }
    }

    pub(crate) fn process(&mut self, line: &str) -> Option<SetEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        self.digest.line();
        if self.log == SerialLogMode::Full {
            debug!(%line, "SERIAL");
        }

        let object = json_object(line)?;
        self.digest.json();

        let set = RawSet::from_object(object)?;
        self.digest.set();

        let event = self.routing.route(set)?;
        self.digest.key(&event.key, event.value.as_ref());

        Some(event)
    }

    /// Log the digest if the window elapsed, or regardless if `force`.
    pub(crate) fn flush_digest(&mut self, now: Instant, force: bool) {
        if self.log != SerialLogMode::Digest {
            return;
        }

        if force || self.digest.is_due(now) {
            if let Some(summary) = self.digest.take(now) {
                debug!("SERIAL {summary}");
            }
        }
    }
}

/// One controller's streaming session.
pub(crate) struct Session<T: Transport> {
    identity: ControllerIdentity,
    assignment: Assignment,
    settings: SessionSettings,
    transport: Arc<T>,
    cc_handle: ControlCenterHandle,
}

impl<T: Transport> Session<T> {
    pub(crate) fn new(
        identity: ControllerIdentity,
        assignment: Assignment,
        settings: SessionSettings,
        transport: Arc<T>,
        cc_handle: ControlCenterHandle,
    ) -> Self {
        Self {
            identity,
            assignment,
            settings,
            transport,
            cc_handle,
        }
    }

    /// Open, stream until the port fails or closes, then report the end.
    pub(crate) async fn run(self) {
        let span = info_span!("tty", port = %self.identity.port);

        async move {
            let port = self.identity.port.clone();

            match self.transport.open(&port, self.settings.baud).await {
                Ok(stream) => {
                    info!(device_id = %self.identity.device_id, "Controller connected ({})", self.assignment);
                    self.cc_handle.inform(Inform::SessionStarted {
                        identity: self.identity.clone(),
                        assignment: self.assignment.clone(),
                    });

                    self.stream(stream).await;
                }
                Err(e) => {
                    warn!(%e, "Could not open controller port");
                }
            }

            self.cc_handle.inform(Inform::SessionEnded { port });
        }
        .instrument(span)
        .await
    }

    async fn stream(&self, stream: T::Port) {
        let routing = Routing::new(self.assignment.clone(), self.settings.active_slots.clone());
        let mut processor = LineProcessor::new(routing, &self.settings, Instant::now());

        let mut lines = FramedRead::new(stream, LinesCodec::default().into_string_codec(true));

        let mut digest_tick = tokio::time::interval(self.settings.digest_window);
        digest_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                line = lines.next() => match line {
                    Some(Ok(line)) => {
                        if let Some(event) = processor.process(&line) {
                            self.cc_handle.inform(Inform::Set(event));
                        }
                    }
                    Some(Err(e)) => {
                        warn!(%e, "Controller disconnected / read error");
                        break;
                    }
                    None => {
                        warn!("Controller disconnected");
                        break;
                    }
                },
                _ = digest_tick.tick() => processor.flush_digest(Instant::now(), false),
            }
        }

        processor.flush_digest(Instant::now(), true);
    }
}
