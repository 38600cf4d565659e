//! The Control Center owns all shared state: slot occupancy, channel liveness,
//! the subscribers and the latest machine status.
//!
//! Sessions, the discovery scheduler and websockets never touch that state directly.
//! They ask for things ([`Action`]) or tell the control center what happened ([`Inform`]).

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Debug, Display},
    time::{Duration, Instant},
};

use futures::{channel::mpsc, StreamExt};
use tokio::{sync::oneshot, time::MissedTickBehavior};
use tracing::{debug, debug_span, info, warn};

use crate::{
    config::Config,
    error::Error,
    events::{ControllerStatus, Outbound, SetEvent},
    liveness::{LivenessTracker, SlotView, StatusWatch},
    machine::MachineStatus,
    protocol::ControllerIdentity,
    router::{Assignment, Router, RoutingMode, SlotId},
    subscriber::{Outbox, SubscriberId, Subscribers},
};

/// Actions available to ask of the control center.
#[derive(Debug)]
pub(crate) enum Action {
    /// Give this controller a place, if possible.
    Assign(ControllerIdentity),

    /// Which slots are unoccupied.
    FreeSlots,
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Assign(identity) => write!(f, "assign: {identity}"),
            Action::FreeSlots => write!(f, "free slots"),
        }
    }
}

/// Inform the control center of events.
#[derive(Debug)]
pub(crate) enum Inform {
    /// A websocket wants to receive broadcasts.
    Subscribed {
        id: SubscriberId,
        outbox: Outbox,
    },

    /// A websocket went away.
    Unsubscribed(SubscriberId),

    /// An assigned controller's port is open and streaming.
    SessionStarted {
        identity: ControllerIdentity,
        assignment: Assignment,
    },

    /// A routed control change.
    Set(SetEvent),

    /// The session on this port is over, successfully started or not.
    SessionEnded { port: String },

    /// Fresh description of the host.
    MachineStatus(MachineStatus),
}

pub(crate) struct Request {
    action: Action,
    response: oneshot::Sender<Result<ControlCenterResponse, Error>>,
}

pub(crate) enum ControlCenterMessage {
    Request(Request),
    Inform(Inform),
}

impl Debug for ControlCenterMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlCenterMessage::Request(request) => f
                .debug_struct("ControlCenterMessage")
                .field("action", &request.action)
                .finish(),
            ControlCenterMessage::Inform(i) => f
                .debug_struct("ControlCenterMessage")
                .field("information", &i)
                .finish(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ControlCenterResponse {
    Assigned(Assignment),
    FreeSlots(Vec<SlotId>),
}

#[derive(Debug, Clone)]
pub(crate) struct ControlCenterHandle(mpsc::UnboundedSender<ControlCenterMessage>);

impl ControlCenterHandle {
    pub(crate) fn new(config: &Config) -> Self {
        let (cc_requests_tx, cc_requests_rx) = mpsc::unbounded::<ControlCenterMessage>();

        let control_center = ControlCenter::new(config, cc_requests_rx);

        tokio::spawn(control_center.run());

        ControlCenterHandle(cc_requests_tx)
    }

    pub(crate) fn inform(&self, information: Inform) {
        if let Err(e) = self.0.unbounded_send(ControlCenterMessage::Inform(information)) {
            warn!(message = ?e.into_inner(), "Control center is gone");
        }
    }

    pub(crate) async fn perform_action(
        &self,
        action: Action,
    ) -> Result<ControlCenterResponse, Error> {
        let (tx, rx) = oneshot::channel();

        self.0
            .unbounded_send(ControlCenterMessage::Request(Request {
                action,
                response: tx,
            }))
            .map_err(|_| Error::InternalIssue("Control center is gone".into()))?;

        rx.await
            .map_err(|_| Error::InternalIssue("Control center dropped the request".into()))?
    }

    pub(crate) async fn assign(&self, identity: ControllerIdentity) -> Result<Assignment, Error> {
        match self.perform_action(Action::Assign(identity)).await? {
            ControlCenterResponse::Assigned(assignment) => Ok(assignment),
            other => Err(Error::InternalIssue(format!(
                "Unexpected response to assign: {other:?}"
            ))),
        }
    }

    pub(crate) async fn free_slots(&self) -> Result<Vec<SlotId>, Error> {
        match self.perform_action(Action::FreeSlots).await? {
            ControlCenterResponse::FreeSlots(slots) => Ok(slots),
            other => Err(Error::InternalIssue(format!(
                "Unexpected response to free slots: {other:?}"
            ))),
        }
    }
}

pub(crate) struct ControlCenter {
    messages: mpsc::UnboundedReceiver<ControlCenterMessage>,

    router: Router,
    liveness: LivenessTracker,
    liveness_key: String,
    watch: StatusWatch,

    subscribers: Subscribers,

    // Ports with an open, streaming session.
    streaming: BTreeSet<String>,

    machine_status: MachineStatus,
    version: String,

    // Encoder fixture per channel, per controller device id.
    topology: BTreeMap<String, BTreeMap<SlotId, String>>,

    poll_interval: Duration,
    heartbeat_interval: Duration,
}

impl ControlCenter {
    pub(crate) fn new(
        config: &Config,
        messages: mpsc::UnboundedReceiver<ControlCenterMessage>,
    ) -> Self {
        Self {
            messages,
            router: Router::new(
                config.engines.routing,
                config.engines.slots.clone(),
                config.engines.slot_table.clone(),
            ),
            liveness: LivenessTracker::new(config.liveness.offline_timeout),
            liveness_key: config.liveness.key.clone(),
            watch: StatusWatch::new(config.liveness.refresh_interval),
            subscribers: Subscribers::default(),
            streaming: BTreeSet::new(),
            machine_status: MachineStatus::default(),
            version: crate::version::server_version(),
            topology: config.topology.clone(),
            poll_interval: config.liveness.poll_interval,
            heartbeat_interval: config.status.heartbeat_interval,
        }
    }

    /// The streaming controller in the given slot, if any.
    fn streaming_occupant(&self, slot: &SlotId) -> Option<&ControllerIdentity> {
        self.router
            .occupant(slot)
            .filter(|occupant| self.streaming.contains(&occupant.port))
    }

    /// Controller status as subscribers should see it right now.
    fn statuses(&self, now: Instant) -> Vec<ControllerStatus> {
        let slots = self.router.slots();

        let blank = |engine: Option<SlotId>, channels: &[SlotId]| ControllerStatus {
            engine,
            connected: false,
            engines: slots.to_vec(),
            encoders: self.liveness.status(channels, now),
            port: None,
            device_id: None,
            fw: None,
            encoder_names: None,
        };

        match self.router.mode() {
            RoutingMode::Channels => {
                let status = blank(None, slots);

                let occupant = slots.first().and_then(|slot| self.streaming_occupant(slot));

                let status = match occupant {
                    Some(identity) => ControllerStatus {
                        encoder_names: self.topology.get(&identity.device_id).cloned(),
                        ..status.with_controller(identity)
                    },
                    None => status,
                };

                vec![status]
            }
            RoutingMode::Controllers => slots
                .iter()
                .map(|slot| {
                    let status = blank(Some(slot.clone()), std::slice::from_ref(slot));

                    match self.streaming_occupant(slot) {
                        Some(identity) => status.with_controller(identity),
                        None => status,
                    }
                })
                .collect(),
        }
    }

    fn view(&self, statuses: &[ControllerStatus]) -> BTreeMap<SlotId, SlotView> {
        let slots = self.router.slots();

        match self.router.mode() {
            RoutingMode::Channels => statuses
                .iter()
                .flat_map(|status| {
                    slots.iter().map(|slot| {
                        (
                            slot.clone(),
                            SlotView {
                                connected: status.connected,
                                online: status.is_online(slot),
                            },
                        )
                    })
                })
                .collect(),
            RoutingMode::Controllers => statuses
                .iter()
                .filter_map(|status| {
                    let slot = status.engine.clone()?;
                    let online = status.is_online(&slot);
                    Some((
                        slot,
                        SlotView {
                            connected: status.connected,
                            online,
                        },
                    ))
                })
                .collect(),
        }
    }

    /// Broadcast controller status if something changed, the refresh is due, or `force`.
    fn publish_status(&mut self, force: bool) {
        let now = Instant::now();
        let statuses = self.statuses(now);
        let view = self.view(&statuses);

        let due = self.watch.poll(view, now);

        if due || force {
            for status in statuses {
                self.subscribers
                    .broadcast(&Outbound::ControllerStatus(status));
            }
        }
    }

    fn handle_request(&mut self, request: Request) {
        let Request { action, response } = request;
        let _span = debug_span!("Request", %action).entered();

        let reply = match action {
            Action::Assign(identity) => match self.router.assign(&identity) {
                Ok(assignment) => Ok(ControlCenterResponse::Assigned(assignment)),
                Err(rejection) => {
                    info!(%identity, %rejection, "Not attaching controller");
                    Err(Error::Rejected(rejection))
                }
            },
            Action::FreeSlots => Ok(ControlCenterResponse::FreeSlots(self.router.free_slots())),
        };

        if response.send(reply).is_err() {
            debug!("Requester went away before the response");
        }
    }

    fn welcome(&mut self, id: SubscriberId, outbox: Outbox) {
        let _span = debug_span!("Subscriber", %id).entered();

        let mut welcome = vec![
            Outbound::ServerVersion {
                version: self.version.clone(),
            },
            Outbound::MachineStatus(self.machine_status.clone()),
        ];
        welcome.extend(
            self.statuses(Instant::now())
                .into_iter()
                .map(Outbound::ControllerStatus),
        );

        for message in &welcome {
            if !Subscribers::send(&outbox, message) {
                debug!("Left before the welcome was sent");
                return;
            }
        }

        self.subscribers.insert(id, outbox);
        info!(subscribers = self.subscribers.len(), "Subscriber added");
    }

    fn handle_information(&mut self, information: Inform) {
        match information {
            Inform::Subscribed { id, outbox } => self.welcome(id, outbox),
            Inform::Unsubscribed(id) => self.subscribers.remove(&id),
            Inform::SessionStarted {
                identity,
                assignment,
            } => {
                let _span = debug_span!("Session started", %identity).entered();

                // A restarted session must not inherit stale liveness.
                self.liveness.clear(&assignment.slots());
                self.streaming.insert(identity.port);
                self.publish_status(true);
            }
            Inform::Set(event) => {
                if event.key == self.liveness_key {
                    self.liveness.record(event.engine.clone(), Instant::now());
                }
                self.subscribers.broadcast(&Outbound::Set(event));
            }
            Inform::SessionEnded { port } => {
                let _span = debug_span!("Session ended", %port).entered();

                let released = self.router.release(&port);
                self.liveness.clear(&released);
                let was_streaming = self.streaming.remove(&port);

                if was_streaming || !released.is_empty() {
                    info!(?released, "Controller detached");
                    self.publish_status(true);
                }
            }
            Inform::MachineStatus(status) => {
                if status != self.machine_status {
                    debug!(?status, "Machine status changed");
                    self.machine_status = status;
                    self.subscribers
                        .broadcast(&Outbound::MachineStatus(self.machine_status.clone()));
                }
            }
        }
    }

    fn heartbeat(&self) {
        let attached = self
            .router
            .slots()
            .iter()
            .map(|slot| match self.streaming_occupant(slot) {
                Some(identity) => format!("{slot}: {identity}"),
                None => format!("{slot}: -"),
            })
            .collect::<Vec<_>>();

        info!(
            subscribers = self.subscribers.len(),
            "Heartbeat. Controllers: {}",
            attached.join(", ")
        );
    }

    pub(crate) async fn run(mut self) {
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = self.messages.next() => match message {
                    Some(ControlCenterMessage::Request(request)) => self.handle_request(request),
                    Some(ControlCenterMessage::Inform(information)) => self.handle_information(information),
                    None => {
                        debug!("All handles dropped, control center stopping");
                        return;
                    }
                },
                _ = poll.tick() => self.publish_status(false),
                _ = heartbeat.tick() => self.heartbeat(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map, Value};
    use tokio::sync::mpsc as tokio_mpsc;

    use super::*;
    use crate::{protocol::SetValue, router::Rejection};

    fn identity(port: &str, device_id: &str) -> ControllerIdentity {
        ControllerIdentity {
            port: port.into(),
            device_type: "bauklank-controller".into(),
            device_id: device_id.into(),
            fw: "1.0.0".into(),
        }
    }

    fn config(routing: RoutingMode) -> Config {
        let mut config = Config::default();
        config.engines.routing = routing;
        config.engines.slot_table.insert("ctl-a".into(), "A".into());
        config.liveness.poll_interval = Duration::from_millis(50);
        config
    }

    fn subscribe(cc: &ControlCenterHandle) -> tokio_mpsc::UnboundedReceiver<String> {
        let (outbox, inbox) = tokio_mpsc::unbounded_channel();
        cc.inform(Inform::Subscribed {
            id: SubscriberId::new(),
            outbox,
        });
        inbox
    }

    async fn next(inbox: &mut tokio_mpsc::UnboundedReceiver<String>) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&text).unwrap()
    }

    async fn next_of_type(inbox: &mut tokio_mpsc::UnboundedReceiver<String>, kind: &str) -> Value {
        loop {
            let message = next(inbox).await;
            if message["type"] == kind {
                return message;
            }
        }
    }

    #[tokio::test]
    async fn welcome_messages() {
        let cc = ControlCenterHandle::new(&config(RoutingMode::Controllers));
        let mut inbox = subscribe(&cc);

        assert_eq!(next(&mut inbox).await["type"], "serverVersion");
        assert_eq!(next(&mut inbox).await["type"], "machineStatus");

        let a = next(&mut inbox).await;
        let b = next(&mut inbox).await;
        assert_eq!(a["engine"], "A");
        assert_eq!(a["connected"], false);
        assert_eq!(b["engine"], "B");
    }

    #[tokio::test]
    async fn assign_and_reject() {
        let cc = ControlCenterHandle::new(&config(RoutingMode::Controllers));

        assert_eq!(
            cc.assign(identity("/dev/ttyACM1", "ctl-x")).await.unwrap(),
            Assignment::Slot("A".into())
        );

        let rejection = cc
            .assign(identity("/dev/ttyACM0", "ctl-a"))
            .await
            .unwrap_err()
            .try_into_rejected()
            .unwrap();
        assert_eq!(
            rejection,
            Rejection::SlotTaken {
                slot: "A".into(),
                holder: "ctl-x".into()
            }
        );

        assert_eq!(cc.free_slots().await.unwrap(), vec![SlotId::new("B")]);
    }

    #[tokio::test]
    async fn session_lifecycle_is_broadcast() {
        let cc = ControlCenterHandle::new(&config(RoutingMode::Controllers));
        let mut inbox = subscribe(&cc);

        let ctl = identity("/dev/ttyACM0", "ctl-a");
        let assignment = cc.assign(ctl.clone()).await.unwrap();
        cc.inform(Inform::SessionStarted {
            identity: ctl,
            assignment,
        });

        let status = loop {
            let status = next_of_type(&mut inbox, "controllerStatus").await;
            if status["engine"] == "A" && status["connected"] == true {
                break status;
            }
        };
        assert_eq!(status["deviceId"], "ctl-a");
        assert_eq!(status["port"], "/dev/ttyACM0");

        cc.inform(Inform::Set(SetEvent {
            channel: "A".into(),
            key: "rate".into(),
            value: Some(SetValue::Float(1.0)),
            engine: "A".into(),
            extra: Map::new(),
        }));
        assert_eq!(
            next_of_type(&mut inbox, "set").await,
            json!({"type": "set", "channel": "A", "key": "rate", "value": 1.0, "engine": "A"})
        );

        let online = loop {
            let status = next_of_type(&mut inbox, "controllerStatus").await;
            if status["engine"] == "A" && status["encoders"]["channels"]["A"]["online"] == true {
                break status;
            }
        };
        assert_eq!(online["connected"], true);

        cc.inform(Inform::SessionEnded {
            port: "/dev/ttyACM0".into(),
        });

        let status = loop {
            let status = next_of_type(&mut inbox, "controllerStatus").await;
            if status["engine"] == "A" && status["connected"] == false {
                break status;
            }
        };
        assert_eq!(status["encoders"]["channels"]["A"]["ageMs"], Value::Null);
        assert_eq!(
            cc.free_slots().await.unwrap(),
            vec![SlotId::new("A"), SlotId::new("B")]
        );
    }

    #[tokio::test]
    async fn channels_mode_has_one_status_with_encoder_names() {
        let mut config = config(RoutingMode::Channels);
        config.topology.insert(
            "ctl-a".into(),
            BTreeMap::from([
                (SlotId::new("A"), "encoder-1".to_owned()),
                (SlotId::new("B"), "encoder-2".to_owned()),
            ]),
        );
        let cc = ControlCenterHandle::new(&config);
        let mut inbox = subscribe(&cc);

        let ctl = identity("/dev/ttyACM0", "ctl-a");
        let assignment = cc.assign(ctl.clone()).await.unwrap();
        assert_eq!(assignment, Assignment::Channels(vec!["A".into(), "B".into()]));
        cc.inform(Inform::SessionStarted {
            identity: ctl,
            assignment,
        });

        let status = loop {
            let status = next_of_type(&mut inbox, "controllerStatus").await;
            if status["connected"] == true {
                break status;
            }
        };

        assert!(status.get("engine").is_none());
        assert_eq!(status["engines"], json!(["A", "B"]));
        assert_eq!(status["encoderNames"], json!({"A": "encoder-1", "B": "encoder-2"}));
        assert!(cc.free_slots().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn machine_status_only_broadcast_on_change() {
        let cc = ControlCenterHandle::new(&config(RoutingMode::Controllers));
        let mut inbox = subscribe(&cc);
        next_of_type(&mut inbox, "machineStatus").await;

        let status = MachineStatus {
            hostname: "stage-pi".into(),
            ..Default::default()
        };
        cc.inform(Inform::MachineStatus(status.clone()));
        cc.inform(Inform::MachineStatus(status));

        // Sets are never dropped, so use one as a marker.
        cc.inform(Inform::Set(SetEvent {
            channel: "A".into(),
            key: "volume".into(),
            value: Some(SetValue::Integer(1)),
            engine: "A".into(),
            extra: Map::new(),
        }));

        let mut machine_statuses = 0;
        loop {
            let message = next(&mut inbox).await;
            match message["type"].as_str() {
                Some("machineStatus") => {
                    assert_eq!(message["hostname"], "stage-pi");
                    machine_statuses += 1;
                }
                Some("set") => break,
                _ => {}
            }
        }
        assert_eq!(machine_statuses, 1);
    }
}
