//! The discovery loop: find controllers on free ports and start sessions for them.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::{
    control_center::ControlCenterHandle,
    error::Error,
    prober::Prober,
    router::RoutingMode,
    serial::ports::PortLister,
    session::{Session, SessionSettings},
    transport::Transport,
};

pub(crate) struct Scheduler<T: Transport> {
    transport: Arc<T>,
    lister: PortLister,
    prober: Prober,
    cc_handle: ControlCenterHandle,
    mode: RoutingMode,
    settings: SessionSettings,
    scan_interval: Duration,

    // Device ids with a slot of their own in the slot table.
    pinned: BTreeSet<String>,

    // Running sessions by port.
    sessions: BTreeMap<String, JoinHandle<()>>,
}

impl<T: Transport> Scheduler<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        lister: PortLister,
        prober: Prober,
        cc_handle: ControlCenterHandle,
        mode: RoutingMode,
        settings: SessionSettings,
        scan_interval: Duration,
    ) -> Self {
        Self {
            transport,
            lister,
            prober,
            cc_handle,
            mode,
            settings,
            scan_interval,
            pinned: BTreeSet::new(),
            sessions: BTreeMap::new(),
        }
    }

    /// Controllers with these device ids are assigned before others found in the same pass.
    pub(crate) fn with_pinned(mut self, pinned: BTreeSet<String>) -> Self {
        self.pinned = pinned;
        self
    }

    fn reap(&mut self) {
        self.sessions.retain(|port, session| {
            let done = session.is_finished();
            if done {
                debug!(%port, "Session finished");
            }
            !done
        });
    }

    /// One discovery pass.
    pub(crate) async fn tick(&mut self) {
        self.reap();

        match self.cc_handle.free_slots().await {
            Ok(free) if free.is_empty() => {
                trace!("No free slot, not probing");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(%e, "Could not ask for free slots");
                return;
            }
        }

        let mut found = vec![];
        for port in self.lister.list_candidates(self.transport.as_ref()).await {
            if self.sessions.contains_key(&port) {
                continue;
            }

            if let Some(identity) = self.prober.probe(self.transport.as_ref(), &port).await {
                found.push(identity);
            }
        }

        // Pinned controllers first, so a first free pick cannot take their slot.
        // The sort is stable, enumeration order holds otherwise.
        found.sort_by_key(|identity| !self.pinned.contains(&identity.device_id));

        for identity in found {
            let assignment = match self.cc_handle.assign(identity.clone()).await {
                Ok(assignment) => assignment,
                Err(Error::Rejected(_)) => continue,
                Err(e) => {
                    warn!(%e, "Could not assign controller");
                    return;
                }
            };

            info!(%identity, "Starting session ({assignment})");

            let port = identity.port.clone();
            let session = Session::new(
                identity,
                assignment,
                self.settings.clone(),
                Arc::clone(&self.transport),
                self.cc_handle.clone(),
            );
            self.sessions.insert(port, tokio::spawn(session.run()));

            if self.mode == RoutingMode::Channels {
                return;
            }

            match self.cc_handle.free_slots().await {
                Ok(free) if free.is_empty() => return,
                Ok(_) => {}
                Err(e) => {
                    warn!(%e, "Could not ask for free slots");
                    return;
                }
            }
        }
    }

    /// Run forever.
    pub(crate) async fn run(mut self) {
        let mut scan = tokio::time::interval(self.scan_interval);
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            scan.tick().await;
            self.tick().await;
        }
    }
}
