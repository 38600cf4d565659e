use std::collections::BTreeSet;

use tracing::debug;

use crate::transport::Transport;

/// Lists the ports worth probing.
#[derive(Debug, Clone, Default)]
pub struct PortLister {
    exclude: BTreeSet<String>,
}

impl PortLister {
    /// Never list ports with these exact names.
    pub fn new(exclude: BTreeSet<String>) -> Self {
        Self { exclude }
    }

    /// Ports on the host minus the excluded ones, in enumeration order.
    /// If ports cannot be enumerated, nothing is listed.
    pub async fn list_candidates<T: Transport>(&self, transport: &T) -> Vec<String> {
        match transport.available_ports().await {
            Ok(ports) => ports
                .into_iter()
                .filter(|port| !self.exclude.contains(port))
                .collect(),
            Err(e) => {
                debug!(?e, "Could not enumerate serial ports");
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::mock::MockTransport;

    #[tokio::test]
    async fn excluded_ports_are_skipped() {
        let transport = MockTransport::new();
        transport.add_silent("/dev/cu.debug-console");
        transport.add_silent("/dev/cu.usbmodem1101");
        transport.add_silent("/dev/cu.Bluetooth-Incoming-Port");

        let lister = PortLister::new(BTreeSet::from([
            "/dev/cu.debug-console".to_string(),
            "/dev/cu.Bluetooth-Incoming-Port".to_string(),
        ]));

        assert_eq!(
            lister.list_candidates(&transport).await,
            vec!["/dev/cu.usbmodem1101".to_string()]
        );
    }

    #[tokio::test]
    async fn enumeration_failure_lists_nothing() {
        let transport = MockTransport::new();
        transport.add_silent("/dev/ttyACM0");
        transport.fail_enumeration(true);

        assert!(PortLister::default()
            .list_candidates(&transport)
            .await
            .is_empty());
    }
}
