use std::sync::Arc;

use tokio::sync::watch;

use super::types::DeviceStatus;

/// Read side of the last-value status channel.
///
/// Cloning is cheap; every clone sees the same latest snapshot. Readers never
/// block the controller and never observe a half-written status.
#[derive(Debug, Clone)]
pub struct StatusCache {
    rx: watch::Receiver<Arc<DeviceStatus>>,
}

impl StatusCache {
    pub fn latest(&self) -> Arc<DeviceStatus> {
        self.rx.borrow().clone()
    }

    /// Waits for the next publication. `None` once the controller is gone.
    pub async fn changed(&mut self) -> Option<Arc<DeviceStatus>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Write side, owned by the device controller.
#[derive(Debug)]
pub(crate) struct StatusPublisher {
    tx: watch::Sender<Arc<DeviceStatus>>,
}

impl StatusPublisher {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(DeviceStatus::default()));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> StatusCache {
        StatusCache {
            rx: self.tx.subscribe(),
        }
    }

    /// Replaces the snapshot whether or not anyone is listening.
    pub(crate) fn publish(&self, status: DeviceStatus) {
        self.tx.send_replace(Arc::new(status));
    }
}
