use std::future::Future;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::configuration::Config;
use crate::device::DeviceController;
use crate::error_handling::types::*;
use crate::scheduler::{Scheduler, ShutdownOutcome};
use crate::storage::{FileSessionStore, SessionStore};
use crate::web_interface::WebServer;

/// Top-level wiring: store, device, scheduler and the optional status surface.
pub struct Controller {
    pub config: Config,
    store: Arc<dyn SessionStore>,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Opening session store at {}", config.storage.root.display());
        let store = FileSessionStore::new(&config.storage.root).map_err(|e| {
            error!("Unable to open the session store: {}", e);
            ControllerError::StoreError(e)
        })?;
        Ok(Self {
            config,
            store: Arc::new(store),
        })
    }

    pub fn store(&self) -> Arc<dyn SessionStore> {
        self.store.clone()
    }

    /// Moves finished sessions older than `[storage].archive_after_days` out
    /// of the buckets. Failures are logged, never fatal.
    fn archive_old_sessions(&self) {
        let Some(days) = self.config.storage.archive_after_days else {
            return;
        };
        let Some(cutoff) = i64::try_from(days)
            .ok()
            .and_then(ChronoDuration::try_days)
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            warn!("archive_after_days = {} is out of range, not archiving", days);
            return;
        };
        match self.store.archive_finished(cutoff) {
            Ok(0) => {}
            Ok(count) => info!("Archived {} session(s) older than {} days", count, days),
            Err(e) => warn!("Archiving old sessions failed: {}", e),
        }
    }

    /// Runs until Ctrl-C.
    pub async fn run(self) -> Result<(), ControllerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Unable to listen for the shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await
    }

    /// Runs until `stop` resolves, then drains the scheduler.
    pub async fn run_until<F>(self, stop: F) -> Result<(), ControllerError>
    where
        F: Future<Output = ()>,
    {
        self.archive_old_sessions();

        let device = DeviceController::new(self.config.device.clone());
        let status = device.status_cache();
        let connect_timeout = device.config().connect_timeout();

        let web_shutdown = CancellationToken::new();
        let web_task = if self.config.web.enabled {
            let server = WebServer::new(&self.config.web, self.store.clone(), status)?;
            info!("Starting status surface on {}", server.addr());
            Some(tokio::spawn(server.start(web_shutdown.clone())))
        } else {
            None
        };

        let scheduler = Scheduler::new(
            self.store.clone(),
            Box::new(device),
            self.config.scheduler.clone(),
            connect_timeout,
        );
        let handle = scheduler.spawn();

        stop.await;

        let outcome = handle.shutdown().await;
        web_shutdown.cancel();
        if let Some(task) = web_task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Status surface ended with an error: {}", e),
                Err(e) => warn!("Status surface task failed: {}", e),
            }
        }

        match outcome? {
            ShutdownOutcome::Drained => info!("Scheduler drained cleanly"),
            ShutdownOutcome::Interrupted(Some(id)) => {
                warn!("[{}] Interrupted by the shutdown deadline", id)
            }
            ShutdownOutcome::Interrupted(None) => {
                warn!("Shutdown deadline elapsed with no session in flight")
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::LifecycleState;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn new_creates_store_layout() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.root = dir.path().join("Sessions");

        let controller = Controller::new(config).unwrap();
        for bucket in LifecycleState::ALL {
            assert!(dir.path().join("Sessions").join(bucket.dir_name()).is_dir());
        }
        assert!(controller.store().list(LifecycleState::ToDo).unwrap().is_empty());
    }

    #[tokio::test]
    async fn runs_and_stops_with_nothing_queued() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.root = dir.path().to_path_buf();
        config.scheduler.poll_interval_secs = 1;

        let controller = Controller::new(config).unwrap();
        controller
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn bad_web_address_fails_startup() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.root = dir.path().to_path_buf();
        config.web.enabled = true;
        config.web.bind_address = "localhost:80".into();

        let controller = Controller::new(config).unwrap();
        let result = controller.run_until(async {}).await;
        assert!(matches!(
            result,
            Err(ControllerError::WebError(WebError::BadAddress(_)))
        ));
    }

    #[tokio::test]
    async fn startup_archives_old_finished_sessions() {
        use crate::session_management::{CaptureSettings, Coordinates, Session};

        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.root = dir.path().to_path_buf();
        config.storage.archive_after_days = Some(30);

        let controller = Controller::new(config).unwrap();
        let store = controller.store();
        let old = Session::new(
            "Rosette",
            Utc::now() - ChronoDuration::days(90),
            Coordinates { ra: 98.0, dec: 4.9 },
            CaptureSettings {
                frame_count: 3,
                exposure_secs: 5.0,
                gain: 0,
                binning: 1,
            },
        );
        store.create(&old).unwrap();
        store.schedule(old.id).unwrap();
        store
            .move_session(old.id, LifecycleState::ToDo, LifecycleState::Running)
            .unwrap();
        store
            .move_session(old.id, LifecycleState::Running, LifecycleState::Done)
            .unwrap();

        controller.run_until(async {}).await.unwrap();
        assert_eq!(store.locate(old.id).unwrap(), None);
        assert!(dir.path().join("Archived").join("Done").is_dir());
    }
}
