use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use log::info;
use tokio_util::sync::CancellationToken;
use warp::{Filter, Rejection, Reply};

use super::routes::{
    dashboard_route, history_route, history_stats_route, list_sessions_route, status_route,
};
use crate::configuration::WebConfig;
use crate::device::StatusCache;
use crate::error_handling::types::WebError;
use crate::storage::SessionStore;

/// Read-only HTTP status surface
pub struct WebServer {
    store: Arc<dyn SessionStore>,
    status: StatusCache,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(
        config: &WebConfig,
        store: Arc<dyn SessionStore>,
        status: StatusCache,
    ) -> Result<Self, WebError> {
        let ip: IpAddr = config
            .bind_address
            .parse()
            .map_err(|_| WebError::BadAddress(config.bind_address.clone()))?;
        Ok(Self {
            store,
            status,
            addr: SocketAddr::new(ip, config.port),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn routes(&self) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
        // stats before the plain history route, both start with /history
        dashboard_route()
            .or(status_route(self.store.clone(), self.status.clone()))
            .or(list_sessions_route(self.store.clone()))
            .or(history_stats_route(self.store.clone()))
            .or(history_route(self.store.clone()))
    }

    /// Serves until `shutdown` fires.
    pub async fn start(self, shutdown: CancellationToken) -> Result<(), WebError> {
        info!("Status surface listening on http://{}", self.addr);
        let server = warp::serve(self.routes()).run(self.addr);
        tokio::select! {
            _ = server => {}
            _ = shutdown.cancelled() => info!("Status surface stopped"),
        }
        Ok(())
    }
}
