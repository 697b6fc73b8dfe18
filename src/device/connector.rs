use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;

use super::fallback_transport::FallbackTransport;
use super::protocol_transport::ProtocolTransport;
use super::transport::{Connector, Transport};
use super::types::ModeUsed;
use crate::configuration::DeviceConfig;
use crate::error_handling::types::DeviceError;

/// Opens real network transports to the configured device address.
pub struct NetworkConnector {
    address: String,
    protocol_port: u16,
    http_port: u16,
    client: Client,
}

impl NetworkConnector {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            address: config.address.clone(),
            protocol_port: config.protocol_port,
            http_port: config.http_port,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Connector for NetworkConnector {
    async fn connect(
        &self,
        mode: ModeUsed,
        timeout: Duration,
    ) -> Result<Box<dyn Transport>, DeviceError> {
        let attempt = async {
            let transport: Box<dyn Transport> = match mode {
                ModeUsed::Protocol => Box::new(
                    ProtocolTransport::connect(&self.address, self.protocol_port).await?,
                ),
                ModeUsed::Fallback => {
                    let mut transport =
                        FallbackTransport::new(self.client.clone(), &self.address, self.http_port);
                    // stateless, so reachability is only known after a request
                    transport.get_status().await?;
                    debug!("Fallback endpoint {} answered", transport.base_url());
                    Box::new(transport)
                }
            };
            Ok::<_, DeviceError>(transport)
        };
        tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| DeviceError::Timeout {
                operation: "connect",
                after: timeout,
            })?
    }
}
