use crate::config::Settings;
use crate::managers::coordinator::Coordinator;
use crate::managers::transport::{Connector, SshConnector};
use crate::services::logger::Logger;
use std::sync::Arc;

/// Wires the ambient services to a coordinator.
pub struct App {
    pub logger: Logger,
    pub settings: Settings,
    pub coordinator: Arc<Coordinator>,
}

impl App {
    pub fn from_settings(settings: Settings) -> Self {
        let logger = Logger::new("provisioner");
        let connector: Arc<dyn Connector> =
            Arc::new(SshConnector::new(logger.clone()).with_io_timeout_ms(settings.io_timeout_ms));
        Self::with_connector(logger, settings, connector)
    }

    pub fn with_connector(logger: Logger, settings: Settings, connector: Arc<dyn Connector>) -> Self {
        let coordinator = Arc::new(Coordinator::new(connector, logger.clone(), &settings));
        logger.debug(
            "initialized",
            Some(&serde_json::json!({
                "connect_timeout_ms": settings.connect_timeout_ms,
                "command_timeout_ms": settings.command_timeout_ms,
                "io_timeout_ms": settings.io_timeout_ms,
                "max_capture_bytes": settings.max_capture_bytes,
                "transfer_chunk_bytes": settings.transfer_chunk_bytes,
                "connect_attempts": settings.retry.max_attempts,
            })),
        );
        Self {
            logger,
            settings,
            coordinator,
        }
    }
}
