pub mod config;
pub mod error;
pub mod http;
pub mod link;
pub mod metrics;
pub mod sensor;
pub mod server;

pub use config::{Credentials, CredentialsSource, ExporterConfig, FileCredentials, LinkPolicy};
pub use error::{ConfigError, LinkError, SensorError, TransportError};
pub use http::{bind_listener, ClientConnection, HttpResponder};
pub use link::{format_mac, ConnectionState, LinkInfo, NetworkLink, StatusIndicator, WifiStation};
pub use metrics::{render, render_for_site};
pub use sensor::{Dht11, RawMeasurement, Reading, SensorReader};
pub use server::{Exporter, Iteration, ServiceOutcome, ShutdownToken};
