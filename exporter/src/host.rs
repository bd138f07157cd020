use std::net::{Ipv4Addr, TcpStream};

use anyhow::Context;
use tracing::{info, warn};

use dht_exporter_common::{
    bind_listener, Credentials, CredentialsSource, Dht11, Exporter, ExporterConfig,
    FileCredentials, NetworkLink, RawMeasurement, SensorError, StatusIndicator, WifiStation,
};

const SECRETS_PATH: &str = "secrets.json";
// Port 80 needs root on a workstation.
const HOST_LISTEN_PORT: u16 = 8080;

struct SimulatedStation {
    associated: bool,
}

impl WifiStation for SimulatedStation {
    fn connect(&mut self, credentials: &Credentials) -> Result<(), String> {
        info!("simulated wifi joining `{}`", credentials.network_name());
        self.associated = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.associated
    }

    fn local_address(&self) -> Option<Ipv4Addr> {
        self.associated.then_some(Ipv4Addr::LOCALHOST)
    }

    fn mac_address(&self) -> Option<[u8; 6]> {
        Some([0x02, 0x00, 0x00, 0xd4, 0x71, 0x11])
    }
}

struct LogIndicator;

impl StatusIndicator for LogIndicator {
    fn set(&mut self, on: bool) {
        info!("status led {}", if on { "on" } else { "off" });
    }
}

struct SimulatedDht11 {
    tick: u64,
}

impl Dht11 for SimulatedDht11 {
    fn measure(&mut self) -> Result<RawMeasurement, SensorError> {
        self.tick = self.tick.saturating_add(1);

        // Every tenth read fails the way a loose data line does.
        if self.tick % 10 == 0 {
            return Err(SensorError::ChecksumMismatch);
        }

        Ok(RawMeasurement {
            temperature: 41.0 + (self.tick % 8) as f32,
            humidity: 52.0 + (self.tick % 6) as f32,
        })
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let credentials = FileCredentials::new(SECRETS_PATH)
        .load()
        .context("wifi credentials are kept in secrets.json, please add them there")?;

    let config = ExporterConfig {
        listen_port: HOST_LISTEN_PORT,
        ..ExporterConfig::default()
    };

    let mut link = NetworkLink::new(
        SimulatedStation { associated: false },
        LogIndicator,
        config.link.clone(),
    );
    if let Some(mac) = link.mac_address() {
        info!("MAC address: {mac}");
    }
    link.ensure_connected(&credentials)
        .context("simulated wifi failed to come up")?;

    let listener = bind_listener(config.listen_port)
        .with_context(|| format!("failed to bind port {}", config.listen_port))?;
    info!("listening on 0.0.0.0:{}", config.listen_port);

    let mut exporter = Exporter::new(
        &config,
        credentials,
        link,
        SimulatedDht11 { tick: 0 },
        listener,
    );
    let shutdown = exporter.shutdown_token();

    let server = tokio::task::spawn_blocking(move || exporter.run());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");
    shutdown.trigger();

    // The loop is parked in accept(); a throwaway connection wakes it.
    if let Err(err) = TcpStream::connect((Ipv4Addr::LOCALHOST, config.listen_port)) {
        warn!("failed to wake metrics loop: {err}");
    }

    server.await.context("metrics loop panicked")?;
    Ok(())
}
