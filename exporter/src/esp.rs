use std::net::Ipv4Addr;

use anyhow::{anyhow, Context};
use dht_sensor::{dht11, DhtError};
use embedded_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};
use esp_idf_hal::{
    delay::Ets,
    gpio::{AnyIOPin, AnyOutputPin, IOPin, InputOutput, Output, OutputPin, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::EspWifi,
};
use log::{info, warn};

use dht_exporter_common::{
    bind_listener, config::DHT11_PIN, ConfigError, Credentials, CredentialsSource, Dht11,
    Exporter, ExporterConfig, NetworkLink, RawMeasurement, SensorError, StatusIndicator,
    WifiStation,
};

const NVS_NAMESPACE: &str = "dht-exporter";
const NVS_CREDENTIALS_KEY: &str = "credentials";
const STATUS_LED_PIN: i32 = 2;

struct NvsCredentials {
    partition: EspDefaultNvsPartition,
}

impl CredentialsSource for NvsCredentials {
    fn load(&self) -> Result<Credentials, ConfigError> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)
            .map_err(|err| ConfigError::Invalid(format!("failed to open NVS: {err:?}")))?;
        let mut buffer = vec![0_u8; 256];

        match nvs.get_str(NVS_CREDENTIALS_KEY, &mut buffer) {
            Ok(Some(raw)) => return Credentials::from_json(raw),
            Ok(None) => info!("no credentials in NVS; using build-time WIFI_SSID/WIFI_PASS"),
            Err(err) => warn!("failed to read credentials from NVS: {err:?}"),
        }

        Credentials::new(
            option_env!("WIFI_SSID").unwrap_or_default(),
            option_env!("WIFI_PASS").unwrap_or_default(),
        )
    }
}

struct EspStation {
    wifi: EspWifi<'static>,
}

impl WifiStation for EspStation {
    fn connect(&mut self, credentials: &Credentials) -> Result<(), String> {
        let auth_method = if credentials.secret().is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        let configuration = Configuration::Client(ClientConfiguration {
            ssid: credentials
                .network_name()
                .try_into()
                .map_err(|_| "wifi ssid too long".to_string())?,
            password: credentials
                .secret()
                .try_into()
                .map_err(|_| "wifi password too long".to_string())?,
            auth_method,
            ..Default::default()
        });

        if self.wifi.is_started().unwrap_or(false) {
            let _ = self.wifi.disconnect();
        }
        self.wifi
            .set_configuration(&configuration)
            .map_err(|err| format!("{err:?}"))?;
        if !self.wifi.is_started().unwrap_or(false) {
            self.wifi.start().map_err(|err| format!("{err:?}"))?;
            disable_wifi_power_save();
        }
        self.wifi.connect().map_err(|err| format!("{err:?}"))
    }

    fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && self.wifi.sta_netif().is_up().unwrap_or(false)
    }

    fn local_address(&self) -> Option<Ipv4Addr> {
        self.wifi.sta_netif().get_ip_info().ok().map(|info| info.ip)
    }

    fn mac_address(&self) -> Option<[u8; 6]> {
        self.wifi.sta_netif().get_mac().ok()
    }
}

struct Led {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

impl StatusIndicator for Led {
    fn set(&mut self, on: bool) {
        let result = if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        if let Err(err) = result {
            warn!("failed to drive status LED on GPIO{STATUS_LED_PIN}: {err:?}");
        }
    }
}

struct EspDht11 {
    pin: PinDriver<'static, AnyIOPin, InputOutput>,
    delay: Ets,
}

impl EspDht11 {
    fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input_output_od(pin)?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;
        Ok(Self { pin, delay: Ets })
    }
}

impl Dht11 for EspDht11 {
    fn measure(&mut self) -> Result<RawMeasurement, SensorError> {
        self.pin
            .set_high()
            .map_err(|err| SensorError::Line(format!("{err:?}")))?;

        match dht11::blocking::read(&mut self.delay, &mut self.pin) {
            Ok(reading) => {
                info!(
                    "[DHT11] raw temperature {}°C, humidity {}%",
                    reading.temperature, reading.relative_humidity
                );
                Ok(RawMeasurement {
                    temperature: f32::from(reading.temperature),
                    humidity: f32::from(reading.relative_humidity),
                })
            }
            Err(DhtError::Timeout) => Err(SensorError::Timeout),
            Err(DhtError::ChecksumMismatch) => Err(SensorError::ChecksumMismatch),
            Err(err) => Err(SensorError::Line(format!("{err:?}"))),
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let credentials = NvsCredentials {
        partition: nvs_partition.clone(),
    }
    .load()
    .context("wifi credentials missing; refusing to start")?;

    let config = ExporterConfig::default();
    let Peripherals { modem, pins, .. } = Peripherals::take()?;

    let led = Led {
        pin: PinDriver::output(pins.gpio2.downgrade_output())?,
    };

    let sensor = EspDht11::new(pins.gpio16.downgrade())
        .with_context(|| format!("failed to initialize DHT11 on GPIO{DHT11_PIN}"))?;

    let station = EspStation {
        wifi: EspWifi::new(modem, sys_loop, Some(nvs_partition))?,
    };
    let mut link = NetworkLink::new(station, led, config.link.clone());

    match link.mac_address() {
        Some(mac) => info!("MAC address: {mac}"),
        None => warn!("error getting MAC address; is the wireless interface active?"),
    }

    while let Err(err) = link.ensure_connected(&credentials) {
        warn!("wifi startup failed: {err}; retrying");
    }

    let listener = bind_listener(config.listen_port)
        .map_err(|err| anyhow!("failed to bind port {}: {err}", config.listen_port))?;
    info!("listening on 0.0.0.0:{}", config.listen_port);

    Exporter::new(&config, credentials, link, sensor, listener).run();
    Ok(())
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}
