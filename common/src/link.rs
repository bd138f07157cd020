use std::{net::Ipv4Addr, thread};

use log::{debug, info, warn};

use crate::{
    config::{Credentials, LinkPolicy},
    error::LinkError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfo {
    pub address: Ipv4Addr,
}

/// Wi-Fi station driver.
pub trait WifiStation {
    /// Starts associating with the access point; returns once the attempt is under way.
    fn connect(&mut self, credentials: &Credentials) -> Result<(), String>;
    fn is_connected(&self) -> bool;
    fn local_address(&self) -> Option<Ipv4Addr>;
    fn mac_address(&self) -> Option<[u8; 6]>;
}

/// Two-state connectivity indicator, usually the on-board LED.
pub trait StatusIndicator {
    fn set(&mut self, on: bool);
}

pub struct NetworkLink<W, L> {
    station: W,
    indicator: L,
    policy: LinkPolicy,
    state: ConnectionState,
    info: Option<LinkInfo>,
}

impl<W: WifiStation, L: StatusIndicator> NetworkLink<W, L> {
    pub fn new(station: W, mut indicator: L, policy: LinkPolicy) -> Self {
        indicator.set(false);
        Self {
            station,
            indicator,
            policy,
            state: ConnectionState::Disconnected,
            info: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn info(&self) -> Option<LinkInfo> {
        self.info
    }

    pub fn station(&self) -> &W {
        &self.station
    }

    pub fn indicator(&self) -> &L {
        &self.indicator
    }

    pub fn mac_address(&self) -> Option<String> {
        self.station.mac_address().map(format_mac)
    }

    pub fn ensure_connected(&mut self, credentials: &Credentials) -> Result<LinkInfo, LinkError> {
        if self.state == ConnectionState::Connected {
            if self.station.is_connected() {
                if let Some(info) = self.info {
                    return Ok(info);
                }
            } else {
                warn!("wifi disconnected; reconnecting to `{}`", credentials.network_name());
                self.transition(ConnectionState::Disconnected);
            }
        }

        self.connect(credentials)
    }

    fn connect(&mut self, credentials: &Credentials) -> Result<LinkInfo, LinkError> {
        let mut failed: u32 = 0;

        loop {
            self.transition(ConnectionState::Connecting);

            match self.station.connect(credentials) {
                Ok(()) => {
                    if self.wait_for_link() {
                        let info = LinkInfo {
                            address: self
                                .station
                                .local_address()
                                .unwrap_or(Ipv4Addr::UNSPECIFIED),
                        };
                        self.info = Some(info);
                        self.transition(ConnectionState::Connected);
                        info!("wifi connected to `{}`", credentials.network_name());
                        info!("IP address: {}", info.address);
                        return Ok(info);
                    }
                    warn!(
                        "wifi connect attempt {} timed out after {}ms",
                        failed + 1,
                        self.policy.attempt_timeout_ms
                    );
                }
                Err(err) => {
                    warn!("wifi connect attempt {} failed: {err}", failed + 1);
                    if self.policy.max_attempts == Some(failed + 1) {
                        self.transition(ConnectionState::Disconnected);
                        return Err(LinkError::Driver(err));
                    }
                }
            }

            failed = failed.saturating_add(1);
            self.transition(ConnectionState::Disconnected);

            if let Some(max) = self.policy.max_attempts {
                if failed >= max {
                    return Err(LinkError::AttemptsExhausted { attempts: failed });
                }
            }

            thread::sleep(self.policy.backoff_after(failed));
        }
    }

    fn wait_for_link(&mut self) -> bool {
        for _ in 0..self.policy.polls_per_attempt() {
            if self.station.is_connected() {
                return true;
            }
            thread::sleep(self.policy.poll_interval());
        }
        self.station.is_connected()
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug!("wifi link {} -> {}", self.state.as_str(), next.as_str());
        match next {
            ConnectionState::Connected => self.indicator.set(true),
            ConnectionState::Disconnected => {
                self.info = None;
                self.indicator.set(false);
            }
            ConnectionState::Connecting => {}
        }
        self.state = next;
    }
}

pub fn format_mac(mac: [u8; 6]) -> String {
    mac.iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
