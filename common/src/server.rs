use std::{
    net::{SocketAddr, TcpListener},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use log::{info, warn};

use crate::{
    config::{Credentials, ExporterConfig},
    error::{LinkError, SensorError, TransportError},
    http::HttpResponder,
    link::{NetworkLink, StatusIndicator, WifiStation},
    metrics,
    sensor::{Dht11, Reading, SensorReader},
};

#[derive(Debug, Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum ServiceOutcome {
    Served { peer: SocketAddr, reading: Reading },
    /// Client received `NaN` samples.
    SensorFault { peer: SocketAddr, error: SensorError },
    /// Connection dropped without a complete response.
    TransportFault(TransportError),
}

#[derive(Debug)]
pub enum Iteration {
    LinkDown(LinkError),
    Serviced(ServiceOutcome),
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct Exporter<W, L, D> {
    link: NetworkLink<W, L>,
    sensor: SensorReader<D>,
    responder: HttpResponder,
    listener: TcpListener,
    credentials: Credentials,
    location: String,
    accept_retry_delay: Duration,
    clock: fn() -> i64,
    shutdown: ShutdownToken,
}

impl<W, L, D> Exporter<W, L, D>
where
    W: WifiStation,
    L: StatusIndicator,
    D: Dht11,
{
    pub fn new(
        config: &ExporterConfig,
        credentials: Credentials,
        link: NetworkLink<W, L>,
        device: D,
        listener: TcpListener,
    ) -> Self {
        Self {
            link,
            sensor: SensorReader::new(device).with_calibration(config.calibration_offset),
            responder: HttpResponder::new(config.request_buffer_size, config.io_timeout()),
            listener,
            credentials,
            location: config.location.clone(),
            accept_retry_delay: config.accept_retry_delay(),
            clock: unix_now,
            shutdown: ShutdownToken::new(),
        }
    }

    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    pub fn link(&self) -> &NetworkLink<W, L> {
        &self.link
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn run(&mut self) {
        info!("serving metrics on {:?}", self.listener.local_addr());

        while !self.shutdown.is_triggered() {
            match self.serve_once() {
                Iteration::LinkDown(err) => warn!("wifi link down: {err}; retrying"),
                Iteration::Serviced(ServiceOutcome::Served { peer, .. }) => {
                    info!("client {peer} disconnected");
                }
                Iteration::Serviced(ServiceOutcome::SensorFault { peer, error }) => {
                    warn!("served NaN samples to {peer}: {error}");
                }
                Iteration::Serviced(ServiceOutcome::TransportFault(err)) => {
                    warn!("socket error: {err}");
                }
            }
        }

        info!("metrics loop stopped");
    }

    pub fn serve_once(&mut self) -> Iteration {
        if let Err(err) = self.link.ensure_connected(&self.credentials) {
            return Iteration::LinkDown(err);
        }

        Iteration::Serviced(self.service_client())
    }

    fn service_client(&mut self) -> ServiceOutcome {
        let mut conn = match self.responder.accept_one(&self.listener) {
            Ok(conn) => conn,
            Err(err) => {
                thread::sleep(self.accept_retry_delay);
                return ServiceOutcome::TransportFault(err);
            }
        };
        let peer = conn.peer();
        info!("client connected from {peer}");

        if let Err(err) = conn.read_request() {
            return ServiceOutcome::TransportFault(err);
        }

        let measured = self.sensor.read();
        let reading = measured.as_ref().ok().copied();
        let body = metrics::render_for_site(reading, (self.clock)(), &self.location);

        if let Err(err) = conn.send(&body) {
            return ServiceOutcome::TransportFault(err);
        }

        match measured {
            Ok(reading) => ServiceOutcome::Served { peer, reading },
            Err(error) => ServiceOutcome::SensorFault { peer, error },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::{Shutdown, TcpStream},
        thread,
        time::Instant,
    };

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        link::tests::{credentials, instant_policy, FakeStation, RecordingLed},
        sensor::tests::{raw, ScriptedDht},
    };

    const EPOCH: i64 = 1_700_000_000;

    fn fixed_clock() -> i64 {
        EPOCH
    }

    fn exporter(
        script: ScriptedDht,
        station: FakeStation,
    ) -> Exporter<FakeStation, RecordingLed, ScriptedDht> {
        exporter_with(&ExporterConfig::default(), script, station)
    }

    fn exporter_with(
        config: &ExporterConfig,
        script: ScriptedDht,
        station: FakeStation,
    ) -> Exporter<FakeStation, RecordingLed, ScriptedDht> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let link = NetworkLink::new(station, RecordingLed::default(), instant_policy(Some(2)));
        Exporter::new(
            config,
            credentials(),
            link,
            script,
            listener,
        )
        .with_clock(fixed_clock)
    }

    fn scrape(addr: SocketAddr) -> thread::JoinHandle<String> {
        thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"GET /metrics HTTP/1.1\r\n\r\n").unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).unwrap();
            response
        })
    }

    #[test]
    fn end_to_end_scrape() {
        let mut exporter = exporter(
            ScriptedDht::new(vec![raw(42.0, 55.0)]),
            FakeStation::new(0),
        );
        let client = scrape(exporter.local_addr().unwrap());

        let outcome = exporter.serve_once();
        let response = client.join().unwrap();

        let Iteration::Serviced(ServiceOutcome::Served { reading, .. }) = outcome else {
            panic!("expected a served scrape, got {outcome:?}");
        };
        assert_eq!(
            reading,
            Reading {
                temperature: 22.0,
                humidity: 55.0
            }
        );
        assert!(response.starts_with("HTTP/1.0 200 OK\r\nContent-type: text/plain\r\n\r\n"));
        assert!(response
            .contains("temperature{sensor=\"dht11\",location=\"GH_trial\"} 22.0 1700000000\n"));
        assert!(
            response.contains("humidity{sensor=\"dht11\",location=\"GH_trial\"} 55.0 1700000000\n")
        );
    }

    #[test]
    fn sensor_fault_serves_nan_then_recovers() {
        let mut exporter = exporter(
            ScriptedDht::new(vec![Err(SensorError::ChecksumMismatch), raw(41.0, 50.0)]),
            FakeStation::new(0),
        );
        let addr = exporter.local_addr().unwrap();

        let first = scrape(addr);
        let outcome = exporter.serve_once();
        let first = first.join().unwrap();
        assert!(matches!(
            outcome,
            Iteration::Serviced(ServiceOutcome::SensorFault {
                error: SensorError::ChecksumMismatch,
                ..
            })
        ));
        assert!(first.contains("temperature{sensor=\"dht11\",location=\"GH_trial\"} NaN 1700000000\n"));
        assert!(first.contains("humidity{sensor=\"dht11\",location=\"GH_trial\"} NaN 1700000000\n"));

        let second = scrape(addr);
        let outcome = exporter.serve_once();
        let second = second.join().unwrap();
        assert!(matches!(
            outcome,
            Iteration::Serviced(ServiceOutcome::Served { .. })
        ));
        assert!(second.contains("temperature{sensor=\"dht11\",location=\"GH_trial\"} 21.0 1700000000\n"));
    }

    #[test]
    fn dropped_client_does_not_stop_the_next_one() {
        let mut exporter = exporter(
            ScriptedDht::new(vec![raw(40.0, 40.0), raw(40.0, 40.0)]),
            FakeStation::new(0),
        );
        let addr = exporter.local_addr().unwrap();

        // Reset the connection before the server reads anything.
        let rude = TcpStream::connect(addr).unwrap();
        rude.shutdown(Shutdown::Both).unwrap();
        drop(rude);
        let _ = exporter.serve_once();

        let client = scrape(addr);
        let outcome = exporter.serve_once();
        let response = client.join().unwrap();

        assert!(matches!(
            outcome,
            Iteration::Serviced(ServiceOutcome::Served { .. })
        ));
        assert!(response.contains(" 20.0 1700000000\n"));
    }

    #[test]
    fn failed_accept_pauses_before_the_next_pass() {
        let config = ExporterConfig {
            accept_retry_delay_ms: 50,
            ..ExporterConfig::default()
        };
        let mut exporter = exporter_with(&config, ScriptedDht::new(vec![]), FakeStation::new(0));
        // No client is pending, so every accept fails with WouldBlock.
        exporter.listener.set_nonblocking(true).unwrap();

        let started = Instant::now();
        let first = exporter.serve_once();
        let second = exporter.serve_once();

        assert!(matches!(
            first,
            Iteration::Serviced(ServiceOutcome::TransportFault(TransportError::Accept(_)))
        ));
        assert!(matches!(
            second,
            Iteration::Serviced(ServiceOutcome::TransportFault(TransportError::Accept(_)))
        ));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(exporter.sensor.device().calls, 0);
    }

    #[test]
    fn link_down_skips_servicing() {
        let mut exporter = exporter(ScriptedDht::new(vec![]), FakeStation::never_up());

        let outcome = exporter.serve_once();

        assert!(matches!(
            outcome,
            Iteration::LinkDown(LinkError::AttemptsExhausted { attempts: 2 })
        ));
        assert!(!exporter.link().indicator().is_on());
    }

    #[test]
    fn every_scrape_measures_again() {
        let mut exporter = exporter(
            ScriptedDht::new(vec![raw(30.0, 40.0), raw(31.0, 41.0), raw(32.0, 42.0)]),
            FakeStation::new(0),
        );
        let addr = exporter.local_addr().unwrap();

        let mut bodies = Vec::new();
        for _ in 0..3 {
            let client = scrape(addr);
            let _ = exporter.serve_once();
            bodies.push(client.join().unwrap());
        }

        assert!(bodies[0].contains(" 10.0 "));
        assert!(bodies[1].contains(" 11.0 "));
        assert!(bodies[2].contains(" 12.0 "));
        assert_eq!(exporter.sensor.device().calls, 3);
    }

    #[test]
    fn run_returns_after_shutdown() {
        let mut exporter = exporter(
            ScriptedDht::new(vec![raw(42.0, 55.0), raw(42.0, 55.0)]),
            FakeStation::new(0),
        );
        let addr = exporter.local_addr().unwrap();
        let token = exporter.shutdown_token();

        let client = scrape(addr);
        let waker = thread::spawn(move || {
            let response = client.join().unwrap();
            token.trigger();
            // Unblock the pending accept.
            let _ = TcpStream::connect(addr);
            response
        });

        exporter.run();

        assert!(waker.join().unwrap().contains(" 22.0 1700000000\n"));
        assert!(exporter.shutdown_token().is_triggered());
    }
}
