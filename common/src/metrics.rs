use std::fmt::Write as _;

use crate::{
    config::{SENSOR_LABEL, SITE_LOCATION},
    sensor::Reading,
};

const TEMPERATURE_HELP: &str = "# HELP temperature Temperature from DHT11 sensor";
const TEMPERATURE_TYPE: &str = "# TYPE temperature gauge";
// Scrape configs and dashboards already key on these exact lines.
const HUMIDITY_HELP: &str = "# HELP Humidity Temperature from DHT11 sensor";
const HUMIDITY_TYPE: &str = "# TYPE Humidity gauge";

const NAN_SAMPLE: &str = "NaN";

pub fn render(reading: Option<Reading>, timestamp_secs: i64) -> String {
    render_for_site(reading, timestamp_secs, SITE_LOCATION)
}

pub fn render_for_site(reading: Option<Reading>, timestamp_secs: i64, location: &str) -> String {
    let (temperature, humidity) = match reading {
        Some(reading) => (
            format!("{:.1}", reading.temperature),
            format!("{:.1}", reading.humidity),
        ),
        None => (NAN_SAMPLE.to_string(), NAN_SAMPLE.to_string()),
    };

    let mut out = String::with_capacity(384);
    let _ = writeln!(out, "{TEMPERATURE_HELP}");
    let _ = writeln!(out, "{TEMPERATURE_TYPE}");
    write_sample(&mut out, "temperature", location, &temperature, timestamp_secs);
    out.push('\n');
    let _ = writeln!(out, "{HUMIDITY_HELP}");
    let _ = writeln!(out, "{HUMIDITY_TYPE}");
    write_sample(&mut out, "humidity", location, &humidity, timestamp_secs);
    out
}

fn write_sample(out: &mut String, name: &str, location: &str, value: &str, timestamp_secs: i64) {
    let _ = writeln!(
        out,
        "{name}{{sensor=\"{SENSOR_LABEL}\",location=\"{location}\"}} {value} {timestamp_secs}"
    );
}
