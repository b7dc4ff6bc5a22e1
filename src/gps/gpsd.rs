// src/gps/gpsd.rs
//! GPSD client feed

use crate::error::{Result, TrackerError};
use crate::tracker::{ProviderKind, Reading};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::TcpStream,
};
use tracing::info;

#[derive(Debug, Deserialize)]
struct GpsdMessage {
    class: String,
    #[serde(flatten)]
    data: HashMap<String, serde_json::Value>,
}

/// Connect to a gpsd daemon and return a stream reader
pub async fn connect_gpsd(host: &str, port: u16) -> Result<BufReader<TcpStream>> {
    let mut stream = TcpStream::connect(format!("{}:{}", host, port))
        .await
        .map_err(|e| TrackerError::Connection(format!("Failed to connect to gpsd at {}:{}: {}", host, port, e)))?;

    // Send WATCH command to start receiving JSON data
    let watch_cmd = "?WATCH={\"enable\":true,\"json\":true}\n";
    stream
        .write_all(watch_cmd.as_bytes())
        .await
        .map_err(|e| TrackerError::Connection(format!("Failed to send WATCH command: {}", e)))?;

    Ok(BufReader::new(stream))
}

/// Parse a single line of gpsd JSON.
///
/// Returns a satellite reading for TPV messages that carry a 2D or 3D fix;
/// `received_at` stands in when the message has no usable time.
pub fn parse_gpsd_json(line: &str, received_at: DateTime<Utc>) -> Result<Option<Reading>> {
    let msg: GpsdMessage = serde_json::from_str(line)
        .map_err(|e| TrackerError::Parse(format!("Failed to parse gpsd JSON: {}", e)))?;

    let reading = match msg.class.as_str() {
        "TPV" => parse_tpv_message(&msg.data, received_at),
        "VERSION" => {
            if let Some(version) = msg.data.get("release").and_then(|v| v.as_str()) {
                info!(version, "connected to gpsd");
            }
            None
        }
        "DEVICES" => {
            if let Some(devices) = msg.data.get("devices").and_then(|v| v.as_array()) {
                info!(count = devices.len(), "gpsd managing devices");
            }
            None
        }
        _ => None,
    };

    Ok(reading)
}

/// Parse TPV (Time Position Velocity) message
fn parse_tpv_message(
    msg_data: &HashMap<String, serde_json::Value>,
    received_at: DateTime<Utc>,
) -> Option<Reading> {
    let field = |name: &str| msg_data.get(name).and_then(|v| v.as_f64());

    // mode 0/1: no fix
    let mode = msg_data.get("mode").and_then(|v| v.as_u64()).unwrap_or(0);
    if mode < 2 {
        return None;
    }

    let latitude = field("lat")?;
    let longitude = field("lon")?;

    let time = msg_data
        .get("time")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(received_at);

    let accuracy = field("eph").or_else(|| match (field("epx"), field("epy")) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    });

    Some(
        Reading::new(ProviderKind::Gps, latitude, longitude, time)
            .with_accuracy(accuracy.unwrap_or(0.0))
            .with_motion(field("track").unwrap_or(0.0), field("speed").unwrap_or(0.0)),
    )
}
