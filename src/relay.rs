//! The receive, transform, write loop.

use std::{net::SocketAddr, str::Utf8Error, time::Duration};

use anyhow::{Context as _, Result};
use thiserror::Error;
use tokio::{
    net::{ToSocketAddrs, UdpSocket},
    time::sleep,
};
use tracing::{debug, error, warn};

use crate::{
    influx::Sink,
    mapping::Mappings,
    point::{DataPoint, FieldValue, json_to_tag, parse_timestamp},
    rtl433::{SensorReading, sanitize_model, syslog},
};

/// Largest datagram read; longer ones are truncated by the socket.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Why a datagram produced no point. Never logged.
#[derive(Debug, Error)]
pub enum DropReason {
    #[error("datagram is not valid UTF-8")]
    Utf8(#[from] Utf8Error),

    #[error("payload is not valid JSON")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("event has no model")]
    MissingModel,

    #[error("event model is not a string")]
    InvalidModel,

    #[error("event has no time")]
    MissingTime,

    #[error("event time is not a recognizable timestamp")]
    InvalidTime,

    #[error("event has none of the relayed fields")]
    NoFields,
}

#[derive(Debug)]
pub enum Outcome {
    Written(DataPoint),
    Dropped(DropReason),
    WriteFailed(DataPoint),
}

pub fn transform(datagram: &[u8], mappings: &Mappings) -> Result<DataPoint, DropReason> {
    let line = std::str::from_utf8(datagram)?;
    let reading = SensorReading::from_json(syslog::strip_framing(line))?;

    let model = sanitize_model(&reading.model);
    let location = mappings.location(&model, reading.id.as_deref());
    let measurement = mappings.measurement_name(&model);
    let timestamp_ns = parse_timestamp(&reading.time).ok_or(DropReason::InvalidTime)?;

    let mut point = DataPoint::new(measurement, timestamp_ns);
    point.tag("location", location);

    for name in mappings.tags() {
        if let Some(value) = reading.get(name).and_then(json_to_tag) {
            point.tag(name.as_str(), value);
        }
    }

    for name in mappings.fields() {
        if let Some(value) = reading.get(name).and_then(FieldValue::from_json) {
            point.field(name.as_str(), value);
        }
    }

    if point.fields().is_empty() {
        return Err(DropReason::NoFields);
    }

    Ok(point)
}

/// A bound socket and a sink, held for the life of the process.
pub struct Relay<S> {
    socket: UdpSocket,
    sink: S,
    mappings: Mappings,
}

impl<S: Sink> Relay<S> {
    pub async fn bind(addr: impl ToSocketAddrs, sink: S, mappings: Mappings) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .context("failed to bind UDP socket")?;

        Ok(Self {
            socket,
            sink,
            mappings,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("failed to get local address")
    }

    /// Relays datagrams until the process is killed.
    pub async fn run(&self) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            if let Err(err) = self.step(&mut buf).await {
                back_off(&err).await;
            }
        }
    }

    pub async fn step(&self, buf: &mut [u8]) -> Result<Outcome> {
        let (len, _addr) = self
            .socket
            .recv_from(buf)
            .await
            .context("failed to receive datagram")?;

        Ok(self.handle(&buf[..len]).await)
    }

    /// Transforms a datagram and writes the result. Only write failures are logged.
    pub async fn handle(&self, datagram: &[u8]) -> Outcome {
        let point = match transform(datagram, &self.mappings) {
            Ok(point) => point,
            Err(reason) => return Outcome::Dropped(reason),
        };

        match self.sink.write(&point).await {
            Ok(()) => {
                debug!(measurement = point.measurement(), "wrote point");
                Outcome::Written(point)
            }
            Err(err) => {
                error!("error {err:#} writing {point}");
                Outcome::WriteFailed(point)
            }
        }
    }
}

async fn back_off(err: &anyhow::Error) {
    warn!("{err:#}");
    sleep(RECEIVE_RETRY_DELAY).await;
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::anyhow;
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        points: Mutex<Vec<DataPoint>>,
    }

    impl Sink for RecordingSink {
        async fn write(&self, point: &DataPoint) -> Result<()> {
            self.points.lock().unwrap().push(point.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl Sink for FailingSink {
        async fn write(&self, _point: &DataPoint) -> Result<()> {
            Err(anyhow!("unauthorized access"))
        }
    }

    const LACROSSE: &str = r#"{"model":"LaCrosse-TX29IT","id":49,"time":"2024-01-01T00:00:00Z","temperature_F":68.5,"battery_ok":1}"#;

    async fn relay<S: Sink>(sink: S) -> Relay<S> {
        Relay::bind("127.0.0.1:0", sink, Mappings::default())
            .await
            .unwrap()
    }

    fn assert_lacrosse_point(point: &DataPoint) {
        assert_eq!(point.measurement(), "temperatures");
        assert_eq!(point.get_tag("location"), Some("Backdoor"));
        assert_eq!(point.get_tag("id"), Some("49"));
        assert_eq!(point.get_tag("channel"), None);
        assert_eq!(point.get_field("temperature_F"), Some(&FieldValue::Float(68.5)));
        assert_eq!(point.get_field("battery_ok"), Some(&FieldValue::Integer(1)));
        assert_eq!(point.get_field("humidity"), None);
        assert_eq!(point.timestamp().to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_transform_lacrosse_reading() {
        let point = transform(LACROSSE.as_bytes(), &Mappings::default()).unwrap();
        assert_lacrosse_point(&point);
        assert_eq!(
            point.to_string(),
            "temperatures,id=49,location=Backdoor temperature_F=68.5,battery_ok=1i 1704067200000000000"
        );
    }

    #[test]
    fn test_transform_syslog_framed_reading() {
        let datagram = format!("<165>1 2024-01-01T00:00:00Z pi rtl_433 - - - {LACROSSE}");
        let point = transform(datagram.as_bytes(), &Mappings::default()).unwrap();
        assert_lacrosse_point(&point);
    }

    #[test]
    fn test_transform_unmapped_model() {
        let datagram = json!({
            "model": "Fine Offset WH2/WH5.x & co",
            "id": 7,
            "channel": 2,
            "time": "2024-01-01 00:00:00",
            "temperature_F": 50.0,
            "humidity": 80
        })
        .to_string();

        let point = transform(datagram.as_bytes(), &Mappings::default()).unwrap();
        assert_eq!(point.measurement(), "Fine_Offset_WH2_WH5_x__co");
        assert_eq!(point.get_tag("location"), Some("Unknown"));
        assert_eq!(point.get_tag("channel"), Some("2"));
        assert_eq!(point.get_field("humidity"), Some(&FieldValue::Integer(80)));
    }

    #[test]
    fn test_transform_unmapped_id_and_missing_id() {
        let mappings = Mappings::default();

        let unmapped = r#"{"model":"Acurite-Tower","id":1,"time":0,"humidity":30}"#;
        let point = transform(unmapped.as_bytes(), &mappings).unwrap();
        assert_eq!(point.get_tag("location"), Some("Unknown"));
        assert_eq!(point.get_tag("id"), Some("1"));

        let missing = r#"{"model":"Acurite-Tower","time":0,"humidity":30}"#;
        let point = transform(missing.as_bytes(), &mappings).unwrap();
        assert_eq!(point.get_tag("location"), Some("Unknown"));
        assert_eq!(point.get_tag("id"), None);

        let mapped = r#"{"model":"Acurite-Tower","id":"8413","time":0,"humidity":30}"#;
        let point = transform(mapped.as_bytes(), &mappings).unwrap();
        assert_eq!(point.get_tag("location"), Some("Work Office"));
    }

    #[test]
    fn test_transform_skips_empty_tag_values() {
        let datagram = r#"{"model":"LaCrosse-TX29IT","id":49,"channel":"","time":"2024-01-01T00:00:00Z","humidity":3}"#;
        let point = transform(datagram.as_bytes(), &Mappings::default()).unwrap();

        assert_eq!(point.get_tag("channel"), None);
        assert_eq!(
            point.to_string(),
            "temperatures,id=49,location=Backdoor humidity=3i 1704067200000000000"
        );
    }

    #[test]
    fn test_transform_keeps_line_breaks_in_one_line() {
        let datagram = json!({
            "model": "LaCrosse-TX29IT",
            "id": 49,
            "channel": "a\nb",
            "time": "2024-01-01T00:00:00Z",
            "humidity": 3
        })
        .to_string();
        let point = transform(datagram.as_bytes(), &Mappings::default()).unwrap();

        assert_eq!(point.get_tag("channel"), Some("a\nb"));
        assert_eq!(point.to_string().lines().count(), 1);
    }

    #[test]
    fn test_transform_integer_time_is_nanoseconds() {
        let datagram = r#"{"model":"LaCrosse-TX29IT","id":49,"time":1704067200,"humidity":3}"#;
        let point = transform(datagram.as_bytes(), &Mappings::default()).unwrap();

        assert_eq!(point.timestamp_ns(), 1_704_067_200);
        assert!(point.to_string().ends_with(" 1704067200"));
    }

    #[test]
    fn test_transform_drops() {
        let mappings = Mappings::default();
        let cases: [(&[u8], fn(&DropReason) -> bool); 6] = [
            (&[0xff, 0xfe, 0x00], |r| matches!(r, DropReason::Utf8(_))),
            (br#"{"model":"LaCrosse-TX29IT","id":4"#, |r| {
                matches!(r, DropReason::Json(_))
            }),
            (br#"{"id":49,"time":0,"humidity":3}"#, |r| {
                matches!(r, DropReason::MissingModel)
            }),
            (br#"{"model":"x","id":49,"humidity":3}"#, |r| {
                matches!(r, DropReason::MissingTime)
            }),
            (br#"{"model":"x","time":"soon","humidity":3}"#, |r| {
                matches!(r, DropReason::InvalidTime)
            }),
            (br#"{"model":"x","time":0,"rssi":-3.2}"#, |r| {
                matches!(r, DropReason::NoFields)
            }),
        ];

        for (datagram, expected) in cases {
            let reason = transform(datagram, &mappings).unwrap_err();
            assert!(expected(&reason), "unexpected reason: {reason:?}");
        }
    }

    #[tokio::test]
    async fn test_step_relays_datagram_to_sink() {
        let relay = relay(RecordingSink::default()).await;
        let producer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        producer
            .send_to(LACROSSE.as_bytes(), relay.local_addr().unwrap())
            .await
            .unwrap();

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let outcome = relay.step(&mut buf).await.unwrap();
        assert!(matches!(outcome, Outcome::Written(_)));

        let points = relay.sink.points.lock().unwrap();
        assert_eq!(points.len(), 1);
        assert_lacrosse_point(&points[0]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_invalid_datagrams_are_dropped_silently() {
        let relay = relay(RecordingSink::default()).await;

        for datagram in [
            &LACROSSE.as_bytes()[..40],
            br#"{"id":49,"time":"2024-01-01T00:00:00Z","humidity":3}"#.as_slice(),
            b"<165>1 2024-01-01T00:00:00Z pi rtl_433 - - - not json".as_slice(),
        ] {
            let outcome = relay.handle(datagram).await;
            assert!(matches!(outcome, Outcome::Dropped(_)), "{outcome:?}");
        }

        assert!(relay.sink.points.lock().unwrap().is_empty());
        logs_assert(|lines: &[&str]| {
            if lines.is_empty() {
                Ok(())
            } else {
                Err(format!("expected no log lines, got {lines:?}"))
            }
        });
    }

    #[tokio::test]
    #[traced_test]
    async fn test_write_failure_is_logged_once() {
        let relay = relay(FailingSink).await;

        let outcome = relay.handle(LACROSSE.as_bytes()).await;
        let Outcome::WriteFailed(point) = outcome else {
            panic!("expected write failure, got {outcome:?}");
        };
        assert_lacrosse_point(&point);

        logs_assert(|lines: &[&str]| {
            let errors: Vec<_> = lines.iter().filter(|l| l.contains("ERROR")).collect();
            match errors.as_slice() {
                [line] if line.contains("temperatures") && line.contains("unauthorized access") => {
                    Ok(())
                }
                _ => Err(format!("expected one error line, got {lines:?}")),
            }
        });
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_receive_error_pauses_before_retry() {
        let start = tokio::time::Instant::now();
        back_off(&anyhow!("connection reset")).await;

        assert!(start.elapsed() >= RECEIVE_RETRY_DELAY);
        assert!(logs_contain("connection reset"));
    }

    #[tokio::test]
    async fn test_relay_keeps_going_after_failures() {
        let relay = relay(RecordingSink::default()).await;

        assert!(matches!(relay.handle(b"garbage").await, Outcome::Dropped(_)));
        assert!(matches!(relay.handle(LACROSSE.as_bytes()).await, Outcome::Written(_)));
        assert!(matches!(relay.handle(b"{}").await, Outcome::Dropped(_)));
        assert!(matches!(relay.handle(LACROSSE.as_bytes()).await, Outcome::Written(_)));

        assert_eq!(relay.sink.points.lock().unwrap().len(), 2);
    }
}
