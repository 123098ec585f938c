// gpsd position watch - streams TPV reports from a local gpsd daemon
use crate::application::geo_sampler::{PositionWatch, WatchError};
use crate::domain::geo::Coordinate;
use crate::domain::sample::LocationSample;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true}\n";

struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    // Held so the socket stays fully open.
    _writer: OwnedWriteHalf,
}

pub struct GpsdWatch {
    addr: String,
    fix_timeout: Duration,
    connection: Option<Connection>,
}

/// Subset of a gpsd report; only `TPV` reports carry positions.
#[derive(Debug, Deserialize)]
struct GpsdReport {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    speed: Option<f64>,
    track: Option<f64>,
    eph: Option<f64>,
    epx: Option<f64>,
    epy: Option<f64>,
    time: Option<String>,
}

impl GpsdWatch {
    pub fn new(addr: impl Into<String>, fix_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            fix_timeout,
            connection: None,
        }
    }

    async fn connect(&self) -> Result<Connection, WatchError> {
        let stream = TcpStream::connect(&self.addr).await.map_err(map_io_error)?;
        let (reader, mut writer) = stream.into_split();
        writer.write_all(WATCH_COMMAND).await.map_err(map_io_error)?;

        tracing::info!(addr = %self.addr, "Connected to gpsd");
        Ok(Connection {
            lines: BufReader::new(reader).lines(),
            _writer: writer,
        })
    }
}

#[async_trait]
impl PositionWatch for GpsdWatch {
    async fn next_fix(&mut self) -> Result<LocationSample, WatchError> {
        let deadline = tokio::time::Instant::now() + self.fix_timeout;

        loop {
            if self.connection.is_none() {
                let connection = tokio::time::timeout_at(deadline, self.connect())
                    .await
                    .map_err(|_| WatchError::Timeout)??;
                self.connection = Some(connection);
            }
            let Some(connection) = self.connection.as_mut() else {
                continue;
            };

            let line = match tokio::time::timeout_at(deadline, connection.lines.next_line()).await {
                Err(_) => return Err(WatchError::Timeout),
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => {
                    self.connection = None;
                    return Err(WatchError::Unavailable("gpsd closed the connection".to_string()));
                }
                Ok(Err(e)) => {
                    self.connection = None;
                    return Err(map_io_error(e));
                }
            };

            if let Some(sample) = parse_report(&line) {
                return Ok(sample);
            }
        }
    }
}

fn map_io_error(e: std::io::Error) -> WatchError {
    match e.kind() {
        ErrorKind::PermissionDenied => WatchError::PermissionDenied,
        ErrorKind::TimedOut => WatchError::Timeout,
        _ => WatchError::Unavailable(e.to_string()),
    }
}

/// Turn one gpsd JSON line into a sample. Non-TPV reports and reports
/// without at least a 2D fix yield `None`.
fn parse_report(line: &str) -> Option<LocationSample> {
    let report: GpsdReport = match serde_json::from_str(line) {
        Ok(report) => report,
        Err(e) => {
            tracing::trace!(error = %e, "Ignoring unparseable gpsd line");
            return None;
        }
    };

    if report.class != "TPV" || report.mode < 2 {
        return None;
    }

    let position = Coordinate::new(report.lat?, report.lon?).ok()?;
    let timestamp = report
        .time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let accuracy = report.eph.or_else(|| match (report.epx, report.epy) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    });

    Some(
        LocationSample::new(position, timestamp)
            .with_motion(report.speed, report.track)
            .with_accuracy(accuracy),
    )
}
