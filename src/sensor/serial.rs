//! Serial transport for the gas sensor board.
//!
//! A dedicated reader thread owns the port, decodes firmware lines into
//! [`SensorFrame`]s and forwards them to the async side. When the port drops
//! out the thread reopens it with capped backoff; a cloned handle shared with
//! [`SerialActuator`] is swapped in on every reconnect. The backoff only
//! resets once a reopened port has delivered a complete line.

use super::types::{decode_line, SensorFrame};
use super::SensorError;
use crate::actuator::{Actuator, ActuatorError};
use crate::config::SerialConfig;
use chrono::Utc;
use serialport::SerialPort;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;

const RECONNECT_BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(10);

/// Longest firmware line accepted, excluding the newline.
pub const MAX_LINE_LEN: usize = 256;

type SharedWriter = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// Serial reader feeding decoded frames into a channel.
///
/// Dropping the link stops and joins the reader thread, which releases the port.
pub struct SerialSensorLink {
    port_name: String,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SerialSensorLink {
    /// Open the configured port and start forwarding frames.
    ///
    /// The first open happens synchronously so a missing device is reported
    /// immediately; later outages are handled by the reader thread.
    pub fn open(
        config: &SerialConfig,
        frames: mpsc::Sender<SensorFrame>,
    ) -> Result<(Self, SerialActuator), SensorError> {
        let port = open_port(config)?;
        let writer = port
            .try_clone()
            .map_err(|e| SensorError::Open(format!("{}: {e}", config.port)))?;
        let shared_writer: SharedWriter = Arc::new(Mutex::new(Some(writer)));

        let running = Arc::new(AtomicBool::new(true));
        let reader = {
            let running = running.clone();
            let shared_writer = shared_writer.clone();
            let config = config.clone();
            std::thread::Builder::new()
                .name("serial-reader".to_string())
                .spawn(move || reader_thread(port, config, running, shared_writer, frames))
                .map_err(|e| SensorError::Io(e.to_string()))?
        };

        tracing::info!(port = %config.port, baud = config.baud_rate, "serial link opened");

        Ok((
            Self {
                port_name: config.port.clone(),
                running,
                reader: Some(reader),
            },
            SerialActuator {
                writer: shared_writer,
            },
        ))
    }

    /// Stop the reader thread and wait for it to release the port.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                tracing::warn!(port = %self.port_name, "serial reader thread panicked");
            }
            tracing::info!(port = %self.port_name, "serial link closed");
        }
    }
}

impl Drop for SerialSensorLink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fan actuator driven over the sensor board's serial link.
///
/// Sends `FAN_ON` / `FAN_OFF` lines to the firmware.
#[derive(Clone)]
pub struct SerialActuator {
    writer: SharedWriter,
}

impl Actuator for SerialActuator {
    fn set_actuator(&self, on: bool) -> Result<(), ActuatorError> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let port = guard.as_mut().ok_or(ActuatorError::Disconnected)?;

        let line: &[u8] = if on { b"FAN_ON\n" } else { b"FAN_OFF\n" };
        port.write_all(line)
            .and_then(|_| port.flush())
            .map_err(|e| ActuatorError::Io(e.to_string()))
    }
}

/// List serial ports available on this machine.
pub fn list_ports() -> Result<Vec<String>, SensorError> {
    let ports = serialport::available_ports().map_err(|e| SensorError::Io(e.to_string()))?;

    Ok(ports
        .into_iter()
        .map(|p| match p.port_type {
            serialport::SerialPortType::UsbPort(info) => format!(
                "{} (USB {:04x}:{:04x}{})",
                p.port_name,
                info.vid,
                info.pid,
                info.product.map(|s| format!(" {s}")).unwrap_or_default()
            ),
            serialport::SerialPortType::BluetoothPort => format!("{} (Bluetooth)", p.port_name),
            _ => p.port_name,
        })
        .collect())
}

fn open_port(config: &SerialConfig) -> Result<Box<dyn SerialPort>, SensorError> {
    serialport::new(&config.port, config.baud_rate)
        .timeout(config.read_timeout)
        .flow_control(serialport::FlowControl::None)
        .open()
        .map_err(|e| SensorError::Open(format!("{}: {e}", config.port)))
}

/// Capped exponential delay between reconnect attempts.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay before the next attempt; doubles the one after it.
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

fn reader_thread(
    port: Box<dyn SerialPort>,
    config: SerialConfig,
    running: Arc<AtomicBool>,
    writer: SharedWriter,
    frames: mpsc::Sender<SensorFrame>,
) {
    let mut port = Some(port);
    let mut backoff = Backoff::new(RECONNECT_BACKOFF_INITIAL, RECONNECT_BACKOFF_MAX);

    while running.load(Ordering::SeqCst) {
        let current = match port.take() {
            Some(p) => p,
            None => match reopen(&config, &writer) {
                Ok(p) => {
                    tracing::info!(port = %config.port, "serial link reconnected");
                    p
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(error = %e, retry_in = ?delay, "serial reconnect failed");
                    sleep_while_running(&running, delay);
                    continue;
                }
            },
        };

        match forward_lines(current, &running, &frames) {
            ReadEnd::Stopped | ReadEnd::ReceiverGone => break,
            ReadEnd::Failed { error, delivered } => {
                if delivered {
                    backoff.reset();
                }
                let delay = backoff.next_delay();
                tracing::warn!(port = %config.port, error = %error, retry_in = ?delay, "serial link lost");
                *writer.lock().unwrap_or_else(PoisonError::into_inner) = None;
                sleep_while_running(&running, delay);
            }
        }
    }

    *writer.lock().unwrap_or_else(PoisonError::into_inner) = None;
    running.store(false, Ordering::SeqCst);
}

fn reopen(config: &SerialConfig, writer: &SharedWriter) -> Result<Box<dyn SerialPort>, SensorError> {
    let port = open_port(config)?;
    let clone = port
        .try_clone()
        .map_err(|e| SensorError::Open(format!("{}: {e}", config.port)))?;
    *writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(clone);
    Ok(port)
}

#[derive(Debug)]
enum ReadEnd {
    Stopped,
    ReceiverGone,
    /// `delivered` is set once at least one complete line was read.
    Failed {
        error: std::io::Error,
        delivered: bool,
    },
}

/// Read newline-terminated lines until the port fails or the link stops.
///
/// Lines longer than [`MAX_LINE_LEN`] are reported once as malformed and the
/// rest of them, up to the next newline, is discarded.
fn forward_lines<R: Read>(
    port: R,
    running: &AtomicBool,
    frames: &mpsc::Sender<SensorFrame>,
) -> ReadEnd {
    let mut reader = BufReader::new(port);
    let mut buf = Vec::with_capacity(MAX_LINE_LEN + 1);
    let mut delivered = false;
    let mut discarding = false;

    while running.load(Ordering::SeqCst) {
        if buf.len() > MAX_LINE_LEN {
            buf.clear();
            if !discarding {
                discarding = true;
                let frame = SensorFrame::Malformed(format!(
                    "line exceeds {MAX_LINE_LEN} bytes without a newline"
                ));
                if frames.blocking_send(frame).is_err() {
                    return ReadEnd::ReceiverGone;
                }
            }
        }

        // Never buffer more than one byte past the cap.
        let room = (MAX_LINE_LEN + 1 - buf.len()) as u64;
        match (&mut reader).take(room).read_until(b'\n', &mut buf) {
            Ok(0) => {
                return ReadEnd::Failed {
                    error: std::io::Error::new(ErrorKind::UnexpectedEof, "serial stream ended"),
                    delivered,
                }
            }
            Ok(_) if buf.last() == Some(&b'\n') => {
                let line = String::from_utf8_lossy(&buf).into_owned();
                buf.clear();
                delivered = true;

                if std::mem::take(&mut discarding) || line.trim().is_empty() {
                    continue;
                }

                if frames.blocking_send(decode_line(&line, Utc::now())).is_err() {
                    return ReadEnd::ReceiverGone;
                }
            }
            // Partial line; keep accumulating.
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
            Err(e) => return ReadEnd::Failed { error: e, delivered },
        }
    }

    ReadEnd::Stopped
}

fn sleep_while_running(running: &AtomicBool, total: Duration) {
    let step = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while waited < total && running.load(Ordering::SeqCst) {
        std::thread::sleep(step);
        waited += step;
    }
}
