//! Sensor link for the Garage Gas Bridge.
//!
//! The link turns firmware output into [`SensorFrame`]s delivered over a
//! bounded channel. The channel closing means the stream has ended.

pub mod types;

#[cfg(feature = "serial")]
pub mod serial;

pub use types::{decode_line, GasReading, SensorFrame, MQ2_PREFIX};

#[cfg(feature = "serial")]
pub use serial::{list_ports, SerialActuator, SerialSensorLink};

/// Number of decoded frames buffered between the reader and the sensor loop.
pub const FRAME_QUEUE_CAPACITY: usize = 16;

/// Errors raised by the sensor link.
#[derive(Debug)]
pub enum SensorError {
    /// The port could not be opened
    Open(String),
    /// An I/O error occurred on an open port
    Io(String),
}

impl std::fmt::Display for SensorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorError::Open(e) => write!(f, "Could not open sensor link: {e}"),
            SensorError::Io(e) => write!(f, "Sensor link I/O error: {e}"),
        }
    }
}

impl std::error::Error for SensorError {}
