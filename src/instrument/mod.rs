//! Bench instruments a sheet can capture observations from
//!
//! # Purpose
//! An instrument wraps a serial line to a piece of test equipment and offers high-level queries
//! e.g. "measure DC volts" which return the reading as an exact decimal. A sheet keeps a registry
//! of the instruments it uses so the operator can check that each one answers before starting.
//!
//! # Connection Model
//! Every query opens the port, writes one command, reads one reply line, and closes the port
//! again. Nothing is held open between queries, so two queries against the same instrument cannot
//! interleave on the wire as long as they are awaited one after the other, which is how a sheet
//! drives them. This costs a reconnect per query.
//!
//! # Cancel Safety
//! Queries are cancel safe in the sense that dropping one closes the port, and the next query
//! starts from a fresh connection. An instrument part way through a function change may however
//! still be settling when the next query arrives.

use async_trait::async_trait;
use thiserror::Error;

pub mod transport;
pub mod bk5492;

pub use transport::{ LineTransport, PortOpener, SerialOpener };
pub use bk5492::{ Bk5492, Measurement };

#[derive(Debug, Error)]
pub enum InstrumentError
{
    /// Nothing came back before the read timed out
    #[error("No response from instrument at {port}")]
    NoResponse { port: String },
    /// A reply arrived but could not be understood
    #[error("Bad response from instrument: {0}")]
    BadResponse(String),
    #[error("Instrument I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serial port error: {0}")]
    Port(#[from] tokio_serial::Error),
}

/// A connected piece of test equipment
#[async_trait]
pub trait Instrument: Send + Sync
{
    /// Name given to this instrument in the sheet's configuration
    fn name(&self) -> &str;

    /// Query the instrument for its model designation
    async fn model(&self) -> Result<String, InstrumentError>;

    /// Check that the instrument answers, describing it on success
    async fn test_connection(&self) -> Result<String, InstrumentError>
    {
        let model = self.model().await?;
        Ok(format!("Connected to {} ({})", self.name(), model))
    }
}

/// A serial port present on this machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo
{
    pub device: String,
    pub description: String,
}

/// Enumerate serial ports, e.g. to pick one for an instrument
pub fn list_ports() -> Result<Vec<PortInfo>, InstrumentError>
{
    let ports = tokio_serial::available_ports()?;

    Ok(ports
        .into_iter()
        .map(|port| {
            let description = match &port.port_type {
                tokio_serial::SerialPortType::UsbPort(usb) => usb
                    .product
                    .clone()
                    .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
                tokio_serial::SerialPortType::PciPort => "PCI".to_owned(),
                tokio_serial::SerialPortType::BluetoothPort => "Bluetooth".to_owned(),
                tokio_serial::SerialPortType::Unknown => "n/a".to_owned(),
            };

            PortInfo {
                device: port.port_name,
                description: description,
            }
        })
        .collect())
}
