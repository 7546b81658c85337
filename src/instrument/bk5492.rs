//! BK Precision 5491/5492 bench multimeter
//!
//! # Commands Used
//!   - `R0` status: mode flags, reading rate, and the primary display's function
//!   - `R1` primary display reading
//!   - `RV` firmware version and model code, e.g. `1.02,6`
//!   - `S100S` / `S110S` switch the primary display to DC / AC volts
//!
//! After a function change the meter needs several seconds to range and settle before `R1` returns
//! a meaningful reading. The driver skips the change, and the wait, when the meter is already in
//! the requested function.

use std::{
    fmt,
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use async_trait::async_trait;
use log::{ debug, info };
use crate::{
    capture::{ Args, Capture },
    decimal::Decimal,
};
use super::{
    transport::{ LineTransport, PortOpener, SerialOpener },
    Instrument, InstrumentError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode
{
    Single,
    Dual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingRate
{
    Slow,
    Medium,
    Fast,
}

/// Measurement function of the primary display, numbered as the meter reports them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function
{
    Vdc,
    Vac,
    Res2Wire,
    Res4Wire,
    Adc,
    Aac,
    Diode,
    Hz,
    Vacdc,
    Aacdc,
}

impl Function
{
    fn from_code(code: u32) -> Option<Self>
    {
        Some(match code {
            0 => Self::Vdc,
            1 => Self::Vac,
            2 => Self::Res2Wire,
            3 => Self::Res4Wire,
            4 => Self::Adc,
            5 => Self::Aac,
            6 => Self::Diode,
            7 => Self::Hz,
            8 => Self::Vacdc,
            9 => Self::Aacdc,
            _ => return None,
        })
    }

    /// Command selecting this function on the primary display, where the driver knows it
    fn select_cmd(&self) -> Option<&'static str>
    {
        match self {
            Self::Vdc => Some("S100S"),
            Self::Vac => Some("S110S"),
            _ => None,
        }
    }
}

/// Decoded reply to `R0`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status
{
    pub compare_mode: bool,
    pub relative_mode: bool,
    pub db_mode: bool,
    pub dbm_mode: bool,
    pub display_mode: DisplayMode,
    pub reading_rate: ReadingRate,
    pub function: Function,
}

fn bit_set(num: u8, pos: u8) -> bool
{
    num & (1 << pos) != 0
}

impl FromStr for Status
{
    type Err = InstrumentError;

    /// Reply layout: `HHGGVXF1[..]` where `HH` is a hex byte of mode flags, `X` the reading rate,
    /// and `F1` the primary function code. Replies are 8 or 10 characters.
    fn from_str(response: &str) -> Result<Self, Self::Err>
    {
        let bad = || InstrumentError::BadResponse(format!("BK5492 status {:?}", response));

        if !response.is_ascii() || ![8, 10].contains(&response.len()) {
            return Err(bad());
        }

        let flags = u8::from_str_radix(&response[0..2], 16).map_err(|_| bad())?;
        let reading_rate = match &response[5..6] {
            "S" => ReadingRate::Slow,
            "M" => ReadingRate::Medium,
            "F" => ReadingRate::Fast,
            _ => return Err(bad()),
        };
        let function = response[6..7]
            .parse::<u32>()
            .ok()
            .and_then(Function::from_code)
            .ok_or_else(bad)?;

        Ok(Self {
            compare_mode: bit_set(flags, 7),
            relative_mode: bit_set(flags, 6),
            db_mode: bit_set(flags, 5),
            dbm_mode: bit_set(flags, 4),
            display_mode: if bit_set(flags, 3) { DisplayMode::Dual } else { DisplayMode::Single },
            reading_rate: reading_rate,
            function: function,
        })
    }
}

/// What a capture bound to the meter reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measurement
{
    Vdc,
    MilliVdc,
    Vac,
    MilliVac,
}

impl fmt::Display for Measurement
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(match self {
            Self::Vdc => "V DC",
            Self::MilliVdc => "mV DC",
            Self::Vac => "V AC",
            Self::MilliVac => "mV AC",
        })
    }
}

/// A BK5491 or BK5492 on a serial line
pub struct Bk5492<O = SerialOpener>
{
    name: String,
    transport: LineTransport<O>,
    change_delay: Duration,
}

impl Bk5492<SerialOpener>
{
    pub const DEFAULT_BAUD: u32 = 9600;

    /// Meter on a local serial port at the factory baud rate
    pub fn on_port(name: &str, port: &str) -> Self
    {
        Self::with(name, LineTransport::with(SerialOpener::new(port, Self::DEFAULT_BAUD)))
    }
}

impl <O> Bk5492<O>
    where O: PortOpener + 'static
{
    pub const DEFAULT_CHANGE_DELAY: Duration = Duration::from_secs(5);

    pub fn with(name: &str, transport: LineTransport<O>) -> Self
    {
        Self {
            name: name.to_owned(),
            transport: transport,
            change_delay: Self::DEFAULT_CHANGE_DELAY,
        }
    }

    /// How long to let the meter settle after switching function
    pub fn change_delay(mut self, delay: Duration) -> Self
    {
        self.change_delay = delay;
        self
    }

    pub async fn status(&self) -> Result<Status, InstrumentError>
    {
        self.transport.exchange("R0").await?.parse()
    }

    async fn change_to(&self, function: Function) -> Result<(), InstrumentError>
    {
        let status = self.status().await?;

        if status.function == function {
            return Ok(());
        }

        let cmd = function
            .select_cmd()
            .ok_or_else(|| InstrumentError::BadResponse(format!("cannot select {:?}", function)))?;

        debug!("{}: switching from {:?} to {:?}", self.name, status.function, function);
        self.transport.exchange(cmd).await?;
        tokio::time::sleep(self.change_delay).await;
        Ok(())
    }

    pub async fn change_to_vdc(&self) -> Result<(), InstrumentError>
    {
        self.change_to(Function::Vdc).await
    }

    pub async fn change_to_vac(&self) -> Result<(), InstrumentError>
    {
        self.change_to(Function::Vac).await
    }

    async fn read_primary(&self) -> Result<Decimal, InstrumentError>
    {
        let response = self.transport.exchange("R1").await?;

        response
            .parse::<Decimal>()
            .map_err(|err| InstrumentError::BadResponse(format!("BK5492 reading {:?}: {}", response, err)))
    }

    pub async fn measure_vdc(&self) -> Result<Decimal, InstrumentError>
    {
        self.change_to_vdc().await?;
        self.read_primary().await
    }

    pub async fn measure_mvdc(&self) -> Result<Decimal, InstrumentError>
    {
        to_milli(self.measure_vdc().await?)
    }

    pub async fn measure_vac(&self) -> Result<Decimal, InstrumentError>
    {
        self.change_to_vac().await?;
        self.read_primary().await
    }

    pub async fn measure_mvac(&self) -> Result<Decimal, InstrumentError>
    {
        to_milli(self.measure_vac().await?)
    }

    pub async fn measure(&self, measurement: Measurement) -> Result<Decimal, InstrumentError>
    {
        let reading = match measurement {
            Measurement::Vdc => self.measure_vdc().await?,
            Measurement::MilliVdc => self.measure_mvdc().await?,
            Measurement::Vac => self.measure_vac().await?,
            Measurement::MilliVac => self.measure_mvac().await?,
        };

        info!("{}: measured {} {}", self.name, reading, measurement);
        Ok(reading)
    }

    /// A capture that takes `measurement` from this meter
    pub fn capture(self: &Arc<Self>, measurement: Measurement) -> Capture
    {
        let meter = Arc::clone(self);

        Capture::new_async(move |_: Args| {
            let meter = Arc::clone(&meter);
            async move { meter.measure(measurement).await }
        })
    }

    async fn version_fields(&self) -> Result<(String, String), InstrumentError>
    {
        let response = self.transport.exchange("RV").await?;
        let mut fields = response.split(',').map(str::trim);

        match (fields.next(), fields.next()) {
            (Some(firmware), Some(model)) => Ok((firmware.to_owned(), model.to_owned())),
            _ => Err(InstrumentError::BadResponse(format!("BK5492 version {:?}", response))),
        }
    }

    pub async fn firmware(&self) -> Result<String, InstrumentError>
    {
        Ok(self.version_fields().await?.0)
    }
}

/// Volts to millivolts, keeping the meter's resolution
fn to_milli(volts: Decimal) -> Result<Decimal, InstrumentError>
{
    volts
        .checked_mul(Decimal::from_int(1000))
        .ok_or_else(|| InstrumentError::BadResponse(format!("BK5492 reading {} out of range", volts)))
}

#[async_trait]
impl <O> Instrument for Bk5492<O>
    where O: PortOpener + 'static
{
    fn name(&self) -> &str
    {
        &self.name
    }

    async fn model(&self) -> Result<String, InstrumentError>
    {
        let (_, code) = self.version_fields().await?;

        match code.as_str() {
            "5" => Ok("BK5491".to_owned()),
            "6" => Ok("BK5492".to_owned()),
            other => Err(InstrumentError::BadResponse(format!("unknown BK549x model code {:?}", other))),
        }
    }
}
