//! Line-oriented command/response exchanges over a byte stream

use std::{ io, time::Duration };
use log::debug;
use tokio::{
    io::{ AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt },
    time::Instant,
};
use tokio_serial::{ DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits };
use super::InstrumentError;

/// Opens a fresh connection to an instrument
///
/// Creating I/O handles is kept behind this trait so that an instrument is not tied to a local
/// RS232 line. A TCP serial bridge, or an in-memory pipe under test, works just as well.
pub trait PortOpener: Send + Sync
{
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    fn open(&self) -> Result<Self::Stream, InstrumentError>;

    /// Where this opener connects, for messages
    fn describe(&self) -> String;
}

/// A local serial port, 8 data bits, no parity, one stop bit, no flow control
#[derive(Debug, Clone)]
pub struct SerialOpener
{
    path: String,
    baud: u32,
}

impl SerialOpener
{
    pub fn new(path: &str, baud: u32) -> Self
    {
        Self {
            path: path.to_owned(),
            baud: baud,
        }
    }
}

impl PortOpener for SerialOpener
{
    type Stream = SerialStream;

    fn open(&self) -> Result<SerialStream, InstrumentError>
    {
        let stream = tokio_serial::new(self.path.as_str(), self.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()?;

        Ok(stream)
    }

    fn describe(&self) -> String
    {
        self.path.clone()
    }
}

/// Sends one command line and reads one reply line per connection
pub struct LineTransport<O>
{
    opener: O,
    line_ending: &'static str,
    timeout: Duration,
    write_settle: Duration,
}

impl <O> LineTransport<O>
    where O: PortOpener
{
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);
    /// Pause between writing a command and reading the reply. Some meters hand back truncated
    /// replies when read too eagerly.
    pub const DEFAULT_WRITE_SETTLE: Duration = Duration::from_millis(50);

    pub fn with(opener: O) -> Self
    {
        Self {
            opener: opener,
            line_ending: "\r\n",
            timeout: Self::DEFAULT_TIMEOUT,
            write_settle: Self::DEFAULT_WRITE_SETTLE,
        }
    }

    /// How long to wait for a complete reply line
    pub fn timeout(mut self, timeout: Duration) -> Self
    {
        self.timeout = timeout;
        self
    }

    pub fn write_settle(mut self, settle: Duration) -> Self
    {
        self.write_settle = settle;
        self
    }

    pub fn opener(&self) -> &O
    {
        &self.opener
    }

    /// Open the port, send `cmd`, and return the reply with surrounding whitespace stripped
    ///
    /// An empty read within the timeout is [`InstrumentError::NoResponse`]. A partial line is
    /// returned as-is for the caller to reject. The port is closed when this returns.
    pub async fn exchange(&self, cmd: &str) -> Result<String, InstrumentError>
    {
        let mut stream = self.opener.open()?;
        let tx = format!("{}{}", cmd, self.line_ending);

        debug!("> {:?}", tx);
        stream.write_all(tx.as_bytes()).await?;
        stream.flush().await?;

        if !self.write_settle.is_zero() {
            tokio::time::sleep(self.write_settle).await;
        }

        let rx = read_line(&mut stream, self.timeout).await?;
        debug!("< {:?}", String::from_utf8_lossy(&rx));

        if rx.is_empty() {
            return Err(InstrumentError::NoResponse { port: self.opener.describe() });
        }

        let reply = String::from_utf8(rx)
            .map_err(|err| InstrumentError::BadResponse(format!("not UTF-8: {}", err)))?;

        Ok(reply.trim().to_owned())
    }
}

/// Returns the index of the first linefeed in `read_buf` at or after `start_hint`
fn find_line_ending(read_buf: &[u8], start_hint: usize) -> Option<usize>
{
    read_buf
        .get(start_hint..)?
        .iter()
        .position(|byte| *byte == 0x0A)
        .map(|offset| start_hint + offset)
}

/// Reads up to and including the first linefeed, or whatever arrived before `timeout` passed or
/// the stream ended
async fn read_line<S>(stream: &mut S, timeout: Duration) -> Result<Vec<u8>, io::Error>
    where S: AsyncRead + Unpin
{
    let deadline = Instant::now() + timeout;
    let mut read_buf = Vec::with_capacity(64);
    let mut scanned = 0;

    loop {
        if let Some(end_index) = find_line_ending(&read_buf, scanned) {
            read_buf.truncate(end_index + 1);
            return Ok(read_buf);
        }

        scanned = read_buf.len();
        let mut temp_buf = [0u8; 64];

        match tokio::time::timeout_at(deadline, stream.read(&mut temp_buf[..])).await {
            Ok(Ok(0)) | Err(_) => return Ok(read_buf),
            Ok(Ok(bytes_read)) => read_buf.extend_from_slice(&temp_buf[..bytes_read]),
            Ok(Err(err)) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests
{
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use super::{ find_line_ending, read_line, LineTransport };
    use crate::instrument::{ fake::ScriptedOpener, InstrumentError };

    fn transport(opener: ScriptedOpener) -> LineTransport<ScriptedOpener>
    {
        LineTransport::with(opener)
            .timeout(Duration::from_millis(50))
            .write_settle(Duration::ZERO)
    }

    #[test]
    fn finds_linefeed_from_hint()
    {
        assert_eq!(find_line_ending(b"R1\r\n", 0), Some(3));
        assert_eq!(find_line_ending(b"a\nb\n", 2), Some(3));
        assert_eq!(find_line_ending(b"abc", 0), None);
        assert_eq!(find_line_ending(b"abc", 10), None);
    }

    #[tokio::test]
    async fn exchange_strips_reply()
    {
        let opener = ScriptedOpener::default().reply("R1", "  +1.2345 ");
        let transport = transport(opener.clone());

        assert_eq!(transport.exchange("R1").await.unwrap(), "+1.2345");
        assert_eq!(opener.sent(), vec!["R1".to_owned()]);
    }

    #[tokio::test]
    async fn each_exchange_reconnects()
    {
        let opener = ScriptedOpener::default().reply("RV", "1.02,6");
        let transport = transport(opener.clone());

        transport.exchange("RV").await.unwrap();
        transport.exchange("RV").await.unwrap();

        assert_eq!(opener.opens(), 2);
    }

    #[tokio::test]
    async fn silence_is_no_response()
    {
        let transport = transport(ScriptedOpener::default());

        match transport.exchange("R0").await {
            Err(InstrumentError::NoResponse { port }) => assert_eq!(port, "fake"),
            other => panic!("expected no response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn blank_line_is_an_empty_reply()
    {
        let transport = transport(ScriptedOpener::default().reply("R0", ""));
        assert_eq!(transport.exchange("R0").await.unwrap(), "");
    }

    #[tokio::test]
    async fn partial_line_returned_at_timeout()
    {
        let (mut host, mut device) = tokio::io::duplex(64);
        device.write_all(b"0012").await.unwrap();

        let line = read_line(&mut host, Duration::from_millis(20)).await.unwrap();
        assert_eq!(line, b"0012");

        device.write_all(b"34\r\nextra").await.unwrap();
        let line = read_line(&mut host, Duration::from_millis(20)).await.unwrap();
        assert_eq!(line, b"34\r\n");
    }
}
