//! Serial port abstraction. [`SerialPort`] is the trait the facade is
//! generic over, so tests can swap in an in-process loopback pipe instead
//! of touching a real tty; [`RealSerialPort`] is the `serialport`-backed
//! implementation used outside of tests.

use std::io;
use std::time::Duration;

pub trait SerialPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn set_dtr(&mut self, level: bool) -> io::Result<()>;
    fn set_rts(&mut self, level: bool) -> io::Result<()>;
}

#[cfg(feature = "std")]
pub struct RealSerialPort {
    inner: Box<dyn serialport::SerialPort>,
}

#[cfg(feature = "std")]
impl RealSerialPort {
    pub fn open(tty: &str, baud: u32, timeout: Duration) -> Result<Self, crate::error::HostError> {
        let inner = serialport::new(tty, baud)
            .timeout(timeout)
            .open()
            .map_err(|e| crate::error::HostError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        Ok(RealSerialPort { inner })
    }
}

#[cfg(feature = "std")]
impl SerialPort for RealSerialPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut self.inner, buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match io::Read::read(&mut self.inner, buf) {
            Ok(n) => Ok(n),
            // A timed-out read with nothing available is "no bytes yet",
            // not an error, from the facade's point of view.
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.inner
            .write_data_terminal_ready(level)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn set_rts(&mut self, level: bool) -> io::Result<()> {
        self.inner
            .write_request_to_send(level)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}
