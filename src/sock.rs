#[cfg(test)] use mockall::automock;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Abstraction for the blocking byte-stream I/O underneath the protocol,
///  introduced to facilitate mocking the socket away for testing. Both
///  operations either transfer the whole buffer or fail.
#[cfg_attr(test, automock)]
pub trait WireSocket: Send + Sync {
    fn write_all(&self, buf: &[u8], timeout: Duration) -> anyhow::Result<()>;

    fn read_exact(&self, buf: &mut [u8], timeout: Duration) -> anyhow::Result<()>;
}

impl WireSocket for TcpStream {
    fn write_all(&self, buf: &[u8], timeout: Duration) -> anyhow::Result<()> {
        self.set_write_timeout(Some(timeout))?;
        let mut stream: &TcpStream = self;
        Write::write_all(&mut stream, buf)?;
        Ok(())
    }

    fn read_exact(&self, buf: &mut [u8], timeout: Duration) -> anyhow::Result<()> {
        self.set_read_timeout(Some(timeout))?;
        let mut stream: &TcpStream = self;
        Read::read_exact(&mut stream, buf)?;
        Ok(())
    }
}
