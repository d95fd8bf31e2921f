//! Connections to the master's registration socket.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

#[cfg(unix)]
use socket2::{Domain, SockAddr, Socket, Type};

/// Registration socket address as handed to plugins in `PARKER_SOCKET`.
///
/// A value of the form `host:port` with a numeric port selects TCP; anything
/// else is treated as a Unix domain socket path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationSocket {
    /// Unix domain socket path.
    Unix(PathBuf),
    /// TCP address.
    Tcp {
        /// Host name or IP literal.
        host: String,
        /// Port number.
        port: u16,
    },
}

impl RegistrationSocket {
    /// Interprets a `PARKER_SOCKET` value.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.contains('/') {
            return Self::Unix(PathBuf::from(trimmed));
        }
        match trimmed.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => match port.parse::<u16>() {
                Ok(port) => Self::Tcp {
                    host: host.trim_start_matches('[').trim_end_matches(']').to_owned(),
                    port,
                },
                Err(_) => Self::Unix(PathBuf::from(trimmed)),
            },
            _ => Self::Unix(PathBuf::from(trimmed)),
        }
    }

    pub(crate) fn connect(&self, timeout: Duration) -> io::Result<Connection> {
        match self {
            Self::Tcp { host, port } => {
                let address = resolve(host, *port)?;
                TcpStream::connect_timeout(&address, timeout).map(Connection::Tcp)
            }
            Self::Unix(path) => connect_unix(path, timeout),
        }
    }
}

impl fmt::Display for RegistrationSocket {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(formatter, "{}", path.display()),
            Self::Tcp { host, port } if host.contains(':') => write!(formatter, "[{host}]:{port}"),
            Self::Tcp { host, port } => write!(formatter, "{host}:{port}"),
        }
    }
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"))
}

#[cfg(unix)]
fn connect_unix(path: &std::path::Path, timeout: Duration) -> io::Result<Connection> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    socket.connect_timeout(&address, timeout)?;
    Ok(Connection::Unix(UnixStream::from(std::os::fd::OwnedFd::from(socket))))
}

#[cfg(not(unix))]
fn connect_unix(path: &std::path::Path, _timeout: Duration) -> io::Result<Connection> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("unix sockets are unavailable: {}", path.display()),
    ))
}

/// Stream connected to the registration socket.
#[derive(Debug)]
pub(crate) enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Connection {
    pub(crate) fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_read_timeout(timeout),
            #[cfg(unix)]
            Self::Unix(stream) => stream.set_read_timeout(timeout),
        }
    }

    pub(crate) fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_write_timeout(timeout),
            #[cfg(unix)]
            Self::Unix(stream) => stream.set_write_timeout(timeout),
        }
    }

    pub(crate) fn close(&self) {
        let result = match self {
            Self::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        if let Err(error) = result
            && error.kind() != io::ErrorKind::NotConnected
        {
            tracing::debug!(%error, "failed to close registration connection");
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}
