use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use slog::{debug, info, warn, Logger};
use suppaftp::{types::FileType, FtpError, FtpStream};

use super::TransportError;

const FTP_PORT: u16 = 21;

/// One anonymous FTP connection shared by every FTP product in a run.
///
/// suppaftp is blocking, so each transfer runs on the blocking pool while
/// holding the connection lock.
pub struct FtpSession {
    conn: Arc<Mutex<Option<Connection>>>,
    port: u16,
    timeout: Duration,
    log: Logger,
}

struct Connection {
    host: String,
    stream: FtpStream,
}

impl FtpSession {
    pub fn new(timeout: Duration, log: Logger) -> Self {
        Self {
            conn: Arc::new(Mutex::new(None)),
            port: FTP_PORT,
            timeout,
            log,
        }
    }

    pub async fn retrieve(
        &self,
        host: &str,
        directory: &str,
        file: &str,
    ) -> Result<Vec<u8>, TransportError> {
        let locator = format!("ftp://{}/{}/{}", host, directory.trim_matches('/'), file);
        let conn = Arc::clone(&self.conn);
        let (port, timeout) = (self.port, self.timeout);
        let log = self.log.clone();
        let (host, directory, file) = (host.to_string(), directory.to_string(), file.to_string());

        let task_locator = locator.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let result = transfer(&mut guard, &host, port, &directory, &file, timeout, &log);
            if result.is_err() {
                // A failed transfer can leave the control channel mid-reply.
                *guard = None;
            }
            result.map_err(|reason| TransportError::Ftp {
                locator: task_locator,
                reason,
            })
        })
        .await
        .map_err(|e| TransportError::Ftp {
            locator,
            reason: e.to_string(),
        })?
    }

    /// Sends QUIT on the open connection, if any.
    pub async fn close(&self) {
        let conn = Arc::clone(&self.conn);
        let log = self.log.clone();
        let closed = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(mut open) = guard.take() {
                if let Err(e) = open.stream.quit() {
                    warn!(log, "FTP QUIT to {} failed: {}", open.host, e);
                }
            }
        })
        .await;
        if let Err(e) = closed {
            warn!(self.log, "Closing FTP session failed: {}", e);
        }
    }
}

fn transfer(
    slot: &mut Option<Connection>,
    host: &str,
    port: u16,
    directory: &str,
    file: &str,
    timeout: Duration,
    log: &Logger,
) -> Result<Vec<u8>, String> {
    if slot.as_ref().is_some_and(|open| open.host != host) {
        if let Some(mut previous) = slot.take() {
            let _ = previous.stream.quit();
        }
    }
    if slot.is_none() {
        *slot = Some(connect(host, port, timeout, log)?);
    }
    let open = slot
        .as_mut()
        .ok_or_else(|| format!("no connection to {}", host))?;

    open.stream.cwd(directory).map_err(|e| e.to_string())?;
    let buffer = open
        .stream
        .retr_as_buffer(file)
        .map_err(|e| e.to_string())?;
    let bytes = buffer.into_inner();
    debug!(log, "Retrieved {} bytes of {}/{}", bytes.len(), directory, file);
    Ok(bytes)
}

fn connect(host: &str, port: u16, timeout: Duration, log: &Logger) -> Result<Connection, String> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| e.to_string())?
        .next()
        .ok_or_else(|| format!("{} did not resolve", host))?;

    // Data connections get the same bounds as the control connection.
    let mut stream = FtpStream::connect_timeout(addr, timeout)
        .map_err(|e| e.to_string())?
        .passive_stream_builder(move |addr| {
            data_stream(SocketAddr::clone(&addr), timeout).map_err(FtpError::ConnectionError)
        });
    stream
        .get_ref()
        .set_read_timeout(Some(timeout))
        .map_err(|e| e.to_string())?;
    stream
        .get_ref()
        .set_write_timeout(Some(timeout))
        .map_err(|e| e.to_string())?;
    stream
        .login("anonymous", "anonymous")
        .map_err(|e| e.to_string())?;
    stream
        .transfer_type(FileType::Binary)
        .map_err(|e| e.to_string())?;

    info!(log, "Opened FTP session to {}", host);
    Ok(Connection {
        host: host.to_string(),
        stream,
    })
}

fn data_stream(addr: SocketAddr, timeout: Duration) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    Ok(stream)
}
