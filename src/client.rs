// This file is part of stemlabd, an application to drive the signal-processing modules of a StemLab FPGA board over the network.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// stemlabd is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// stemlabd is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! Register access over the monitor server's TCP protocol.
//!
//! Every transaction is a strict request/response exchange on one socket:
//!
//! ```text
//! request   [op, 0x00, len_lo, len_hi, addr_b0, addr_b1, addr_b2, addr_b3] (+ len*4 bytes for 'w')
//! response  <8-byte echo of the request header>                         (+ len*4 bytes for 'r')
//! ```
//!
//! The echo is the only synchronisation the protocol has, so a [`MonitorClient`] holds one
//! exclusive lock for the whole round trip and treats any echo mismatch as a desync: the socket
//! is drained and the attempt fails. Socket errors and desyncs are retried up to
//! [`MAX_ATTEMPTS`] times, reconnecting through a [`ReconnectService`] after socket errors.

use crate::error::StemlabError;
use log::{debug, error, info, trace, warn};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Number of attempts a transaction gets before it is reported as unavailable.
pub const MAX_ATTEMPTS: usize = 5;
/// Timeout of every blocking socket call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
/// Largest number of words a single read can request.
pub const MAX_READ_LENGTH: usize = 65535;
/// Largest number of words a single write can carry. Longer payloads are truncated.
pub const MAX_WRITE_LENGTH: usize = 65533;

const DRAIN_ITERATIONS: usize = 100;
const DRAIN_CHUNK: usize = 16384;
const DRAIN_TIMEOUT: Duration = Duration::from_millis(50);

/// Operation codes understood by the monitor server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Read,
    Write,
    Close,
}

impl Opcode {
    pub fn byte(self) -> u8 {
        match self {
            Opcode::Read => b'r',
            Opcode::Write => b'w',
            Opcode::Close => b'c',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Opcode> {
        match byte {
            b'r' => Some(Opcode::Read),
            b'w' => Some(Opcode::Write),
            b'c' => Some(Opcode::Close),
            _ => None,
        }
    }
}

/// Build the 8-byte request header.
pub fn header(opcode: Opcode, length: u16, address: u32) -> [u8; 8] {
    let [len_lo, len_hi] = length.to_le_bytes();
    let [a0, a1, a2, a3] = address.to_le_bytes();
    [opcode.byte(), 0, len_lo, len_hi, a0, a1, a2, a3]
}

/// Hands out a port to reconnect to after a socket error, or `None` when reconnecting is hopeless.
pub trait ReconnectService: Send + Sync {
    fn reconnect(&self) -> Option<u16>;
}

impl<F> ReconnectService for F
where
    F: Fn() -> Option<u16> + Send + Sync,
{
    fn reconnect(&self) -> Option<u16> {
        self()
    }
}

/// Always reconnect to the same port.
#[derive(Debug, Clone, Copy)]
pub struct FixedPort(pub u16);

impl ReconnectService for FixedPort {
    fn reconnect(&self) -> Option<u16> {
        Some(self.0)
    }
}

/// Cycle through a list of ports, e.g. servers restarted on alternative ports.
#[derive(Debug)]
pub struct PortRotation {
    ports: Vec<u16>,
    next: AtomicUsize,
}

impl PortRotation {
    pub fn new(ports: Vec<u16>) -> PortRotation {
        PortRotation {
            ports,
            next: AtomicUsize::new(0),
        }
    }
}

impl ReconnectService for PortRotation {
    fn reconnect(&self) -> Option<u16> {
        if self.ports.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.ports.len();
        Some(self.ports[index])
    }
}

struct Session {
    port: u16,
    stream: Option<TcpStream>,
}

/// One TCP session to a monitor server.
pub struct MonitorClient {
    host: String,
    client_number: u64,
    timeout: Duration,
    reconnect: Option<Arc<dyn ReconnectService>>,
    session: Mutex<Session>,
    // second handle to the live socket so that `interrupt` does not need the session lock
    interrupter: Mutex<Option<TcpStream>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

fn io_error(context: impl Into<String>, e: std::io::Error) -> StemlabError {
    StemlabError::Io {
        context: context.into(),
        e,
    }
}

fn open_stream(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, StemlabError> {
    let address = (host, port)
        .to_socket_addrs()
        .map_err(|e| io_error(format!("resolving {host}:{port}"), e))?
        .next()
        .ok_or_else(|| StemlabError::Connection(format!("{host}:{port} did not resolve")))?;
    let stream = TcpStream::connect_timeout(&address, timeout)
        .map_err(|e| io_error(format!("connecting to {address}"), e))?;
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|_| stream.set_write_timeout(Some(timeout)))
        .and_then(|_| stream.set_nodelay(true))
        .map_err(|e| io_error(format!("configuring socket to {address}"), e))?;
    Ok(stream)
}

/// Discard whatever the server still has in flight after a desync.
fn drain(stream: &mut TcpStream, timeout: Duration) -> Result<usize, StemlabError> {
    stream
        .set_read_timeout(Some(DRAIN_TIMEOUT))
        .map_err(|e| io_error("shortening timeout for draining", e))?;
    let mut buf = vec![0u8; DRAIN_CHUNK];
    let mut drained = 0;
    for _ in 0..DRAIN_ITERATIONS {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => drained += n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
            Err(e) => return Err(io_error("draining socket", e)),
        }
    }
    stream
        .set_read_timeout(Some(timeout))
        .map_err(|e| io_error("restoring socket timeout", e))?;
    Ok(drained)
}

impl MonitorClient {
    /// Open a session to `host:port`.
    ///
    /// The initial connection gets the same attempt budget as a transaction; between attempts
    /// the reconnect service, if any, is asked for a new port.
    ///
    /// # Returns: `Result<MonitorClient, StemlabError>`
    /// * `Ok(MonitorClient)` - Connected client
    /// * `Err(StemlabError::Connection)` - No attempt succeeded or the reconnect service gave up
    pub fn connect(
        host: &str,
        mut port: u16,
        client_number: u64,
        timeout: Duration,
        reconnect: Option<Arc<dyn ReconnectService>>,
    ) -> Result<MonitorClient, StemlabError> {
        for attempt in 1..=MAX_ATTEMPTS {
            match open_stream(host, port, timeout) {
                Ok(stream) => {
                    debug!("Client {client_number} connected to {host}:{port}");
                    let interrupter = stream.try_clone().ok();
                    return Ok(MonitorClient {
                        host: host.to_string(),
                        client_number,
                        timeout,
                        reconnect,
                        session: Mutex::new(Session {
                            port,
                            stream: Some(stream),
                        }),
                        interrupter: Mutex::new(interrupter),
                        reads: AtomicU64::new(0),
                        writes: AtomicU64::new(0),
                    });
                }
                Err(e) => {
                    warn!("Client {client_number}: attempt {attempt}/{MAX_ATTEMPTS} failed: {e}");
                    if attempt == MAX_ATTEMPTS {
                        break;
                    }
                    if let Some(service) = &reconnect {
                        port = service.reconnect().ok_or_else(|| {
                            StemlabError::Connection(format!(
                                "Client {client_number}: reconnect service could not provide a port"
                            ))
                        })?;
                    }
                }
            }
        }
        Err(StemlabError::Connection(format!(
            "Client {client_number} could not connect to {host} after {MAX_ATTEMPTS} attempts"
        )))
    }

    pub fn client_number(&self) -> u64 {
        self.client_number
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port of the current session.
    pub fn port(&self) -> Result<u16, StemlabError> {
        Ok(self.session()?.port)
    }

    /// Number of completed read transactions.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of completed write transactions.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn session(&self) -> Result<MutexGuard<'_, Session>, StemlabError> {
        self.session.lock().map_err(|e| {
            StemlabError::Internal(format!(
                "Client {}: session lock poisoned: {e}",
                self.client_number
            ))
        })
    }

    /// Read `length` consecutive words starting at `address`.
    ///
    /// `length` is clamped to [`MAX_READ_LENGTH`].
    ///
    /// # Returns: `Result<Vec<u32>, StemlabError>`
    /// * `Ok(Vec<u32>)` - The words, exactly `length` of them
    /// * `Err(StemlabError::Unavailable)` - All attempts failed
    /// * `Err(StemlabError::Connection)` - The reconnect service gave up
    pub fn read(&self, address: u32, length: usize) -> Result<Vec<u32>, StemlabError> {
        if length > MAX_READ_LENGTH {
            warn!(
                "Client {}: read of {length} words clamped to {MAX_READ_LENGTH}",
                self.client_number
            );
        }
        let length = length.min(MAX_READ_LENGTH);
        let request = header(Opcode::Read, length as u16, address);
        let timeout = self.timeout;
        let words = self.transact(address, |stream| {
            trace!("Reading {length} words from 0x{address:08X}");
            stream
                .write_all(&request)
                .map_err(|e| io_error(format!("sending read request for 0x{address:08X}"), e))?;
            // read_exact keeps reading until the full frame is in, however it was segmented
            let mut response = vec![0u8; 8 + 4 * length];
            stream
                .read_exact(&mut response)
                .map_err(|e| io_error(format!("receiving words from 0x{address:08X}"), e))?;
            check_echo(stream, &request, &response[..8], timeout)?;
            Ok(response[8..]
                .chunks_exact(4)
                .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
                .collect::<Vec<u32>>())
        })?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(words)
    }

    /// Write `values` to consecutive words starting at `address`.
    ///
    /// Payloads longer than [`MAX_WRITE_LENGTH`] words are truncated with a warning.
    pub fn write(&self, address: u32, values: &[u32]) -> Result<(), StemlabError> {
        if values.len() > MAX_WRITE_LENGTH {
            warn!(
                "Client {}: write of {} words truncated to {MAX_WRITE_LENGTH}",
                self.client_number,
                values.len()
            );
        }
        let values = &values[..values.len().min(MAX_WRITE_LENGTH)];
        let request = header(Opcode::Write, values.len() as u16, address);
        let mut frame = Vec::with_capacity(8 + 4 * values.len());
        frame.extend_from_slice(&request);
        for value in values {
            frame.extend_from_slice(&value.to_le_bytes());
        }
        let timeout = self.timeout;
        self.transact(address, |stream| {
            trace!("Writing {} words to 0x{address:08X}", values.len());
            stream
                .write_all(&frame)
                .map_err(|e| io_error(format!("sending words to 0x{address:08X}"), e))?;
            let mut echo = [0u8; 8];
            stream
                .read_exact(&mut echo)
                .map_err(|e| io_error(format!("receiving write echo for 0x{address:08X}"), e))?;
            check_echo(stream, &request, &echo, timeout)
        })?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn transact<T>(
        &self,
        address: u32,
        mut exchange: impl FnMut(&mut TcpStream) -> Result<T, StemlabError>,
    ) -> Result<T, StemlabError> {
        let mut session = self.session()?;
        for attempt in 1..=MAX_ATTEMPTS {
            let result = match session.stream.as_mut() {
                Some(stream) => exchange(stream),
                None => Err(io_error(
                    "using the connection",
                    std::io::Error::from(ErrorKind::NotConnected),
                )),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e @ StemlabError::Desync { .. }) => {
                    warn!(
                        "Client {}: {e} (attempt {attempt}/{MAX_ATTEMPTS})",
                        self.client_number
                    );
                }
                Err(e) if e.is_transport() => {
                    error!(
                        "Client {}: {e} (attempt {attempt}/{MAX_ATTEMPTS})",
                        self.client_number
                    );
                    if attempt < MAX_ATTEMPTS {
                        self.reopen(&mut session)?;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(StemlabError::Unavailable {
            address,
            attempts: MAX_ATTEMPTS,
        })
    }

    fn reopen(&self, session: &mut Session) -> Result<(), StemlabError> {
        if let Some(stream) = session.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        let port = match &self.reconnect {
            Some(service) => service.reconnect().ok_or_else(|| {
                StemlabError::Connection(format!(
                    "Client {}: reconnect service could not provide a port",
                    self.client_number
                ))
            })?,
            None => session.port,
        };
        if port != session.port {
            info!(
                "Client {}: switching from port {} to {port}",
                self.client_number, session.port
            );
        }
        session.port = port;
        match open_stream(&self.host, port, self.timeout) {
            Ok(stream) => {
                if let Ok(mut interrupter) = self.interrupter.lock() {
                    *interrupter = stream.try_clone().ok();
                }
                session.stream = Some(stream);
            }
            // the next attempt fails on the missing stream and lands here again
            Err(e) => warn!("Client {}: {e}", self.client_number),
        }
        Ok(())
    }

    /// Shut the live socket down from another thread.
    ///
    /// A transaction blocked on the socket fails immediately and goes through the retry path.
    pub fn interrupt(&self) {
        if let Ok(interrupter) = self.interrupter.lock() {
            if let Some(stream) = interrupter.as_ref() {
                info!("Client {}: interrupting connection", self.client_number);
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }

    /// Tell the server this session is over and close the socket. Errors are ignored.
    pub fn close(&self) {
        let mut session = match self.session.lock() {
            Ok(session) => session,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(mut stream) = session.stream.take() {
            let _ = stream.write_all(&header(Opcode::Close, 0, 0));
            let _ = stream.shutdown(Shutdown::Both);
            debug!("Client {} closed", self.client_number);
        }
        if let Ok(mut interrupter) = self.interrupter.lock() {
            interrupter.take();
        }
    }
}

fn check_echo(
    stream: &mut TcpStream,
    request: &[u8; 8],
    echo: &[u8],
    timeout: Duration,
) -> Result<(), StemlabError> {
    if echo == request {
        return Ok(());
    }
    let mut received = [0u8; 8];
    received.copy_from_slice(echo);
    let drained = drain(stream, timeout)?;
    debug!("Drained {drained} bytes after desync");
    Err(StemlabError::Desync {
        expected: *request,
        received,
    })
}

impl Drop for MonitorClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Creates connections to one board and numbers them.
///
/// A board can be shared by several clients on different ports (master and slaves); each gets
/// the next client number from the factory that created it.
pub struct ConnectionFactory {
    host: String,
    timeout: Duration,
    reconnect: Option<Arc<dyn ReconnectService>>,
    next_client_number: AtomicU64,
}

impl ConnectionFactory {
    pub fn new(
        host: &str,
        timeout: Duration,
        reconnect: Option<Arc<dyn ReconnectService>>,
    ) -> ConnectionFactory {
        ConnectionFactory {
            host: host.to_string(),
            timeout,
            reconnect,
            next_client_number: AtomicU64::new(0),
        }
    }

    pub fn connect(&self, port: u16) -> Result<MonitorClient, StemlabError> {
        let client_number = self.next_client_number.fetch_add(1, Ordering::Relaxed);
        MonitorClient::connect(
            &self.host,
            port,
            client_number,
            self.timeout,
            self.reconnect.clone(),
        )
    }

    /// How many connections this factory has handed out.
    pub fn clients_created(&self) -> u64 {
        self.next_client_number.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use rstest::*;

    #[gtest]
    #[rstest]
    #[case::read(Opcode::Read, 4, 0x100, [b'r', 0, 4, 0, 0x00, 0x01, 0, 0])]
    #[case::write(Opcode::Write, 0x1234, 0x40308000, [b'w', 0, 0x34, 0x12, 0x00, 0x80, 0x30, 0x40])]
    #[case::close(Opcode::Close, 0, 0, [b'c', 0, 0, 0, 0, 0, 0, 0])]
    fn builds_header(
        #[case] opcode: Opcode,
        #[case] length: u16,
        #[case] address: u32,
        #[case] expected: [u8; 8],
    ) {
        assert_that!(header(opcode, length, address), eq(expected));
    }

    #[gtest]
    fn opcodes_round_trip_through_bytes() {
        for opcode in [Opcode::Read, Opcode::Write, Opcode::Close] {
            assert_that!(Opcode::from_byte(opcode.byte()), eq(Some(opcode)));
        }
        assert_that!(Opcode::from_byte(b'x'), none());
    }

    #[gtest]
    fn port_rotation_cycles() {
        let rotation = PortRotation::new(vec![2222, 2223]);
        let ports: Vec<Option<u16>> = (0..3).map(|_| rotation.reconnect()).collect();
        assert_that!(ports, eq(&vec![Some(2222), Some(2223), Some(2222)]));
        assert_that!(PortRotation::new(vec![]).reconnect(), none());
    }

    #[gtest]
    fn closures_are_reconnect_services() {
        let service: Arc<dyn ReconnectService> = Arc::new(|| Some(2224));
        assert_that!(service.reconnect(), eq(Some(2224)));
        assert_that!(FixedPort(2222).reconnect(), eq(Some(2222)));
    }

    #[gtest]
    fn connect_to_nothing_fails_with_connection_error() {
        // bind then drop to get a port nobody listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|listener| listener.local_addr())
            .map(|address| address.port())
            .expect("failed to find a free port");
        let result = MonitorClient::connect(
            "127.0.0.1",
            port,
            0,
            Duration::from_millis(100),
            None,
        );
        let Err(e) = result else {
            panic!("connected to a port nobody listens on");
        };
        assert_that!(e.to_string(), contains_substring("StemlabError::Connection"));
    }

    #[gtest]
    fn reconnect_service_giving_up_is_fatal() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|listener| listener.local_addr())
            .map(|address| address.port())
            .expect("failed to find a free port");
        let service: Arc<dyn ReconnectService> = Arc::new(|| None);
        let result = MonitorClient::connect(
            "127.0.0.1",
            port,
            3,
            Duration::from_millis(100),
            Some(service),
        );
        let Err(e) = result else {
            panic!("connected to a port nobody listens on");
        };
        assert_that!(
            e.to_string(),
            contains_substring("reconnect service could not provide a port")
        );
    }

    #[gtest]
    fn initial_connect_moves_to_the_next_port() {
        let server = crate::simulator::MockMonitorServer::start().expect("failed to start simulator");
        let dead_port = std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|listener| listener.local_addr())
            .map(|address| address.port())
            .expect("failed to find a free port");
        let live_port = server.port();
        let service: Arc<dyn ReconnectService> = Arc::new(move || Some(live_port));
        let client = MonitorClient::connect(
            "127.0.0.1",
            dead_port,
            4,
            Duration::from_millis(100),
            Some(service),
        )
        .expect("failed to connect through the reconnect service");
        assert_that!(client.read(0x100, 1), ok(eq(&vec![0])));
        assert_that!(server.connections(), eq(1));
    }
}
