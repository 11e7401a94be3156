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

//! An in-process monitor server backed by a sparse register map.
//!
//! [`MockMonitorServer`] speaks exactly the protocol the board's monitor server does, so a
//! [`MonitorClient`](crate::client::MonitorClient) cannot tell the difference. Words that were
//! never written read as zero. Faults can be injected to exercise the client's recovery paths.

use crate::client::Opcode;
use crate::error::StemlabError;
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Default)]
struct ServerState {
    registers: Mutex<HashMap<u32, u32>>,
    corrupt_echoes: AtomicUsize,
    drop_connections: AtomicUsize,
    chunk_size: AtomicUsize,
    connections: AtomicUsize,
    headers: AtomicUsize,
    closes: AtomicUsize,
}

impl ServerState {
    fn registers(&self) -> MutexGuard<'_, HashMap<u32, u32>> {
        // a panicking connection thread must not take the whole simulator down
        self.registers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub struct MockMonitorServer {
    port: u16,
    state: Arc<ServerState>,
    stop: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl MockMonitorServer {
    /// Start a simulator on an ephemeral localhost port.
    pub fn start() -> Result<MockMonitorServer, StemlabError> {
        MockMonitorServer::bind("127.0.0.1:0")
    }

    /// Start a simulator listening on `address`.
    pub fn bind(address: &str) -> Result<MockMonitorServer, StemlabError> {
        let listener = TcpListener::bind(address).map_err(|e| StemlabError::Io {
            context: format!("binding simulator to {address}"),
            e,
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| StemlabError::Io {
                context: "querying simulator address".into(),
                e,
            })?
            .port();
        let state = Arc::new(ServerState::default());
        let stop = Arc::new(AtomicBool::new(false));
        let acceptor = {
            let state = state.clone();
            let stop = stop.clone();
            thread::spawn(move || accept_loop(listener, state, stop))
        };
        info!("Register simulator listening on port {port}");
        Ok(MockMonitorServer {
            port,
            state,
            stop,
            acceptor: Some(acceptor),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn set_register(&self, address: u32, value: u32) {
        self.state.registers().insert(address, value);
    }

    pub fn register(&self, address: u32) -> u32 {
        self.state
            .registers()
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    /// Answer the next `count` requests with a corrupted echo header.
    pub fn corrupt_next_echoes(&self, count: usize) {
        self.state.corrupt_echoes.store(count, Ordering::SeqCst);
    }

    /// Close the next `count` connections right after receiving a request header.
    pub fn drop_next_connections(&self, count: usize) {
        self.state.drop_connections.store(count, Ordering::SeqCst);
    }

    /// Send responses in pieces of `size` bytes. 0 sends each response in one piece.
    pub fn answer_in_chunks(&self, size: usize) {
        self.state.chunk_size.store(size, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn headers_received(&self) -> usize {
        self.state.headers.load(Ordering::SeqCst)
    }

    pub fn closes_received(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }
}

impl Drop for MockMonitorServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // wake the acceptor up so it can see the stop flag
        let _ = TcpStream::connect(("127.0.0.1", self.port));
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
    }
}

fn accept_loop(listener: TcpListener, state: Arc<ServerState>, stop: Arc<AtomicBool>) {
    for stream in listener.incoming() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                state.connections.fetch_add(1, Ordering::SeqCst);
                let state = state.clone();
                thread::spawn(move || {
                    if let Err(e) = serve(stream, &state) {
                        debug!("Simulator connection ended: {e}");
                    }
                });
            }
            Err(e) => warn!("Simulator failed to accept a connection: {e}"),
        }
    }
}

fn serve(mut stream: TcpStream, state: &ServerState) -> std::io::Result<()> {
    loop {
        let mut request = [0u8; 8];
        stream.read_exact(&mut request)?;
        state.headers.fetch_add(1, Ordering::SeqCst);
        if take_one(&state.drop_connections) {
            trace!("Simulator dropping connection");
            return stream.shutdown(Shutdown::Both);
        }
        let length = u16::from_le_bytes([request[2], request[3]]) as u32;
        let address = u32::from_le_bytes([request[4], request[5], request[6], request[7]]);
        let mut echo = request;
        if take_one(&state.corrupt_echoes) {
            echo[4] ^= 0xFF;
        }
        let mut response = echo.to_vec();
        match Opcode::from_byte(request[0]) {
            Some(Opcode::Read) => {
                let registers = state.registers();
                for i in 0..length {
                    let word = registers
                        .get(&address.wrapping_add(4 * i))
                        .copied()
                        .unwrap_or_default();
                    response.extend_from_slice(&word.to_le_bytes());
                }
            }
            Some(Opcode::Write) => {
                let mut payload = vec![0u8; 4 * length as usize];
                stream.read_exact(&mut payload)?;
                let mut registers = state.registers();
                for (i, word) in payload.chunks_exact(4).enumerate() {
                    let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                    registers.insert(address.wrapping_add(4 * i as u32), value);
                }
            }
            Some(Opcode::Close) => {
                state.closes.fetch_add(1, Ordering::SeqCst);
                return stream.shutdown(Shutdown::Both);
            }
            None => {
                warn!("Simulator received unknown opcode 0x{:02X}", request[0]);
                return stream.shutdown(Shutdown::Both);
            }
        }
        send(&mut stream, &response, state.chunk_size.load(Ordering::SeqCst))?;
    }
}

fn send(stream: &mut TcpStream, response: &[u8], chunk_size: usize) -> std::io::Result<()> {
    if chunk_size == 0 {
        return stream.write_all(response);
    }
    for chunk in response.chunks(chunk_size) {
        stream.write_all(chunk)?;
        stream.flush()?;
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::MockMonitorServer;
    use crate::client::{Opcode, header};
    use googletest::prelude::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    #[gtest]
    fn answers_raw_frames() {
        let server = MockMonitorServer::start().expect("failed to start simulator");
        server.set_register(0x204, 48);
        let mut stream =
            TcpStream::connect(("127.0.0.1", server.port())).expect("failed to connect");
        let request = header(Opcode::Read, 2, 0x200);
        stream.write_all(&request).expect("failed to send");
        let mut response = [0u8; 16];
        stream.read_exact(&mut response).expect("failed to receive");
        let payload = 48u32.to_le_bytes();
        assert_that!(&response[..8], eq(&request));
        assert_that!(&response[8..12], eq(&[0, 0, 0, 0]));
        assert_that!(&response[12..16], eq(&payload));
    }

    #[gtest]
    fn counts_close_sentinels() {
        let server = MockMonitorServer::start().expect("failed to start simulator");
        let mut stream =
            TcpStream::connect(("127.0.0.1", server.port())).expect("failed to connect");
        stream
            .write_all(&header(Opcode::Close, 0, 0))
            .expect("failed to send");
        let mut rest = Vec::new();
        // the server hangs up after a close sentinel
        let _ = stream.read_to_end(&mut rest);
        assert!(rest.is_empty());
        assert_that!(server.closes_received(), eq(1));
    }
}
