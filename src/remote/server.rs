//! Single-client remote control transport.
//!
//! Non-blocking TCP with poll-driven reads, so the control thread's periodic
//! poll never stalls on the network. One peer at a time: while a client is
//! connected, further connection attempts are accepted and immediately shut,
//! refusing them at the transport layer.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

use crate::errors::RigError;
use crate::remote::protocol::{decode_command, encode_status, RemoteCommand, RemoteStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Disconnected,
    Listening,
    Connected,
}

struct ClientConn {
    stream: TcpStream,
    peer: SocketAddr,
    buf: Vec<u8>,
}

pub struct RemoteControlServer {
    listener: Option<TcpListener>,
    client: Option<ClientConn>,
}

impl RemoteControlServer {
    /// Bind and start listening (non-blocking).
    pub fn bind(host: &str, port: u16) -> Result<Self, RigError> {
        let listener = TcpListener::bind((host, port))
            .map_err(|e| RigError::Transport(format!("bind {host}:{port} failed: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| RigError::Transport(format!("set_nonblocking failed: {e}")))?;
        log::info!("remote control listening on {host}:{port}");
        Ok(Self {
            listener: Some(listener),
            client: None,
        })
    }

    pub fn state(&self) -> RemoteState {
        if self.client.is_some() {
            RemoteState::Connected
        } else if self.listener.is_some() {
            RemoteState::Listening
        } else {
            RemoteState::Disconnected
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.client.as_ref().map(|c| c.peer)
    }

    /// Accept a pending connection if any. Returns true when a new peer was
    /// accepted; sends the unsolicited ready message to it. A second peer
    /// while one is connected is shut immediately.
    pub fn poll_accept(&mut self) -> bool {
        let Some(listener) = &self.listener else {
            return false;
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                if self.client.is_some() {
                    log::warn!("refusing second remote client {peer}");
                    let _ = stream.shutdown(Shutdown::Both);
                    return false;
                }
                if let Err(e) = stream.set_nonblocking(true) {
                    log::error!("failed to set client non-blocking: {e}");
                    return false;
                }
                log::info!("remote client connected: {peer}");
                self.client = Some(ClientConn {
                    stream,
                    peer,
                    buf: Vec::new(),
                });
                if let Err(e) = self.send(RemoteStatus::StatusReady) {
                    log::error!("failed to greet remote client: {e}");
                }
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
            Err(e) => {
                log::error!("remote accept failed: {e}");
                false
            }
        }
    }

    /// Poll for one complete inbound message. Malformed lines are logged and
    /// skipped; transport failure or EOF drops the client back to Listening.
    pub fn poll_message(&mut self) -> Option<RemoteCommand> {
        let mut lost_client = false;
        {
            let client = self.client.as_mut()?;
            let mut chunk = [0u8; 1024];
            loop {
                match client.stream.read(&mut chunk) {
                    Ok(0) => {
                        log::info!("remote client {} closed the connection", client.peer);
                        lost_client = true;
                        break;
                    }
                    Ok(n) => {
                        client.buf.extend_from_slice(&chunk[..n]);
                        if client.buf.iter().any(|&b| b == b'\n') {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        log::error!("remote read failed: {e}");
                        lost_client = true;
                        break;
                    }
                }
            }
        }
        if lost_client {
            self.drop_client();
            return None;
        }

        // One message per poll; the rest stays buffered for the next tick.
        let client = self.client.as_mut()?;
        while let Some(pos) = client.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = client.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match decode_command(text) {
                Ok(cmd) => return Some(cmd),
                Err(e) => {
                    log::warn!("ignoring malformed remote message: {e}");
                }
            }
        }
        None
    }

    /// Send one status/response message to the connected peer.
    pub fn send(&mut self, status: RemoteStatus) -> Result<(), RigError> {
        let Some(client) = self.client.as_mut() else {
            return Err(RigError::Transport("no client connected".to_string()));
        };
        let line = encode_status(status);
        match client.stream.write_all(line.as_bytes()) {
            Ok(()) => Ok(()),
            Err(e) => {
                log::error!("remote send failed: {e}");
                self.drop_client();
                Err(RigError::Transport(format!("send failed: {e}")))
            }
        }
    }

    /// Drop the connected client, keep listening for the next one.
    pub fn drop_client(&mut self) {
        if let Some(client) = self.client.take() {
            log::info!("remote client {} disconnected", client.peer);
            let _ = client.stream.shutdown(Shutdown::Both);
        }
    }

    /// Full shutdown: drop the client and stop listening.
    pub fn close(&mut self) {
        self.drop_client();
        self.listener = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use std::time::{Duration, Instant};

    fn bound_server() -> (RemoteControlServer, SocketAddr) {
        let server = RemoteControlServer::bind("127.0.0.1", 0).unwrap();
        let addr = server.local_addr().unwrap();
        (server, addr)
    }

    fn accept_with_retry(server: &mut RemoteControlServer) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if server.poll_accept() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("no client accepted");
    }

    #[test]
    fn test_connect_receives_status_ready() {
        let (mut server, addr) = bound_server();
        assert_eq!(server.state(), RemoteState::Listening);

        let client = TcpStream::connect(addr).unwrap();
        accept_with_retry(&mut server);
        assert_eq!(server.state(), RemoteState::Connected);

        let mut reader = std::io::BufReader::new(client);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line.trim(), r#"{"type":"status_ready"}"#);
    }

    #[test]
    fn test_second_client_refused() {
        let (mut server, addr) = bound_server();
        let _first = TcpStream::connect(addr).unwrap();
        accept_with_retry(&mut server);

        let second = TcpStream::connect(addr).unwrap();
        // Let the pending connection land, then poll: it must be shut.
        std::thread::sleep(Duration::from_millis(50));
        assert!(!server.poll_accept());
        assert_eq!(server.state(), RemoteState::Connected);

        let mut reader = std::io::BufReader::new(second);
        let mut line = String::new();
        let n = reader.read_line(&mut line).unwrap();
        assert_eq!(n, 0, "refused client should see EOF, got {line:?}");
    }

    #[test]
    fn test_malformed_line_skipped_next_message_parsed() {
        let (mut server, addr) = bound_server();
        let mut client = TcpStream::connect(addr).unwrap();
        accept_with_retry(&mut server);

        client.write_all(b"garbage\n{\"type\":\"poll_status\"}\n").unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let cmd = server.poll_message();
        assert_eq!(cmd, Some(RemoteCommand::PollStatus));
        assert_eq!(server.state(), RemoteState::Connected);
    }

    #[test]
    fn test_client_close_returns_to_listening() {
        let (mut server, addr) = bound_server();
        let client = TcpStream::connect(addr).unwrap();
        accept_with_retry(&mut server);
        drop(client);

        let deadline = Instant::now() + Duration::from_secs(2);
        while server.state() == RemoteState::Connected && Instant::now() < deadline {
            let _ = server.poll_message();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(server.state(), RemoteState::Listening);
    }
}
