//! Hardware trigger controller.
//!
//! Drives a serial-attached pulse generator so all cameras expose in
//! lock-step with the configured frame rate. One I/O thread owns the serial
//! link: it services queued commands (start/stop/ping) and parses inbound
//! `<TYPE>_<PAYLOAD>` lines between them. A `PONG` reply flips a liveness
//! indicator that auto-resets after a fixed delay; this is a coarse device
//! heartbeat, not a per-frame acknowledgment.
//!
//! Stopping the pulse is not instantaneous: `is_pulsing` stays set until the
//! I/O thread has actually put the STOP command on the wire, and the
//! orchestrator polls it before tearing the pipeline down.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::config::TriggerConfig;

/// Transport seam: production uses a serial port, tests an in-memory link.
pub trait SerialLink: Send {
    fn write_line(&mut self, line: &str) -> std::io::Result<()>;

    /// Poll for one inbound line; `Ok(None)` on timeout.
    fn read_line(&mut self, timeout: Duration) -> std::io::Result<Option<String>>;
}

/// `SerialLink` over a real serial port (8N1, short read timeout).
pub struct SerialPortLink {
    port: Box<dyn serialport::SerialPort>,
    buf: Vec<u8>,
}

impl SerialPortLink {
    pub fn open(name: &str, baud_rate: u32) -> std::io::Result<Self> {
        let port = serialport::new(name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(Self {
            port,
            buf: Vec::new(),
        })
    }
}

impl SerialLink for SerialPortLink {
    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()
    }

    fn read_line(&mut self, _timeout: Duration) -> std::io::Result<Option<String>> {
        // The port's own timeout bounds this read.
        let mut chunk = [0u8; 64];
        match self.port.read(&mut chunk) {
            Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
        if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).trim().to_string();
            return Ok(Some(text));
        }
        Ok(None)
    }
}

/// List system serial port names, for port selection UIs.
pub fn scan_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            log::warn!("serial port scan failed: {e}");
            Vec::new()
        }
    }
}

enum Command {
    Start { fps: f64 },
    Stop,
    Ping,
    Shutdown,
}

struct Shared {
    pulsing: AtomicBool,
    alive: AtomicBool,
    open: AtomicBool,
}

pub struct TriggerController {
    config: TriggerConfig,
    port_name: Option<String>,
    shared: Arc<Shared>,
    tx: Option<Sender<Command>>,
    io_thread: Option<JoinHandle<()>>,
}

impl TriggerController {
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            config,
            port_name: None,
            shared: Arc::new(Shared {
                pulsing: AtomicBool::new(false),
                alive: AtomicBool::new(false),
                open: AtomicBool::new(false),
            }),
            tx: None,
            io_thread: None,
        }
    }

    pub fn set_port(&mut self, name: &str) {
        self.port_name = Some(name.to_string());
    }

    /// Open the configured serial port and start the I/O thread. Returns
    /// false (with a log) when the port cannot be opened.
    pub fn open(&mut self) -> bool {
        if self.is_open() {
            return true;
        }
        let Some(name) = self.port_name.clone().or_else(|| self.config.port.clone()) else {
            log::info!("no serial port chosen");
            return false;
        };
        match SerialPortLink::open(&name, self.config.baud_rate) {
            Ok(link) => {
                self.attach(Box::new(link));
                log::debug!("connected to trigger on {name}");
                true
            }
            Err(e) => {
                log::error!("failed to open trigger port {name}: {e}");
                false
            }
        }
    }

    /// Attach an already-open link. Test seam; `open()` uses it too.
    pub fn attach(&mut self, link: Box<dyn SerialLink>) {
        let (tx, rx) = unbounded();
        let shared = Arc::clone(&self.shared);
        let liveness_reset = Duration::from_millis(self.config.liveness_reset_ms);
        match std::thread::Builder::new()
            .name("camrig-trigger-io".to_string())
            .spawn(move || io_loop(link, rx, shared, liveness_reset))
        {
            Ok(handle) => {
                self.tx = Some(tx);
                self.io_thread = Some(handle);
                self.shared.open.store(true, Ordering::SeqCst);
            }
            Err(e) => log::error!("failed to spawn trigger io thread: {e}"),
        }
    }

    pub fn close(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Command::Shutdown);
        }
        if let Some(handle) = self.io_thread.take() {
            let _ = handle.join();
        }
        self.shared.open.store(false, Ordering::SeqCst);
        self.shared.pulsing.store(false, Ordering::SeqCst);
        self.shared.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Begin continuous pulsing at `1/fps`. Idempotent while pulsing.
    pub fn start_trigger(&self, fps: f64) {
        if self.is_pulsing() {
            return;
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(Command::Start { fps });
        }
    }

    /// Request pulse stop. Not instantaneous: poll `is_pulsing` until it
    /// clears before final teardown.
    pub fn stop_trigger(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Command::Stop);
        }
    }

    pub fn is_pulsing(&self) -> bool {
        self.shared.pulsing.load(Ordering::SeqCst)
    }

    /// Send a liveness ping; a PONG reply sets `is_alive` until the reset
    /// delay expires.
    pub fn ping(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Command::Ping);
        }
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }
}

impl Drop for TriggerController {
    fn drop(&mut self) {
        self.close();
    }
}

fn io_loop(
    mut link: Box<dyn SerialLink>,
    rx: Receiver<Command>,
    shared: Arc<Shared>,
    liveness_reset: Duration,
) {
    let mut alive_until: Option<Instant> = None;

    loop {
        match rx.try_recv() {
            Ok(Command::Start { fps }) => {
                if link.write_line(&format!("START_{fps}")).is_ok() {
                    shared.pulsing.store(true, Ordering::SeqCst);
                    log::info!("trigger pulsing at {fps} fps");
                } else {
                    log::error!("trigger start write failed");
                }
            }
            Ok(Command::Stop) => {
                if link.write_line("STOP").is_err() {
                    log::error!("trigger stop write failed");
                }
                // Cleared only after the command is on the wire.
                shared.pulsing.store(false, Ordering::SeqCst);
                log::info!("trigger pulse stopped");
            }
            Ok(Command::Ping) => {
                if link.write_line("PING").is_err() {
                    log::error!("trigger ping write failed");
                }
            }
            Ok(Command::Shutdown) => break,
            Err(crossbeam_channel::TryRecvError::Empty) => {}
            Err(crossbeam_channel::TryRecvError::Disconnected) => break,
        }

        match link.read_line(Duration::from_millis(50)) {
            Ok(Some(line)) if !line.is_empty() => {
                log::debug!("trigger received: {line}");
                if let ("PONG", _) = parse_device_message(&line) {
                    shared.alive.store(true, Ordering::SeqCst);
                    alive_until = Some(Instant::now() + liveness_reset);
                }
            }
            Ok(_) => {}
            Err(e) => {
                log::error!("trigger read failed: {e}");
                break;
            }
        }

        if let Some(deadline) = alive_until {
            if Instant::now() >= deadline {
                shared.alive.store(false, Ordering::SeqCst);
                alive_until = None;
            }
        }
    }

    shared.open.store(false, Ordering::SeqCst);
}

/// Split an inbound device message into `(type, payload)`. Messages without
/// a payload yield an empty payload.
pub fn parse_device_message(message: &str) -> (&str, &str) {
    match message.split_once('_') {
        Some((m_type, payload)) => (m_type, payload),
        None => (message, ""),
    }
}
