//! Serial link to the motor firmware.
//!
//! One open link owns exactly two tasks:
//! - a reader that polls for lines with a bounded wait and hands each one to
//!   a [`LineSink`]
//! - a writer fed by an unbounded channel, so [`SerialLink::send`] never
//!   blocks and lines reach the device in submission order
//!
//! Closing signals the reader, drops the channel (the writer drains what is
//! already queued), and joins both tasks with a bounded timeout. Tasks that
//! miss the deadline are aborted so the port is released regardless.
//!
//! Any `AsyncRead + AsyncWrite` stream can back a link; tests use
//! `tokio::io::duplex`.

use crate::config::SerialConfig;
use crate::error::{AppResult, MotorError};
use crate::protocol::frame;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, info_span, warn, Instrument};

/// Trait alias for async serial port I/O.
///
/// Implemented by `tokio_serial::SerialStream` as well as in-memory streams.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased serial stream.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Receiver of lines read from an open link.
pub trait LineSink: Send + Sync + 'static {
    /// Called once per non-empty line, terminator and surrounding whitespace removed.
    fn on_line(&self, line: &str);

    /// Called when the device side closes the stream (EOF).
    fn on_link_closed(&self, _port: &str) {}
}

/// Open a hardware serial port at the configured baud rate.
pub fn open_serial(port: &str, config: &SerialConfig) -> AppResult<DynSerial> {
    let stream = tokio_serial::new(port, config.baud_rate)
        .timeout(config.read_timeout())
        .open_native_async()
        .map_err(|source| MotorError::Connection {
            port: port.to_string(),
            source,
        })?;
    Ok(Box::new(stream))
}

struct ActiveLink {
    port: String,
    // Cleared by the reader when the device hangs up
    alive: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: oneshot::Sender<()>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Owner of the (at most one) open device connection.
pub struct SerialLink {
    config: SerialConfig,
    active: Mutex<Option<ActiveLink>>,
}

impl SerialLink {
    /// Create a closed link
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            active: Mutex::new(None),
        }
    }

    /// Link configuration
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Whether a stream is attached and the device has not hung up
    pub fn is_open(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|link| link.alive.load(Ordering::Acquire))
    }

    /// Name of the attached port, if any
    pub fn port_name(&self) -> Option<String> {
        self.active.lock().as_ref().map(|link| link.port.clone())
    }

    /// Start the reader and writer tasks over `stream`.
    ///
    /// The caller is expected to have closed any previous link; if one is
    /// still attached its tasks are aborted.
    pub fn attach(&self, port: &str, stream: DynSerial, sink: Arc<dyn LineSink>) {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let alive = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(
            read_loop(
                read_half,
                sink,
                alive.clone(),
                shutdown_rx,
                self.config.read_timeout(),
                self.config.poll_interval(),
                port.to_string(),
            )
            .instrument(info_span!("serial_reader", port = %port)),
        );
        let writer = tokio::spawn(
            write_loop(write_half, outbound_rx, self.config.line_terminator.clone())
                .instrument(info_span!("serial_writer", port = %port)),
        );

        let previous = self.active.lock().replace(ActiveLink {
            port: port.to_string(),
            alive,
            outbound,
            shutdown,
            reader,
            writer,
        });

        if let Some(previous) = previous {
            warn!(port = %previous.port, "Replacing a link that was never closed");
            previous.reader.abort();
            previous.writer.abort();
        }

        info!(port = %port, "Serial link attached");
    }

    /// Queue a line for transmission; the terminator is appended by the writer.
    ///
    /// Returns `false` without doing anything when no link is open or the
    /// device has hung up.
    pub fn send(&self, line: &str) -> bool {
        match self.active.lock().as_ref() {
            Some(link) if link.alive.load(Ordering::Acquire) => {
                link.outbound.send(line.to_string()).is_ok()
            }
            _ => false,
        }
    }

    /// Stop the tasks and release the stream. Returns whether a link was
    /// attached, including one whose device already hung up.
    pub async fn close(&self) -> bool {
        let active = self.active.lock().take();
        let Some(link) = active else {
            return false;
        };

        let ActiveLink {
            port,
            alive: _,
            outbound,
            shutdown,
            mut reader,
            mut writer,
        } = link;

        let _ = shutdown.send(());
        drop(outbound);

        let deadline = self.config.join_timeout();
        join_bounded(&mut reader, deadline, &port, "reader").await;
        join_bounded(&mut writer, deadline, &port, "writer").await;

        info!(port = %port, "Serial link closed");
        true
    }
}

async fn join_bounded(handle: &mut JoinHandle<()>, deadline: Duration, port: &str, role: &str) {
    match tokio::time::timeout(deadline, &mut *handle).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(port = %port, role, error = %err, "Serial task ended abnormally"),
        Err(_) => {
            warn!(
                port = %port,
                role,
                timeout_ms = deadline.as_millis() as u64,
                "Serial task did not stop in time; aborting"
            );
            handle.abort();
        }
    }
}

async fn read_loop(
    read_half: ReadHalf<DynSerial>,
    sink: Arc<dyn LineSink>,
    alive: Arc<AtomicBool>,
    mut shutdown_rx: oneshot::Receiver<()>,
    read_timeout: Duration,
    poll_interval: Duration,
    port: String,
) {
    let mut reader = BufReader::new(read_half);
    // read_until keeps partial bytes across timeouts
    let mut buf = Vec::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("Reader stop requested");
                break;
            }
            result = tokio::time::timeout(read_timeout, reader.read_until(b'\n', &mut buf)) => {
                match result {
                    Ok(Ok(0)) => {
                        deliver(&mut buf, sink.as_ref());
                        warn!("Device closed the connection");
                        alive.store(false, Ordering::Release);
                        sink.on_link_closed(&port);
                        break;
                    }
                    Ok(Ok(_)) => {
                        deliver(&mut buf, sink.as_ref());
                        continue;
                    }
                    Ok(Err(err)) => warn!(error = %err, "Serial read failed"),
                    Err(_) => {}
                }
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}

fn deliver(buf: &mut Vec<u8>, sink: &dyn LineSink) {
    if buf.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(buf);
    let line = text.trim();
    if !line.is_empty() {
        sink.on_line(line);
    }
    buf.clear();
}

async fn write_loop(
    mut write_half: WriteHalf<DynSerial>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    terminator: String,
) {
    while let Some(line) = outbound_rx.recv().await {
        let wire = frame(&line, &terminator);
        if let Err(err) = write_half.write_all(wire.as_bytes()).await {
            warn!(command = %line, error = %err, "Serial write failed");
            continue;
        }
        if let Err(err) = write_half.flush().await {
            warn!(command = %line, error = %err, "Serial flush failed");
            continue;
        }
        debug!(command = %line, "Sent");
    }
    debug!("Writer drained");
}
