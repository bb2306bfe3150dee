//! The [`Channel`] over a real serial port.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel as cbc;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, warn};

use super::{Channel, LinkErr, LinkFlags};

/// How long the reader thread blocks on the port before checking whether it should stop.
const READ_POLL: Duration = Duration::from_millis(10);

/// A serial port configured for the bootloader (8N1, raw, no flow control).
///
/// Incoming bytes are read on a separate thread and queued,
/// so receiving with a timeout does not depend on the port's own timeout.
///
/// On Unix, the port's previous terminal settings are saved before it is configured
/// and restored when the channel is dropped.
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
    read_data: cbc::Receiver<u8>,
    stop: Arc<AtomicBool>,
    read_handler: Option<JoinHandle<()>>,
    // dropped after the port, restoring its settings
    #[cfg(unix)]
    _saved: termios::Saved,
}
impl SerialChannel {
    /// Opens and configures the port at the given path.
    ///
    /// Fails without touching the port if its current settings cannot be saved.
    pub fn open(path: &str, flags: &LinkFlags) -> Result<Self, LinkErr> {
        // restores the settings on every return from here on
        #[cfg(unix)]
        let saved = termios::Saved::capture(path)?;

        let port = serialport::new(path, flags.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_POLL)
            .open()?;
        debug!(path, baud = flags.baud_rate, "opened serial port");

        let mut reader = port.try_clone()?;
        let stop = Arc::new(AtomicBool::new(false));
        let (read_tx, read_rx) = cbc::unbounded();

        let thread_stop = Arc::clone(&stop);
        let read_handler = std::thread::spawn(move || {
            let mut buf = [0; 256];
            while !thread_stop.load(Ordering::Relaxed) {
                match reader.read(&mut buf) {
                    Ok(n) => for &b in &buf[..n] {
                        let Ok(()) = read_tx.send(b) else { return };
                    },
                    Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock) => {},
                    Err(e) => {
                        warn!("serial reader stopped: {e}");
                        return;
                    },
                }
            }
        });

        Ok(Self {
            port,
            read_data: read_rx,
            stop,
            read_handler: Some(read_handler),
            #[cfg(unix)]
            _saved: saved,
        })
    }
}
impl Channel for SerialChannel {
    fn write_all(&mut self, mut buf: &[u8]) -> Result<(), LinkErr> {
        // the port timeout also bounds writes, so a full output buffer just means retry
        while !buf.is_empty() {
            match self.port.write(buf) {
                Ok(0) => return Err(std::io::Error::from(ErrorKind::WriteZero).into()),
                Ok(n) => buf = &buf[n..],
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock) => {},
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<(), LinkErr> {
        Ok(self.port.flush()?)
    }

    fn recv_byte(&mut self, timeout: Duration) -> Result<Option<u8>, LinkErr> {
        match self.read_data.recv_timeout(timeout) {
            Ok(b) => Ok(Some(b)),
            Err(cbc::RecvTimeoutError::Timeout) => Ok(None),
            Err(cbc::RecvTimeoutError::Disconnected) => Err(LinkErr::Disconnected),
        }
    }

    fn set_reset(&mut self, asserted: bool) -> Result<(), LinkErr> {
        Ok(self.port.write_data_terminal_ready(asserted)?)
    }

    fn flush_input(&mut self) -> Result<(), LinkErr> {
        self.port.clear(ClearBuffer::Input)?;
        let dropped = self.read_data.try_iter().count();
        if dropped > 0 {
            debug!(dropped, "discarded pending input");
        }
        Ok(())
    }
}
impl Drop for SerialChannel {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handler) = self.read_handler.take() {
            // the reader wakes up at least every READ_POLL
            let _ = handler.join();
        }
    }
}

#[cfg(unix)]
mod termios {
    use std::fs::{File, OpenOptions};
    use std::os::unix::fs::OpenOptionsExt;

    use nix::fcntl::OFlag;
    use nix::sys::termios::{tcgetattr, tcsetattr, SetArg, Termios};
    use tracing::warn;

    /// Terminal settings of a device, as they were before it was configured.
    ///
    /// The settings are written back on drop.
    pub(super) struct Saved {
        file: File,
        termios: Termios,
    }
    impl Saved {
        pub(super) fn capture(path: &str) -> std::io::Result<Self> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags((OFlag::O_NOCTTY | OFlag::O_NONBLOCK).bits())
                .open(path)?;
            Self::from_file(file)
        }

        pub(super) fn from_file(file: File) -> std::io::Result<Self> {
            let termios = tcgetattr(&file)?;
            Ok(Self { file, termios })
        }
    }
    impl Drop for Saved {
        fn drop(&mut self) {
            if let Err(e) = tcsetattr(&self.file, SetArg::TCSANOW, &self.termios) {
                warn!("could not restore terminal settings: {e}");
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs::File;

    use nix::pty::openpty;
    use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg};

    use super::termios::Saved;
    use super::SerialChannel;
    use crate::link::{LinkErr, LinkFlags};

    #[test]
    fn test_settings_restored_on_drop() {
        let pty = openpty(None, None).unwrap();
        let tty = File::from(pty.slave);
        let before = tcgetattr(&tty).unwrap();

        {
            let _saved = Saved::from_file(tty.try_clone().unwrap()).unwrap();
            let mut raw = before.clone();
            cfmakeraw(&mut raw);
            tcsetattr(&tty, SetArg::TCSANOW, &raw).unwrap();
            assert_ne!(tcgetattr(&tty).unwrap().local_flags, before.local_flags);
        }

        let after = tcgetattr(&tty).unwrap();
        assert_eq!(after.local_flags, before.local_flags);
        assert_eq!(after.input_flags, before.input_flags);
        assert_eq!(after.control_flags, before.control_flags);
    }

    #[test]
    fn test_unsaveable_port_is_not_opened() {
        let result = SerialChannel::open("/nonexistent/ttyUSB9", &LinkFlags::default());
        assert!(matches!(result, Err(LinkErr::Io(_))));
    }
}
