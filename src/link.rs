//! Talking to the P8X32A serial bootloader.
//!
//! After a reset (pulsing DTR), the bootloader expects a handshake
//! before accepting an image:
//! 1. the host sends a timing calibration byte (`0xF9`) and 250 bits of a shared
//!    [`Lfsr`] sequence, then 258 more calibration bytes,
//! 2. the chip answers the first 250 of those with the next 250 bits of the sequence,
//!    and the last 8 with its version number,
//! 3. the host sends a [`Command`], and, unless it is [`Command::Shutdown`],
//!    the image size in longs followed by every image long,
//! 4. the chip answers one bit telling whether the image checksum failed.
//!
//! Every long (and bit) the host sends is encoded by [`encode_u32`]:
//! each byte carries up to three data bits in a pattern the chip's
//! calibrated receiver can sample.
//! Every bit the chip sends is a byte which is `0xFE` (0) or `0xFF` (1).
//!
//! The protocol is driven by a [`Loader`] over any [`Channel`];
//! [`serial::SerialChannel`] is the channel over a real serial port.

pub mod serial;

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

/// The timing calibration byte, also used to poll the chip for a reply bit.
pub const CALIBRATION_BYTE: u8 = 0xF9;
/// Number of LFSR bits exchanged in each direction during the handshake.
pub const LFSR_BITS: usize = 250;
/// Number of bits in the version reply.
pub const VERSION_BITS: usize = 8;
/// Longest a single wait goes without checking for an interrupt.
const INTERRUPT_POLL: Duration = Duration::from_millis(20);

/// The linear feedback shift register both sides of the handshake run.
///
/// # Example
/// ```
/// use ppasm::link::Lfsr;
///
/// let a: Vec<u8> = { let mut l = Lfsr::new(); (0..16).map(|_| l.step()).collect() };
/// let b: Vec<u8> = { let mut l = Lfsr::new(); (0..16).map(|_| l.step()).collect() };
/// assert_eq!(a, b);
/// assert_eq!(a[..8], [0, 1, 0, 1, 1, 1, 0, 0]);
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Lfsr(u8);
impl Lfsr {
    /// Creates a register holding the seed `'P'`.
    pub fn new() -> Self {
        Lfsr(b'P')
    }

    /// Returns the least significant bit and advances the register
    /// (taps on bits 7, 5, 4 and 1).
    pub fn step(&mut self) -> u8 {
        let s = self.0;
        let feedback = (s >> 7 ^ s >> 5 ^ s >> 4 ^ s >> 1) & 1;
        self.0 = (s << 1 & 0xFE) | feedback;
        s & 1
    }
}
impl Default for Lfsr {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes a long into the 11 bytes it is sent as (least significant bits first).
///
/// Each of the first ten bytes carries three bits (at bit positions 0, 3 and 6)
/// on the fixed pattern `0b1001_0010`. The last byte carries the remaining two bits
/// (at positions 0 and 3) on the pattern `0b1111_0010`.
///
/// # Example
/// ```
/// use ppasm::link::encode_u32;
///
/// assert_eq!(
///     encode_u32(0x5c7c_0000),
///     [0x92, 0x92, 0x92, 0x92, 0x92, 0x92, 0xDB, 0x9B, 0xD2, 0x9B, 0xF3]
/// );
/// ```
pub fn encode_u32(mut data: u32) -> [u8; 11] {
    let mut buf = [0; 11];
    for b in &mut buf[..10] {
        let bits = (data & 0b001) | (data & 0b010) << 2 | (data & 0b100) << 4;
        *b = 0b1001_0010 | bits as u8;
        data >>= 3;
    }
    buf[10] = 0b1111_0010 | ((data & 0b01) | (data & 0b10) << 2) as u8;
    buf
}

/// Decodes the 11 bytes produced by [`encode_u32`].
///
/// Returns `None` if the fixed bits of any byte are wrong.
pub fn decode_u32(buf: &[u8; 11]) -> Option<u32> {
    let mut data = 0u32;
    for (i, &b) in buf[..10].iter().enumerate() {
        if b & !0b0100_1001 != 0b1001_0010 { return None; }
        let bits = u32::from(b & 1) | u32::from(b >> 3 & 1) << 1 | u32::from(b >> 6 & 1) << 2;
        data |= bits << (3 * i);
    }
    let last = buf[10];
    if last & !0b0000_1001 != 0b1111_0010 { return None; }
    data |= (u32::from(last & 1) | u32::from(last >> 3 & 1) << 1) << 30;
    Some(data)
}

/// What the bootloader does after the handshake.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Command {
    /// Report the version and shut down.
    Shutdown = 0,
    /// Load the image into RAM and run it.
    RamRun = 1,
    /// Program the image into EEPROM and shut down.
    EepromProgram = 2,
    /// Program the image into EEPROM and run it.
    EepromRun = 3,
}
impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Command::Shutdown),
            1 => Ok(Command::RamRun),
            2 => Ok(Command::EepromProgram),
            3 => Ok(Command::EepromRun),
            n => Err(n),
        }
    }
}

/// How reply bits are awaited.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum RecvMode {
    /// Send a calibration byte every poll interval until the reply arrives.
    #[default]
    PingPong,
    /// Wait for the reply without sending anything.
    Passive,
}

/// Configuration for the device link.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct LinkFlags {
    /// How the final checksum reply is awaited.
    pub recv_mode: RecvMode,
    /// How long the reset line is held.
    pub reset_hold: Duration,
    /// How long to wait after reset before the handshake.
    pub post_reset_delay: Duration,
    /// Timeout for each LFSR reply bit.
    pub calib_timeout: Duration,
    /// Timeout for each version bit.
    pub version_timeout: Duration,
    /// Timeout for the checksum reply.
    pub result_timeout: Duration,
    /// Interval between polls in [`RecvMode::PingPong`].
    pub poll_interval: Duration,
    /// Serial baud rate.
    pub baud_rate: u32,
}
impl Default for LinkFlags {
    fn default() -> Self {
        Self {
            recv_mode: RecvMode::PingPong,
            reset_hold: Duration::from_millis(25),
            post_reset_delay: Duration::from_millis(95),
            calib_timeout: Duration::from_millis(100),
            version_timeout: Duration::from_millis(200),
            result_timeout: Duration::from_millis(8000),
            poll_interval: Duration::from_millis(25),
            baud_rate: 115_200,
        }
    }
}

/// The phases of a [`Loader`] run.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum LinkState {
    /// Not started, or finished after a shutdown command.
    Idle,
    /// Pulsing the reset line.
    Reset,
    /// Exchanging the LFSR sequence.
    Calibrating,
    /// Receiving the version.
    VersionExchange,
    /// Sending the command.
    CommandSent,
    /// Sending the image size and words.
    StreamingImage,
    /// Waiting for the checksum reply.
    AwaitChecksumResult,
    /// The image was accepted.
    Done,
    /// The run ended with an error.
    Failed,
}
impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Idle                => f.write_str("idle"),
            LinkState::Reset               => f.write_str("resetting"),
            LinkState::Calibrating         => f.write_str("calibrating"),
            LinkState::VersionExchange     => f.write_str("reading version"),
            LinkState::CommandSent         => f.write_str("sending command"),
            LinkState::StreamingImage      => f.write_str("sending image"),
            LinkState::AwaitChecksumResult => f.write_str("waiting for checksum result"),
            LinkState::Done                => f.write_str("done"),
            LinkState::Failed              => f.write_str("failed"),
        }
    }
}

/// Errors from talking to the bootloader.
#[derive(Debug)]
pub enum LinkErr {
    /// Reading from or writing to the channel failed.
    Io(std::io::Error),
    /// The serial port could not be opened or configured.
    Serial(serialport::Error),
    /// The serial reader stopped.
    Disconnected,
    /// An LFSR reply bit did not match the expected sequence.
    LfsrMismatch(usize),
    /// A reply byte was neither `0xFE` nor `0xFF`.
    BadBit(u8),
    /// No reply arrived in time.
    Timeout(LinkState),
    /// The chip reported a checksum failure.
    ChecksumFailed,
    /// The image is not a whole number of longs.
    MisalignedImage(usize),
    /// The run was interrupted (see [`Loader::with_interrupt`]).
    Interrupted,
}
impl std::fmt::Display for LinkErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkErr::Io(e)              => write!(f, "serial I/O failed: {e}"),
            LinkErr::Serial(e)          => write!(f, "failed to set up serial port: {e}"),
            LinkErr::Disconnected       => f.write_str("serial port reader stopped"),
            LinkErr::LfsrMismatch(i)    => write!(f, "received wrong LFSR bit {i}, lost hardware connection?"),
            LinkErr::BadBit(b)          => write!(f, "receiving bit failed (got ${b:02X})"),
            LinkErr::Timeout(state)     => write!(f, "timed out while {state}"),
            LinkErr::ChecksumFailed     => f.write_str("ram checksum failed"),
            LinkErr::MisalignedImage(n) => write!(f, "image of {n} bytes is not a whole number of longs"),
            LinkErr::Interrupted        => f.write_str("interrupted"),
        }
    }
}
impl std::error::Error for LinkErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LinkErr::Io(e)     => Some(e),
            LinkErr::Serial(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for LinkErr {
    fn help(&self) -> Option<Cow<str>> {
        match self {
            LinkErr::Serial(_)          => Some("check the device path and that no other program is using the port".into()),
            LinkErr::LfsrMismatch(_)    => Some("the baud rate or cabling may be unreliable".into()),
            LinkErr::Timeout(LinkState::Calibrating) => Some("is the propeller connected and powered?".into()),
            LinkErr::Timeout(LinkState::AwaitChecksumResult) => Some("try the passive receive mode".into()),
            LinkErr::ChecksumFailed     => Some("the image was corrupted in transfer, try again".into()),
            _ => None,
        }
    }
}
impl From<std::io::Error> for LinkErr {
    fn from(value: std::io::Error) -> Self {
        LinkErr::Io(value)
    }
}
impl From<serialport::Error> for LinkErr {
    fn from(value: serialport::Error) -> Self {
        LinkErr::Serial(value)
    }
}

/// A byte channel to the bootloader.
pub trait Channel {
    /// Writes all bytes (they may be buffered until [`Channel::drain`]).
    fn write_all(&mut self, buf: &[u8]) -> Result<(), LinkErr>;
    /// Waits for all written bytes to be transmitted.
    fn drain(&mut self) -> Result<(), LinkErr>;
    /// Receives one byte, or `None` if none arrives within the timeout.
    fn recv_byte(&mut self, timeout: Duration) -> Result<Option<u8>, LinkErr>;
    /// Asserts or releases the reset line (DTR).
    fn set_reset(&mut self, asserted: bool) -> Result<(), LinkErr>;
    /// Discards any received bytes not yet read.
    fn flush_input(&mut self) -> Result<(), LinkErr>;
}
impl<C: Channel + ?Sized> Channel for &mut C {
    fn write_all(&mut self, buf: &[u8]) -> Result<(), LinkErr> {
        (**self).write_all(buf)
    }
    fn drain(&mut self) -> Result<(), LinkErr> {
        (**self).drain()
    }
    fn recv_byte(&mut self, timeout: Duration) -> Result<Option<u8>, LinkErr> {
        (**self).recv_byte(timeout)
    }
    fn set_reset(&mut self, asserted: bool) -> Result<(), LinkErr> {
        (**self).set_reset(asserted)
    }
    fn flush_input(&mut self) -> Result<(), LinkErr> {
        (**self).flush_input()
    }
}

/// Drives the bootloader protocol over a [`Channel`].
pub struct Loader<C> {
    chan: C,
    flags: LinkFlags,
    state: LinkState,
    lfsr: Lfsr,
    interrupt: Arc<AtomicBool>,
}
impl<C: Channel> Loader<C> {
    /// Creates a loader over the given channel.
    pub fn new(chan: C, flags: LinkFlags) -> Self {
        Self { chan, flags, state: LinkState::Idle, lfsr: Lfsr::new(), interrupt: Arc::default() }
    }

    /// Sets a flag which aborts the run with [`LinkErr::Interrupted`] once raised.
    ///
    /// The flag is checked at least every 20ms while waiting and before each image long.
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    fn check_interrupt(&self) -> Result<(), LinkErr> {
        match self.interrupt.load(Ordering::Relaxed) {
            true  => Err(LinkErr::Interrupted),
            false => Ok(()),
        }
    }

    /// The current phase.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Gives back the channel.
    pub fn into_inner(self) -> C {
        self.chan
    }

    /// Runs the whole protocol: reset, handshake, command and (unless shutting down) the image.
    ///
    /// `image` is sent as is, so it should be a boot image (preamble included).
    /// Returns the chip's version.
    pub fn run(&mut self, command: Command, image: &[u8]) -> Result<u8, LinkErr> {
        let result = self.run_inner(command, image);
        self.state = match result {
            Ok(_) if command == Command::Shutdown => LinkState::Idle,
            Ok(_)  => LinkState::Done,
            Err(_) => LinkState::Failed,
        };
        result
    }

    fn run_inner(&mut self, command: Command, image: &[u8]) -> Result<u8, LinkErr> {
        if image.len() % 4 != 0 {
            return Err(LinkErr::MisalignedImage(image.len()));
        }

        self.reset()?;
        let version = self.handshake()?;
        info!(version, "found propeller");

        self.state = LinkState::CommandSent;
        debug!(?command, "sending command");
        self.chan.write_all(&encode_u32(command as u32))?;
        if command == Command::Shutdown {
            self.chan.drain()?;
            return Ok(version);
        }

        self.state = LinkState::StreamingImage;
        let words = image.len() / 4;
        debug!(words, "sending image");
        self.chan.write_all(&encode_u32(words as u32))?;
        for chunk in image.chunks_exact(4) {
            self.check_interrupt()?;
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.chan.write_all(&encode_u32(word))?;
        }
        self.chan.drain()?;

        self.state = LinkState::AwaitChecksumResult;
        match self.recv_result()? {
            false => {
                info!("image transferred");
                Ok(version)
            },
            true => Err(LinkErr::ChecksumFailed),
        }
    }

    fn reset(&mut self) -> Result<(), LinkErr> {
        self.state = LinkState::Reset;
        debug!("resetting propeller");
        self.chan.set_reset(true)?;
        std::thread::sleep(self.flags.reset_hold);
        self.chan.set_reset(false)?;
        std::thread::sleep(self.flags.post_reset_delay);
        self.chan.flush_input()
    }

    fn handshake(&mut self) -> Result<u8, LinkErr> {
        self.state = LinkState::Calibrating;
        self.lfsr = Lfsr::new();

        let mut buf = Vec::with_capacity(1 + LFSR_BITS);
        buf.push(CALIBRATION_BYTE);
        buf.extend((0..LFSR_BITS).map(|_| self.lfsr.step() | 0xFE));
        self.chan.write_all(&buf)?;
        self.chan.write_all(&[CALIBRATION_BYTE; LFSR_BITS + VERSION_BITS])?;
        self.chan.drain()?;

        for i in 0..LFSR_BITS {
            let expected = self.lfsr.step() | 0xFE;
            let byte = self.recv_byte(self.flags.calib_timeout)?;
            if byte != expected {
                return Err(LinkErr::LfsrMismatch(i));
            }
        }
        trace!("lfsr sequence matched");

        self.state = LinkState::VersionExchange;
        let mut version = 0;
        for i in 0..VERSION_BITS {
            let bit = self.recv_bit(self.flags.version_timeout)?;
            version |= u8::from(bit) << i;
        }
        Ok(version)
    }

    /// Waits for a byte in slices, so an interrupt is noticed during long timeouts.
    fn wait_byte(&mut self, timeout: Duration) -> Result<Option<u8>, LinkErr> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check_interrupt()?;
            let slice = deadline.saturating_duration_since(Instant::now()).min(INTERRUPT_POLL);
            if let Some(b) = self.chan.recv_byte(slice)? {
                return Ok(Some(b));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    /// Receives a byte, flushing the input on timeout.
    fn recv_byte(&mut self, timeout: Duration) -> Result<u8, LinkErr> {
        match self.wait_byte(timeout)? {
            Some(b) => Ok(b),
            None => {
                self.chan.flush_input()?;
                Err(LinkErr::Timeout(self.state))
            },
        }
    }

    fn recv_bit(&mut self, timeout: Duration) -> Result<bool, LinkErr> {
        let byte = self.recv_byte(timeout)?;
        decode_bit(byte)
    }

    /// Receives the checksum reply bit according to the receive mode.
    fn recv_result(&mut self) -> Result<bool, LinkErr> {
        let timeout = self.flags.result_timeout;
        match self.flags.recv_mode {
            RecvMode::Passive => self.recv_bit(timeout),
            RecvMode::PingPong => {
                let deadline = Instant::now() + timeout;
                while Instant::now() < deadline {
                    self.chan.write_all(&[CALIBRATION_BYTE])?;
                    self.chan.drain()?;
                    if let Some(b) = self.wait_byte(self.flags.poll_interval)? {
                        return decode_bit(b);
                    }
                }
                self.chan.flush_input()?;
                Err(LinkErr::Timeout(self.state))
            },
        }
    }
}

fn decode_bit(byte: u8) -> Result<bool, LinkErr> {
    match byte.wrapping_sub(0xFE) {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(LinkErr::BadBit(byte)),
    }
}

/// Opens a serial port and runs the bootloader protocol on it.
///
/// Raising `interrupt` aborts the run with [`LinkErr::Interrupted`].
/// The port's original settings are restored when this returns, whether the run succeeded or not.
pub fn transfer(
    image: &[u8],
    device: &str,
    command: Command,
    flags: &LinkFlags,
    interrupt: Arc<AtomicBool>,
) -> Result<u8, LinkErr> {
    let chan = serial::SerialChannel::open(device, flags)?;
    Loader::new(chan, *flags)
        .with_interrupt(interrupt)
        .run(command, image)
}
