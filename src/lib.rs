//! # Cycle-accurate UART engine
//!
//! Clock-stepped models of a UART receiver, transmitter and synchronous FIFO, plus [Uart], a
//! four-register bus wrapper combining them with sticky error bits, soft resets, RTS/CTS
//! handling and interrupt lines.
//!
//! Every model advances by one call to `tick` per clock. Nothing is asynchronous: line levels
//! and bus accesses are plain arguments, and all outputs are registered values that can be
//! inspected between ticks.
//!
//! The [Uart] also implements the [embedded_hal_nb::serial] and [embedded_io] traits. Each
//! driver call performs one bus access, which takes one clock, so a driver polling the model
//! also keeps it running.
//!
//! ```
//! use uart_engine::{Register, Setup, Uart};
//!
//! let mut uart: Uart = Uart::new(Setup::eight_n_one(16).unwrap());
//! uart.set_loopback(true);
//! // The receiver waits for a word of idle line after reset.
//! uart.run(2 * uart.setup().word_clocks());
//! uart.write_register(Register::TxData, 0x5a);
//! let byte = loop {
//!     if let Ok(byte) = uart.read_fifo() {
//!         break byte;
//!     }
//! };
//! assert_eq!(byte, 0x5a);
//! ```
#![cfg_attr(not(test), no_std)]

use core::convert::Infallible;

pub mod registers;
pub use registers::*;

pub mod timing;
pub use timing::*;

pub mod rx;
pub use rx::*;

pub mod tx;
pub use tx::*;

pub mod fifo;
pub use fifo::*;

pub mod peer;
pub use peer::*;

/// Default depth of both FIFOs of a [Uart].
pub const FIFO_DEPTH: usize = 16;

/// Words of line time a blocking driver call waits without progress before giving up.
pub const STALL_WORDS: u32 = 4;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UartError {
    #[error("parity error in received data")]
    Parity,
    #[error("framing error in received data")]
    Frame,
    #[error("receive FIFO overflowed")]
    Overrun,
    #[error("transmitter made no progress")]
    TxStalled,
    #[error("no data received")]
    RxTimeout,
}

impl embedded_hal_nb::serial::Error for UartError {
    fn kind(&self) -> embedded_hal_nb::serial::ErrorKind {
        use embedded_hal_nb::serial::ErrorKind;
        match self {
            UartError::Parity => ErrorKind::Parity,
            UartError::Frame => ErrorKind::FrameFormat,
            UartError::Overrun => ErrorKind::Overrun,
            UartError::TxStalled | UartError::RxTimeout => ErrorKind::Other,
        }
    }
}

impl embedded_io::Error for UartError {
    fn kind(&self) -> embedded_io::ErrorKind {
        use embedded_io::ErrorKind;
        match self {
            UartError::Parity | UartError::Frame => ErrorKind::InvalidData,
            UartError::Overrun => ErrorKind::Other,
            UartError::TxStalled | UartError::RxTimeout => ErrorKind::TimedOut,
        }
    }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct RxErrorsCounted {
    parity: u8,
    frame: u8,
    overrun: u8,
}

impl RxErrorsCounted {
    pub const fn new() -> Self {
        Self {
            parity: 0,
            frame: 0,
            overrun: 0,
        }
    }

    pub const fn parity(&self) -> u8 {
        self.parity
    }

    pub const fn frame(&self) -> u8 {
        self.frame
    }

    pub const fn overrun(&self) -> u8 {
        self.overrun
    }

    pub fn has_errors(&self) -> bool {
        self.parity > 0 || self.frame > 0 || self.overrun > 0
    }
}

/// One bus cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusAccess {
    Read(Register),
    Write(Register, u32),
}

/// Interrupt lines, all level sensitive.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Interrupts {
    /// RX FIFO not empty.
    pub rx: bool,
    /// Transmitter idle and TX FIFO empty.
    pub tx: bool,
    /// RX FIFO at least half full.
    pub rx_fifo: bool,
    /// TX FIFO at least half empty.
    pub tx_fifo: bool,
}

/// Receiver, transmitter and two FIFOs behind a four-register bus interface.
#[derive(Debug, Clone)]
pub struct Uart<const DEPTH: usize = FIFO_DEPTH> {
    setup: Setup,
    rx: Receiver,
    tx: Transmitter,
    rx_fifo: Fifo<DEPTH>,
    tx_fifo: Fifo<DEPTH>,
    parity_error: bool,
    frame_error: bool,
    tx_break: bool,
    /// Last byte queued through the TX data register.
    tx_data: u8,
    rts_margin: usize,
    rx_pin: bool,
    cts_n_pin: bool,
    loopback: bool,
    /// RX FIFO overflow already handed to the driver.
    overrun_reported: bool,
    /// Byte read from the bus while an error was being reported.
    pending: Option<u8>,
    errors: RxErrorsCounted,
}

impl<const DEPTH: usize> Default for Uart<DEPTH> {
    fn default() -> Self {
        Self::new(Setup::default())
    }
}

impl<const DEPTH: usize> Uart<DEPTH> {
    pub fn new(setup: Setup) -> Self {
        Self {
            setup,
            rx: Receiver::new(setup),
            tx: Transmitter::new(setup),
            rx_fifo: Fifo::new(FifoRole::Receive),
            tx_fifo: Fifo::new(FifoRole::Transmit),
            parity_error: false,
            frame_error: false,
            tx_break: false,
            tx_data: 0,
            rts_margin: 2,
            rx_pin: true,
            cts_n_pin: false,
            loopback: false,
            overrun_reported: false,
            pending: None,
            errors: RxErrorsCounted::new(),
        }
    }

    /// Number of free RX FIFO slots at which `rts_n` is deasserted.
    pub fn with_rts_margin(mut self, margin: usize) -> Self {
        self.set_rts_margin(margin);
        self
    }

    #[inline]
    pub fn set_rts_margin(&mut self, margin: usize) {
        self.rts_margin = margin.min(DEPTH);
    }

    /// Route the transmitter into the receiver and `rts_n` into `cts_n`. The pins are ignored
    /// while set.
    #[inline]
    pub fn set_loopback(&mut self, loopback: bool) {
        self.loopback = loopback;
    }

    #[inline]
    pub const fn setup(&self) -> Setup {
        self.setup
    }

    #[inline]
    pub const fn receiver(&self) -> &Receiver {
        &self.rx
    }

    #[inline]
    pub const fn transmitter(&self) -> &Transmitter {
        &self.tx
    }

    #[inline]
    pub fn set_rx(&mut self, level: bool) {
        self.rx_pin = level;
    }

    #[inline]
    pub fn set_cts_n(&mut self, level: bool) {
        self.cts_n_pin = level;
    }

    #[inline]
    pub const fn tx_line(&self) -> bool {
        self.tx.line()
    }

    /// Request-to-send, active low. Deasserted while the RX FIFO is nearly full.
    #[inline]
    pub fn rts_n(&self) -> bool {
        !self.setup.flow_control_disabled() && self.rx_fifo.len() >= DEPTH - self.rts_margin
    }

    pub fn interrupts(&self) -> Interrupts {
        Interrupts {
            rx: self.rx_fifo.empty_n(),
            tx: self.tx.state() == TxState::Idle && !self.tx.busy() && self.tx_fifo.is_empty(),
            rx_fifo: self.rx_fifo.status().half(),
            tx_fifo: self.tx_fifo.status().half(),
        }
    }

    /// Register value a read issued now would return.
    pub fn peek_register(&self, reg: Register) -> u32 {
        match reg {
            Register::Setup => self.setup.raw_value(),
            Register::FifoStatus => FifoStatusRegister::new_with_raw_value(0)
                .with_tx(self.tx_fifo.status().raw_value())
                .with_rx(self.rx_fifo.status().raw_value())
                .raw_value(),
            Register::RxData => RxData::new_with_raw_value(0)
                .with_fifo_overflow(self.rx_fifo.overflow())
                .with_break_condition(self.rx.output().break_condition)
                .with_frame_error(self.frame_error)
                .with_parity_error(self.parity_error)
                .with_empty(self.rx_fifo.is_empty())
                .with_data(self.rx_fifo.data())
                .raw_value(),
            Register::TxData => TxData::new_with_raw_value(0)
                .with_fifo_overflow(self.tx_fifo.overflow())
                .with_rx_line(self.rx.output().line)
                .with_tx_line(self.tx.line())
                .with_break_control(self.tx_break)
                .with_busy(self.tx.busy() || self.tx_fifo.empty_n())
                .with_data(self.tx_data)
                .raw_value(),
        }
    }

    /// Advance one clock with an optional bus access. Returns the read data, or 0 for writes
    /// and idle cycles.
    pub fn tick(&mut self, access: Option<BusAccess>) -> u32 {
        let response = match access {
            Some(BusAccess::Read(reg)) => self.peek_register(reg),
            _ => 0,
        };
        let pop_rx = access == Some(BusAccess::Read(Register::RxData));

        let mut rx_control = RxControl::new_with_raw_value(0);
        let mut queue = None;
        let mut tx_reset = false;
        match access {
            Some(BusAccess::Write(Register::Setup, value)) => match Setup::validated(value) {
                Ok(setup) => self.setup = setup,
                Err(e) => log::warn!("setup write {value:#010x} ignored: {e}"),
            },
            Some(BusAccess::Write(Register::RxData, value)) => {
                rx_control = RxControl::new_with_raw_value(value);
            }
            Some(BusAccess::Write(Register::TxData, value)) => {
                let cmd = TxCommand::new_with_raw_value(value);
                self.tx_break = cmd.break_control();
                tx_reset = cmd.reset();
                if cmd.queues_data() {
                    queue = Some(cmd.data());
                    self.tx_data = cmd.data();
                }
            }
            _ => (),
        }

        let rx_line = if self.loopback {
            self.tx.line()
        } else {
            self.rx_pin
        };
        let rx_out = if rx_control.reset() {
            log::debug!("receiver reset");
            self.rx.reset(self.setup)
        } else {
            self.rx.tick(rx_line, self.setup)
        };

        let send = self.tx_fifo.empty_n() && !self.tx.busy() && !self.tx_break;
        if tx_reset {
            log::debug!("transmitter reset");
            self.tx.reset(self.setup);
        } else {
            let cts_n = if self.loopback {
                self.rts_n()
            } else {
                self.cts_n_pin
            };
            self.tx.tick(
                TxInput {
                    write: send,
                    data: self.tx_fifo.data(),
                    break_request: self.tx_break,
                    cts_n,
                },
                self.setup,
            );
        }

        if rx_control.reset() || rx_out.break_condition {
            self.rx_fifo.reset();
            self.overrun_reported = false;
        } else {
            let word = rx_out.ready.then_some(rx_out.data);
            self.rx_fifo.step(word, pop_rx);
        }

        if tx_reset {
            self.tx_fifo.reset();
        } else {
            self.tx_fifo.step(queue, send);
        }

        if rx_control.clear_parity_error() {
            self.parity_error = false;
        }
        if rx_control.clear_frame_error() {
            self.frame_error = false;
        }
        if rx_out.ready && !rx_control.reset() {
            self.parity_error |= rx_out.parity_error;
            self.frame_error |= rx_out.frame_error;
        }
        response
    }

    /// Idle bus cycles.
    pub fn run(&mut self, ticks: u32) {
        for _ in 0..ticks {
            self.tick(None);
        }
    }

    #[inline]
    pub fn read_register(&mut self, reg: Register) -> u32 {
        self.tick(Some(BusAccess::Read(reg)))
    }

    #[inline]
    pub fn write_register(&mut self, reg: Register, value: u32) {
        self.tick(Some(BusAccess::Write(reg, value)));
    }

    /// Write into the TX FIFO.
    ///
    /// Returns [nb::Error::WouldBlock] if the TX FIFO is full. Either way one clock passes.
    #[inline]
    pub fn write_fifo(&mut self, data: u8) -> nb::Result<(), Infallible> {
        if self.tx_fifo.is_full() {
            self.tick(None);
            return Err(nb::Error::WouldBlock);
        }
        self.write_register(Register::TxData, data as u32);
        Ok(())
    }

    /// Read from the RX FIFO.
    ///
    /// Sticky receive errors are reported once each, before any further data, and cleared.
    /// Every call takes at least one clock.
    pub fn read_fifo(&mut self) -> nb::Result<u8, UartError> {
        if let Some(byte) = self.pending.take() {
            self.tick(None);
            return Ok(byte);
        }
        if self.rx_fifo.is_empty() {
            self.tick(None);
            return Err(nb::Error::WouldBlock);
        }
        let word = RxData::new_with_raw_value(self.read_register(Register::RxData));
        if let Some(error) = self.handle_rx_errors(word) {
            self.pending = Some(word.data());
            return Err(nb::Error::Other(error));
        }
        Ok(word.data())
    }

    /// TX FIFO drained and transmitter idle.
    pub fn flush_fifo(&mut self) -> nb::Result<(), Infallible> {
        let done = self.interrupts().tx;
        self.tick(None);
        if done {
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    #[inline(always)]
    pub fn tx_fifo_empty(&self) -> bool {
        self.tx_fifo.is_empty()
    }

    #[inline(always)]
    pub fn tx_fifo_full(&self) -> bool {
        self.tx_fifo.is_full()
    }

    #[inline(always)]
    pub fn rx_has_data(&self) -> bool {
        self.rx_fifo.empty_n()
    }

    /// Read the error counters and also resets them.
    pub fn read_and_clear_errors(&mut self) -> RxErrorsCounted {
        let errors = self.errors;
        self.errors = RxErrorsCounted::new();
        errors
    }

    /// Count and clear the sticky bits of an RX data word, returning the first one found.
    fn handle_rx_errors(&mut self, word: RxData) -> Option<UartError> {
        let mut clear = RxControl::new_with_raw_value(0);
        let mut error = None;
        if word.parity_error() {
            self.errors.parity = self.errors.parity.saturating_add(1);
            clear = clear.with_clear_parity_error(true);
            error = Some(UartError::Parity);
        }
        if word.frame_error() {
            self.errors.frame = self.errors.frame.saturating_add(1);
            clear = clear.with_clear_frame_error(true);
            error = error.or(Some(UartError::Frame));
        }
        if word.fifo_overflow() && !self.overrun_reported {
            self.overrun_reported = true;
            self.errors.overrun = self.errors.overrun.saturating_add(1);
            error = error.or(Some(UartError::Overrun));
        }
        if clear.raw_value() != 0 {
            self.write_register(Register::RxData, clear.raw_value());
        }
        error
    }

    /// Sticky errors the next [Uart::read_fifo] would report.
    fn error_pending(&self) -> bool {
        self.pending.is_none()
            && (self.parity_error
                || self.frame_error
                || (self.rx_fifo.overflow() && !self.overrun_reported))
    }

    /// Clock budget for one blocking driver call to make progress.
    fn stall_limit(&self) -> u32 {
        STALL_WORDS.saturating_mul(self.setup.word_clocks())
    }

    /// Clock budget for draining the TX FIFO, one stall budget per queued word.
    fn flush_limit(&self) -> u32 {
        self.stall_limit().saturating_mul(self.tx_fifo.len() as u32 + 1)
    }

    /// Reset the receiver and flush the RX FIFO.
    #[inline]
    pub fn reset_rx(&mut self) {
        self.write_register(
            Register::RxData,
            RxControl::new_with_raw_value(0).with_reset(true).raw_value(),
        );
    }

    /// Reset the transmitter and flush the TX FIFO. Also releases a break.
    #[inline]
    pub fn reset_tx(&mut self) {
        self.write_register(
            Register::TxData,
            TxCommand::new_with_raw_value(0).with_reset(true).raw_value(),
        );
    }

    /// Start or release a break on the transmit line.
    #[inline]
    pub fn set_break(&mut self, enable: bool) {
        self.write_register(
            Register::TxData,
            TxCommand::new_with_raw_value(0)
                .with_control_only(true)
                .with_break_control(enable)
                .raw_value(),
        );
    }
}

impl<const DEPTH: usize> embedded_hal_nb::serial::ErrorType for Uart<DEPTH> {
    type Error = UartError;
}

impl<const DEPTH: usize> embedded_hal_nb::serial::Write for Uart<DEPTH> {
    #[inline]
    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.write_fifo(word).map_err(|e| match e {
            nb::Error::WouldBlock => nb::Error::WouldBlock,
            nb::Error::Other(never) => match never {},
        })
    }

    #[inline]
    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        self.flush_fifo().map_err(|e| match e {
            nb::Error::WouldBlock => nb::Error::WouldBlock,
            nb::Error::Other(never) => match never {},
        })
    }
}

impl<const DEPTH: usize> embedded_hal_nb::serial::Read for Uart<DEPTH> {
    #[inline]
    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        self.read_fifo()
    }
}

impl<const DEPTH: usize> embedded_io::ErrorType for Uart<DEPTH> {
    type Error = UartError;
}

impl<const DEPTH: usize> embedded_io::Read for Uart<DEPTH> {
    /// Blocks until at least one byte arrives, then returns what is available.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let limit = self.stall_limit();
        let mut waited = 0;
        let mut read = 0;
        while read < buf.len() {
            if read > 0 && self.error_pending() {
                // Leave the error for the next call.
                break;
            }
            match self.read_fifo() {
                Ok(byte) => {
                    buf[read] = byte;
                    read += 1;
                }
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) if read > 0 => break,
                Err(nb::Error::WouldBlock) => {
                    waited += 1;
                    if waited > limit {
                        return Err(UartError::RxTimeout);
                    }
                }
            }
        }
        Ok(read)
    }
}

impl<const DEPTH: usize> embedded_io::Write for Uart<DEPTH> {
    /// Blocks until at least one byte is queued, then queues as many as fit.
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let limit = self.stall_limit();
        let mut waited = 0;
        let mut written = 0;
        while written < buf.len() {
            match self.write_fifo(buf[written]) {
                Ok(()) => written += 1,
                Err(nb::Error::WouldBlock) if written > 0 => break,
                Err(nb::Error::WouldBlock) => {
                    waited += 1;
                    if waited > limit {
                        return Err(UartError::TxStalled);
                    }
                }
                Err(nb::Error::Other(never)) => match never {},
            }
        }
        Ok(written)
    }

    /// Waits for the TX FIFO to drain, allowing each queued word a stall budget.
    fn flush(&mut self) -> Result<(), Self::Error> {
        for _ in 0..self.flush_limit() {
            if self.flush_fifo().is_ok() {
                return Ok(());
            }
        }
        Err(UartError::TxStalled)
    }
}
