//! Setup word and bus register layouts.
//!
//! All layouts are plain bit-packed words. The engines only ever consume a [Setup], the bus
//! wrapper in the crate root decodes and produces the other words.
use arbitrary_int::{u10, u2, u24, u4};

/// Smallest accepted value of [Setup::clocks_per_baud].
pub const MIN_CLOCKS_PER_BAUD: u32 = 3;

/// Power-on value of the setup register: 8N1, hardware flow control enabled, 25 clocks per baud.
pub const DEFAULT_SETUP: u32 = 25;

/// Number of data bits per word, encoded as `8 - code`.
#[bitbybit::bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum DataBits {
    Eight = 0b00,
    Seven = 0b01,
    Six = 0b10,
    Five = 0b11,
}

impl DataBits {
    #[inline]
    pub const fn bits(&self) -> u32 {
        match self {
            DataBits::Eight => 8,
            DataBits::Seven => 7,
            DataBits::Six => 6,
            DataBits::Five => 5,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetupError {
    #[error("clocks per baud must be greater than 2 and fit in 24 bits, got {0}")]
    BaudTooShort(u32),
    #[error("reserved setup bit 31 is set")]
    ReservedBit,
}

/// Line configuration shared by the receiver and the transmitter.
#[bitbybit::bitfield(u32, default = 25)]
#[derive(Debug, PartialEq, Eq)]
pub struct Setup {
    /// Ignore `cts_n` and hold `rts_n` asserted.
    #[bit(30, rw)]
    pub flow_control_disabled: bool,
    #[bits(28..=29, rw)]
    pub data_bits: DataBits,
    #[bit(27, rw)]
    pub two_stop_bits: bool,
    #[bit(26, rw)]
    pub parity_enabled: bool,
    /// Send and expect a constant parity bit instead of a computed one.
    #[bit(25, rw)]
    pub parity_fixed: bool,
    /// Computed parity: `false` is even, `true` is odd. Fixed parity: the bit value itself
    /// (`true` is mark).
    #[bit(24, rw)]
    pub parity_polarity: bool,
    #[bits(0..=23, rw)]
    pub clocks_per_baud: u24,
}

impl Setup {
    /// Decode a raw setup word, rejecting words the engines cannot run with.
    pub fn validated(raw: u32) -> Result<Self, SetupError> {
        if raw & (1 << 31) != 0 {
            return Err(SetupError::ReservedBit);
        }
        let setup = Self::new_with_raw_value(raw);
        let clocks = setup.baud_clocks();
        if clocks < MIN_CLOCKS_PER_BAUD {
            return Err(SetupError::BaudTooShort(clocks));
        }
        Ok(setup)
    }

    /// 8 data bits, no parity, one stop bit, hardware flow control disabled.
    pub fn eight_n_one(clocks_per_baud: u32) -> Result<Self, SetupError> {
        if clocks_per_baud > 0x00ff_ffff {
            return Err(SetupError::BaudTooShort(clocks_per_baud));
        }
        Self::validated((1 << 30) | clocks_per_baud)
    }

    #[inline]
    pub fn baud_clocks(&self) -> u32 {
        self.clocks_per_baud().value()
    }

    #[inline]
    pub fn half_baud(&self) -> u32 {
        self.baud_clocks() / 2
    }

    #[inline]
    pub fn data_bit_count(&self) -> u32 {
        self.data_bits().bits()
    }

    #[inline]
    pub fn parity_bits(&self) -> u32 {
        self.parity_enabled() as u32
    }

    #[inline]
    pub fn stop_bits(&self) -> u32 {
        1 + self.two_stop_bits() as u32
    }

    /// Start bit, data bits, parity and stop bits.
    #[inline]
    pub fn frame_bits(&self) -> u32 {
        1 + self.data_bit_count() + self.parity_bits() + self.stop_bits()
    }

    /// Duration of one complete word on the line.
    #[inline]
    pub fn word_clocks(&self) -> u32 {
        self.frame_bits() * self.baud_clocks()
    }

    /// Index of the first data bit state. Narrow words start late so that the parity and
    /// stop states do not depend on the word width.
    #[inline]
    pub fn first_bit_index(&self) -> u8 {
        (8 - self.data_bit_count()) as u8
    }

    /// Mask selecting the data bits of a word.
    #[inline]
    pub fn data_mask(&self) -> u8 {
        (0xff_u16 >> (8 - self.data_bit_count())) as u8
    }

    /// Parity bit sent for `data`, or expected when receiving it.
    #[inline]
    pub fn parity_bit(&self, data: u8) -> bool {
        if self.parity_fixed() {
            self.parity_polarity()
        } else {
            ((data & self.data_mask()).count_ones() & 1 == 1) ^ self.parity_polarity()
        }
    }
}

/// Bus register address.
#[bitbybit::bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum Register {
    Setup = 0b00,
    FifoStatus = 0b01,
    RxData = 0b10,
    TxData = 0b11,
}

impl Register {
    #[inline]
    pub fn from_addr(addr: u8) -> Self {
        Self::new_with_raw_value(u2::new(addr & 0b11))
    }
}

/// Status word of a single FIFO.
#[bitbybit::bitfield(u16, default = 0x0)]
#[derive(Debug, PartialEq, Eq)]
pub struct FifoStatus {
    /// log2 of the FIFO depth.
    #[bits(12..=15, rw)]
    pub lg_depth: u4,
    /// Unread entries for a receive FIFO, free slots for a transmit FIFO.
    #[bits(2..=11, rw)]
    pub fill: u10,
    #[bit(1, rw)]
    pub half: bool,
    /// Receive FIFO: not empty. Transmit FIFO: not full.
    #[bit(0, rw)]
    pub available: bool,
}

#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug, PartialEq, Eq)]
pub struct FifoStatusRegister {
    #[bits(16..=31, rw)]
    pub tx: u16,
    #[bits(0..=15, rw)]
    pub rx: u16,
}

impl FifoStatusRegister {
    #[inline]
    pub fn tx_status(&self) -> FifoStatus {
        FifoStatus::new_with_raw_value(self.tx())
    }

    #[inline]
    pub fn rx_status(&self) -> FifoStatus {
        FifoStatus::new_with_raw_value(self.rx())
    }
}

/// Value read from the RX data register.
#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug, PartialEq, Eq)]
pub struct RxData {
    #[bit(12, rw)]
    pub fifo_overflow: bool,
    #[bit(11, rw)]
    pub break_condition: bool,
    #[bit(10, rw)]
    pub frame_error: bool,
    #[bit(9, rw)]
    pub parity_error: bool,
    #[bit(8, rw)]
    pub empty: bool,
    #[bits(0..=7, rw)]
    pub data: u8,
}

/// Value written to the RX data register.
#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug, PartialEq, Eq)]
pub struct RxControl {
    /// Reset the receiver and flush the RX FIFO.
    #[bit(12, rw)]
    pub reset: bool,
    #[bit(10, rw)]
    pub clear_frame_error: bool,
    #[bit(9, rw)]
    pub clear_parity_error: bool,
}

/// Value read from the TX data register.
#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug, PartialEq, Eq)]
pub struct TxData {
    #[bit(12, rw)]
    pub fifo_overflow: bool,
    #[bit(11, rw)]
    pub rx_line: bool,
    #[bit(10, rw)]
    pub tx_line: bool,
    #[bit(9, rw)]
    pub break_control: bool,
    #[bit(8, rw)]
    pub busy: bool,
    #[bits(0..=7, rw)]
    pub data: u8,
}

/// Value written to the TX data register.
#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug, PartialEq, Eq)]
pub struct TxCommand {
    /// Reset the transmitter and flush the TX FIFO.
    #[bit(12, rw)]
    pub reset: bool,
    /// Break level to hold on the line.
    #[bit(9, rw)]
    pub break_control: bool,
    /// Update the control bits without queueing `data`.
    #[bit(8, rw)]
    pub control_only: bool,
    #[bits(0..=7, rw)]
    pub data: u8,
}

impl TxCommand {
    /// Whether this write queues its data byte.
    #[inline]
    pub fn queues_data(&self) -> bool {
        !self.reset() && !self.break_control() && !self.control_only()
    }
}
