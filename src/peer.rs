//! Behavioral model of the far end of the line.
//!
//! [LinePeer] is what a test bench connects to the UART pins: it samples the device's transmit
//! line in the middle of each bit, resynchronizing on every start edge, and drives the device's
//! receive line from a queue of host bytes. It is deliberately simpler than the [Receiver] so
//! that the two disagree loudly when either one is wrong.
//!
//! [Receiver]: crate::rx::Receiver
use crate::fifo::{Fifo, FifoRole};
use crate::registers::Setup;
use crate::timing::BaudCounter;

/// Bytes each direction can hold before [LinePeer::send] refuses more or received bytes are
/// dropped.
pub const PEER_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PeerErrors {
    pub frame: u32,
    pub parity: u32,
}

#[derive(Debug, Clone)]
pub struct LinePeer {
    setup: Setup,
    /// Device `tx` level seen on the previous tick.
    last_line: bool,
    rx_active: bool,
    rx_baud: BaudCounter,
    rx_index: u32,
    rx_frame: u32,
    received: Fifo<PEER_QUEUE_DEPTH>,
    tx_baud: BaudCounter,
    tx_frame: u32,
    tx_left: u32,
    outgoing: Fifo<PEER_QUEUE_DEPTH>,
    /// Device `rts_n`, honored between words when flow control is enabled.
    rts_n: bool,
    errors: PeerErrors,
}

impl LinePeer {
    pub fn new(setup: Setup) -> Self {
        Self {
            setup,
            last_line: true,
            rx_active: false,
            rx_baud: BaudCounter::new(),
            rx_index: 0,
            rx_frame: 0,
            received: Fifo::new(FifoRole::Receive),
            tx_baud: BaudCounter::new(),
            tx_frame: 0,
            tx_left: 0,
            outgoing: Fifo::new(FifoRole::Transmit),
            rts_n: false,
            errors: PeerErrors::default(),
        }
    }

    #[inline]
    pub const fn setup(&self) -> Setup {
        self.setup
    }

    /// Takes effect from the next word in either direction.
    #[inline]
    pub fn set_setup(&mut self, setup: Setup) {
        self.setup = setup;
    }

    #[inline]
    pub fn set_rts_n(&mut self, rts_n: bool) {
        self.rts_n = rts_n;
    }

    /// Queue a byte for the device. Returns `false` if the queue is full.
    pub fn send(&mut self, byte: u8) -> bool {
        if self.outgoing.is_full() {
            return false;
        }
        self.outgoing.step(Some(byte), false);
        true
    }

    pub fn take_received(&mut self) -> Option<u8> {
        if self.received.is_empty() {
            return None;
        }
        let byte = self.received.data();
        self.received.step(None, true);
        Some(byte)
    }

    /// Nothing queued, nothing on the wire in either direction.
    pub fn is_idle(&self) -> bool {
        !self.rx_active && self.tx_left == 0 && self.outgoing.is_empty()
    }

    #[inline]
    pub const fn errors(&self) -> PeerErrors {
        self.errors
    }

    /// Advance one clock. `tx_line` is the device's transmit line, the return value drives the
    /// device's receive line.
    pub fn tick(&mut self, tx_line: bool) -> bool {
        self.sample(tx_line);
        self.drive()
    }

    fn sample(&mut self, line: bool) {
        let falling = self.last_line && !line;
        self.last_line = line;
        if !self.rx_active {
            if falling {
                self.rx_active = true;
                self.rx_baud.load(self.setup.half_baud().max(1));
                self.rx_index = 0;
                self.rx_frame = 0;
            }
            return;
        }
        if !self.rx_baud.tick() {
            return;
        }
        if self.rx_index == 0 && line {
            // Glitch, not a start bit.
            self.rx_active = false;
            return;
        }
        self.rx_frame |= (line as u32) << self.rx_index;
        self.rx_index += 1;
        self.rx_baud.load(self.setup.baud_clocks());
        if self.rx_index == self.setup.frame_bits() {
            self.rx_active = false;
            self.finish_word();
        }
    }

    fn finish_word(&mut self) {
        let setup = self.setup;
        let data_bits = setup.data_bit_count();
        let data = ((self.rx_frame >> 1) as u8) & setup.data_mask();
        let mut pos = 1 + data_bits;
        if setup.parity_enabled() {
            let parity = (self.rx_frame >> pos) & 1 == 1;
            if parity != setup.parity_bit(data) {
                log::debug!("peer parity error, data {data:#04x}");
                self.errors.parity += 1;
            }
            pos += 1;
        }
        let stop_mask = (1 << setup.stop_bits()) - 1;
        if (self.rx_frame >> pos) & stop_mask != stop_mask {
            log::debug!("peer frame error, data {data:#04x}");
            self.errors.frame += 1;
            return;
        }
        self.received.step(Some(data), false);
    }

    fn drive(&mut self) -> bool {
        if self.tx_left > 0 && self.tx_baud.tick() {
            self.tx_frame >>= 1;
            self.tx_left -= 1;
            if self.tx_left > 0 {
                self.tx_baud.load(self.setup.baud_clocks());
            }
        }
        let held = self.rts_n && !self.setup.flow_control_disabled();
        if self.tx_left == 0 && self.outgoing.empty_n() && !held {
            let byte = self.outgoing.data();
            self.outgoing.step(None, true);
            self.tx_frame = self.frame(byte);
            self.tx_left = self.setup.frame_bits();
            self.tx_baud.load(self.setup.baud_clocks());
        }
        self.tx_left == 0 || self.tx_frame & 1 == 1
    }

    /// Line levels of one word, LSB first, start bit in bit 0.
    fn frame(&self, byte: u8) -> u32 {
        let setup = self.setup;
        let data = byte & setup.data_mask();
        let mut frame = (data as u32) << 1;
        let mut pos = 1 + setup.data_bit_count();
        if setup.parity_enabled() {
            frame |= (setup.parity_bit(data) as u32) << pos;
            pos += 1;
        }
        frame | (((1 << setup.stop_bits()) - 1) << pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::DataBits;
    use std::vec::Vec;

    #[test]
    fn frame_layout() {
        let setup = Setup::eight_n_one(4).unwrap();
        let peer = LinePeer::new(setup);
        assert_eq!(peer.frame(0x41), 0b1_0100_0001_0);
        let setup = setup
            .with_data_bits(DataBits::Seven)
            .with_parity_enabled(true)
            .with_two_stop_bits(true);
        let peer = LinePeer::new(setup);
        // Even parity of 0x03 is 0, then two stop bits.
        assert_eq!(peer.frame(0x83), 0b11_0_0000011_0);
    }

    #[test]
    fn talks_to_itself() {
        let setup = Setup::eight_n_one(5)
            .unwrap()
            .with_parity_enabled(true)
            .with_parity_polarity(true);
        let mut peer = LinePeer::new(setup);
        let bytes = [0x00, 0x55, 0xa5, 0xff];
        for byte in bytes {
            assert!(peer.send(byte));
        }
        let mut line = true;
        for _ in 0..(bytes.len() as u32 + 1) * setup.word_clocks() {
            line = peer.tick(line);
        }
        let received: Vec<u8> = core::iter::from_fn(|| peer.take_received()).collect();
        assert_eq!(received, bytes);
        assert_eq!(peer.errors(), PeerErrors::default());
        assert!(peer.is_idle());
    }

    #[test]
    fn counts_frame_errors() {
        let setup = Setup::eight_n_one(4).unwrap();
        let mut peer = LinePeer::new(setup);
        // Start bit followed by a line that never returns high.
        for _ in 0..3 * setup.word_clocks() {
            peer.tick(false);
        }
        assert_eq!(peer.errors().frame, 1);
        assert_eq!(peer.take_received(), None);
    }

    #[test]
    fn holds_words_while_rts_is_deasserted() {
        let setup = Setup::new_with_raw_value(4);
        let mut peer = LinePeer::new(setup);
        peer.set_rts_n(true);
        peer.send(0x00);
        assert!((0..100).all(|_| peer.tick(true)));
        peer.set_rts_n(false);
        assert!(!peer.tick(true));
    }
}
