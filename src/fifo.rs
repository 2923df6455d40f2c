//! Synchronous byte FIFO with a first-word-fall-through output register.
use arbitrary_int::{u10, u4};

use crate::registers::FifoStatus;

/// Largest fill count the 10-bit status field can report.
const MAX_FILL: usize = (1 << 10) - 1;

/// Which side of the UART a FIFO serves. Only changes what [Fifo::status] reports.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FifoRole {
    /// Filled by the receiver, drained by the bus. Status counts unread entries.
    Receive,
    /// Filled by the bus, drained by the transmitter. Status counts free slots.
    Transmit,
}

#[derive(Debug, Clone)]
pub struct Fifo<const DEPTH: usize> {
    role: FifoRole,
    mem: [u8; DEPTH],
    rd: usize,
    wr: usize,
    len: usize,
    head: u8,
    overflow: bool,
}

impl<const DEPTH: usize> Fifo<DEPTH> {
    const VALID_DEPTH: () = assert!(
        DEPTH.is_power_of_two() && DEPTH >= 4 && DEPTH <= 1024,
        "FIFO depth must be a power of two between 4 and 1024"
    );

    /// log2 of the depth, as reported in the status word.
    pub const LG_DEPTH: u32 = DEPTH.trailing_zeros();

    pub const fn new(role: FifoRole) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_DEPTH;
        Self {
            role,
            mem: [0; DEPTH],
            rd: 0,
            wr: 0,
            len: 0,
            head: 0,
            overflow: false,
        }
    }

    /// Empty the FIFO and clear the overflow flag. The output register keeps its value.
    pub fn reset(&mut self) {
        self.rd = 0;
        self.wr = 0;
        self.len = 0;
        self.overflow = false;
    }

    /// One clock edge.
    ///
    /// A read pops the entry currently shown by [Fifo::data] and is ignored while empty. A
    /// write while full is dropped and latches [Fifo::overflow], unless a read frees a slot on
    /// the same edge.
    pub fn step(&mut self, write: Option<u8>, read: bool) {
        let read = read && self.len > 0;
        let bypass = self.len == 0 || (self.len == 1 && read);

        if read {
            self.rd = (self.rd + 1) % DEPTH;
            self.len -= 1;
        }
        if let Some(byte) = write {
            if self.len == DEPTH {
                if !self.overflow {
                    log::warn!("{:?} fifo overflow, dropped {:#04x}", self.role, byte);
                }
                self.overflow = true;
            } else {
                self.mem[self.wr] = byte;
                self.wr = (self.wr + 1) % DEPTH;
                self.len += 1;
                if bypass {
                    self.head = byte;
                }
            }
        }
        if self.len > 0 && !(bypass && write.is_some()) {
            self.head = self.mem[self.rd];
        }
    }

    /// Entry at the head of the queue. Holds the last popped value while empty.
    #[inline]
    pub const fn data(&self) -> u8 {
        self.head
    }

    #[inline]
    pub const fn empty_n(&self) -> bool {
        self.len > 0
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub const fn is_full(&self) -> bool {
        self.len == DEPTH
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Fill count for the role: unread entries or free slots.
    #[inline]
    pub const fn fill(&self) -> usize {
        match self.role {
            FifoRole::Receive => self.len,
            FifoRole::Transmit => DEPTH - self.len,
        }
    }

    /// Sticky until [Fifo::reset].
    #[inline]
    pub const fn overflow(&self) -> bool {
        self.overflow
    }

    #[inline]
    pub const fn role(&self) -> FifoRole {
        self.role
    }

    #[inline]
    pub const fn depth(&self) -> usize {
        DEPTH
    }

    pub fn status(&self) -> FifoStatus {
        let fill = self.fill();
        FifoStatus::new_with_raw_value(0)
            .with_lg_depth(u4::new(Self::LG_DEPTH as u8))
            .with_fill(u10::new(fill.min(MAX_FILL) as u16))
            .with_half(fill >= DEPTH / 2)
            .with_available(match self.role {
                FifoRole::Receive => !self.is_empty(),
                FifoRole::Transmit => !self.is_full(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    fn drain<const N: usize>(fifo: &mut Fifo<N>) -> Vec<u8> {
        let mut out = Vec::new();
        while fifo.empty_n() {
            out.push(fifo.data());
            fifo.step(None, true);
        }
        out
    }

    #[test]
    fn keeps_write_order() {
        let mut fifo = Fifo::<8>::new(FifoRole::Receive);
        for byte in [1, 2, 3, 4, 5] {
            fifo.step(Some(byte), false);
        }
        assert_eq!(fifo.len(), 5);
        assert_eq!(drain(&mut fifo), [1, 2, 3, 4, 5]);
        assert!(fifo.is_empty());
    }

    #[test]
    fn wraps_around_the_buffer() {
        let mut fifo = Fifo::<4>::new(FifoRole::Receive);
        let mut seen = Vec::new();
        for byte in 0..20u8 {
            fifo.step(Some(byte), fifo.len() == 3);
            if fifo.len() == 3 {
                seen.extend(drain(&mut fifo));
            }
        }
        seen.extend(drain(&mut fifo));
        assert_eq!(seen, (0..20).collect::<Vec<u8>>());
        assert!(!fifo.overflow());
    }

    #[test]
    fn write_into_empty_fifo_is_visible_next_tick() {
        let mut fifo = Fifo::<4>::new(FifoRole::Receive);
        fifo.step(Some(0xaa), false);
        assert!(fifo.empty_n());
        assert_eq!(fifo.data(), 0xaa);
        // Popping the last entry while writing a new one shows the new one at once.
        fifo.step(Some(0xbb), true);
        assert_eq!(fifo.len(), 1);
        assert_eq!(fifo.data(), 0xbb);
        // With more than one entry the head advances normally.
        fifo.step(Some(0xcc), false);
        fifo.step(Some(0xdd), true);
        assert_eq!(fifo.data(), 0xcc);
        assert_eq!(drain(&mut fifo), [0xcc, 0xdd]);
    }

    #[test]
    fn overflow_is_sticky_until_reset() {
        let mut fifo = Fifo::<4>::new(FifoRole::Receive);
        for byte in 0..5 {
            fifo.step(Some(byte), false);
        }
        assert!(fifo.is_full());
        assert!(fifo.overflow());
        fifo.step(None, true);
        assert!(fifo.overflow());
        // The dropped byte never shows up.
        assert_eq!(drain(&mut fifo), [1, 2, 3]);
        assert!(fifo.overflow());
        fifo.reset();
        assert!(!fifo.overflow());
        assert!(fifo.is_empty());
    }

    #[test]
    fn read_frees_a_slot_for_a_write_on_the_same_tick() {
        let mut fifo = Fifo::<4>::new(FifoRole::Receive);
        for byte in 0..4 {
            fifo.step(Some(byte), false);
        }
        fifo.step(Some(4), true);
        assert!(!fifo.overflow());
        assert_eq!(drain(&mut fifo), [1, 2, 3, 4]);
    }

    #[test]
    fn read_while_empty_is_ignored() {
        let mut fifo = Fifo::<4>::new(FifoRole::Receive);
        fifo.step(None, true);
        assert!(fifo.is_empty());
        fifo.step(Some(7), true);
        assert_eq!(fifo.len(), 1);
        assert_eq!(fifo.data(), 7);
    }

    #[test]
    fn status_depends_on_role() {
        let mut rx = Fifo::<16>::new(FifoRole::Receive);
        let mut tx = Fifo::<16>::new(FifoRole::Transmit);
        assert_eq!(rx.status().raw_value(), 0x4000);
        // Empty transmit FIFO: 16 free slots, at least half free, room to write.
        assert_eq!(tx.status().raw_value(), 0x4000 | (16 << 2) | 0b11);
        for byte in 0..8 {
            rx.step(Some(byte), false);
            tx.step(Some(byte), false);
        }
        let status = rx.status();
        assert_eq!(status.lg_depth().value(), 4);
        assert_eq!(status.fill().value(), 8);
        assert!(status.half());
        assert!(status.available());
        let status = tx.status();
        assert_eq!(status.fill().value(), 8);
        assert!(status.half());
        for byte in 0..8 {
            tx.step(Some(byte), false);
        }
        assert!(!tx.status().available());
        assert!(!tx.status().half());
    }

    #[test]
    fn deepest_fifo_saturates_the_fill_count() {
        let tx = Fifo::<1024>::new(FifoRole::Transmit);
        assert_eq!(Fifo::<1024>::LG_DEPTH, 10);
        assert_eq!(tx.status().fill().value(), 1023);
    }
}
