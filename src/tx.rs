//! Transmitter bit-serialization state machine.
use crate::registers::Setup;
use crate::timing::{BaudCounter, Synchronizer};

/// Minimum length of a transmitted break, in bauds.
///
/// Longer than the longest word any setup can describe, so a receiver with the same setup
/// always reports a break instead of a framing error.
pub const BREAK_BAUDS: u32 = 16;

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum TxState {
    #[default]
    Idle,
    Start,
    /// Sending data bit `n`. Words narrower than 8 bits start at `8 - data_bits`.
    Bit(u8),
    Parity,
    Stop,
    SecondStop,
    Break,
}

/// Transmitter inputs for one tick.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TxInput {
    /// Write strobe. Ignored while busy.
    pub write: bool,
    pub data: u8,
    /// Hold the line low for as long as this is set.
    pub break_request: bool,
    /// Peer clear-to-send, active low and asynchronous.
    pub cts_n: bool,
}

impl Default for TxInput {
    fn default() -> Self {
        Self {
            write: false,
            data: 0,
            break_request: false,
            cts_n: false,
        }
    }
}

impl TxInput {
    pub const fn write(data: u8) -> Self {
        Self {
            write: true,
            data,
            break_request: false,
            cts_n: false,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TxOutput {
    pub line: bool,
    /// Set while a word or break is in progress and while the next write would be refused.
    pub busy: bool,
}

#[derive(Debug, Clone)]
pub struct Transmitter {
    setup: Setup,
    state: TxState,
    baud: BaudCounter,
    cts: Synchronizer,
    shift: u8,
    data: u8,
    parity: bool,
    /// Idle ticks left before a write is accepted after a break.
    holdoff: u32,
    line: bool,
    busy: bool,
}

impl Transmitter {
    pub fn new(setup: Setup) -> Self {
        Self {
            setup,
            state: TxState::Idle,
            baud: BaudCounter::new(),
            cts: Synchronizer::new(false),
            shift: 0,
            data: 0,
            parity: false,
            holdoff: 0,
            line: true,
            busy: false,
        }
    }

    /// Synchronous reset, taking the place of one tick.
    pub fn reset(&mut self, setup: Setup) -> TxOutput {
        *self = Self::new(setup);
        self.output()
    }

    #[inline]
    pub const fn state(&self) -> TxState {
        self.state
    }

    /// Setup the current word is sent with.
    #[inline]
    pub const fn setup(&self) -> Setup {
        self.setup
    }

    #[inline]
    pub const fn busy(&self) -> bool {
        self.busy
    }

    #[inline]
    pub const fn line(&self) -> bool {
        self.line
    }

    /// Last byte accepted for transmission.
    #[inline]
    pub const fn data(&self) -> u8 {
        self.data
    }

    #[inline]
    pub const fn output(&self) -> TxOutput {
        TxOutput {
            line: self.line,
            busy: self.busy,
        }
    }

    /// Advance one clock.
    ///
    /// `setup` is the live configuration. It is latched only on idle ticks outside the post-break
    /// holdoff, so a word in flight always finishes with the setup it started with.
    pub fn tick(&mut self, input: TxInput, setup: Setup) -> TxOutput {
        let cts_n = self.cts.tick(input.cts_n);

        if input.break_request {
            if self.state != TxState::Break {
                log::debug!("tx break from {:?}", self.state);
                self.state = TxState::Break;
                self.baud.load(BREAK_BAUDS * self.setup.baud_clocks());
            } else {
                self.baud.tick();
            }
            self.holdoff = 0;
            self.line = false;
            self.busy = true;
            return self.output();
        }

        let baud = self.setup.baud_clocks();
        match self.state {
            TxState::Break => {
                if self.baud.tick() {
                    // Idle high for a word before anything else goes out.
                    self.state = TxState::Idle;
                    self.holdoff = self.setup.word_clocks();
                    self.line = true;
                }
                self.busy = true;
            }
            TxState::Idle => self.idle(input, setup, cts_n),
            TxState::Start => {
                if self.baud.tick() {
                    self.baud.load(baud);
                    self.state = TxState::Bit(self.setup.first_bit_index());
                    self.shift_out();
                }
            }
            TxState::Bit(n) => {
                if self.baud.tick() {
                    self.baud.load(baud);
                    if n < 7 {
                        self.state = TxState::Bit(n + 1);
                        self.shift_out();
                    } else if self.setup.parity_enabled() {
                        self.state = TxState::Parity;
                        self.line = if self.setup.parity_fixed() {
                            self.setup.parity_polarity()
                        } else {
                            self.parity ^ self.setup.parity_polarity()
                        };
                    } else {
                        self.state = TxState::Stop;
                        self.line = true;
                    }
                }
            }
            TxState::Parity => {
                if self.baud.tick() {
                    self.baud.load(baud);
                    self.state = TxState::Stop;
                    self.line = true;
                }
            }
            TxState::Stop | TxState::SecondStop => {
                let last = self.state == TxState::SecondStop || !self.setup.two_stop_bits();
                if self.baud.tick() {
                    if last {
                        self.state = TxState::Idle;
                        self.idle(input, setup, cts_n);
                    } else {
                        self.baud.load(baud);
                        self.state = TxState::SecondStop;
                    }
                } else if last && self.baud.remaining() == 0 {
                    // Final tick of the word: a write on the next tick starts without a gap.
                    self.busy = self.blocked(cts_n);
                }
            }
        }
        self.output()
    }

    fn idle(&mut self, input: TxInput, setup: Setup, cts_n: bool) {
        self.line = true;
        if self.holdoff > 0 {
            self.holdoff -= 1;
            self.busy = true;
        } else if input.write && !self.busy {
            self.setup = setup;
            self.shift = input.data;
            self.data = input.data;
            self.parity = false;
            self.baud.load(self.setup.baud_clocks());
            self.state = TxState::Start;
            self.line = false;
            self.busy = true;
        } else {
            // No word in flight, so the live setup can be adopted even while CTS blocks.
            self.setup = setup;
            self.busy = self.blocked(cts_n);
        }
    }

    #[inline]
    fn blocked(&self, cts_n: bool) -> bool {
        !self.setup.flow_control_disabled() && cts_n
    }

    fn shift_out(&mut self) {
        let bit = self.shift & 1 == 1;
        self.shift >>= 1;
        self.parity ^= bit;
        self.line = bit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::DataBits;
    use std::vec::Vec;

    fn run(tx: &mut Transmitter, setup: Setup, input: TxInput, ticks: u32) -> Vec<TxOutput> {
        (0..ticks).map(|_| tx.tick(input, setup)).collect()
    }

    /// Collapse a per-tick waveform into (level, run length) pairs.
    fn runs(levels: impl IntoIterator<Item = bool>) -> Vec<(bool, u32)> {
        let mut runs: Vec<(bool, u32)> = Vec::new();
        for level in levels {
            match runs.last_mut() {
                Some((l, n)) if *l == level => *n += 1,
                _ => runs.push((level, 1)),
            }
        }
        runs
    }

    #[test]
    fn sends_ascii_a_at_115200_baud() {
        let setup = Setup::eight_n_one(868).unwrap();
        let mut tx = Transmitter::new(setup);
        let mut lines = Vec::new();
        lines.push(tx.tick(TxInput::write(0x41), setup).line);
        for out in run(&mut tx, setup, TxInput::default(), 12 * 868) {
            lines.push(out.line);
        }
        assert_eq!(
            runs(lines),
            [
                (false, 868),
                (true, 868),
                (false, 5 * 868),
                (true, 868),
                (false, 868),
                (true, 868 + 2 * 868 + 1),
            ]
        );
    }

    #[test]
    fn start_bit_has_no_added_latency() {
        let setup = Setup::eight_n_one(10).unwrap();
        let mut tx = Transmitter::new(setup);
        assert!(tx.tick(TxInput::default(), setup).line);
        let out = tx.tick(TxInput::write(0xff), setup);
        assert!(!out.line);
        assert!(out.busy);
    }

    #[test]
    fn busy_spans_the_whole_word() {
        let setup = Setup::eight_n_one(10).unwrap().with_two_stop_bits(true);
        let mut tx = Transmitter::new(setup);
        tx.tick(TxInput::write(0x00), setup);
        let outs = run(&mut tx, setup, TxInput::default(), 11 * 10);
        let busy = outs.iter().take_while(|o| o.busy).count();
        // Busy drops on the final tick of the second stop bit.
        assert_eq!(busy, 11 * 10 - 2);
        assert_eq!(tx.state(), TxState::Idle);
    }

    #[test]
    fn writes_while_busy_are_ignored() {
        let setup = Setup::eight_n_one(10).unwrap();
        let mut tx = Transmitter::new(setup);
        tx.tick(TxInput::write(0x12), setup);
        run(&mut tx, setup, TxInput::write(0x34), 50);
        assert_eq!(tx.data(), 0x12);
    }

    #[test]
    fn back_to_back_words_have_no_gap() {
        let setup = Setup::eight_n_one(8).unwrap();
        let mut tx = Transmitter::new(setup);
        let mut lines = Vec::new();
        let mut queue = [0x00u8, 0x00].into_iter().peekable();
        for _ in 0..(2 * 10 * 8 + 4) {
            let write = !tx.busy() && queue.peek().is_some();
            let input = match write {
                true => TxInput::write(queue.next().unwrap()),
                false => TxInput::default(),
            };
            lines.push(tx.tick(input, setup).line);
        }
        // Two zero words: 9 bauds low, one stop baud, 9 bauds low again.
        assert_eq!(
            runs(lines),
            [(false, 72), (true, 8), (false, 72), (true, 12)]
        );
    }

    #[test]
    fn parity_and_narrow_words() {
        let setup = Setup::eight_n_one(4)
            .unwrap()
            .with_data_bits(DataBits::Five)
            .with_parity_enabled(true)
            .with_parity_polarity(true);
        let mut tx = Transmitter::new(setup);
        let mut lines = Vec::new();
        lines.push(tx.tick(TxInput::write(0xe3), setup).line);
        for out in run(&mut tx, setup, TxInput::default(), 8 * 4) {
            lines.push(out.line);
        }
        let bits: Vec<bool> = lines.iter().step_by(4).copied().collect();
        // start, 1 1 0 0 0, odd parity of 0b00011 -> 1, stop, idle
        assert_eq!(
            bits,
            [false, true, true, false, false, false, true, true, true]
        );
    }

    #[test]
    fn break_preempts_and_holds_off() {
        let setup = Setup::eight_n_one(10).unwrap();
        let mut tx = Transmitter::new(setup);
        tx.tick(TxInput::write(0xff), setup);
        run(&mut tx, setup, TxInput::default(), 25);
        let brk = TxInput {
            break_request: true,
            ..Default::default()
        };
        // A short request still produces a full break.
        let outs = run(&mut tx, setup, brk, 3);
        assert!(outs.iter().all(|o| !o.line && o.busy));
        assert_eq!(tx.state(), TxState::Break);
        let outs = run(&mut tx, setup, TxInput::default(), BREAK_BAUDS * 10);
        let low = outs.iter().take_while(|o| !o.line).count() as u32;
        assert_eq!(low + 3, BREAK_BAUDS * 10);
        assert_eq!(tx.state(), TxState::Idle);
        // The line idles high for a word time before the next write is taken.
        let mut high = outs.len() as u32 - low;
        while tx.tick(TxInput::write(0x55), setup).line {
            high += 1;
            assert!(high <= 2 * setup.word_clocks());
        }
        assert_eq!(high, setup.word_clocks() + 2);
        assert_eq!(tx.data(), 0x55);
    }

    #[test]
    fn flow_control_blocks_only_the_next_start() {
        let setup = Setup::new_with_raw_value(10);
        let mut tx = Transmitter::new(setup);
        let not_ready = TxInput {
            cts_n: true,
            ..Default::default()
        };
        run(&mut tx, setup, not_ready, Synchronizer::LATENCY + 1);
        assert!(tx.busy());
        // Peer not ready: nothing starts.
        let blocked = TxInput {
            cts_n: true,
            ..TxInput::write(0x0f)
        };
        let outs = run(&mut tx, setup, blocked, 40);
        assert!(outs.iter().all(|o| o.busy && o.line));
        // Peer ready: the word starts, and deasserting cts mid-word does not stop it.
        run(&mut tx, setup, TxInput::write(0x0f), 4);
        assert_ne!(tx.state(), TxState::Idle);
        let outs = run(&mut tx, setup, blocked, 100);
        assert_eq!(tx.state(), TxState::Idle);
        assert!(outs.iter().any(|o| !o.line));
        assert!(tx.busy());
        assert_eq!(tx.data(), 0x0f);
    }

    #[test]
    fn disabling_flow_control_releases_a_blocked_write() {
        let flow = Setup::new_with_raw_value(10);
        let mut tx = Transmitter::new(flow);
        let not_ready = TxInput {
            cts_n: true,
            ..Default::default()
        };
        run(&mut tx, flow, not_ready, Synchronizer::LATENCY + 1);
        let blocked = TxInput {
            cts_n: true,
            ..TxInput::write(0x5a)
        };
        run(&mut tx, flow, blocked, 20);
        assert_eq!(tx.state(), TxState::Idle);
        assert!(tx.busy());
        // The peer still holds cts_n high, but it no longer matters.
        let open = flow.with_flow_control_disabled(true);
        let outs = run(&mut tx, open, blocked, 2);
        assert_eq!(tx.setup(), open);
        assert!(outs[0].line && !outs[0].busy);
        assert!(!outs[1].line);
        assert_eq!(tx.state(), TxState::Start);
        assert_eq!(tx.data(), 0x5a);
    }

    #[test]
    fn setup_change_waits_until_not_busy() {
        let fast = Setup::eight_n_one(4).unwrap();
        let slow = Setup::eight_n_one(8).unwrap();
        let mut tx = Transmitter::new(fast);
        let mut lines = Vec::new();
        lines.push(tx.tick(TxInput::write(0x00), fast).line);
        while tx.busy() {
            lines.push(tx.tick(TxInput::default(), slow).line);
        }
        assert_eq!(runs(lines), [(false, 36), (true, 4)]);
        assert_eq!(tx.setup(), fast);
        tx.tick(TxInput::default(), slow);
        assert_eq!(tx.setup(), slow);
    }
}
