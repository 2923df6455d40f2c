//! Receiver bit-recovery state machine.
//!
//! The line is synchronized, then a change timer tracks how long it has kept its level. That
//! timer locates the middle of each start bit, detects breaks and decides when the line has
//! been idle long enough to trust after a reset. Data bits are sampled one baud apart from
//! there on.
use crate::registers::Setup;
use crate::timing::{BaudCounter, ChangeTimer, Synchronizer};

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum RxState {
    /// Waiting for the line to settle after a reset, a frame error or a setup change.
    #[default]
    ResetWait,
    Idle,
    /// Sampling data bit `n`. Words narrower than 8 bits start at `8 - data_bits`.
    Bit(u8),
    Parity,
    Stop,
    SecondStop,
    Break,
}

/// Receiver outputs after one tick.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct RxOutput {
    /// Last received word, right-justified.
    pub data: u8,
    /// Set for exactly one tick per received word.
    pub ready: bool,
    pub break_condition: bool,
    /// Only meaningful together with `ready`.
    pub parity_error: bool,
    /// Only meaningful together with `ready`.
    pub frame_error: bool,
    /// Synchronized line level.
    pub line: bool,
}

#[derive(Debug, Clone)]
pub struct Receiver {
    setup: Setup,
    state: RxState,
    sync: Synchronizer,
    change: ChangeTimer,
    baud: BaudCounter,
    shift: u8,
    parity: bool,
    parity_error: bool,
    /// The line has been seen idle for a full word since reset.
    line_synched: bool,
    output: RxOutput,
}

impl Receiver {
    pub fn new(setup: Setup) -> Self {
        Self {
            setup,
            state: RxState::ResetWait,
            sync: Synchronizer::new(true),
            change: ChangeTimer::new(true),
            baud: BaudCounter::new(),
            shift: 0,
            parity: false,
            parity_error: false,
            line_synched: false,
            output: RxOutput {
                line: true,
                ..Default::default()
            },
        }
    }

    /// Synchronous reset, taking the place of one tick.
    pub fn reset(&mut self, setup: Setup) -> RxOutput {
        *self = Self::new(setup);
        self.output
    }

    #[inline]
    pub const fn state(&self) -> RxState {
        self.state
    }

    /// Setup the current word is decoded with.
    #[inline]
    pub const fn setup(&self) -> Setup {
        self.setup
    }

    #[inline]
    pub const fn output(&self) -> RxOutput {
        self.output
    }

    /// Ticks the line must stay low to be reported as a break.
    ///
    /// Counts the start bit along with the data, parity and stop bits, so that an all-zero word
    /// with a space parity bit can never be mistaken for a break.
    #[inline]
    pub fn break_threshold(&self) -> u32 {
        self.setup.word_clocks()
    }

    /// Advance one clock with `line` as the raw level of the receive wire.
    ///
    /// `setup` is the live configuration. It is adopted only while the machine waits in
    /// [RxState::ResetWait]; a change seen while idle sends the machine there first.
    pub fn tick(&mut self, line: bool, setup: Setup) -> RxOutput {
        let ck = self.sync.tick(line);
        let threshold = self.break_threshold();
        self.change.tick(ck, threshold);

        let mut out = RxOutput {
            data: self.output.data,
            line: ck,
            ..Default::default()
        };

        if !self.line_synched && self.change.held(true, threshold) {
            log::trace!("rx line synchronized");
            self.line_synched = true;
        }

        if self.change.held(false, threshold) {
            if self.state != RxState::Break {
                log::debug!("rx break detected in {:?}", self.state);
            }
            self.state = RxState::Break;
            self.parity_error = false;
            out.break_condition = true;
            self.output = out;
            return out;
        }

        let baud = self.setup.baud_clocks();
        match self.state {
            RxState::ResetWait => {
                self.setup = setup;
                if self.line_synched && self.change.held(true, self.setup.baud_clocks()) {
                    self.state = RxState::Idle;
                }
            }
            RxState::Idle => {
                if self.change.held(false, self.setup.half_baud()) {
                    // Middle of a start bit.
                    self.shift = 0;
                    self.parity = false;
                    self.parity_error = false;
                    self.baud.load(baud);
                    self.state = RxState::Bit(self.setup.first_bit_index());
                } else if setup != self.setup {
                    log::debug!("rx setup change {:#010x}", setup.raw_value());
                    self.state = RxState::ResetWait;
                }
            }
            RxState::Bit(n) => {
                if self.baud.tick() {
                    self.shift = (self.shift >> 1) | ((ck as u8) << 7);
                    self.parity ^= ck;
                    self.baud.load(baud);
                    self.state = if n < 7 {
                        RxState::Bit(n + 1)
                    } else if self.setup.parity_enabled() {
                        RxState::Parity
                    } else {
                        RxState::Stop
                    };
                }
            }
            RxState::Parity => {
                if self.baud.tick() {
                    let expected = if self.setup.parity_fixed() {
                        self.setup.parity_polarity()
                    } else {
                        self.parity ^ self.setup.parity_polarity()
                    };
                    self.parity_error = ck != expected;
                    if self.parity_error {
                        log::debug!("rx parity error");
                    }
                    self.baud.load(baud);
                    self.state = RxState::Stop;
                }
            }
            RxState::Stop => {
                if self.baud.tick() {
                    out.data = self.shift >> self.setup.first_bit_index();
                    if !ck {
                        self.finish_word(&mut out, true);
                    } else if self.setup.two_stop_bits() {
                        self.baud.load(baud);
                        self.state = RxState::SecondStop;
                    } else {
                        self.finish_word(&mut out, false);
                    }
                }
            }
            RxState::SecondStop => {
                if self.baud.tick() {
                    self.finish_word(&mut out, !ck);
                }
            }
            RxState::Break => {
                // Only reached once the line is high again.
                self.state = RxState::Idle;
            }
        }

        self.output = out;
        out
    }

    fn finish_word(&mut self, out: &mut RxOutput, frame_error: bool) {
        out.ready = true;
        out.parity_error = self.parity_error;
        out.frame_error = frame_error;
        self.parity_error = false;
        if frame_error {
            log::debug!("rx frame error, data {:#04x}", out.data);
            self.state = RxState::ResetWait;
        } else {
            self.state = RxState::Idle;
        }
    }
}
