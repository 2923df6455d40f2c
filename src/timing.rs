//! Timing primitives shared by the receiver and the transmitter.

/// Two stage synchronizer for an asynchronous input.
///
/// The level returned by [Synchronizer::tick] is the input sampled two ticks earlier. There is
/// no metastability to model, only the latency.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Synchronizer {
    first: bool,
    second: bool,
}

impl Synchronizer {
    /// Ticks between an input change and the synchronized output following it.
    pub const LATENCY: u32 = 2;

    /// Both stages preset to `level`.
    pub const fn new(level: bool) -> Self {
        Self {
            first: level,
            second: level,
        }
    }

    #[inline]
    pub fn tick(&mut self, input: bool) -> bool {
        let output = self.second;
        self.second = self.first;
        self.first = input;
        output
    }
}

/// Baud interval down-counter.
///
/// After [BaudCounter::load] with `n`, the `n`th following call to [BaudCounter::tick] reports
/// expiry. Once expired it keeps reporting expiry until loaded again.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct BaudCounter {
    remaining: u32,
}

impl BaudCounter {
    pub const fn new() -> Self {
        Self { remaining: 0 }
    }

    #[inline]
    pub fn load(&mut self, clocks: u32) {
        self.remaining = clocks.saturating_sub(1);
    }

    #[inline]
    pub fn tick(&mut self) -> bool {
        if self.remaining == 0 {
            return true;
        }
        self.remaining -= 1;
        false
    }

    #[inline]
    pub const fn remaining(&self) -> u32 {
        self.remaining
    }
}

/// Counts ticks since the synchronized line last changed level.
///
/// The count saturates at the limit passed to [ChangeTimer::tick], which is the break
/// threshold of the receiver.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChangeTimer {
    line: bool,
    count: u32,
}

impl ChangeTimer {
    pub const fn new(line: bool) -> Self {
        Self { line, count: 0 }
    }

    #[inline]
    pub fn tick(&mut self, line: bool, limit: u32) {
        if line != self.line {
            self.line = line;
            self.count = 0;
        } else if self.count < limit {
            self.count += 1;
        }
    }

    #[inline]
    pub const fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    pub const fn line(&self) -> bool {
        self.line
    }

    /// Line held at `level` for at least `clocks` ticks after the last change.
    #[inline]
    pub fn held(&self, level: bool, clocks: u32) -> bool {
        self.line == level && self.count >= clocks
    }
}
