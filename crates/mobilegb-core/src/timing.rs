/// Cycle counter used for elapsed-time checks.
///
/// A timebase only measures time once a non-zero frequency is set and a
/// reference point has been latched. Until then every check reports that the
/// interval has not elapsed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timebase {
    frequency_hz: u32,
    cycles: u64,
    latched: Option<u64>,
}

impl Timebase {
    pub fn new(frequency_hz: u32) -> Self {
        Self {
            frequency_hz,
            ..Self::default()
        }
    }

    pub fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    pub fn set_frequency(&mut self, frequency_hz: u32) {
        self.frequency_hz = frequency_hz;
    }

    pub fn is_established(&self) -> bool {
        self.frequency_hz != 0
    }

    pub fn advance(&mut self, cycles: u32) {
        self.cycles = self.cycles.saturating_add(cycles as u64);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Records the current cycle count as the reference point.
    pub fn latch(&mut self) {
        self.latched = Some(self.cycles);
    }

    /// Milliseconds since the last latch, if measurable.
    pub fn elapsed_ms(&self) -> Option<u64> {
        if self.frequency_hz == 0 {
            return None;
        }
        let latched = self.latched?;
        let elapsed = self.cycles.saturating_sub(latched);
        Some(elapsed.saturating_mul(1000) / self.frequency_hz as u64)
    }

    /// Whether more than `ms` milliseconds passed since the last latch.
    pub fn check_ms(&self, ms: u32) -> bool {
        self.elapsed_ms().is_some_and(|elapsed| elapsed > ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::Timebase;

    #[test]
    fn zero_frequency_never_elapses() {
        let mut t = Timebase::default();
        t.latch();
        t.advance(u32::MAX);
        assert!(!t.check_ms(0));
        assert_eq!(t.elapsed_ms(), None);
    }

    #[test]
    fn unlatched_never_elapses() {
        let mut t = Timebase::new(1000);
        t.advance(5000);
        assert!(!t.check_ms(1));
    }

    #[test]
    fn elapsed_ms_from_latch() {
        let mut t = Timebase::new(4_194_304);
        t.advance(123);
        t.latch();
        t.advance(4_194_304 / 2);
        assert_eq!(t.elapsed_ms(), Some(500));
        assert!(t.check_ms(499));
        assert!(!t.check_ms(500));
    }
}
