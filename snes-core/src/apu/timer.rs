//! The SPC700's three hardware timers ($FA-$FC targets, $FD-$FF 4-bit outputs). Timers 0 and 1
//! divide the APU clock by 128 (8 kHz); timer 2 divides by 16 (64 kHz).

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct Timer {
    divider: u16,
    sub_counter: u16,
    stage_counter: u8,
    target: u8,
    output: u8,
    enabled: bool,
}

impl Timer {
    fn new(divider: u16) -> Self {
        Self { divider, sub_counter: 0, stage_counter: 0, target: 0, output: 0, enabled: false }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            self.sub_counter = 0;
            self.stage_counter = 0;
        }
        self.enabled = enabled;
    }

    pub fn set_target(&mut self, target: u8) {
        self.target = target;
    }

    /// Reads the 4-bit output counter; the read itself clears it to zero.
    pub fn read_output(&mut self) -> u8 {
        let value = self.output;
        self.output = 0;
        value
    }

    /// Advances the timer by `apu_cycles` APU-clock ticks.
    pub fn tick(&mut self, apu_cycles: u32) {
        if !self.enabled {
            return;
        }
        self.sub_counter += apu_cycles as u16;
        while self.sub_counter >= self.divider {
            self.sub_counter -= self.divider;
            self.stage_counter = self.stage_counter.wrapping_add(1);
            // target==0 behaves as a modulus of 256, matching hardware.
            if self.stage_counter == self.target {
                self.stage_counter = 0;
                self.output = (self.output + 1) & 0x0F;
            }
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct TimerBank {
    pub timer0: Timer,
    pub timer1: Timer,
    pub timer2: Timer,
}

impl TimerBank {
    pub fn new() -> Self {
        Self { timer0: Timer::new(128), timer1: Timer::new(128), timer2: Timer::new(16) }
    }

    pub fn tick(&mut self, apu_cycles: u32) {
        self.timer0.tick(apu_cycles);
        self.timer1.tick(apu_cycles);
        self.timer2.tick(apu_cycles);
    }
}

impl Default for TimerBank {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_timer_never_advances() {
        let mut timer = Timer::new(128);
        timer.set_target(1);
        timer.tick(10_000);
        assert_eq!(timer.read_output(), 0);
    }

    #[test]
    fn output_increments_once_per_target_reached_and_clears_on_read() {
        let mut timer = Timer::new(128);
        timer.set_enabled(true);
        timer.set_target(1);
        timer.tick(128);
        assert_eq!(timer.read_output(), 1);
        // Read clears the 4-bit counter.
        assert_eq!(timer.read_output(), 0);
    }

    #[test]
    fn target_zero_behaves_as_modulus_256() {
        let mut timer = Timer::new(1);
        timer.set_enabled(true);
        timer.set_target(0);
        timer.tick(255);
        assert_eq!(timer.read_output(), 0);
        timer.tick(1);
        assert_eq!(timer.read_output(), 1);
    }

    #[test]
    fn re_enabling_resets_sub_counters() {
        let mut timer = Timer::new(128);
        timer.set_enabled(true);
        timer.tick(64);
        timer.set_enabled(false);
        timer.set_enabled(true);
        timer.set_target(1);
        // If the stale sub_counter (64) had survived, 64 more cycles would reach the target;
        // it shouldn't, since re-enabling must reset it to 0.
        timer.tick(64);
        assert_eq!(timer.read_output(), 0);
    }
}
