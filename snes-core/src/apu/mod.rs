//! SPC700 + S-DSP "APU" subsystem: the 64KB audio RAM, the $00F0-$00FF I/O block, the three
//! hardware timers, and the DSP sample mixer, all driven by a master-cycle catchup accumulator.

mod bootrom;
mod dsp;
mod timer;

use crate::TimingMode;
use bincode::{Decode, Encode};
use dsp::AudioDsp;
use emu_common::num::GetBit;
use spc700_emu::{BusInterface, Spc700};
use std::collections::VecDeque;
use timer::TimerBank;

const AUDIO_RAM_LEN: usize = 64 * 1024;

pub type AudioRam = [u8; AUDIO_RAM_LEN];

// SNES/SFC master clock frequencies, in Hz.
const NTSC_MASTER_CLOCK_FREQUENCY: u64 = 21_477_270;
const PAL_MASTER_CLOCK_FREQUENCY: u64 = 21_281_370;

const APU_MASTER_CLOCK_FREQUENCY: u64 = 24_576_000;

// DSP runs at 32 kHz: one sample every 32 SPC700 clock cycles.
const DSP_CYCLES_PER_SAMPLE: u32 = 32;
const DSP_SAMPLE_RATE: f64 = 32_000.0;

const SAMPLE_BUFFER_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Encode, Decode)]
struct ApuRegisters {
    boot_rom_mapped: bool,
    test_register: u8,
    // Data the main 65C816 wrote for the SPC700 to read via $F4-$F7.
    main_cpu_communication: [u8; 4],
    // Data the SPC700 wrote for the main 65C816 to read via $2140-$2143.
    spc700_communication: [u8; 4],
    timer_targets: [u8; 3],
}

impl ApuRegisters {
    fn new() -> Self {
        Self {
            boot_rom_mapped: true,
            test_register: 0,
            main_cpu_communication: [0; 4],
            spc700_communication: [0; 4],
            timer_targets: [0; 3],
        }
    }

    fn write_control(&mut self, value: u8, timers: &mut TimerBank) {
        timers.timer0.set_enabled(value.bit(0));
        timers.timer1.set_enabled(value.bit(1));
        timers.timer2.set_enabled(value.bit(2));

        if value.bit(4) {
            self.spc700_communication[0] = 0;
            self.spc700_communication[1] = 0;
        }
        if value.bit(5) {
            self.spc700_communication[2] = 0;
            self.spc700_communication[3] = 0;
        }

        self.boot_rom_mapped = value.bit(7);
    }
}

struct Spc700Bus<'a> {
    audio_ram: &'a mut Box<AudioRam>,
    registers: &'a mut ApuRegisters,
    dsp: &'a mut AudioDsp,
    timers: &'a mut TimerBank,
}

impl BusInterface for Spc700Bus<'_> {
    #[inline]
    fn read(&mut self, address: u16) -> u8 {
        match address {
            0x00F0 => self.registers.test_register,
            0x00F1 => 0x00,
            0x00F2 => self.dsp.read_address(),
            0x00F3 => self.dsp.read_register(),
            0x00F4..=0x00F7 => self.registers.main_cpu_communication[(address & 0x3) as usize],
            0x00FA..=0x00FC => self.registers.timer_targets[(address - 0x00FA) as usize],
            0x00FD => self.timers.timer0.read_output(),
            0x00FE => self.timers.timer1.read_output(),
            0x00FF => self.timers.timer2.read_output(),
            0x00F8..=0x00F9 => 0x00,
            0xFFC0..=0xFFFF if self.registers.boot_rom_mapped => {
                bootrom::SPC700_BOOT_ROM[(address & 0x003F) as usize]
            }
            _ => self.audio_ram[address as usize],
        }
    }

    #[inline]
    fn write(&mut self, address: u16, value: u8) {
        match address {
            0x00F0 => self.registers.test_register = value,
            0x00F1 => self.registers.write_control(value, &mut *self.timers),
            0x00F2 => self.dsp.write_address(value),
            0x00F3 => self.dsp.write_register(value),
            0x00F4..=0x00F7 => self.registers.spc700_communication[(address & 0x3) as usize] = value,
            0x00FA => {
                self.registers.timer_targets[0] = value;
                self.timers.timer0.set_target(value);
            }
            0x00FB => {
                self.registers.timer_targets[1] = value;
                self.timers.timer1.set_target(value);
            }
            0x00FC => {
                self.registers.timer_targets[2] = value;
                self.timers.timer2.set_target(value);
            }
            0x00FD..=0x00FF | 0x00F8..=0x00F9 => {}
            _ => self.audio_ram[address as usize] = value,
        }
    }

    #[inline]
    fn idle(&mut self) {}
}

macro_rules! new_spc700_bus {
    ($self:expr) => {
        Spc700Bus {
            audio_ram: &mut $self.audio_ram,
            registers: &mut $self.registers,
            dsp: &mut $self.dsp,
            timers: &mut $self.timers,
        }
    };
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Apu {
    spc700: Spc700,
    dsp: AudioDsp,
    timers: TimerBank,
    audio_ram: Box<AudioRam>,
    registers: ApuRegisters,
    main_master_clock_frequency: u64,
    master_cycles_product: u64,
    dsp_cycle_counter: u32,
    sample_buffer: VecDeque<(i16, i16)>,
    resample_position: f64,
}

impl Apu {
    #[must_use]
    pub fn new(timing_mode: TimingMode) -> Self {
        let main_master_clock_frequency = match timing_mode {
            TimingMode::Ntsc => NTSC_MASTER_CLOCK_FREQUENCY,
            TimingMode::Pal => PAL_MASTER_CLOCK_FREQUENCY,
        };

        let mut apu = Self {
            spc700: Spc700::new(),
            dsp: AudioDsp::new(),
            timers: TimerBank::new(),
            audio_ram: vec![0; AUDIO_RAM_LEN].into_boxed_slice().try_into().unwrap(),
            registers: ApuRegisters::new(),
            main_master_clock_frequency,
            master_cycles_product: 0,
            dsp_cycle_counter: 0,
            sample_buffer: VecDeque::with_capacity(SAMPLE_BUFFER_CAPACITY),
            resample_position: 0.0,
        };

        let mut bus = new_spc700_bus!(apu);
        apu.spc700.reset(&mut bus);

        apu
    }

    /// Pays the APU its share of cycles for this main-CPU step, stepping the SPC700 and DSP
    /// until the accumulated budget (converted to whole APU clock cycles) is drained.
    pub fn tick(&mut self, main_master_cycles: u64) {
        self.master_cycles_product += main_master_cycles * APU_MASTER_CLOCK_FREQUENCY;

        while self.master_cycles_product >= 24 * self.main_master_clock_frequency {
            let cycles = self.spc700.step(&mut new_spc700_bus!(self));
            self.timers.tick(u32::from(cycles));

            self.dsp_cycle_counter += u32::from(cycles);
            while self.dsp_cycle_counter >= DSP_CYCLES_PER_SAMPLE {
                self.dsp_cycle_counter -= DSP_CYCLES_PER_SAMPLE;
                let sample = self.dsp.clock(&mut self.audio_ram);
                self.push_sample(sample);
            }

            self.master_cycles_product -= u64::from(cycles) * 24 * self.main_master_clock_frequency;
        }
    }

    fn push_sample(&mut self, sample: (i16, i16)) {
        if self.sample_buffer.len() >= SAMPLE_BUFFER_CAPACITY {
            // Consumer has fallen behind; drop the oldest sample rather than grow unbounded.
            self.sample_buffer.pop_front();
        }
        self.sample_buffer.push_back(sample);
    }

    /// Fills `output` with `output.len()` stereo samples resampled from the DSP's 32 kHz ring.
    /// Underrun repeats the last available sample; the source ring never overruns since
    /// `push_sample` drops the oldest entry first.
    pub fn get_samples(&mut self, output: &mut [(i16, i16)], output_frequency: f64) {
        let ratio = DSP_SAMPLE_RATE / output_frequency;
        let mut last_sample = self.sample_buffer.back().copied().unwrap_or((0, 0));

        for slot in output.iter_mut() {
            self.resample_position += ratio;
            let advance = self.resample_position as usize;
            self.resample_position -= advance as f64;

            for _ in 0..advance {
                if let Some(sample) = self.sample_buffer.pop_front() {
                    last_sample = sample;
                }
            }

            *slot = last_sample;
        }
    }

    pub fn read_port(&mut self, address: u32) -> u8 {
        self.registers.spc700_communication[(address & 0x3) as usize]
    }

    pub fn write_port(&mut self, address: u32, value: u8) {
        self.registers.main_cpu_communication[(address & 0x3) as usize] = value;
    }

    pub fn reset(&mut self) {
        self.registers = ApuRegisters::new();
        self.dsp.reset();
        self.spc700.reset(&mut new_spc700_bus!(self));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_port_is_visible_to_spc700_via_f4_f7() {
        let mut apu = Apu::new(TimingMode::Ntsc);
        apu.write_port(0, 0x42);
        assert_eq!(apu.registers.main_cpu_communication[0], 0x42);

        let mut bus = new_spc700_bus!(apu);
        assert_eq!(bus.read(0x00F4), 0x42);
    }

    #[test]
    fn spc700_write_to_f4_f7_is_visible_to_main_cpu_via_read_port() {
        let mut apu = Apu::new(TimingMode::Ntsc);
        {
            let mut bus = new_spc700_bus!(apu);
            bus.write(0x00F4, 0x99);
        }
        assert_eq!(apu.read_port(0), 0x99);
    }

    #[test]
    fn tick_drains_accumulated_cycles_and_steps_spc700() {
        let mut apu = Apu::new(TimingMode::Ntsc);
        let pc_before = apu.spc700.registers().pc;
        // One scanline's worth of master cycles is comfortably enough to retire at least one
        // SPC700 opcode out of the reset vector.
        apu.tick(1364);
        assert_ne!(apu.spc700.registers().pc, pc_before);
    }

    #[test]
    fn get_samples_repeats_last_sample_on_underrun() {
        let mut apu = Apu::new(TimingMode::Ntsc);
        apu.sample_buffer.push_back((7, -7));
        let mut out = vec![(0i16, 0i16); 16];
        apu.get_samples(&mut out, DSP_SAMPLE_RATE);
        assert!(out.iter().all(|&s| s == (7, -7)));
    }

    #[test]
    fn boot_rom_is_mapped_at_reset_and_unmaps_on_control_write() {
        let mut apu = Apu::new(TimingMode::Ntsc);
        assert!(apu.registers.boot_rom_mapped);
        {
            let mut bus = new_spc700_bus!(apu);
            assert_eq!(bus.read(0xFFFE), bootrom::SPC700_BOOT_ROM[0x3E]);
            bus.write(0x00F1, 0x00);
        }
        assert!(!apu.registers.boot_rom_mapped);
    }
}
