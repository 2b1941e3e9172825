mod addressing;
mod instructions;

use crate::traits::BusInterface;
use bincode::{Decode, Encode};
use emu_common::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct StatusRegister {
    pub c: bool,
    pub z: bool,
    pub i: bool,
    pub d: bool,
    /// Index register width: true = 8-bit, false = 16-bit.
    pub x: bool,
    /// Accumulator/memory width: true = 8-bit, false = 16-bit.
    pub m: bool,
    pub v: bool,
    pub n: bool,
}

impl Default for StatusRegister {
    fn default() -> Self {
        // Power-on / reset defaults: I set, D clear, M and X forced on in emulation mode
        Self { c: false, z: false, i: true, d: false, x: true, m: true, v: false, n: false }
    }
}

impl From<StatusRegister> for u8 {
    fn from(p: StatusRegister) -> Self {
        (u8::from(p.n) << 7)
            | (u8::from(p.v) << 6)
            | (u8::from(p.m) << 5)
            | (u8::from(p.x) << 4)
            | (u8::from(p.d) << 3)
            | (u8::from(p.i) << 2)
            | (u8::from(p.z) << 1)
            | u8::from(p.c)
    }
}

impl StatusRegister {
    fn from_byte(value: u8, emulation_mode: bool) -> Self {
        Self {
            c: value.bit(0),
            z: value.bit(1),
            i: value.bit(2),
            d: value.bit(3),
            x: emulation_mode || value.bit(4),
            m: emulation_mode || value.bit(5),
            v: value.bit(6),
            n: value.bit(7),
        }
    }

    /// The B flag / break flag as read back from PHP in emulation mode; in emulation mode the X
    /// flag's bit position instead reads as the (always-set) break flag, which callers that need
    /// that distinction should special-case.
    fn to_byte_with_break(self, break_flag: bool, emulation_mode: bool) -> u8 {
        let mut byte = u8::from(self);
        if emulation_mode {
            byte = (byte & !0x10) | (u8::from(break_flag) << 4);
        }
        byte
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Registers {
    pub a: u16,
    pub x: u16,
    pub y: u16,
    pub s: u16,
    pub d: u16,
    pub pbr: u8,
    pub pc: u16,
    pub dbr: u8,
    pub p: StatusRegister,
    pub emulation_mode: bool,
}

impl Registers {
    fn new() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            s: 0x01FF,
            d: 0,
            pbr: 0,
            pc: 0,
            dbr: 0,
            p: StatusRegister::default(),
            emulation_mode: true,
        }
    }

    fn enforce_emulation_invariants(&mut self) {
        if self.emulation_mode {
            self.p.m = true;
            self.p.x = true;
            self.s = 0x0100 | (self.s & 0x00FF);
        }
        if self.p.x {
            self.x &= 0x00FF;
            self.y &= 0x00FF;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum InterruptType {
    Brk,
    Cop,
    Nmi,
    Irq,
    Reset,
}

impl InterruptType {
    const fn vector(self, emulation_mode: bool) -> u16 {
        match (self, emulation_mode) {
            (Self::Cop, true) => 0xFFF4,
            (Self::Cop, false) => 0xFFE4,
            (Self::Brk, true) => 0xFFFE,
            (Self::Brk, false) => 0xFFE6,
            (Self::Nmi, true) => 0xFFFA,
            (Self::Nmi, false) => 0xFFEA,
            (Self::Irq, true) => 0xFFFE,
            (Self::Irq, false) => 0xFFEE,
            (Self::Reset, _) => 0xFFFC,
        }
    }
}

/// Pending interrupt lines, latched with a one-opcode delay so that a mask write during the
/// instruction following it does not retroactively suppress an already-pending interrupt.
#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub struct InterruptLatches {
    pub irq: bool,
    pub nmi: bool,
    pub reset: bool,
    last_nmi_line: bool,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Wdc65816 {
    pub(crate) registers: Registers,
    pub(crate) interrupts: InterruptLatches,
    pub(crate) waiting: bool,
    pub(crate) stopped: bool,
}

impl Wdc65816 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registers: Registers::new(),
            interrupts: InterruptLatches::default(),
            waiting: false,
            stopped: false,
        }
    }

    pub fn reset<B: BusInterface>(&mut self, bus: &mut B) {
        let vector = InterruptType::Reset.vector(true);
        let lo = bus.read(u32::from(vector));
        let hi = bus.read(u32::from(vector) + 1);

        self.registers.pc = u16::from_le_bytes([lo, hi]);
        self.registers.pbr = 0;
        self.registers.dbr = 0;
        self.registers.d = 0;
        self.registers.emulation_mode = true;
        self.registers.p = StatusRegister::default();
        self.registers.enforce_emulation_invariants();

        self.interrupts = InterruptLatches::default();
        self.waiting = false;
        self.stopped = false;
    }

    /// Polls the bus's interrupt lines, latching NMI on a rising edge and IRQ at level (subject to
    /// the I flag), per the one-opcode delay described for $4200 writes upstream of this core.
    fn poll_interrupts<B: BusInterface>(&mut self, bus: &B) {
        let nmi_line = bus.nmi();
        if nmi_line && !self.interrupts.last_nmi_line {
            self.interrupts.nmi = true;
        }
        self.interrupts.last_nmi_line = nmi_line;

        if bus.irq() && !self.registers.p.i {
            self.interrupts.irq = true;
        }
    }

    /// Executes exactly one opcode (or services one pending interrupt), issuing every memory and
    /// idle cycle it needs through `bus`. Returns once the instruction has fully retired.
    pub fn step<B: BusInterface>(&mut self, bus: &mut B) {
        self.poll_interrupts(bus);

        if self.stopped {
            bus.idle();
            return;
        }

        if self.waiting {
            if self.interrupts.nmi || self.interrupts.irq {
                self.waiting = false;
            } else {
                bus.idle();
                return;
            }
        }

        if self.interrupts.nmi {
            self.interrupts.nmi = false;
            instructions::service_interrupt(self, bus, InterruptType::Nmi);
            return;
        }

        if self.interrupts.irq && !self.registers.p.i {
            instructions::service_interrupt(self, bus, InterruptType::Irq);
            self.interrupts.irq = false;
            return;
        }

        let opcode = self.fetch_opcode(bus);
        instructions::execute(self, bus, opcode);
        self.registers.enforce_emulation_invariants();
    }

    fn fetch_opcode<B: BusInterface>(&mut self, bus: &mut B) -> u8 {
        let address = (u32::from(self.registers.pbr) << 16) | u32::from(self.registers.pc);
        let opcode = bus.read(address);
        self.registers.pc = self.registers.pc.wrapping_add(1);
        opcode
    }

    #[must_use]
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn set_registers(&mut self, registers: Registers) {
        self.registers = registers;
        self.registers.enforce_emulation_invariants();
    }

    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn clear_stopped(&mut self) {
        self.stopped = false;
    }
}

impl Default for Wdc65816 {
    fn default() -> Self {
        Self::new()
    }
}
