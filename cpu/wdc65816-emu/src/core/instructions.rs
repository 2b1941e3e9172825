//! The 256-entry opcode dispatch table and the operation implementations it calls into.

use super::{InterruptType, Wdc65816};
use crate::traits::BusInterface;
use emu_common::num::{bcd_to_binary, binary_to_bcd, GetBit, SignBit, U16Ext};

fn high_addr(address: u32) -> u32 {
    let bank = address & 0x00FF_0000;
    let offset = (address as u16).wrapping_add(1);
    bank | u32::from(offset)
}

impl Wdc65816 {
    fn read_sized<B: BusInterface>(&mut self, bus: &mut B, address: u32, narrow: bool) -> u16 {
        let lo = bus.read(address);
        if narrow {
            u16::from(lo)
        } else {
            let hi = bus.read(high_addr(address));
            u16::from_le_bytes([lo, hi])
        }
    }

    fn write_sized<B: BusInterface>(&mut self, bus: &mut B, address: u32, narrow: bool, value: u16) {
        bus.write(address, value.lsb());
        if !narrow {
            bus.write(high_addr(address), value.msb());
        }
    }

    fn set_nz_8(&mut self, value: u8) {
        self.registers.p.z = value == 0;
        self.registers.p.n = value.sign_bit();
    }

    fn set_nz_16(&mut self, value: u16) {
        self.registers.p.z = value == 0;
        self.registers.p.n = value.sign_bit();
    }

    fn set_nz_sized(&mut self, value: u16, narrow: bool) {
        if narrow {
            self.set_nz_8(value.lsb());
        } else {
            self.set_nz_16(value);
        }
    }

    // ---- stack helpers ----------------------------------------------------------------

    fn push8<B: BusInterface>(&mut self, bus: &mut B, value: u8) {
        bus.write(u32::from(self.registers.s), value);
        self.registers.s = self.registers.s.wrapping_sub(1);
        if self.registers.emulation_mode {
            self.registers.s = 0x0100 | (self.registers.s & 0x00FF);
        }
    }

    fn push16<B: BusInterface>(&mut self, bus: &mut B, value: u16) {
        self.push8(bus, value.msb());
        self.push8(bus, value.lsb());
    }

    fn pull8<B: BusInterface>(&mut self, bus: &mut B) -> u8 {
        self.registers.s = self.registers.s.wrapping_add(1);
        if self.registers.emulation_mode {
            self.registers.s = 0x0100 | (self.registers.s & 0x00FF);
        }
        bus.read(u32::from(self.registers.s))
    }

    fn pull16<B: BusInterface>(&mut self, bus: &mut B) -> u16 {
        let lo = self.pull8(bus);
        let hi = self.pull8(bus);
        u16::from_le_bytes([lo, hi])
    }

    fn push_sized<B: BusInterface>(&mut self, bus: &mut B, value: u16, narrow: bool) {
        if narrow {
            self.push8(bus, value.lsb());
        } else {
            self.push16(bus, value);
        }
    }

    fn pull_sized<B: BusInterface>(&mut self, bus: &mut B, narrow: bool) -> u16 {
        if narrow {
            u16::from(self.pull8(bus))
        } else {
            self.pull16(bus)
        }
    }

    // ---- ALU ----------------------------------------------------------------------------

    fn adc(&mut self, operand: u16) {
        let narrow = self.registers.p.m;
        let a = self.registers.a;
        if self.registers.p.d {
            self.adc_decimal(a, operand, narrow);
        } else {
            let (sum, carry, overflow) = if narrow {
                let a8 = a.lsb();
                let op8 = operand.lsb();
                let (r, c1) = a8.overflowing_add(op8);
                let (r, c2) = r.overflowing_add(u8::from(self.registers.p.c));
                let overflow = (a8 ^ r) & (op8 ^ r) & 0x80 != 0;
                (u16::from(r), c1 || c2, overflow)
            } else {
                let (r, c1) = a.overflowing_add(operand);
                let (r, c2) = r.overflowing_add(u16::from(self.registers.p.c));
                let overflow = (a ^ r) & (operand ^ r) & 0x8000 != 0;
                (r, c1 || c2, overflow)
            };
            self.registers.p.c = carry;
            self.registers.p.v = overflow;
            self.registers.a = if narrow { (a & 0xFF00) | (sum & 0x00FF) } else { sum };
            self.set_nz_sized(self.registers.a & if narrow { 0x00FF } else { 0xFFFF }, narrow);
        }
    }

    fn adc_decimal(&mut self, a: u16, operand: u16, narrow: bool) {
        if narrow {
            let sum = bcd_to_binary(a.lsb()) + bcd_to_binary(operand.lsb()) + u8::from(self.registers.p.c);
            self.registers.p.c = sum > 99;
            let result = binary_to_bcd(sum % 100);
            self.registers.a = (a & 0xFF00) | u16::from(result);
            self.registers.p.v = false;
            self.set_nz_8(result);
        } else {
            let lo = bcd_to_binary(a.lsb()) + bcd_to_binary(operand.lsb()) + u8::from(self.registers.p.c);
            let lo_carry = lo > 99;
            let lo_digits = lo % 100;
            let hi = bcd_to_binary(a.msb()) + bcd_to_binary(operand.msb()) + u8::from(lo_carry);
            self.registers.p.c = hi > 99;
            let hi_digits = hi % 100;
            let result = u16::from_le_bytes([binary_to_bcd(lo_digits), binary_to_bcd(hi_digits)]);
            self.registers.a = result;
            self.registers.p.v = false;
            self.set_nz_16(result);
        }
    }

    fn sbc(&mut self, operand: u16) {
        let narrow = self.registers.p.m;
        if self.registers.p.d {
            self.sbc_decimal(operand, narrow);
        } else {
            self.adc(operand ^ if narrow { 0x00FF } else { 0xFFFF });
        }
    }

    fn sbc_decimal(&mut self, operand: u16, narrow: bool) {
        let a = self.registers.a;
        if narrow {
            let a_dec = i16::from(bcd_to_binary(a.lsb()));
            let op_dec = i16::from(bcd_to_binary(operand.lsb()));
            let diff = a_dec - op_dec - i16::from(!self.registers.p.c);
            self.registers.p.c = diff >= 0;
            let wrapped = diff.rem_euclid(100) as u8;
            let result = binary_to_bcd(wrapped);
            self.registers.a = (a & 0xFF00) | u16::from(result);
            self.set_nz_8(result);
        } else {
            let a_lo = i16::from(bcd_to_binary(a.lsb()));
            let op_lo = i16::from(bcd_to_binary(operand.lsb()));
            let lo_diff = a_lo - op_lo - i16::from(!self.registers.p.c);
            let lo_borrow = lo_diff < 0;
            let lo_digits = lo_diff.rem_euclid(100) as u8;

            let a_hi = i16::from(bcd_to_binary(a.msb()));
            let op_hi = i16::from(bcd_to_binary(operand.msb()));
            let hi_diff = a_hi - op_hi - i16::from(lo_borrow);
            self.registers.p.c = hi_diff >= 0;
            let hi_digits = hi_diff.rem_euclid(100) as u8;

            let result = u16::from_le_bytes([binary_to_bcd(lo_digits), binary_to_bcd(hi_digits)]);
            self.registers.a = result;
            self.set_nz_16(result);
        }
    }

    fn cmp_sized(&mut self, reg: u16, operand: u16, narrow: bool) {
        if narrow {
            let (result, borrow) = reg.lsb().overflowing_sub(operand.lsb());
            self.registers.p.c = !borrow;
            self.set_nz_8(result);
        } else {
            let (result, borrow) = reg.overflowing_sub(operand);
            self.registers.p.c = !borrow;
            self.set_nz_16(result);
        }
    }

    fn and_op(&mut self, operand: u16) {
        let narrow = self.registers.p.m;
        self.registers.a = if narrow {
            (self.registers.a & 0xFF00) | ((self.registers.a & operand) & 0x00FF)
        } else {
            self.registers.a & operand
        };
        self.set_nz_sized(self.registers.a, narrow);
    }

    fn ora_op(&mut self, operand: u16) {
        let narrow = self.registers.p.m;
        self.registers.a = if narrow {
            (self.registers.a & 0xFF00) | ((self.registers.a | operand) & 0x00FF)
        } else {
            self.registers.a | operand
        };
        self.set_nz_sized(self.registers.a, narrow);
    }

    fn eor_op(&mut self, operand: u16) {
        let narrow = self.registers.p.m;
        self.registers.a = if narrow {
            (self.registers.a & 0xFF00) | ((self.registers.a ^ operand) & 0x00FF)
        } else {
            self.registers.a ^ operand
        };
        self.set_nz_sized(self.registers.a, narrow);
    }

    fn bit_op(&mut self, operand: u16, is_immediate: bool) {
        let narrow = self.registers.p.m;
        let masked = if narrow { self.registers.a & 0x00FF } else { self.registers.a } & operand;
        self.registers.p.z = masked == 0;
        if !is_immediate {
            if narrow {
                self.registers.p.n = operand.bit(7);
                self.registers.p.v = operand.bit(6);
            } else {
                self.registers.p.n = operand.bit(15);
                self.registers.p.v = operand.bit(14);
            }
        }
    }

    fn shift_value(&mut self, value: u16, narrow: bool, op: ShiftOp) -> u16 {
        let width_mask = if narrow { 0x00FF } else { 0xFFFF };
        let sign_bit = if narrow { 0x80 } else { 0x8000 };
        let (result, carry_out) = match op {
            ShiftOp::Asl => (value.wrapping_shl(1) & width_mask, value & sign_bit != 0),
            ShiftOp::Lsr => (value >> 1, value & 1 != 0),
            ShiftOp::Rol => {
                let shifted = (value.wrapping_shl(1) | u16::from(self.registers.p.c)) & width_mask;
                (shifted, value & sign_bit != 0)
            }
            ShiftOp::Ror => {
                let shifted = (value >> 1) | (u16::from(self.registers.p.c) * sign_bit);
                (shifted, value & 1 != 0)
            }
        };
        self.registers.p.c = carry_out;
        self.set_nz_sized(result, narrow);
        result
    }

    // ---- generic operand plumbing -------------------------------------------------------

    fn read_operand_at<B: BusInterface>(&mut self, bus: &mut B, address: u32) -> u16 {
        let narrow = self.registers.p.m;
        self.read_sized(bus, address, narrow)
    }

    fn read_index_operand_at<B: BusInterface>(&mut self, bus: &mut B, address: u32) -> u16 {
        let narrow = self.registers.p.x;
        self.read_sized(bus, address, narrow)
    }

    fn rmw<B: BusInterface>(&mut self, bus: &mut B, address: u32, op: ShiftOp) {
        let narrow = self.registers.p.m;
        let value = self.read_sized(bus, address, narrow);
        bus.idle();
        let result = self.shift_value(value, narrow, op);
        self.write_sized(bus, address, narrow, result);
    }

    fn inc_dec_memory<B: BusInterface>(&mut self, bus: &mut B, address: u32, delta: i16) {
        let narrow = self.registers.p.m;
        let value = self.read_sized(bus, address, narrow);
        bus.idle();
        let width_mask: u16 = if narrow { 0x00FF } else { 0xFFFF };
        let result = (value.wrapping_add(delta as u16)) & width_mask;
        self.set_nz_sized(result, narrow);
        self.write_sized(bus, address, narrow, result);
    }

    fn branch<B: BusInterface>(&mut self, bus: &mut B, condition: bool) {
        let offset = self.fetch_immediate8(bus) as i8;
        if condition {
            bus.idle();
            let old_pc = self.registers.pc;
            self.registers.pc = self.registers.pc.wrapping_add(offset as u16);
            if !self.registers.emulation_mode && (old_pc & 0xFF00) != (self.registers.pc & 0xFF00) {
                bus.idle();
            }
        }
    }

    fn to_native_mode(&mut self) {
        self.registers.emulation_mode = false;
    }

    fn to_emulation_mode(&mut self) {
        self.registers.emulation_mode = true;
        self.registers.p.m = true;
        self.registers.p.x = true;
        self.registers.x &= 0x00FF;
        self.registers.y &= 0x00FF;
        self.registers.s = 0x0100 | (self.registers.s & 0x00FF);
    }
}

#[derive(Clone, Copy)]
enum ShiftOp {
    Asl,
    Lsr,
    Rol,
    Ror,
}

/// Pushes PBR/PC/P and jumps to the interrupt vector. Used for hardware-triggered NMI/IRQ; the
/// software interrupts BRK/COP reuse the same core logic from within `execute`.
pub(super) fn service_interrupt<B: BusInterface>(
    cpu: &mut Wdc65816,
    bus: &mut B,
    kind: InterruptType,
) {
    bus.idle();
    bus.idle();
    if !cpu.registers.emulation_mode {
        cpu.push8(bus, cpu.registers.pbr);
    }
    cpu.push16(bus, cpu.registers.pc);
    let status_byte = cpu.registers.p.to_byte_with_break(false, cpu.registers.emulation_mode);
    cpu.push8(bus, status_byte);
    cpu.registers.p.i = true;
    cpu.registers.p.d = false;
    cpu.registers.pbr = 0;
    let vector = kind.vector(cpu.registers.emulation_mode);
    let lo = bus.read(u32::from(vector));
    let hi = bus.read(u32::from(vector) + 1);
    cpu.registers.pc = u16::from_le_bytes([lo, hi]);
}

#[allow(clippy::too_many_lines)]
pub(super) fn execute<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, opcode: u8) {
    let m = cpu.registers.p.m;
    let x = cpu.registers.p.x;

    macro_rules! alu {
        ($addr_fn:ident, $op:ident) => {{
            let address = cpu.$addr_fn(bus);
            let operand = cpu.read_operand_at(bus, address);
            cpu.$op(operand);
        }};
    }
    macro_rules! alu_imm {
        ($op:ident) => {{
            let operand = if m { u16::from(cpu.fetch_immediate8(bus)) } else { cpu.fetch_immediate16(bus) };
            cpu.$op(operand);
        }};
    }
    macro_rules! store {
        ($addr_fn:ident, $reg:ident) => {{
            let address = cpu.$addr_fn(bus);
            let value = cpu.registers.$reg;
            cpu.write_sized(bus, address, m, value);
        }};
    }
    macro_rules! load_index {
        ($addr_fn:ident, $reg:ident) => {{
            let address = cpu.$addr_fn(bus);
            let value = cpu.read_index_operand_at(bus, address);
            cpu.registers.$reg = value;
            cpu.set_nz_sized(value, x);
        }};
    }
    macro_rules! store_index {
        ($addr_fn:ident, $reg:ident) => {{
            let address = cpu.$addr_fn(bus);
            let value = cpu.registers.$reg;
            cpu.write_sized(bus, address, x, value);
        }};
    }
    macro_rules! rmw_mem {
        ($addr_fn:ident, $op:expr) => {{
            let address = cpu.$addr_fn(bus);
            cpu.rmw(bus, address, $op);
        }};
    }
    macro_rules! inc_dec_mem {
        ($addr_fn:ident, $delta:expr) => {{
            let address = cpu.$addr_fn(bus);
            cpu.inc_dec_memory(bus, address, $delta);
        }};
    }
    macro_rules! bit_mem {
        ($addr_fn:ident) => {{
            let address = cpu.$addr_fn(bus);
            let operand = cpu.read_operand_at(bus, address);
            cpu.bit_op(operand, false);
        }};
    }

    match opcode {
        // --- control / stack --------------------------------------------------------
        0x00 => {
            cpu.fetch_immediate8(bus); // signature byte, discarded
            service_interrupt(cpu, bus, InterruptType::Brk);
        }
        0x02 => {
            cpu.fetch_immediate8(bus);
            service_interrupt(cpu, bus, InterruptType::Cop);
        }
        0xEA => bus.idle(),
        0x42 => {
            cpu.fetch_immediate8(bus);
        } // WDM
        0xDB => bus.idle(), // STP handled by caller loop via `stopped` below
        0xCB => {
            bus.idle();
            cpu.waiting = true;
        }

        // --- ORA --------------------------------------------------------------------
        0x01 => alu!(addr_direct_page_indexed_indirect_x, ora_op),
        0x03 => alu!(addr_stack_relative, ora_op),
        0x05 => alu!(addr_direct_page, ora_op),
        0x07 => alu!(addr_direct_page_indirect_long, ora_op),
        0x09 => alu_imm!(ora_op),
        0x0D => alu!(addr_absolute, ora_op),
        0x0F => alu!(addr_absolute_long, ora_op),
        0x11 => alu!(addr_direct_page_indirect_indexed_y, ora_op),
        0x12 => alu!(addr_direct_page_indirect, ora_op),
        0x13 => alu!(addr_stack_relative_indirect_indexed_y, ora_op),
        0x15 => alu!(addr_direct_page_x, ora_op),
        0x17 => alu!(addr_direct_page_indirect_long_indexed_y, ora_op),
        0x19 => alu!(addr_absolute_y, ora_op),
        0x1D => alu!(addr_absolute_x, ora_op),
        0x1F => alu!(addr_absolute_long_x, ora_op),

        // --- AND --------------------------------------------------------------------
        0x21 => alu!(addr_direct_page_indexed_indirect_x, and_op),
        0x23 => alu!(addr_stack_relative, and_op),
        0x25 => alu!(addr_direct_page, and_op),
        0x27 => alu!(addr_direct_page_indirect_long, and_op),
        0x29 => alu_imm!(and_op),
        0x2D => alu!(addr_absolute, and_op),
        0x2F => alu!(addr_absolute_long, and_op),
        0x31 => alu!(addr_direct_page_indirect_indexed_y, and_op),
        0x32 => alu!(addr_direct_page_indirect, and_op),
        0x33 => alu!(addr_stack_relative_indirect_indexed_y, and_op),
        0x35 => alu!(addr_direct_page_x, and_op),
        0x37 => alu!(addr_direct_page_indirect_long_indexed_y, and_op),
        0x39 => alu!(addr_absolute_y, and_op),
        0x3D => alu!(addr_absolute_x, and_op),
        0x3F => alu!(addr_absolute_long_x, and_op),

        // --- EOR --------------------------------------------------------------------
        0x41 => alu!(addr_direct_page_indexed_indirect_x, eor_op),
        0x43 => alu!(addr_stack_relative, eor_op),
        0x45 => alu!(addr_direct_page, eor_op),
        0x47 => alu!(addr_direct_page_indirect_long, eor_op),
        0x49 => alu_imm!(eor_op),
        0x4D => alu!(addr_absolute, eor_op),
        0x4F => alu!(addr_absolute_long, eor_op),
        0x51 => alu!(addr_direct_page_indirect_indexed_y, eor_op),
        0x52 => alu!(addr_direct_page_indirect, eor_op),
        0x53 => alu!(addr_stack_relative_indirect_indexed_y, eor_op),
        0x55 => alu!(addr_direct_page_x, eor_op),
        0x57 => alu!(addr_direct_page_indirect_long_indexed_y, eor_op),
        0x59 => alu!(addr_absolute_y, eor_op),
        0x5D => alu!(addr_absolute_x, eor_op),
        0x5F => alu!(addr_absolute_long_x, eor_op),

        // --- ADC --------------------------------------------------------------------
        0x61 => alu!(addr_direct_page_indexed_indirect_x, adc),
        0x63 => alu!(addr_stack_relative, adc),
        0x65 => alu!(addr_direct_page, adc),
        0x67 => alu!(addr_direct_page_indirect_long, adc),
        0x69 => alu_imm!(adc),
        0x6D => alu!(addr_absolute, adc),
        0x6F => alu!(addr_absolute_long, adc),
        0x71 => alu!(addr_direct_page_indirect_indexed_y, adc),
        0x72 => alu!(addr_direct_page_indirect, adc),
        0x73 => alu!(addr_stack_relative_indirect_indexed_y, adc),
        0x75 => alu!(addr_direct_page_x, adc),
        0x77 => alu!(addr_direct_page_indirect_long_indexed_y, adc),
        0x79 => alu!(addr_absolute_y, adc),
        0x7D => alu!(addr_absolute_x, adc),
        0x7F => alu!(addr_absolute_long_x, adc),

        // --- SBC --------------------------------------------------------------------
        0xE1 => alu!(addr_direct_page_indexed_indirect_x, sbc),
        0xE3 => alu!(addr_stack_relative, sbc),
        0xE5 => alu!(addr_direct_page, sbc),
        0xE7 => alu!(addr_direct_page_indirect_long, sbc),
        0xE9 => alu_imm!(sbc),
        0xED => alu!(addr_absolute, sbc),
        0xEF => alu!(addr_absolute_long, sbc),
        0xF1 => alu!(addr_direct_page_indirect_indexed_y, sbc),
        0xF2 => alu!(addr_direct_page_indirect, sbc),
        0xF3 => alu!(addr_stack_relative_indirect_indexed_y, sbc),
        0xF5 => alu!(addr_direct_page_x, sbc),
        0xF7 => alu!(addr_direct_page_indirect_long_indexed_y, sbc),
        0xF9 => alu!(addr_absolute_y, sbc),
        0xFD => alu!(addr_absolute_x, sbc),
        0xFF => alu!(addr_absolute_long_x, sbc),

        // --- CMP --------------------------------------------------------------------
        0xC1 | 0xC3 | 0xC5 | 0xC7 | 0xC9 | 0xCD | 0xCF | 0xD1 | 0xD2 | 0xD3 | 0xD5 | 0xD7
        | 0xD9 | 0xDD | 0xDF => {
            let operand = if opcode == 0xC9 {
                if m { u16::from(cpu.fetch_immediate8(bus)) } else { cpu.fetch_immediate16(bus) }
            } else {
                let address = match opcode {
                    0xC1 => cpu.addr_direct_page_indexed_indirect_x(bus),
                    0xC3 => cpu.addr_stack_relative(bus),
                    0xC5 => cpu.addr_direct_page(bus),
                    0xC7 => cpu.addr_direct_page_indirect_long(bus),
                    0xCD => cpu.addr_absolute(bus),
                    0xCF => cpu.addr_absolute_long(bus),
                    0xD1 => cpu.addr_direct_page_indirect_indexed_y(bus),
                    0xD2 => cpu.addr_direct_page_indirect(bus),
                    0xD3 => cpu.addr_stack_relative_indirect_indexed_y(bus),
                    0xD5 => cpu.addr_direct_page_x(bus),
                    0xD7 => cpu.addr_direct_page_indirect_long_indexed_y(bus),
                    0xD9 => cpu.addr_absolute_y(bus),
                    0xDD => cpu.addr_absolute_x(bus),
                    0xDF => cpu.addr_absolute_long_x(bus),
                    _ => unreachable!(),
                };
                cpu.read_operand_at(bus, address)
            };
            let a = cpu.registers.a;
            cpu.cmp_sized(a, operand, m);
        }

        // --- CPX / CPY ----------------------------------------------------------------
        0xE0 => {
            let operand = if x { u16::from(cpu.fetch_immediate8(bus)) } else { cpu.fetch_immediate16(bus) };
            let r = cpu.registers.x;
            cpu.cmp_sized(r, operand, x);
        }
        0xE4 => {
            let address = cpu.addr_direct_page(bus);
            let operand = cpu.read_index_operand_at(bus, address);
            let r = cpu.registers.x;
            cpu.cmp_sized(r, operand, x);
        }
        0xEC => {
            let address = cpu.addr_absolute(bus);
            let operand = cpu.read_index_operand_at(bus, address);
            let r = cpu.registers.x;
            cpu.cmp_sized(r, operand, x);
        }
        0xC0 => {
            let operand = if x { u16::from(cpu.fetch_immediate8(bus)) } else { cpu.fetch_immediate16(bus) };
            let r = cpu.registers.y;
            cpu.cmp_sized(r, operand, x);
        }
        0xC4 => {
            let address = cpu.addr_direct_page(bus);
            let operand = cpu.read_index_operand_at(bus, address);
            let r = cpu.registers.y;
            cpu.cmp_sized(r, operand, x);
        }
        0xCC => {
            let address = cpu.addr_absolute(bus);
            let operand = cpu.read_index_operand_at(bus, address);
            let r = cpu.registers.y;
            cpu.cmp_sized(r, operand, x);
        }

        // --- BIT --------------------------------------------------------------------
        0x24 => bit_mem!(addr_direct_page),
        0x2C => bit_mem!(addr_absolute),
        0x34 => bit_mem!(addr_direct_page_x),
        0x3C => bit_mem!(addr_absolute_x),
        0x89 => {
            let operand = if m { u16::from(cpu.fetch_immediate8(bus)) } else { cpu.fetch_immediate16(bus) };
            cpu.bit_op(operand, true);
        }

        // --- shifts on memory ---------------------------------------------------------
        0x06 => rmw_mem!(addr_direct_page, ShiftOp::Asl),
        0x0E => rmw_mem!(addr_absolute, ShiftOp::Asl),
        0x16 => rmw_mem!(addr_direct_page_x, ShiftOp::Asl),
        0x1E => rmw_mem!(addr_absolute_x, ShiftOp::Asl),
        0x46 => rmw_mem!(addr_direct_page, ShiftOp::Lsr),
        0x4E => rmw_mem!(addr_absolute, ShiftOp::Lsr),
        0x56 => rmw_mem!(addr_direct_page_x, ShiftOp::Lsr),
        0x5E => rmw_mem!(addr_absolute_x, ShiftOp::Lsr),
        0x26 => rmw_mem!(addr_direct_page, ShiftOp::Rol),
        0x2E => rmw_mem!(addr_absolute, ShiftOp::Rol),
        0x36 => rmw_mem!(addr_direct_page_x, ShiftOp::Rol),
        0x3E => rmw_mem!(addr_absolute_x, ShiftOp::Rol),
        0x66 => rmw_mem!(addr_direct_page, ShiftOp::Ror),
        0x6E => rmw_mem!(addr_absolute, ShiftOp::Ror),
        0x76 => rmw_mem!(addr_direct_page_x, ShiftOp::Ror),
        0x7E => rmw_mem!(addr_absolute_x, ShiftOp::Ror),

        // --- shifts on accumulator -----------------------------------------------------
        0x0A => accumulator_shift(cpu, bus, ShiftOp::Asl),
        0x4A => accumulator_shift(cpu, bus, ShiftOp::Lsr),
        0x2A => accumulator_shift(cpu, bus, ShiftOp::Rol),
        0x6A => accumulator_shift(cpu, bus, ShiftOp::Ror),

        // --- INC / DEC on memory --------------------------------------------------------
        0xE6 => inc_dec_mem!(addr_direct_page, 1),
        0xEE => inc_dec_mem!(addr_absolute, 1),
        0xF6 => inc_dec_mem!(addr_direct_page_x, 1),
        0xFE => inc_dec_mem!(addr_absolute_x, 1),
        0xC6 => inc_dec_mem!(addr_direct_page, -1),
        0xCE => inc_dec_mem!(addr_absolute, -1),
        0xD6 => inc_dec_mem!(addr_direct_page_x, -1),
        0xDE => inc_dec_mem!(addr_absolute_x, -1),
        0x1A => {
            bus.idle();
            let width_mask: u16 = if m { 0x00FF } else { 0xFFFF };
            let result = (cpu.registers.a.wrapping_add(1)) & width_mask | (cpu.registers.a & !width_mask);
            cpu.registers.a = result;
            cpu.set_nz_sized(result & width_mask, m);
        }
        0x3A => {
            bus.idle();
            let width_mask: u16 = if m { 0x00FF } else { 0xFFFF };
            let result = (cpu.registers.a.wrapping_sub(1)) & width_mask | (cpu.registers.a & !width_mask);
            cpu.registers.a = result;
            cpu.set_nz_sized(result & width_mask, m);
        }

        // --- TSB / TRB ------------------------------------------------------------------
        0x04 | 0x0C => {
            let address = if opcode == 0x04 { cpu.addr_direct_page(bus) } else { cpu.addr_absolute(bus) };
            let value = cpu.read_sized(bus, address, m);
            let a = if m { cpu.registers.a & 0x00FF } else { cpu.registers.a };
            cpu.registers.p.z = (value & a) == 0;
            bus.idle();
            cpu.write_sized(bus, address, m, value | a);
        }
        0x14 | 0x1C => {
            let address = if opcode == 0x14 { cpu.addr_direct_page(bus) } else { cpu.addr_absolute(bus) };
            let value = cpu.read_sized(bus, address, m);
            let a = if m { cpu.registers.a & 0x00FF } else { cpu.registers.a };
            cpu.registers.p.z = (value & a) == 0;
            bus.idle();
            cpu.write_sized(bus, address, m, value & !a);
        }

        // --- loads --------------------------------------------------------------------
        0xA1 => {
            let address = cpu.addr_direct_page_indexed_indirect_x(bus);
            let value = cpu.read_operand_at(bus, address);
            cpu.registers.a = if m { (cpu.registers.a & 0xFF00) | value } else { value };
            cpu.set_nz_sized(value, m);
        }
        0xA3 | 0xA5 | 0xA7 | 0xA9 | 0xAD | 0xAF | 0xB1 | 0xB2 | 0xB3 | 0xB5 | 0xB7 | 0xB9
        | 0xBD | 0xBF => {
            let value = if opcode == 0xA9 {
                if m { u16::from(cpu.fetch_immediate8(bus)) } else { cpu.fetch_immediate16(bus) }
            } else {
                let address = match opcode {
                    0xA3 => cpu.addr_stack_relative(bus),
                    0xA5 => cpu.addr_direct_page(bus),
                    0xA7 => cpu.addr_direct_page_indirect_long(bus),
                    0xAD => cpu.addr_absolute(bus),
                    0xAF => cpu.addr_absolute_long(bus),
                    0xB1 => cpu.addr_direct_page_indirect_indexed_y(bus),
                    0xB2 => cpu.addr_direct_page_indirect(bus),
                    0xB3 => cpu.addr_stack_relative_indirect_indexed_y(bus),
                    0xB5 => cpu.addr_direct_page_x(bus),
                    0xB7 => cpu.addr_direct_page_indirect_long_indexed_y(bus),
                    0xB9 => cpu.addr_absolute_y(bus),
                    0xBD => cpu.addr_absolute_x(bus),
                    0xBF => cpu.addr_absolute_long_x(bus),
                    _ => unreachable!(),
                };
                cpu.read_operand_at(bus, address)
            };
            cpu.registers.a = if m { (cpu.registers.a & 0xFF00) | value } else { value };
            cpu.set_nz_sized(value, m);
        }
        0xA2 => {
            let value = if x { u16::from(cpu.fetch_immediate8(bus)) } else { cpu.fetch_immediate16(bus) };
            cpu.registers.x = value;
            cpu.set_nz_sized(value, x);
        }
        0xA6 => load_index!(addr_direct_page, x),
        0xAE => load_index!(addr_absolute, x),
        0xB6 => load_index!(addr_direct_page_y, x),
        0xBE => load_index!(addr_absolute_y, x),
        0xA0 => {
            let value = if x { u16::from(cpu.fetch_immediate8(bus)) } else { cpu.fetch_immediate16(bus) };
            cpu.registers.y = value;
            cpu.set_nz_sized(value, x);
        }
        0xA4 => load_index!(addr_direct_page, y),
        0xAC => load_index!(addr_absolute, y),
        0xB4 => load_index!(addr_direct_page_x, y),
        0xBC => load_index!(addr_absolute_x, y),

        // --- stores ---------------------------------------------------------------------
        0x81 => {
            let address = cpu.addr_direct_page_indexed_indirect_x(bus);
            let value = cpu.registers.a;
            cpu.write_sized(bus, address, m, value);
        }
        0x83 => store!(addr_stack_relative, a),
        0x85 => store!(addr_direct_page, a),
        0x87 => store!(addr_direct_page_indirect_long, a),
        0x8D => store!(addr_absolute, a),
        0x8F => store!(addr_absolute_long, a),
        0x91 => store!(addr_direct_page_indirect_indexed_y, a),
        0x92 => store!(addr_direct_page_indirect, a),
        0x93 => store!(addr_stack_relative_indirect_indexed_y, a),
        0x95 => store!(addr_direct_page_x, a),
        0x97 => store!(addr_direct_page_indirect_long_indexed_y, a),
        0x99 => store!(addr_absolute_y, a),
        0x9D => store!(addr_absolute_x, a),
        0x9F => store!(addr_absolute_long_x, a),
        0x86 => store_index!(addr_direct_page, x),
        0x8E => store_index!(addr_absolute, x),
        0x96 => store_index!(addr_direct_page_y, x),
        0x84 => store_index!(addr_direct_page, y),
        0x8C => store_index!(addr_absolute, y),
        0x94 => store_index!(addr_direct_page_x, y),

        // --- STZ --------------------------------------------------------------------
        0x64 => {
            let address = cpu.addr_direct_page(bus);
            cpu.write_sized(bus, address, m, 0);
        }
        0x74 => {
            let address = cpu.addr_direct_page_x(bus);
            cpu.write_sized(bus, address, m, 0);
        }
        0x9C => {
            let address = cpu.addr_absolute(bus);
            cpu.write_sized(bus, address, m, 0);
        }
        0x9E => {
            let address = cpu.addr_absolute_x(bus);
            cpu.write_sized(bus, address, m, 0);
        }

        // --- branches -----------------------------------------------------------------
        0x10 => { let n = cpu.registers.p.n; cpu.branch(bus, !n); }
        0x30 => { let n = cpu.registers.p.n; cpu.branch(bus, n); }
        0x50 => { let v = cpu.registers.p.v; cpu.branch(bus, !v); }
        0x70 => { let v = cpu.registers.p.v; cpu.branch(bus, v); }
        0x90 => { let c = cpu.registers.p.c; cpu.branch(bus, !c); }
        0xB0 => { let c = cpu.registers.p.c; cpu.branch(bus, c); }
        0xD0 => { let z = cpu.registers.p.z; cpu.branch(bus, !z); }
        0xF0 => { let z = cpu.registers.p.z; cpu.branch(bus, z); }
        0x80 => cpu.branch(bus, true),
        0x82 => {
            let offset = cpu.fetch_immediate16(bus) as i16;
            bus.idle();
            cpu.registers.pc = cpu.registers.pc.wrapping_add(offset as u16);
        }

        // --- jumps / calls --------------------------------------------------------------
        0x4C => { cpu.registers.pc = cpu.addr_absolute(bus) as u16; }
        0x5C => {
            let address = cpu.addr_absolute_long(bus);
            cpu.registers.pbr = (address >> 16) as u8;
            cpu.registers.pc = address as u16;
        }
        0x6C => { cpu.registers.pc = cpu.addr_absolute_indirect(bus) as u16; }
        0x7C => { cpu.registers.pc = cpu.addr_absolute_indexed_indirect(bus) as u16; }
        0xDC => {
            let address = cpu.addr_absolute_indirect_long(bus);
            cpu.registers.pbr = (address >> 16) as u8;
            cpu.registers.pc = address as u16;
        }
        0x20 => {
            let target = cpu.fetch_immediate16(bus);
            bus.idle();
            let return_addr = cpu.registers.pc.wrapping_sub(1);
            cpu.push16(bus, return_addr);
            cpu.registers.pc = target;
        }
        0xFC => {
            let base = cpu.fetch_immediate16(bus);
            let return_addr = cpu.registers.pc.wrapping_sub(1);
            cpu.push16(bus, return_addr);
            bus.idle();
            let pointer = base.wrapping_add(cpu.registers.x);
            let bank = u32::from(cpu.registers.pbr) << 16;
            let lo = bus.read(bank | u32::from(pointer));
            let hi = bus.read(bank | u32::from(pointer.wrapping_add(1)));
            cpu.registers.pc = u16::from_le_bytes([lo, hi]);
        }
        0x22 => {
            let lo = cpu.fetch_immediate8(bus);
            let mid = cpu.fetch_immediate8(bus);
            cpu.push8(bus, cpu.registers.pbr);
            bus.idle();
            let hi = cpu.fetch_immediate8(bus);
            let return_addr = cpu.registers.pc.wrapping_sub(1);
            cpu.push16(bus, return_addr);
            cpu.registers.pbr = hi;
            cpu.registers.pc = u16::from_le_bytes([lo, mid]);
        }
        0x60 => {
            let return_addr = cpu.pull16(bus);
            bus.idle();
            bus.idle();
            cpu.registers.pc = return_addr.wrapping_add(1);
        }
        0x6B => {
            let return_addr = cpu.pull16(bus);
            let pbr = cpu.pull8(bus);
            bus.idle();
            cpu.registers.pc = return_addr.wrapping_add(1);
            cpu.registers.pbr = pbr;
        }
        0x40 => {
            bus.idle();
            bus.idle();
            let status_byte = cpu.pull8(bus);
            let emu = cpu.registers.emulation_mode;
            cpu.registers.p = super::StatusRegister::from_byte(status_byte, emu);
            cpu.registers.pc = cpu.pull16(bus);
            if !cpu.registers.emulation_mode {
                cpu.registers.pbr = cpu.pull8(bus);
            }
        }

        // --- stack push/pull --------------------------------------------------------------
        0x08 => {
            bus.idle();
            let byte = cpu.registers.p.to_byte_with_break(true, cpu.registers.emulation_mode);
            cpu.push8(bus, byte);
        }
        0x28 => {
            bus.idle();
            bus.idle();
            let byte = cpu.pull8(bus);
            let emu = cpu.registers.emulation_mode;
            cpu.registers.p = super::StatusRegister::from_byte(byte, emu);
        }
        0x48 => { bus.idle(); let v = cpu.registers.a; cpu.push_sized(bus, v, m); }
        0x68 => {
            bus.idle();
            bus.idle();
            let v = cpu.pull_sized(bus, m);
            cpu.registers.a = if m { (cpu.registers.a & 0xFF00) | v } else { v };
            cpu.set_nz_sized(v, m);
        }
        0xDA => { bus.idle(); let v = cpu.registers.x; cpu.push_sized(bus, v, x); }
        0xFA => {
            bus.idle();
            bus.idle();
            let v = cpu.pull_sized(bus, x);
            cpu.registers.x = if x { (cpu.registers.x & 0xFF00) | v } else { v };
            cpu.set_nz_sized(v, x);
        }
        0x5A => { bus.idle(); let v = cpu.registers.y; cpu.push_sized(bus, v, x); }
        0x7A => {
            bus.idle();
            bus.idle();
            let v = cpu.pull_sized(bus, x);
            cpu.registers.y = if x { (cpu.registers.y & 0xFF00) | v } else { v };
            cpu.set_nz_sized(v, x);
        }
        0x0B => { bus.idle(); let v = cpu.registers.d; cpu.push16(bus, v); }
        0x2B => {
            bus.idle();
            bus.idle();
            let v = cpu.pull16(bus);
            cpu.registers.d = v;
            cpu.set_nz_16(v);
        }
        0x4B => { bus.idle(); let v = cpu.registers.pbr; cpu.push8(bus, v); }
        0xAB => {
            bus.idle();
            bus.idle();
            let v = cpu.pull8(bus);
            cpu.registers.dbr = v;
            cpu.set_nz_8(v);
        }
        0x8B => { bus.idle(); let v = cpu.registers.dbr; cpu.push8(bus, v); }
        0xF4 => {
            let v = cpu.fetch_immediate16(bus);
            cpu.push16(bus, v);
        }
        0xD4 => {
            let address = cpu.addr_direct_page_indirect(bus);
            cpu.push16(bus, address as u16);
        }
        0x62 => {
            let offset = cpu.fetch_immediate16(bus) as i16;
            bus.idle();
            let target = cpu.registers.pc.wrapping_add(offset as u16);
            cpu.push16(bus, target);
        }

        // --- transfers --------------------------------------------------------------------
        0xAA => { bus.idle(); let v = if x { cpu.registers.a & 0x00FF } else { cpu.registers.a }; cpu.registers.x = v; cpu.set_nz_sized(v, x); }
        0xA8 => { bus.idle(); let v = if x { cpu.registers.a & 0x00FF } else { cpu.registers.a }; cpu.registers.y = v; cpu.set_nz_sized(v, x); }
        0x8A => {
            bus.idle();
            let v = cpu.registers.x;
            cpu.registers.a = if m { (cpu.registers.a & 0xFF00) | (v & 0x00FF) } else { v };
            cpu.set_nz_sized(cpu.registers.a, m);
        }
        0x98 => {
            bus.idle();
            let v = cpu.registers.y;
            cpu.registers.a = if m { (cpu.registers.a & 0xFF00) | (v & 0x00FF) } else { v };
            cpu.set_nz_sized(cpu.registers.a, m);
        }
        0xBA => { bus.idle(); let v = if x { cpu.registers.s & 0x00FF } else { cpu.registers.s }; cpu.registers.x = v; cpu.set_nz_sized(v, x); }
        0x9A => {
            bus.idle();
            cpu.registers.s = if cpu.registers.emulation_mode {
                0x0100 | (cpu.registers.x & 0x00FF)
            } else {
                cpu.registers.x
            };
        }
        0x9B => { bus.idle(); let v = if x { cpu.registers.x & 0x00FF } else { cpu.registers.x }; cpu.registers.y = v; cpu.set_nz_sized(v, x); }
        0xBB => { bus.idle(); let v = if x { cpu.registers.y & 0x00FF } else { cpu.registers.y }; cpu.registers.x = v; cpu.set_nz_sized(v, x); }
        0x1B => { bus.idle(); cpu.registers.s = cpu.registers.a; }
        0x3B => { bus.idle(); cpu.registers.a = cpu.registers.s; cpu.set_nz_16(cpu.registers.a); }
        0x5B => { bus.idle(); cpu.registers.d = cpu.registers.a; cpu.set_nz_16(cpu.registers.d); }
        0x7B => { bus.idle(); cpu.registers.a = cpu.registers.d; cpu.set_nz_16(cpu.registers.a); }
        0xEB => {
            bus.idle();
            cpu.registers.a = cpu.registers.a.rotate_right(8);
            cpu.set_nz_8(cpu.registers.a.lsb());
        }

        // --- index inc/dec --------------------------------------------------------------
        0xE8 => { bus.idle(); let v = (cpu.registers.x.wrapping_add(1)) & if x { 0x00FF } else { 0xFFFF }; cpu.registers.x = v; cpu.set_nz_sized(v, x); }
        0xCA => { bus.idle(); let v = (cpu.registers.x.wrapping_sub(1)) & if x { 0x00FF } else { 0xFFFF }; cpu.registers.x = v; cpu.set_nz_sized(v, x); }
        0xC8 => { bus.idle(); let v = (cpu.registers.y.wrapping_add(1)) & if x { 0x00FF } else { 0xFFFF }; cpu.registers.y = v; cpu.set_nz_sized(v, x); }
        0x88 => { bus.idle(); let v = (cpu.registers.y.wrapping_sub(1)) & if x { 0x00FF } else { 0xFFFF }; cpu.registers.y = v; cpu.set_nz_sized(v, x); }

        // --- flag ops -----------------------------------------------------------------
        0x18 => { bus.idle(); cpu.registers.p.c = false; }
        0x38 => { bus.idle(); cpu.registers.p.c = true; }
        0x58 => { bus.idle(); cpu.registers.p.i = false; }
        0x78 => { bus.idle(); cpu.registers.p.i = true; }
        0xD8 => { bus.idle(); cpu.registers.p.d = false; }
        0xF8 => { bus.idle(); cpu.registers.p.d = true; }
        0xB8 => { bus.idle(); cpu.registers.p.v = false; }
        0xC2 => {
            let mask = cpu.fetch_immediate8(bus);
            bus.idle();
            apply_flag_mask(cpu, mask, false);
        }
        0xE2 => {
            let mask = cpu.fetch_immediate8(bus);
            bus.idle();
            apply_flag_mask(cpu, mask, true);
        }
        0xFB => {
            bus.idle();
            let carry = cpu.registers.p.c;
            cpu.registers.p.c = cpu.registers.emulation_mode;
            if carry {
                cpu.to_emulation_mode();
            } else {
                cpu.to_native_mode();
            }
        }

        // --- block moves ------------------------------------------------------------------
        0x54 => block_move(cpu, bus, false), // MVN: ascending copy
        0x44 => block_move(cpu, bus, true),  // MVP: descending copy

        _ => {
            log::warn!("unimplemented 65816 opcode ${:02X}, treating as NOP", opcode);
            bus.idle();
        }
    }

    if opcode == 0xDB {
        cpu.stopped = true;
    }
}

fn accumulator_shift<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, op: ShiftOp) {
    bus.idle();
    let narrow = cpu.registers.p.m;
    let a = cpu.registers.a;
    let masked = if narrow { a & 0x00FF } else { a };
    let result = cpu.shift_value(masked, narrow, op);
    cpu.registers.a = if narrow { (a & 0xFF00) | result } else { result };
}

fn apply_flag_mask(cpu: &mut Wdc65816, mask: u8, set: bool) {
    let p = &mut cpu.registers.p;
    if mask.bit(0) { p.c = set; }
    if mask.bit(1) { p.z = set; }
    if mask.bit(2) { p.i = set; }
    if mask.bit(3) { p.d = set; }
    if mask.bit(4) && !cpu.registers.emulation_mode { p.x = set; }
    if mask.bit(5) && !cpu.registers.emulation_mode { p.m = set; }
    if mask.bit(6) { p.v = set; }
    if mask.bit(7) { p.n = set; }
}

/// MVN (`decrement`=false) copies ascending; MVP (`decrement`=true) copies descending. Both
/// repeat by rewinding PC until the 16-bit A (used as a byte counter) underflows past zero.
fn block_move<B: BusInterface>(cpu: &mut Wdc65816, bus: &mut B, decrement: bool) {
    let dest_bank = cpu.fetch_immediate8(bus);
    let src_bank = cpu.fetch_immediate8(bus);
    cpu.registers.dbr = dest_bank;

    let byte = bus.read((u32::from(src_bank) << 16) | u32::from(cpu.registers.x));
    bus.write((u32::from(dest_bank) << 16) | u32::from(cpu.registers.y), byte);

    if decrement {
        cpu.registers.x = cpu.registers.x.wrapping_sub(1);
        cpu.registers.y = cpu.registers.y.wrapping_sub(1);
    } else {
        cpu.registers.x = cpu.registers.x.wrapping_add(1);
        cpu.registers.y = cpu.registers.y.wrapping_add(1);
    }
    if cpu.registers.p.x {
        cpu.registers.x &= 0x00FF;
        cpu.registers.y &= 0x00FF;
    }

    cpu.registers.a = cpu.registers.a.wrapping_sub(1);
    bus.idle();
    bus.idle();

    if cpu.registers.a != 0xFFFF {
        cpu.registers.pc = cpu.registers.pc.wrapping_sub(3);
    }
}
