use crate::{BusInterface, Spc700};

struct TestBus {
    memory: Vec<u8>,
}

impl TestBus {
    fn new() -> Self {
        Self { memory: vec![0; 0x1_0000] }
    }

    fn load(&mut self, address: u16, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.memory[address as usize + i] = b;
        }
    }
}

impl BusInterface for TestBus {
    fn read(&mut self, address: u16) -> u8 {
        self.memory[address as usize]
    }

    fn write(&mut self, address: u16, value: u8) {
        self.memory[address as usize] = value;
    }

    fn idle(&mut self) {}
}

#[test]
fn reset_fetches_vector_from_ffe_e() {
    let mut bus = TestBus::new();
    bus.load(0xFFFE, &[0x00, 0x80]);
    let mut cpu = Spc700::new();
    cpu.reset(&mut bus);
    assert_eq!(cpu.registers().pc, 0x8000);
    assert_eq!(cpu.registers().sp, 0xEF);
}

#[test]
fn mov_a_immediate_sets_zero_and_negative_flags() {
    let mut bus = TestBus::new();
    bus.load(0x0200, &[0xE8, 0x00, 0xE8, 0x80]);
    let mut cpu = Spc700::new();
    cpu.set_registers({
        let mut r = cpu.registers().clone();
        r.pc = 0x0200;
        r
    });

    cpu.step(&mut bus);
    assert_eq!(cpu.registers().a, 0x00);
    assert!(cpu.registers().psw.z);
    assert!(!cpu.registers().psw.n);

    cpu.step(&mut bus);
    assert_eq!(cpu.registers().a, 0x80);
    assert!(!cpu.registers().psw.z);
    assert!(cpu.registers().psw.n);
}

#[test]
fn adc_sets_carry_on_overflow() {
    let mut bus = TestBus::new();
    // MOV A,#$FF ; ADC A,#$02
    bus.load(0x0200, &[0xE8, 0xFF, 0x88, 0x02]);
    let mut cpu = Spc700::new();
    let mut regs = cpu.registers().clone();
    regs.pc = 0x0200;
    cpu.set_registers(regs);

    cpu.step(&mut bus);
    cpu.step(&mut bus);

    assert_eq!(cpu.registers().a, 0x01);
    assert!(cpu.registers().psw.c);
}

#[test]
fn branch_taken_when_zero_flag_set() {
    let mut bus = TestBus::new();
    // MOV A,#$00 ; BEQ +2 ; (skipped) MOV A,#$FF ; target: MOV X,#$05
    bus.load(0x0200, &[0xE8, 0x00, 0xF0, 0x02, 0xE8, 0xFF, 0xCD, 0x05]);
    let mut cpu = Spc700::new();
    let mut regs = cpu.registers().clone();
    regs.pc = 0x0200;
    cpu.set_registers(regs);

    cpu.step(&mut bus); // MOV A,#$00
    cpu.step(&mut bus); // BEQ (taken)
    assert_eq!(cpu.registers().pc, 0x0206);
    cpu.step(&mut bus); // MOV X,#$05
    assert_eq!(cpu.registers().x, 0x05);
    assert_eq!(cpu.registers().a, 0x00);
}

#[test]
fn stack_push_pull_round_trips_accumulator() {
    let mut bus = TestBus::new();
    // MOV A,#$42 ; PUSH A ; MOV A,#$00 ; POP A
    bus.load(0x0200, &[0xE8, 0x42, 0x2D, 0xE8, 0x00, 0xAE]);
    let mut cpu = Spc700::new();
    let mut regs = cpu.registers().clone();
    regs.pc = 0x0200;
    cpu.set_registers(regs);

    cpu.step(&mut bus);
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().sp, 0xEE);
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().a, 0x00);
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().a, 0x42);
    assert_eq!(cpu.registers().sp, 0xEF);
}

#[test]
fn daa_corrects_bcd_addition() {
    let mut bus = TestBus::new();
    // MOV A,#$19 ; ADC A,#$01 ; DAA
    bus.load(0x0200, &[0xE8, 0x19, 0x88, 0x01, 0xDF]);
    let mut cpu = Spc700::new();
    let mut regs = cpu.registers().clone();
    regs.pc = 0x0200;
    cpu.set_registers(regs);

    cpu.step(&mut bus);
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().a, 0x1A);
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().a, 0x20);
}

#[test]
fn call_and_ret_round_trip_pc() {
    let mut bus = TestBus::new();
    // CALL $0300 ; (return lands here) MOV X,#$11
    bus.load(0x0200, &[0x3F, 0x00, 0x03, 0xCD, 0x11]);
    // at $0300: RET
    bus.load(0x0300, &[0x6F]);
    let mut cpu = Spc700::new();
    let mut regs = cpu.registers().clone();
    regs.pc = 0x0200;
    cpu.set_registers(regs);

    cpu.step(&mut bus); // CALL
    assert_eq!(cpu.registers().pc, 0x0300);
    cpu.step(&mut bus); // RET
    assert_eq!(cpu.registers().pc, 0x0203);
    cpu.step(&mut bus); // MOV X,#$11
    assert_eq!(cpu.registers().x, 0x11);
}

#[test]
fn sleep_and_stop_halt_further_execution() {
    let mut bus = TestBus::new();
    bus.load(0x0200, &[0xEF, 0xCD, 0x11]);
    let mut cpu = Spc700::new();
    let mut regs = cpu.registers().clone();
    regs.pc = 0x0200;
    cpu.set_registers(regs);

    cpu.step(&mut bus);
    assert!(!cpu.is_stopped());
    let pc_before = cpu.registers().pc;
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().pc, pc_before);
}
