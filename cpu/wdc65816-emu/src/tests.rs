use crate::{BusInterface, Wdc65816};

struct TestBus {
    memory: Vec<u8>,
    nmi_line: bool,
    irq_line: bool,
}

impl TestBus {
    fn new() -> Self {
        let mut memory = vec![0u8; 0x1_0000];
        memory[0xFFFC] = 0x00;
        memory[0xFFFD] = 0x80;
        Self { memory, nmi_line: false, irq_line: false }
    }

    fn load(&mut self, address: u16, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.memory[usize::from(address) + i] = *b;
        }
    }
}

impl BusInterface for TestBus {
    fn read(&mut self, address: u32) -> u8 {
        self.memory[(address & 0xFFFF) as usize]
    }

    fn write(&mut self, address: u32, value: u8) {
        self.memory[(address & 0xFFFF) as usize] = value;
    }

    fn idle(&mut self) {}

    fn nmi(&self) -> bool {
        self.nmi_line
    }

    fn irq(&self) -> bool {
        self.irq_line
    }
}

#[test]
fn reset_fetches_vector_and_enters_emulation_mode() {
    let mut bus = TestBus::new();
    let mut cpu = Wdc65816::new();
    cpu.reset(&mut bus);

    assert_eq!(cpu.registers().pc, 0x8000);
    assert!(cpu.registers().emulation_mode);
    assert!(cpu.registers().p.m);
    assert!(cpu.registers().p.x);
    assert_eq!(cpu.registers().s, 0x01FF);
}

#[test]
fn lda_immediate_sets_zero_and_negative_flags() {
    let mut bus = TestBus::new();
    bus.load(0x8000, &[0xA9, 0x00]); // LDA #$00
    let mut cpu = Wdc65816::new();
    cpu.reset(&mut bus);
    cpu.step(&mut bus);

    assert_eq!(cpu.registers().a & 0xFF, 0);
    assert!(cpu.registers().p.z);
    assert!(!cpu.registers().p.n);
}

#[test]
fn adc_binary_sets_carry_and_overflow_on_signed_overflow() {
    let mut bus = TestBus::new();
    // LDA #$7F ; CLC ; ADC #$01 -> 0x80, V set, N set, C clear
    bus.load(0x8000, &[0xA9, 0x7F, 0x18, 0x69, 0x01]);
    let mut cpu = Wdc65816::new();
    cpu.reset(&mut bus);
    cpu.step(&mut bus);
    cpu.step(&mut bus);
    cpu.step(&mut bus);

    assert_eq!(cpu.registers().a & 0xFF, 0x80);
    assert!(cpu.registers().p.v);
    assert!(cpu.registers().p.n);
    assert!(!cpu.registers().p.c);
}

#[test]
fn adc_decimal_mode_corrects_to_bcd() {
    let mut bus = TestBus::new();
    // SED ; LDA #$09 ; CLC ; ADC #$01 -> decimal 10 ($10), not binary $0A
    bus.load(0x8000, &[0xF8, 0xA9, 0x09, 0x18, 0x69, 0x01]);
    let mut cpu = Wdc65816::new();
    cpu.reset(&mut bus);
    for _ in 0..4 {
        cpu.step(&mut bus);
    }

    assert_eq!(cpu.registers().a & 0xFF, 0x10);
}

#[test]
fn branch_taken_when_condition_holds() {
    let mut bus = TestBus::new();
    // LDA #$00 ; BEQ +2 ; (skipped) LDA #$FF ; LDA #$01
    bus.load(0x8000, &[0xA9, 0x00, 0xF0, 0x02, 0xA9, 0xFF, 0xA9, 0x01]);
    let mut cpu = Wdc65816::new();
    cpu.reset(&mut bus);
    cpu.step(&mut bus); // LDA #$00
    cpu.step(&mut bus); // BEQ, taken
    cpu.step(&mut bus); // should land on LDA #$01, skipping LDA #$FF

    assert_eq!(cpu.registers().a & 0xFF, 0x01);
}

#[test]
fn stack_push_pull_round_trips_accumulator() {
    let mut bus = TestBus::new();
    // LDA #$42 ; PHA ; LDA #$00 ; PLA
    bus.load(0x8000, &[0xA9, 0x42, 0x48, 0xA9, 0x00, 0x68]);
    let mut cpu = Wdc65816::new();
    cpu.reset(&mut bus);
    for _ in 0..4 {
        cpu.step(&mut bus);
    }

    assert_eq!(cpu.registers().a & 0xFF, 0x42);
}

#[test]
fn xce_swaps_carry_and_emulation_mode() {
    let mut bus = TestBus::new();
    // CLC ; XCE  -> clears carry, then swaps with E (starts true), ending in native mode
    bus.load(0x8000, &[0x18, 0xFB]);
    let mut cpu = Wdc65816::new();
    cpu.reset(&mut bus);
    cpu.step(&mut bus);
    cpu.step(&mut bus);

    assert!(!cpu.registers().emulation_mode);
    assert!(cpu.registers().p.c);
}

#[test]
fn nmi_pushes_state_and_jumps_to_vector() {
    let mut bus = TestBus::new();
    bus.load(0xFFFA, &[0x00, 0x90]); // emulation-mode NMI vector -> $9000
    bus.load(0x8000, &[0xEA]); // NOP, never reached before the NMI fires
    let mut cpu = Wdc65816::new();
    cpu.reset(&mut bus);
    bus.nmi_line = true;
    cpu.step(&mut bus);

    assert_eq!(cpu.registers().pc, 0x9000);
}
