//! Tests against a simulated AMD command set chip.

use std::{cell::RefCell, convert::Infallible, rc::Rc, result::Result};

use embedded_hal::digital::{ErrorType, InputPin};
use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};

use super::*;
use crate::Error;

/// Small chip so tests can check every half-word.
struct TestChip;

impl NorChip for TestChip {
    const CAPACITY: u32 = 8 * 1024;
    const BLOCK_SIZE: u32 = 2 * 1024;
    const WRITE_BUFFER_WORDS: u32 = 16;
}

const WORDS: usize = TestChip::CAPACITY as usize / 2;
const BLOCK_WORDS: usize = TestChip::BLOCK_SIZE as usize / 2;

const ID: NorId = NorId {
    manufacturer_code: 0x0020,
    device_code_1: 0x227e,
    device_code_2: 0x2222,
    device_code_3: 0x2201,
};

#[derive(Clone, Copy, Debug, PartialEq)]
enum Mode {
    Read,
    Autoselect,
    Cfi,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Cycle {
    Idle,
    Unlocked1,
    Unlocked2,
    Program,
    EraseSetup,
    EraseUnlocked1,
    EraseUnlocked2,
    BufferCount { start: u32 },
    BufferData { start: u32, remaining: u32 },
    BufferConfirm { start: u32 },
}

/// How the next program or erase behaves.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Outcome {
    Complete,
    /// DQ5 set, DQ6 toggles until reset. Memory is unchanged.
    Fail,
    /// Never completes, and never sets DQ5.
    Hang,
}

struct SimChip {
    mem: Vec<u16>,
    mode: Mode,
    cycle: Cycle,
    /// Every bus write, in order.
    writes: Vec<(u32, u16)>,
    buffer: Vec<(u32, u16)>,
    outcome: Outcome,
    /// Status reads each completing operation toggles for.
    op_reads: u32,
    /// Pin reads each operation shows busy for.
    op_pin_reads: u32,
    busy_reads: u32,
    busy_pin_reads: u32,
    /// Every bus read, including status reads.
    reads: usize,
    toggle: bool,
    failed: bool,
    hung: bool,
    cfi: bool,
}

impl SimChip {
    fn new() -> Self {
        Self {
            mem: vec![0xffff; WORDS],
            mode: Mode::Read,
            cycle: Cycle::Idle,
            writes: Vec::new(),
            buffer: Vec::new(),
            outcome: Outcome::Complete,
            op_reads: 4,
            op_pin_reads: 3,
            busy_reads: 0,
            busy_pin_reads: 0,
            reads: 0,
            toggle: false,
            failed: false,
            hung: false,
            cfi: true,
        }
    }

    fn busy(&self) -> bool {
        self.failed || self.hung || self.busy_reads > 0
    }

    /// Start a program or erase. `effect` is applied if the operation succeeds.
    fn start_op(&mut self, effect: impl FnOnce(&mut Vec<u16>)) {
        self.busy_pin_reads = self.op_pin_reads;

        match self.outcome {
            Outcome::Complete => {
                effect(&mut self.mem);
                self.busy_reads = self.op_reads;
            }
            Outcome::Fail => self.failed = true,
            Outcome::Hang => self.hung = true,
        }
    }

    fn reset(&mut self) {
        self.mode = Mode::Read;
        self.cycle = Cycle::Idle;
        self.failed = false;
        self.hung = false;
        self.busy_reads = 0;
    }

    fn write(&mut self, addr: u32, value: u16) {
        self.writes.push((addr, value));

        let data_cycle = matches!(
            self.cycle,
            Cycle::Program | Cycle::BufferCount { .. } | Cycle::BufferData { .. }
        );
        if value == 0xf0 && !data_cycle {
            self.reset();
            return;
        }

        self.cycle = match (self.cycle, addr, value) {
            (Cycle::Idle, 0x555, 0xaa) => Cycle::Unlocked1,
            (Cycle::Idle, 0x55, 0x98) if self.cfi && self.mode == Mode::Read => {
                self.mode = Mode::Cfi;
                Cycle::Idle
            }
            (Cycle::Unlocked1, 0x2aa, 0x55) => Cycle::Unlocked2,
            (Cycle::Unlocked2, 0x555, 0x90) => {
                self.mode = Mode::Autoselect;
                Cycle::Idle
            }
            (Cycle::Unlocked2, 0x555, 0xa0) => Cycle::Program,
            (Cycle::Unlocked2, 0x555, 0x80) => Cycle::EraseSetup,
            (Cycle::Unlocked2, start, 0x25) => Cycle::BufferCount { start },
            (Cycle::Program, addr, value) => {
                self.start_op(|mem| mem[addr as usize] &= value);
                Cycle::Idle
            }
            (Cycle::EraseSetup, 0x555, 0xaa) => Cycle::EraseUnlocked1,
            (Cycle::EraseUnlocked1, 0x2aa, 0x55) => Cycle::EraseUnlocked2,
            (Cycle::EraseUnlocked2, 0x555, 0x10) => {
                self.start_op(|mem| mem.fill(0xffff));
                Cycle::Idle
            }
            (Cycle::EraseUnlocked2, addr, 0x30) => {
                let block = addr as usize / BLOCK_WORDS * BLOCK_WORDS;
                self.start_op(|mem| mem[block..block + BLOCK_WORDS].fill(0xffff));
                Cycle::Idle
            }
            (Cycle::BufferCount { start }, _, count) => {
                self.buffer.clear();
                Cycle::BufferData {
                    start,
                    remaining: count as u32 + 1,
                }
            }
            (Cycle::BufferData { start, remaining }, addr, value) => {
                self.buffer.push((addr, value));
                if remaining == 1 {
                    Cycle::BufferConfirm { start }
                } else {
                    Cycle::BufferData {
                        start,
                        remaining: remaining - 1,
                    }
                }
            }
            (Cycle::BufferConfirm { start }, addr, 0x29) if addr == start => {
                let buffer = core::mem::take(&mut self.buffer);
                self.start_op(|mem| {
                    for (addr, value) in buffer {
                        mem[addr as usize] &= value;
                    }
                });
                Cycle::Idle
            }
            _ => Cycle::Idle,
        };
    }

    fn read(&mut self, addr: u32) -> u16 {
        self.reads += 1;

        if self.busy() {
            self.toggle = !self.toggle;
            self.busy_reads = self.busy_reads.saturating_sub(1);

            let mut status = if self.toggle { 0x40 } else { 0 };
            if self.failed {
                status |= 0x20;
            }
            return status;
        }

        match self.mode {
            Mode::Read => self.mem[addr as usize],
            Mode::Autoselect => match addr {
                0x00 => ID.manufacturer_code,
                0x01 => ID.device_code_1,
                0x0e => ID.device_code_2,
                0x0f => ID.device_code_3,
                _ => 0,
            },
            // Only the low byte is defined; real chips often leave junk in the high byte.
            Mode::Cfi => {
                let byte = match addr {
                    0x10 => b'Q',
                    0x11 => b'R',
                    0x12 => b'Y',
                    0x13 => 0x02,
                    0x27 => 13, // 8KiB
                    0x2a => 5,  // 32 bytes
                    0x2c => 1,
                    0x2d => 3, // 4 blocks
                    0x2f => 8, // 2KiB
                    _ => 0,
                };
                0xa500 | byte as u16
            }
        }
    }

    /// Number of times `value` was written at `addr`.
    fn count_writes(&self, addr: u32, value: u16) -> usize {
        self.writes
            .iter()
            .filter(|w| **w == (addr, value))
            .count()
    }
}

struct SimBus(Rc<RefCell<SimChip>>);

impl NorBus for SimBus {
    fn read_half_word(&mut self, word_addr: u32) -> u16 {
        self.0.borrow_mut().read(word_addr)
    }

    fn write_half_word(&mut self, word_addr: u32, value: u16) {
        self.0.borrow_mut().write(word_addr, value)
    }
}

/// Ready/busy output of the simulated chip.
struct SimPin(Rc<RefCell<SimChip>>);

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl InputPin for SimPin {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        self.is_low().map(|low| !low)
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        let mut chip = self.0.borrow_mut();
        if chip.hung {
            return Ok(true);
        }
        if chip.busy_pin_reads > 0 {
            chip.busy_pin_reads -= 1;
            return Ok(true);
        }
        Ok(false)
    }
}

fn setup() -> (Rc<RefCell<SimChip>>, Nor<TestChip, SimBus, SimPin>) {
    let chip = Rc::new(RefCell::new(SimChip::new()));
    let nor = Nor::new(TestChip, SimBus(chip.clone()), SimPin(chip.clone()));
    (chip, nor)
}

fn setup_without_ready_busy() -> (Rc<RefCell<SimChip>>, Nor<TestChip, SimBus>) {
    let chip = Rc::new(RefCell::new(SimChip::new()));
    let nor = Nor::new_without_ready_busy(TestChip, SimBus(chip.clone()));
    (chip, nor)
}

fn nor_err(e: NorError) -> Error {
    Error::NorError(e)
}

#[test]
fn read_id() {
    let (chip, mut nor) = setup();

    assert_eq!(nor.read_id(), Ok(ID));
    assert_eq!(
        chip.borrow().writes,
        [(0x555, 0xaa), (0x2aa, 0x55), (0x555, 0x90)]
    );
}

#[test]
fn read_id_stays_in_autoselect() {
    let (chip, mut nor) = setup();
    chip.borrow_mut().mem[1] = 0x1234;

    nor.read_id().unwrap();
    assert_eq!(chip.borrow().mode, Mode::Autoselect);

    nor.return_to_read_mode();
    assert_eq!(chip.borrow().mode, Mode::Read);
    assert_eq!(chip.borrow().writes.last(), Some(&(0, 0xf0)));

    let (mut bus, _) = nor.free();
    assert_eq!(bus.read_half_word(1), 0x1234);
}

#[test]
fn read_resets_first() {
    let (chip, mut nor) = setup();
    chip.borrow_mut().mem[4..7].copy_from_slice(&[1, 2, 3]);

    nor.read_id().unwrap();
    chip.borrow_mut().writes.clear();

    let mut buf = [0; 3];
    nor.read(8, &mut buf).unwrap();

    assert_eq!(buf, [1, 2, 3]);
    assert_eq!(
        chip.borrow().writes,
        [(0x555, 0xaa), (0x2aa, 0x55), (0x555, 0xf0)]
    );
}

#[test]
fn write_programs_each_half_word() {
    let (chip, mut nor) = setup();

    nor.write(0x10, &[0x1234, 0xabcd]).unwrap();

    assert_eq!(
        chip.borrow().writes,
        [
            (0x555, 0xaa),
            (0x2aa, 0x55),
            (0x555, 0xa0),
            (8, 0x1234),
            (0x555, 0xaa),
            (0x2aa, 0x55),
            (0x555, 0xa0),
            (9, 0xabcd),
        ]
    );

    let mut buf = [0; 2];
    nor.read(0x10, &mut buf).unwrap();
    assert_eq!(buf, [0x1234, 0xabcd]);
}

#[test]
fn write_only_clears_bits() {
    let (_chip, mut nor) = setup();

    nor.write(0, &[0xff00]).unwrap();
    nor.write(0, &[0x0ff0]).unwrap();

    let mut buf = [0];
    nor.read(0, &mut buf).unwrap();
    assert_eq!(buf, [0x0f00]);
}

#[test]
fn write_stops_at_first_failure() {
    let (chip, mut nor) = setup_without_ready_busy();
    chip.borrow_mut().outcome = Outcome::Fail;

    assert_eq!(
        nor.write(0, &[1, 2, 3]),
        Err(nor_err(NorError::DeviceFailure))
    );
    assert_eq!(chip.borrow().count_writes(0x555, 0xa0), 1);

    nor.return_to_read_mode();
    chip.borrow_mut().outcome = Outcome::Complete;

    nor.write(0, &[1]).unwrap();
    let mut buf = [0; 3];
    nor.read(0, &mut buf).unwrap();
    assert_eq!(buf, [1, 0xffff, 0xffff]);
}

#[test]
fn device_failure_with_ready_busy() {
    let (chip, mut nor) = setup();
    chip.borrow_mut().outcome = Outcome::Fail;

    assert_eq!(nor.erase_block(0), Err(nor_err(NorError::DeviceFailure)));
}

#[test]
fn device_failure_reads_status_four_times() {
    let (chip, mut nor) = setup_without_ready_busy();
    chip.borrow_mut().outcome = Outcome::Fail;

    assert_eq!(nor.write(0, &[0]), Err(nor_err(NorError::DeviceFailure)));
    // One toggle pair with DQ5 set on the first read, then one more pair to confirm.
    assert_eq!(chip.borrow().reads, 4);
}

#[test]
fn slow_ready_busy_defers_to_status_poll() {
    let (chip, mut nor) = setup();
    {
        let mut chip = chip.borrow_mut();
        chip.op_pin_reads = PROGRAM_TIMEOUT + 10;
        chip.op_reads = 2;
    }

    assert_eq!(nor.write(0, &[0x1234]), Ok(()));
    assert_eq!(chip.borrow().mem[0], 0x1234);
}

#[test]
fn hung_chip_times_out_in_status_poll() {
    let (chip, mut nor) = setup();
    chip.borrow_mut().outcome = Outcome::Hang;

    assert_eq!(nor.write(0, &[0]), Err(nor_err(NorError::Timeout)));
    // The pin stays busy; each of the poll's checks reads the status twice.
    assert_eq!(chip.borrow().reads, 2 * PROGRAM_TIMEOUT as usize);
}

#[test]
fn toggle_timeout() {
    let (chip, mut nor) = setup_without_ready_busy();
    chip.borrow_mut().outcome = Outcome::Hang;

    assert_eq!(nor.write(0, &[0]), Err(nor_err(NorError::Timeout)));
}

#[test]
fn status_checks_at_least_once() {
    let (chip, mut nor) = setup_without_ready_busy();

    assert_eq!(nor.status(0), Ok(()));

    chip.borrow_mut().hung = true;
    assert_eq!(nor.status(0), Err(nor_err(NorError::Timeout)));
    assert_eq!(nor.status(3), Err(nor_err(NorError::Timeout)));
}

#[test]
fn ready_before_busy_is_sampled() {
    let (chip, mut nor) = setup();
    chip.borrow_mut().op_pin_reads = 0;

    nor.write(2, &[0x5555]).unwrap();

    let mut buf = [0];
    nor.read(2, &mut buf).unwrap();
    assert_eq!(buf, [0x5555]);
}

#[test]
fn wait_ready_without_pin() {
    let (_chip, mut nor) = setup_without_ready_busy();

    assert_eq!(nor.wait_ready(0), Ok(()));
}

#[test]
fn program_buffer() {
    let (chip, mut nor) = setup();

    nor.program_buffer(0x20, &[1, 2, 3]).unwrap();

    assert_eq!(
        chip.borrow().writes,
        [
            (0x555, 0xaa),
            (0x2aa, 0x55),
            (0x10, 0x25),
            (0x10, 2),
            (0x10, 1),
            (0x11, 2),
            (0x12, 3),
            (0x10, 0x29),
        ]
    );
    assert_eq!(chip.borrow().mem[0x10..0x14], [1, 2, 3, 0xffff]);
}

#[test]
fn program_buffer_full_page() {
    let (chip, mut nor) = setup();
    let data: Vec<u16> = (0..16).collect();

    nor.program_buffer(0x40, &data).unwrap();

    assert_eq!(chip.borrow().mem[0x20..0x30], data[..]);
}

#[test]
fn program_buffer_limits() {
    let (chip, mut nor) = setup();

    assert_eq!(nor.program_buffer(0, &[]), Ok(()));
    assert_eq!(
        nor.program_buffer(0, &[0; 17]),
        Err(nor_err(NorError::BufferTooLarge))
    );
    // Words 14 - 17 straddle the first and second pages.
    assert_eq!(
        nor.program_buffer(28, &[0; 4]),
        Err(nor_err(NorError::CrossesBufferPage))
    );
    assert_eq!(
        nor.program_buffer(3, &[0]),
        Err(nor_err(NorError::NotAligned))
    );
    assert_eq!(
        nor.program_buffer(TestChip::CAPACITY, &[0]),
        Err(nor_err(NorError::OutOfBounds))
    );

    assert!(chip.borrow().writes.is_empty());
}

#[test]
fn program_buffer_failure() {
    let (chip, mut nor) = setup_without_ready_busy();
    chip.borrow_mut().outcome = Outcome::Fail;

    assert_eq!(
        nor.program_buffer(0, &[0, 0]),
        Err(nor_err(NorError::DeviceFailure))
    );
}

#[test]
fn erase_block() {
    let (chip, mut nor) = setup();
    chip.borrow_mut().mem.fill(0);

    nor.erase_block(TestChip::BLOCK_SIZE + 6).unwrap();

    let chip = chip.borrow();
    assert_eq!(
        chip.writes,
        [
            (0x555, 0xaa),
            (0x2aa, 0x55),
            (0x555, 0x80),
            (0x555, 0xaa),
            (0x2aa, 0x55),
            (BLOCK_WORDS as u32 + 3, 0x30),
        ]
    );
    assert!(chip.mem[..BLOCK_WORDS].iter().all(|w| *w == 0));
    assert!(
        chip.mem[BLOCK_WORDS..2 * BLOCK_WORDS]
            .iter()
            .all(|w| *w == 0xffff)
    );
    assert!(chip.mem[2 * BLOCK_WORDS..].iter().all(|w| *w == 0));
}

#[test]
fn erase_chip() {
    let (chip, mut nor) = setup();
    chip.borrow_mut().mem.fill(0x1234);

    nor.erase_chip().unwrap();

    let chip = chip.borrow();
    assert_eq!(chip.writes.last(), Some(&(0x555, 0x10)));
    assert_eq!(chip.count_writes(0x555, 0x80), 1);
    assert!(chip.mem.iter().all(|w| *w == 0xffff));
}

#[test]
fn read_cfi() {
    let (chip, mut nor) = setup();

    assert_eq!(
        nor.read_cfi(),
        Ok(NorCfi {
            command_set: 0x0002,
            device_size: TestChip::CAPACITY,
            write_buffer_size: TestChip::WRITE_BUFFER_WORDS * 2,
            erase_regions: 1,
            region_1_blocks: 4,
            region_1_block_size: TestChip::BLOCK_SIZE,
        })
    );

    let chip = chip.borrow();
    assert_eq!(chip.writes.first(), Some(&(0x55, 0x98)));
    assert_eq!(chip.writes.last(), Some(&(0, 0xf0)));
    assert_eq!(chip.mode, Mode::Read);
}

#[test]
fn read_cfi_unsupported() {
    let (chip, mut nor) = setup();
    chip.borrow_mut().cfi = false;

    assert_eq!(nor.read_cfi(), Err(nor_err(NorError::CfiNotSupported)));
    assert_eq!(chip.borrow().writes.last(), Some(&(0, 0xf0)));
}

#[test]
fn bounds_and_alignment() {
    let (chip, mut nor) = setup();
    let end = TestChip::CAPACITY;

    let mut buf = [0; 2];
    assert_eq!(nor.read(1, &mut buf), Err(nor_err(NorError::NotAligned)));
    assert_eq!(
        nor.read(end - 2, &mut buf),
        Err(nor_err(NorError::OutOfBounds))
    );
    assert_eq!(
        nor.read(u32::MAX - 1, &mut buf),
        Err(nor_err(NorError::OutOfBounds))
    );
    assert_eq!(nor.write(5, &[0]), Err(nor_err(NorError::NotAligned)));
    assert_eq!(
        nor.write(end, &[0]),
        Err(nor_err(NorError::OutOfBounds))
    );
    assert_eq!(nor.erase_block(end), Err(nor_err(NorError::OutOfBounds)));
    assert!(chip.borrow().writes.is_empty());

    assert_eq!(nor.read(end - 2, &mut buf[..1]), Ok(()));
    assert_eq!(nor.read(end, &mut []), Ok(()));
}

#[test]
fn storage_write_read() {
    let (chip, mut nor) = setup();
    let data: Vec<u8> = (0..40).collect();

    NorFlash::write(&mut nor, 64, &data).unwrap();
    assert_eq!(chip.borrow().mem[32], 0x0100);
    assert_eq!(chip.borrow().mem[51], 0x2726);

    let mut buf = [0; 40];
    ReadNorFlash::read(&mut nor, 64, &mut buf).unwrap();
    assert_eq!(buf[..], data[..]);

    assert_eq!(nor.capacity(), TestChip::CAPACITY as usize);
}

#[test]
fn storage_read_resets_once() {
    let (chip, mut nor) = setup();
    chip.borrow_mut().mem[8..28].fill(0xbeef);

    let mut buf = [0; 40];
    ReadNorFlash::read(&mut nor, 16, &mut buf).unwrap();

    assert!(buf.chunks_exact(2).all(|pair| pair == [0xef, 0xbe]));
    assert_eq!(chip.borrow().count_writes(0x555, 0xf0), 1);
    assert_eq!(chip.borrow().writes.len(), 3);
}

#[test]
fn storage_write_past_end_changes_nothing() {
    let (chip, mut nor) = setup();

    assert_eq!(
        NorFlash::write(&mut nor, TestChip::CAPACITY - 32, &[0; 64]),
        Err(nor_err(NorError::OutOfBounds))
    );

    let chip = chip.borrow();
    assert!(chip.writes.is_empty());
    assert!(chip.mem.iter().all(|w| *w == 0xffff));
}

#[test]
fn storage_alignment() {
    let (_chip, mut nor) = setup();
    let mut buf = [0; 3];

    let kind = |r: Result<(), Error>| r.map_err(|e| e.kind());

    assert_eq!(
        kind(ReadNorFlash::read(&mut nor, 0, &mut buf)),
        Err(NorFlashErrorKind::NotAligned)
    );
    assert_eq!(
        kind(ReadNorFlash::read(&mut nor, 1, &mut buf[..2])),
        Err(NorFlashErrorKind::NotAligned)
    );
    assert_eq!(
        kind(NorFlash::write(&mut nor, 0, &[0])),
        Err(NorFlashErrorKind::NotAligned)
    );
    assert_eq!(
        kind(NorFlash::write(&mut nor, TestChip::CAPACITY, &[0, 0])),
        Err(NorFlashErrorKind::OutOfBounds)
    );
}

#[test]
fn storage_erase() {
    let (chip, mut nor) = setup();
    chip.borrow_mut().mem.fill(0);
    let block = TestChip::BLOCK_SIZE;

    assert_eq!(
        nor.erase(100, block).map_err(|e| e.kind()),
        Err(NorFlashErrorKind::NotAligned)
    );
    assert_eq!(
        nor.erase(block, TestChip::CAPACITY + block)
            .map_err(|e| e.kind()),
        Err(NorFlashErrorKind::OutOfBounds)
    );
    assert_eq!(
        nor.erase(2 * block, block).map_err(|e| e.kind()),
        Err(NorFlashErrorKind::OutOfBounds)
    );
    assert_eq!(nor.erase(block, block), Ok(()));
    assert!(chip.borrow().writes.is_empty());

    nor.erase(block, 3 * block).unwrap();

    let chip = chip.borrow();
    assert_eq!(chip.count_writes(0x555, 0x80), 2);
    assert!(chip.mem[..BLOCK_WORDS].iter().all(|w| *w == 0));
    assert!(
        chip.mem[BLOCK_WORDS..3 * BLOCK_WORDS]
            .iter()
            .all(|w| *w == 0xffff)
    );
    assert!(chip.mem[3 * BLOCK_WORDS..].iter().all(|w| *w == 0));
}

#[test]
fn storage_sizes() {
    type TestNor = Nor<TestChip, SimBus, SimPin>;

    assert_eq!(<TestNor as ReadNorFlash>::READ_SIZE, 2);
    assert_eq!(<TestNor as NorFlash>::WRITE_SIZE, 2);
    assert_eq!(
        <TestNor as NorFlash>::ERASE_SIZE,
        TestChip::BLOCK_SIZE as usize
    );
    assert_eq!(
        <Nor<M29w256gl, SimBus> as NorFlash>::ERASE_SIZE,
        128 * 1024
    );
}
