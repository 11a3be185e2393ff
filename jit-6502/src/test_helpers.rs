//! Program-level test helpers.
//!
//! Tests assert CPU behavior with a high-level, macro-based API over
//! assembled programs:
//!
//! ```ignore
//!             TestName Register Status  Program
//!                    |     |     |      |
//!                    v     v     v      v
//!        register_a!(adc1, 0x33, P, "lda #$22\nadc #$11");
//! ```
//!
//! Every program runs twice — once through the compiled backend, once
//! with the driver forced onto the interpreter — and the two machines
//! must agree on every register, every flag, and all 64 KiB of memory
//! before any assertion runs. The equivalence half of the test suite is
//! free.

use std::cell::RefCell;
use std::rc::Rc;

use crate::asm::assemble;
use crate::bus::{BusDevice, MemoryBus, Ram};
use crate::error::JitError;
use crate::hal::{BusHal, CpuRegister, Hal, StatusFlag, RESET_STATUS};
use crate::jit::{DriverConfig, JitDriver};

/// The reset-state status byte, and the flag masks tests build
/// expectations from.
pub const P: u8 = RESET_STATUS;
pub const C: u8 = StatusFlag::Carry.mask();
pub const Z: u8 = StatusFlag::Zero.mask();
pub const I: u8 = StatusFlag::InterruptDisable.mask();
pub const D: u8 = StatusFlag::Decimal.mask();
pub const B: u8 = StatusFlag::Break.mask();
pub const V: u8 = StatusFlag::Overflow.mask();
pub const N: u8 = StatusFlag::Negative.mask();

/// The byte appended after every assembled fixture. It has no opcode
/// table entry, so decoding stops there and the function runs off its
/// end.
pub const HALT: u8 = 0x02;

pub struct TestMachine {
    pub driver: JitDriver,
    pub hal: BusHal,
    ram: Rc<RefCell<Ram>>,
}

impl TestMachine {
    /// A machine with 64 KiB of RAM and a wired-up driver.
    pub fn with_config(config: DriverConfig) -> TestMachine {
        let ram = Rc::new(RefCell::new(Ram::new(0x10000)));
        let mut bus = MemoryBus::new();
        bus.attach(0x0000, ram.clone(), false).unwrap();
        let mut hal = BusHal::new(bus);
        let driver = JitDriver::new(config);
        hal.attach_cache(driver.cache());
        TestMachine { driver, hal, ram }
    }

    pub fn new() -> TestMachine {
        TestMachine::with_config(DriverConfig::default())
    }

    /// Assemble `source` and load it at `origin`, with a halt byte after
    /// the last instruction.
    pub fn load(&mut self, origin: u16, source: &str) {
        let program = assemble(origin, source).unwrap_or_else(|error| {
            panic!("\n{source}\nassembly failed: {error}");
        });
        let mut bytes = program.bytes;
        bytes.push(HALT);
        self.ram.borrow_mut().load(origin as usize, &bytes);
    }

    pub fn run(&mut self, entry: u16) -> Result<(), JitError> {
        self.driver.run(&mut self.hal, entry)
    }

    pub fn a(&self) -> u8 {
        self.hal.register(CpuRegister::A)
    }

    pub fn x(&self) -> u8 {
        self.hal.register(CpuRegister::X)
    }

    pub fn y(&self) -> u8 {
        self.hal.register(CpuRegister::Y)
    }

    pub fn status(&self) -> u8 {
        self.hal.status_byte()
    }

    pub fn stack_pointer(&self) -> u8 {
        self.hal.stack_pointer()
    }

    pub fn read(&self, address: u16) -> u8 {
        self.hal.bus().read(address)
    }

    pub fn write(&mut self, address: u16, value: u8) {
        self.hal.write_memory(address, value).unwrap();
    }

    fn memory_snapshot(&self) -> Vec<u8> {
        self.ram.borrow().raw_block().unwrap().to_vec()
    }
}

/// The default fixture origin.
pub const ORIGIN: u16 = 0x0600;

/// Assemble, run through the compiled backend, cross-check against a
/// forced-interpreter twin, and hand back the compiled machine.
pub fn run_program(source: &str) -> TestMachine {
    let mut compiled = TestMachine::new();
    compiled.load(ORIGIN, source);
    compiled.run(ORIGIN).unwrap_or_else(|error| {
        panic!("\n{source}\ncompiled run failed: {error}");
    });

    let mut interpreted = TestMachine::with_config(DriverConfig {
        force_interpreter: true,
        ..DriverConfig::default()
    });
    interpreted.load(ORIGIN, source);
    interpreted.run(ORIGIN).unwrap_or_else(|error| {
        panic!("\n{source}\ninterpreted run failed: {error}");
    });

    assert_same_state(&compiled, &interpreted, source);
    compiled
}

/// Both engines must leave identical machine state.
pub fn assert_same_state(compiled: &TestMachine, interpreted: &TestMachine, source: &str) {
    assert_eq!(compiled.a(), interpreted.a(), "\n{source}\nA diverged");
    assert_eq!(compiled.x(), interpreted.x(), "\n{source}\nX diverged");
    assert_eq!(compiled.y(), interpreted.y(), "\n{source}\nY diverged");
    assert_eq!(
        compiled.stack_pointer(),
        interpreted.stack_pointer(),
        "\n{source}\nS diverged"
    );
    assert_eq!(
        compiled.status(),
        interpreted.status(),
        "\n{source}\nstatus diverged"
    );
    let compiled_memory = compiled.memory_snapshot();
    let interpreted_memory = interpreted.memory_snapshot();
    if compiled_memory != interpreted_memory {
        for (address, (left, right)) in compiled_memory
            .iter()
            .zip(interpreted_memory.iter())
            .enumerate()
        {
            assert_eq!(
                left, right,
                "\n{source}\nmemory diverged at {address:#06x}"
            );
        }
    }
}

pub fn assert_register_a(text: &str, value: u8, status: u8) {
    let machine = run_program(text);
    if machine.a() != value {
        panic!(
            "\n{}\nExpected register A to be {:#x} ({:#b}) but it was {:#x} ({:#b})",
            text,
            value,
            value,
            machine.a(),
            machine.a()
        );
    }
    assert_status(&machine, status);
}

pub fn assert_register_x(text: &str, value: u8, status: u8) {
    let machine = run_program(text);
    if machine.x() != value {
        panic!(
            "\n{}\nExpected register X to be {:#x} ({:#b}) but it was {:#x} ({:#b})",
            text,
            value,
            value,
            machine.x(),
            machine.x()
        );
    }
    assert_status(&machine, status);
}

pub fn assert_register_y(text: &str, value: u8, status: u8) {
    let machine = run_program(text);
    if machine.y() != value {
        panic!(
            "\n{}\nExpected register Y to be {:#x} ({:#b}) but it was {:#x} ({:#b})",
            text,
            value,
            value,
            machine.y(),
            machine.y()
        );
    }
    assert_status(&machine, status);
}

pub fn assert_status(machine: &TestMachine, value: u8) {
    let actual = machine.status();
    if actual == value {
        return;
    }
    const FLAGS: [(u8, &str); 7] = [
        (0b0000_0001, "Carry"),
        (0b0000_0010, "Zero"),
        (0b0000_0100, "InterruptDisable"),
        (0b0000_1000, "Decimal"),
        (0b0001_0000, "Break"),
        (0b0100_0000, "Overflow"),
        (0b1000_0000, "Negative"),
    ];
    let mut report = String::new();
    for (mask, name) in FLAGS {
        let expected = value & mask != 0;
        let received = actual & mask != 0;
        if expected != received {
            report.push_str(&format!(
                "Expected StatusFlag::{name} to be {expected} but received {received}\n"
            ));
        }
    }
    panic!("\nExpected cpu status 0b{actual:08b} to match 0b{value:08b}\n{report}");
}

#[macro_export]
macro_rules! register_a {
    ($name:ident, $a:expr, $p:expr, $text:expr) => {
        #[test]
        fn $name() {
            $crate::test_helpers::assert_register_a($text, $a, $p);
        }
    };
}

#[macro_export]
macro_rules! register_x {
    ($name:ident, $x:expr, $p:expr, $text:expr) => {
        #[test]
        fn $name() {
            $crate::test_helpers::assert_register_x($text, $x, $p);
        }
    };
}

#[macro_export]
macro_rules! register_y {
    ($name:ident, $y:expr, $p:expr, $text:expr) => {
        #[test]
        fn $name() {
            $crate::test_helpers::assert_register_y($text, $y, $p);
        }
    };
}

#[macro_export]
macro_rules! status {
    ($name:ident, $p:expr, $text:expr) => {
        #[test]
        fn $name() {
            let machine = $crate::test_helpers::run_program($text);
            $crate::test_helpers::assert_status(&machine, $p);
        }
    };
}

#[macro_export]
macro_rules! memory {
    ($name:ident, [$address:expr, $expected:expr], $text:expr) => {
        #[test]
        fn $name() {
            let machine = $crate::test_helpers::run_program($text);
            let actual = machine.read($address);
            if actual != $expected {
                panic!(
                    "\n{}\nExpected address {:#06x} to contain {:#x} but it was {:#x}",
                    $text, $address, $expected, actual
                );
            }
        }
    };
}
