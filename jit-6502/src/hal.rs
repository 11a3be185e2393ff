//! The hardware abstraction layer the IR executes against.
//!
//! Every register, flag, stack, and memory access made by either execution
//! engine goes through the [`Hal`] trait; the IR never keeps 6502 machine
//! state anywhere else across a function boundary. [`BusHal`] is the base
//! implementation host platforms build on: it owns the register file and a
//! [`MemoryBus`], forwards writes to the method cache for code
//! invalidation, and lets the host raise interrupts or cancel the run.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::bus::{CodeRegion, MemoryBus};
use crate::error::ExecutionError;
use crate::jit::MethodCache;

/// The hardware stack lives in page one.
pub const STACK_PAGE: u16 = 0x0100;

/// Bit 5 of the status byte has no flag behind it and reads as set.
pub const STATUS_ALWAYS_SET: u8 = 0b0010_0000;

/// The two non-physical status bits: B and the always-set bit. Forced on
/// in bytes pushed by PHP/BRK, ignored when the status byte is restored.
pub const STATUS_PUSH_MASK: u8 = 0b0011_0000;

/// Power-on status: interrupts disabled, everything else clear.
pub const RESET_STATUS: u8 = 0b0010_0100;

/// The three general-purpose 8-bit registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CpuRegister {
    A,
    X,
    Y,
}

/// Processor status flags, as masks into the status byte.
///
///   7  bit  0
///   ---- ----
///   NVsB DIZC
///   |||| ||||
///   |||| |||+- Carry
///   |||| ||+-- Zero
///   |||| |+--- Interrupt Disable
///   |||| +---- Decimal
///   |||+------ Break (non-physical, see the B flag convention)
///   ||+------- No flag, reads as 1
///   |+-------- Overflow
///   +--------- Negative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatusFlag {
    Carry = 0b0000_0001,
    Zero = 0b0000_0010,
    InterruptDisable = 0b0000_0100,
    Decimal = 0b0000_1000,
    Break = 0b0001_0000,
    Overflow = 0b0100_0000,
    Negative = 0b1000_0000,
}

impl StatusFlag {
    pub const fn mask(self) -> u8 {
        self as u8
    }
}

/// The 6502 interrupt vector table.
pub enum InterruptVector {
    NonMaskable = 0xFFFA,
    Reset = 0xFFFC,
    IrqBrk = 0xFFFE,
}

/// Operations the IR needs from the machine. One implementation per
/// emulated machine instance; pass it explicitly to every execution
/// function.
///
/// `read_memory`, `write_memory`, and `poll_interrupt` are fallible so a
/// host can cancel a run from inside a memory access or an interrupt poll;
/// [`ExecutionError::Cancelled`] unwinds cleanly through the driver.
pub trait Hal {
    fn read_memory(&mut self, address: u16) -> Result<u8, ExecutionError>;

    fn write_memory(&mut self, address: u16, value: u8) -> Result<(), ExecutionError>;

    fn register(&self, register: CpuRegister) -> u8;

    fn set_register(&mut self, register: CpuRegister, value: u8);

    fn flag(&self, flag: StatusFlag) -> bool;

    fn set_flag(&mut self, flag: StatusFlag, value: bool);

    fn stack_pointer(&self) -> u8;

    fn set_stack_pointer(&mut self, value: u8);

    /// The composed status byte. Bit 5 reads as set.
    fn status_byte(&self) -> u8;

    /// Restore the status byte. Bits 4 and 5 are non-physical and must be
    /// ignored.
    fn set_status_byte(&mut self, value: u8);

    /// Address of the 6502 instruction currently executing, maintained for
    /// debug output and interrupt save state.
    fn instruction_address(&self) -> u16;

    fn set_instruction_address(&mut self, address: u16);

    /// The handler address to transfer to if an interrupt is pending, or 0.
    fn poll_interrupt(&mut self) -> Result<u16, ExecutionError>;

    /// True when the running function was invalidated by a memory write
    /// and execution must re-enter the driver. Reading clears the signal.
    fn poll_recompilation(&mut self) -> bool;

    fn debug_hook(&mut self, message: &str);

    /// Snapshot of the code-bearing regions of the memory map, for the
    /// decompiler.
    fn code_regions(&self) -> Vec<CodeRegion>;

    /// Push to the hardware stack: write 0x0100 + S, then decrement S.
    fn push(&mut self, value: u8) -> Result<(), ExecutionError> {
        let address = STACK_PAGE + self.stack_pointer() as u16;
        self.write_memory(address, value)?;
        let s = self.stack_pointer().wrapping_sub(1);
        self.set_stack_pointer(s);
        Ok(())
    }

    /// Pop from the hardware stack: increment S, then read 0x0100 + S.
    fn pop(&mut self) -> Result<u8, ExecutionError> {
        let s = self.stack_pointer().wrapping_add(1);
        self.set_stack_pointer(s);
        self.read_memory(STACK_PAGE + s as u16)
    }
}

/// The base HAL host platforms derive from: registers, status byte, a
/// memory bus, and the glue that keeps the method cache consistent.
pub struct BusHal {
    bus: MemoryBus,
    a: u8,
    x: u8,
    y: u8,
    s: u8,
    p: u8,
    instruction_address: u16,
    pending_interrupt: Option<u16>,
    recompile_requested: bool,
    cancelled: bool,
    cache: Option<Rc<RefCell<MethodCache>>>,
    debug_messages: Vec<String>,
}

impl BusHal {
    pub fn new(bus: MemoryBus) -> BusHal {
        BusHal {
            bus,
            a: 0,
            x: 0,
            y: 0,
            // The stack grows down; start at the top of page one.
            s: 0xFF,
            p: RESET_STATUS,
            instruction_address: 0,
            pending_interrupt: None,
            recompile_requested: false,
            cancelled: false,
            cache: None,
            debug_messages: Vec::new(),
        }
    }

    /// Wire this HAL to a driver's method cache so writes invalidate
    /// decompiled functions.
    pub fn attach_cache(&mut self, cache: Rc<RefCell<MethodCache>>) {
        self.cache = Some(cache);
    }

    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut MemoryBus {
        &mut self.bus
    }

    /// Queue a transfer to `handler` at the next interrupt poll point.
    pub fn raise_interrupt(&mut self, handler: u16) {
        self.pending_interrupt = Some(handler);
    }

    /// Queue a non-maskable interrupt through the vector table.
    pub fn raise_nmi(&mut self) {
        let handler = self.read_vector(InterruptVector::NonMaskable as u16);
        self.pending_interrupt = Some(handler);
    }

    /// Queue a maskable interrupt through the vector table; ignored while
    /// the interrupt-disable flag is set.
    pub fn raise_irq(&mut self) {
        if !self.flag(StatusFlag::InterruptDisable) {
            let handler = self.read_vector(InterruptVector::IrqBrk as u16);
            self.pending_interrupt = Some(handler);
        }
    }

    /// Make the next memory access or interrupt poll unwind the run loop.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn debug_messages(&self) -> &[String] {
        &self.debug_messages
    }

    fn read_vector(&mut self, address: u16) -> u16 {
        let low = self.bus.read(address) as u16;
        let high = self.bus.read(address.wrapping_add(1)) as u16;
        (high << 8) | low
    }

    fn check_cancelled(&self) -> Result<(), ExecutionError> {
        if self.cancelled {
            Err(ExecutionError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Hal for BusHal {
    fn read_memory(&mut self, address: u16) -> Result<u8, ExecutionError> {
        self.check_cancelled()?;
        Ok(self.bus.read(address))
    }

    fn write_memory(&mut self, address: u16, value: u8) -> Result<(), ExecutionError> {
        self.check_cancelled()?;
        self.bus.write(address, value);
        if let Some(cache) = &self.cache {
            if cache.borrow_mut().note_write(address) {
                self.recompile_requested = true;
            }
        }
        Ok(())
    }

    fn register(&self, register: CpuRegister) -> u8 {
        match register {
            CpuRegister::A => self.a,
            CpuRegister::X => self.x,
            CpuRegister::Y => self.y,
        }
    }

    fn set_register(&mut self, register: CpuRegister, value: u8) {
        match register {
            CpuRegister::A => self.a = value,
            CpuRegister::X => self.x = value,
            CpuRegister::Y => self.y = value,
        }
    }

    fn flag(&self, flag: StatusFlag) -> bool {
        self.p & flag.mask() != 0
    }

    fn set_flag(&mut self, flag: StatusFlag, value: bool) {
        if value {
            self.p |= flag.mask();
        } else {
            self.p &= !flag.mask();
        }
    }

    fn stack_pointer(&self) -> u8 {
        self.s
    }

    fn set_stack_pointer(&mut self, value: u8) {
        self.s = value;
    }

    fn status_byte(&self) -> u8 {
        self.p | STATUS_ALWAYS_SET
    }

    fn set_status_byte(&mut self, value: u8) {
        self.p = (value & !STATUS_PUSH_MASK) | STATUS_ALWAYS_SET;
    }

    fn instruction_address(&self) -> u16 {
        self.instruction_address
    }

    fn set_instruction_address(&mut self, address: u16) {
        self.instruction_address = address;
    }

    fn poll_interrupt(&mut self) -> Result<u16, ExecutionError> {
        self.check_cancelled()?;
        Ok(self.pending_interrupt.take().unwrap_or(0))
    }

    fn poll_recompilation(&mut self) -> bool {
        std::mem::take(&mut self.recompile_requested)
    }

    fn debug_hook(&mut self, message: &str) {
        tracing::debug!(target: "jit6502::hal", "{message}");
        self.debug_messages.push(message.to_string());
    }

    fn code_regions(&self) -> Vec<CodeRegion> {
        self.bus.code_regions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Ram;

    fn hal_with_ram() -> BusHal {
        let mut bus = MemoryBus::new();
        bus.attach(0x0000, Rc::new(RefCell::new(Ram::new(0x10000))), false)
            .unwrap();
        BusHal::new(bus)
    }

    #[test]
    fn push_writes_then_decrements() {
        let mut hal = hal_with_ram();
        hal.push(0xAB).unwrap();
        assert_eq!(hal.stack_pointer(), 0xFE);
        assert_eq!(hal.read_memory(0x01FF).unwrap(), 0xAB);
    }

    #[test]
    fn pop_increments_then_reads() {
        let mut hal = hal_with_ram();
        hal.push(0x12).unwrap();
        hal.push(0x34).unwrap();
        assert_eq!(hal.pop().unwrap(), 0x34);
        assert_eq!(hal.pop().unwrap(), 0x12);
        assert_eq!(hal.stack_pointer(), 0xFF);
    }

    #[test]
    fn status_byte_always_reads_bit_five() {
        let mut hal = hal_with_ram();
        hal.set_status_byte(0x00);
        assert_eq!(hal.status_byte() & STATUS_ALWAYS_SET, STATUS_ALWAYS_SET);
    }

    #[test]
    fn restoring_the_status_byte_ignores_the_pushed_bits() {
        let mut hal = hal_with_ram();
        hal.set_status_byte(0xFF);
        assert!(!hal.flag(StatusFlag::Break));
        assert!(hal.flag(StatusFlag::Carry));
        assert!(hal.flag(StatusFlag::Negative));
        assert!(hal.flag(StatusFlag::Overflow));
    }

    #[test]
    fn cancel_unwinds_from_memory_access() {
        let mut hal = hal_with_ram();
        hal.cancel();
        assert_eq!(hal.read_memory(0x0000), Err(ExecutionError::Cancelled));
        assert_eq!(hal.poll_interrupt(), Err(ExecutionError::Cancelled));
    }

    #[test]
    fn nmi_reads_the_vector_table() {
        let mut hal = hal_with_ram();
        hal.write_memory(0xFFFA, 0x34).unwrap();
        hal.write_memory(0xFFFB, 0x12).unwrap();
        hal.raise_nmi();
        assert_eq!(hal.poll_interrupt().unwrap(), 0x1234);
        // Taken interrupts drain the latch.
        assert_eq!(hal.poll_interrupt().unwrap(), 0);
    }

    #[test]
    fn irq_is_masked_by_the_interrupt_disable_flag() {
        let mut hal = hal_with_ram();
        hal.write_memory(0xFFFE, 0x00).unwrap();
        hal.write_memory(0xFFFF, 0x80).unwrap();
        hal.raise_irq();
        assert_eq!(hal.poll_interrupt().unwrap(), 0);

        hal.set_flag(StatusFlag::InterruptDisable, false);
        hal.raise_irq();
        assert_eq!(hal.poll_interrupt().unwrap(), 0x8000);
    }
}
