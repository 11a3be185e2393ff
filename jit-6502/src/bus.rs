//! The layered memory bus: a 64 KiB address space mapped onto attached
//! devices.
//!
//! Attachments are ordered; on access the latest attachment covering the
//! address wins, so a later layer attached with `allows_overriding` shadows
//! whatever it overlaps. [`MemoryBus::code_regions`] flattens that layering
//! into the byte spans the disassembler decodes from: overlays replace the
//! bytes they shadow, a partially-shadowed underlay is fragmented into the
//! pieces that remain visible, a device attached at two bases shows up as
//! two regions with the same content, and devices that expose no raw block
//! (pure I/O stubs) are omitted.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

/// The full 16-bit address space.
const ADDRESS_SPACE: u32 = 0x1_0000;

/// A memory-mapped device. Offsets passed to `read`/`write` are relative
/// to the attachment base.
pub trait BusDevice {
    fn size(&self) -> u32;

    fn read(&mut self, offset: u16) -> u8;

    fn write(&mut self, offset: u16, value: u8);

    /// The device's backing bytes, if it has any. Devices that return
    /// `None` are invisible to the disassembler.
    fn raw_block(&self) -> Option<&[u8]> {
        None
    }
}

pub type SharedDevice = Rc<RefCell<dyn BusDevice>>;

/// Plain byte-addressable memory.
pub struct Ram {
    bytes: Vec<u8>,
}

impl Ram {
    pub fn new(size: usize) -> Ram {
        Ram {
            bytes: vec![0; size],
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Ram {
        Ram { bytes }
    }

    /// Copy `bytes` into the device starting at `offset`.
    pub fn load(&mut self, offset: usize, bytes: &[u8]) {
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

impl BusDevice for Ram {
    fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn read(&mut self, offset: u16) -> u8 {
        self.bytes[offset as usize]
    }

    fn write(&mut self, offset: u16, value: u8) {
        self.bytes[offset as usize] = value;
    }

    fn raw_block(&self) -> Option<&[u8]> {
        Some(&self.bytes)
    }
}

/// Read-only memory. Writes are forwarded by the bus and dropped here.
pub struct Rom {
    bytes: Vec<u8>,
}

impl Rom {
    pub fn from_bytes(bytes: Vec<u8>) -> Rom {
        Rom { bytes }
    }
}

impl BusDevice for Rom {
    fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn read(&mut self, offset: u16) -> u8 {
        self.bytes[offset as usize]
    }

    fn write(&mut self, _offset: u16, _value: u8) {}

    fn raw_block(&self) -> Option<&[u8]> {
        Some(&self.bytes)
    }
}

/// A contiguous span of code-bearing bytes, as seen through the current
/// bus layering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRegion {
    pub base: u16,
    pub bytes: Vec<u8>,
}

impl CodeRegion {
    pub fn contains(&self, address: u16) -> bool {
        let offset = address.wrapping_sub(self.base) as usize;
        address >= self.base && offset < self.bytes.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error(
        "attachment at {base:#06x} overlaps an existing device and was not marked as overriding"
    )]
    OverlapWithoutOverride { base: u16 },

    #[error("attachment at {base:#06x} with size {size:#x} extends past the address space")]
    OutOfAddressSpace { base: u16, size: u32 },
}

struct Attachment {
    base: u16,
    device: SharedDevice,
    allows_overriding: bool,
}

impl Attachment {
    fn end(&self) -> u32 {
        self.base as u32 + self.device.borrow().size()
    }

    fn covers(&self, address: u16) -> bool {
        address >= self.base && (address as u32) < self.end()
    }

    fn overlaps(&self, base: u32, end: u32) -> bool {
        (self.base as u32) < end && base < self.end()
    }
}

/// An address-indexed device map with overridable layers.
#[derive(Default)]
pub struct MemoryBus {
    attachments: Vec<Attachment>,
}

impl MemoryBus {
    pub fn new() -> MemoryBus {
        MemoryBus {
            attachments: Vec::new(),
        }
    }

    /// Map `device` starting at `base`. An attachment that overlaps an
    /// earlier one must be marked `allows_overriding`; it then shadows the
    /// overlapped span.
    pub fn attach(
        &mut self,
        base: u16,
        device: SharedDevice,
        allows_overriding: bool,
    ) -> Result<(), BusError> {
        let size = device.borrow().size();
        let end = base as u32 + size;
        if end > ADDRESS_SPACE {
            return Err(BusError::OutOfAddressSpace { base, size });
        }
        let overlapping = self
            .attachments
            .iter()
            .any(|attachment| attachment.overlaps(base as u32, end));
        if overlapping && !allows_overriding {
            return Err(BusError::OverlapWithoutOverride { base });
        }
        tracing::debug!(
            target: "jit6502::bus",
            base,
            size,
            overriding = overlapping,
            "device attached"
        );
        self.attachments.push(Attachment {
            base,
            device,
            allows_overriding,
        });
        Ok(())
    }

    /// `(base, size, allows_overriding)` of every attachment, in attach
    /// order. Later entries shadow earlier ones where they overlap.
    pub fn attachments(&self) -> Vec<(u16, u32, bool)> {
        self.attachments
            .iter()
            .map(|attachment| {
                (
                    attachment.base,
                    attachment.device.borrow().size(),
                    attachment.allows_overriding,
                )
            })
            .collect()
    }

    fn resolve(&self, address: u16) -> Option<&Attachment> {
        self.attachments
            .iter()
            .rev()
            .find(|attachment| attachment.covers(address))
    }

    /// Read through the visible device at `address`; unmapped reads yield 0.
    pub fn read(&self, address: u16) -> u8 {
        match self.resolve(address) {
            Some(attachment) => {
                let offset = address - attachment.base;
                attachment.device.borrow_mut().read(offset)
            }
            None => 0,
        }
    }

    /// Write through the visible device at `address`; unmapped writes are
    /// dropped. Whether a write sticks is the device's choice.
    pub fn write(&self, address: u16, value: u8) {
        if let Some(attachment) = self.resolve(address) {
            let offset = address - attachment.base;
            attachment.device.borrow_mut().write(offset, value);
        }
    }

    /// Flatten the current layering into the spans of bytes the
    /// disassembler should treat as code, ordered by base address.
    pub fn code_regions(&self) -> Vec<CodeRegion> {
        let mut visible = vec![None::<usize>; ADDRESS_SPACE as usize];
        for (index, attachment) in self.attachments.iter().enumerate() {
            for address in attachment.base as u32..attachment.end().min(ADDRESS_SPACE) {
                visible[address as usize] = Some(index);
            }
        }

        let mut regions = Vec::new();
        let mut span_start: Option<(u32, usize)> = None;
        for address in 0..=ADDRESS_SPACE {
            let here = if address < ADDRESS_SPACE {
                visible[address as usize]
            } else {
                None
            };
            match (span_start, here) {
                (Some((_, index)), Some(current)) if current == index => {}
                (Some((start, index)), _) => {
                    self.emit_region(&mut regions, start, address, index);
                    span_start = here.map(|index| (address, index));
                }
                (None, Some(index)) => span_start = Some((address, index)),
                (None, None) => {}
            }
        }
        regions
    }

    fn emit_region(&self, regions: &mut Vec<CodeRegion>, start: u32, end: u32, index: usize) {
        let attachment = &self.attachments[index];
        let device = attachment.device.borrow();
        let Some(block) = device.raw_block() else {
            return;
        };
        let from = (start - attachment.base as u32) as usize;
        let to = (end - attachment.base as u32) as usize;
        regions.push(CodeRegion {
            base: start as u16,
            bytes: block[from..to].to_vec(),
        });
    }
}
