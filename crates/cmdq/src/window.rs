/// Shared Window - "The Mailbox"
///
/// The only memory both the host and the controller can see. Host code
/// names bytes by host-relative offset, controller code by local virtual
/// address; `OffsetTranslator` is the bounds-checked bridge between them.

use crate::config::WindowConfig;
use crate::error::TransportError;
use crate::types::{CommandHeader, CtrlFlags, CTRL_FLAGS_OFFSET, HEADER_SIZE};
use parking_lot::RwLock;

/// Controller-side virtual address inside the shared window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalAddr(pub u32);

impl std::fmt::Display for LocalAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Bidirectional host offset <-> local address mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetTranslator {
    host_base: u32,
    local_base: u32,
    size: u32,
}

impl OffsetTranslator {
    pub fn new(config: &WindowConfig) -> Result<Self, TransportError> {
        if config.size == 0
            || config.host_base.checked_add(config.size).is_none()
            || config.local_base.checked_add(config.size).is_none()
        {
            return Err(TransportError::Config(format!(
                "window mapping host 0x{:x} / local 0x{:x} / size 0x{:x} is not representable",
                config.host_base, config.local_base, config.size
            )));
        }

        Ok(Self {
            host_base: config.host_base,
            local_base: config.local_base,
            size: config.size,
        })
    }

    pub fn host_base(&self) -> u32 {
        self.host_base
    }

    pub fn local_base(&self) -> u32 {
        self.local_base
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Translate a host-relative offset into a local address.
    pub fn to_local(&self, host_offset: u32) -> Result<LocalAddr, TransportError> {
        match host_offset.checked_sub(self.host_base) {
            Some(delta) if delta < self.size => Ok(LocalAddr(self.local_base + delta)),
            _ => {
                log::warn!(
                    "Rejected host offset 0x{:08x} (window 0x{:08x}+0x{:x})",
                    host_offset,
                    self.host_base,
                    self.size
                );
                Err(TransportError::OffsetOutOfRange {
                    offset: host_offset,
                    base: self.host_base,
                    size: self.size,
                })
            }
        }
    }

    /// Translate a local address back into a host-relative offset.
    pub fn to_host(&self, addr: LocalAddr) -> Result<u32, TransportError> {
        match addr.0.checked_sub(self.local_base) {
            Some(delta) if delta < self.size => Ok(self.host_base + delta),
            _ => {
                log::warn!(
                    "Rejected local address {} (window 0x{:08x}+0x{:x})",
                    addr,
                    self.local_base,
                    self.size
                );
                Err(TransportError::AddressOutOfRange {
                    addr: addr.0,
                    len: 0,
                    base: self.local_base,
                    size: self.size,
                })
            }
        }
    }

    /// Window-relative index of `len` bytes starting at `addr`.
    fn span(&self, addr: LocalAddr, len: usize) -> Result<usize, TransportError> {
        let start = addr.0.checked_sub(self.local_base);
        let len32 = u32::try_from(len).ok();
        match (start, len32) {
            (Some(start), Some(len32))
                if start
                    .checked_add(len32)
                    .map_or(false, |end| end <= self.size) =>
            {
                Ok(start as usize)
            }
            _ => Err(TransportError::AddressOutOfRange {
                addr: addr.0,
                len: len32.unwrap_or(u32::MAX),
                base: self.local_base,
                size: self.size,
            }),
        }
    }
}

/// Backing bytes of the shared window
///
/// On silicon this is a mapped aperture; here it is owned memory so the
/// same code can run against a simulated host.
pub struct SharedWindow {
    translator: OffsetTranslator,
    mem: RwLock<Vec<u8>>,
}

impl SharedWindow {
    pub fn new(config: &WindowConfig) -> Result<Self, TransportError> {
        let translator = OffsetTranslator::new(config)?;
        log::debug!(
            "Shared window: host 0x{:08x} -> local 0x{:08x} ({} bytes)",
            translator.host_base,
            translator.local_base,
            translator.size
        );

        Ok(Self {
            translator,
            mem: RwLock::new(vec![0u8; translator.size as usize]),
        })
    }

    pub fn translator(&self) -> &OffsetTranslator {
        &self.translator
    }

    pub fn read(&self, addr: LocalAddr, buf: &mut [u8]) -> Result<(), TransportError> {
        let start = self.translator.span(addr, buf.len())?;
        buf.copy_from_slice(&self.mem.read()[start..start + buf.len()]);
        Ok(())
    }

    pub fn write(&self, addr: LocalAddr, data: &[u8]) -> Result<(), TransportError> {
        let start = self.translator.span(addr, data.len())?;
        self.mem.write()[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn read_header(&self, addr: LocalAddr) -> Result<CommandHeader, TransportError> {
        let mut raw = [0u8; HEADER_SIZE as usize];
        self.read(addr, &mut raw)?;
        Ok(CommandHeader::decode(&raw))
    }

    pub fn write_header(&self, addr: LocalAddr, header: &CommandHeader) -> Result<(), TransportError> {
        self.write(addr, &header.encode())
    }

    /// Copy out the payload that follows the header at `addr`.
    pub fn read_payload(
        &self,
        addr: LocalAddr,
        header: &CommandHeader,
    ) -> Result<Vec<u8>, TransportError> {
        let start = LocalAddr(addr.0.wrapping_add(HEADER_SIZE));
        let mut payload = vec![0u8; header.payload_len() as usize];
        self.read(start, &mut payload)?;
        Ok(payload)
    }

    /// Set the acknowledgment bit in place.
    pub fn set_ack(&self, addr: LocalAddr) -> Result<(), TransportError> {
        let flags_addr = LocalAddr(addr.0.wrapping_add(CTRL_FLAGS_OFFSET));
        let idx = self.translator.span(flags_addr, 1)?;
        self.mem.write()[idx] |= CtrlFlags::ACK.bits();
        Ok(())
    }
}
