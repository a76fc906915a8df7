//! Register-bus capability consumed by the core.
//!
//! The bus is synchronous: every access completes or fails before returning.
//! Hosts implement [`RegisterBus`] over their HBI/MPI driver; tests use
//! [`crate::sim::SimDevice`].

use std::ops::{Deref, DerefMut};

use crate::error::{TransportError, VpError};
use crate::registers::{DeviceFamily, RegisterMap};

/// Address space a register access is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RegisterTarget {
    /// Device-wide registers.
    Device,
    /// Registers of one line channel.
    Line(u8),
}

/// Register transport contract.
pub trait RegisterBus {
    /// Reads `count` consecutive words starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the access fails on the bus.
    fn read_register(
        &mut self,
        target: RegisterTarget,
        offset: u16,
        count: usize,
    ) -> Result<Vec<u16>, TransportError>;

    /// Writes consecutive words starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the access fails on the bus.
    fn write_register(
        &mut self,
        target: RegisterTarget,
        offset: u16,
        words: &[u16],
    ) -> Result<(), TransportError>;

    /// Takes ownership of the command mailbox without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`VpError::MailboxBusy`] while the device still owns it, or a
    /// transport error if the ownership handshake fails.
    fn acquire_mailbox(&mut self) -> Result<(), VpError>;

    /// Hands the command mailbox back to the device.
    fn release_mailbox(&mut self);

    /// Enters the bus exclusion domain. No-op for single-threaded hosts.
    fn enter_critical(&mut self) {}

    /// Leaves the bus exclusion domain.
    fn exit_critical(&mut self) {}

    /// Reads one word.
    ///
    /// # Errors
    ///
    /// Propagates the transport failure; a short read is a
    /// [`TransportError::Desync`].
    fn read_word(&mut self, target: RegisterTarget, offset: u16) -> Result<u16, TransportError> {
        self.read_register(target, offset, 1)?
            .first()
            .copied()
            .ok_or(TransportError::Desync)
    }

    /// Writes one word.
    ///
    /// # Errors
    ///
    /// Propagates the transport failure.
    fn write_word(
        &mut self,
        target: RegisterTarget,
        offset: u16,
        word: u16,
    ) -> Result<(), TransportError> {
        self.write_register(target, offset, &[word])
    }

    /// Opens a scoped critical section; it is left when the guard drops.
    fn critical(&mut self) -> CriticalSection<'_, Self>
    where
        Self: Sized,
    {
        CriticalSection::new(self)
    }
}

/// Scoped exclusion around a multi-register sequence.
#[derive(Debug)]
pub struct CriticalSection<'a, B: RegisterBus + ?Sized> {
    bus: &'a mut B,
}

impl<'a, B: RegisterBus + ?Sized> CriticalSection<'a, B> {
    /// Enters the exclusion domain of `bus`.
    pub fn new(bus: &'a mut B) -> Self {
        bus.enter_critical();
        Self { bus }
    }

    /// Read-modify-write of one word: clears `clear`, then sets `set`.
    ///
    /// # Errors
    ///
    /// Propagates the transport failure of either access.
    pub fn modify(
        &mut self,
        target: RegisterTarget,
        offset: u16,
        clear: u16,
        set: u16,
    ) -> Result<u16, TransportError> {
        let current = self.bus.read_word(target, offset)?;
        let updated = (current & !clear) | set;
        self.bus.write_word(target, offset, updated)?;
        Ok(updated)
    }
}

impl<B: RegisterBus + ?Sized> Deref for CriticalSection<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.bus
    }
}

impl<B: RegisterBus + ?Sized> DerefMut for CriticalSection<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        self.bus
    }
}

impl<B: RegisterBus + ?Sized> Drop for CriticalSection<'_, B> {
    fn drop(&mut self) {
        self.bus.exit_critical();
    }
}

/// Register access scoped to one line of a device family.
#[derive(Debug)]
pub struct LineBus<'a, B: RegisterBus + ?Sized> {
    bus: &'a mut B,
    family: DeviceFamily,
    channel: u8,
}

impl<'a, B: RegisterBus + ?Sized> LineBus<'a, B> {
    /// Wraps `bus` for accesses to `channel`.
    pub fn new(bus: &'a mut B, family: DeviceFamily, channel: u8) -> Self {
        Self {
            bus,
            family,
            channel,
        }
    }

    /// Chip family of the device.
    #[must_use]
    pub const fn family(&self) -> DeviceFamily {
        self.family
    }

    /// Register map of the device family.
    #[must_use]
    pub const fn map(&self) -> &'static RegisterMap {
        self.family.map()
    }

    /// Line channel the accesses are aimed at.
    #[must_use]
    pub const fn channel(&self) -> u8 {
        self.channel
    }

    /// Line address space.
    #[must_use]
    pub const fn target(&self) -> RegisterTarget {
        RegisterTarget::Line(self.channel)
    }

    /// Underlying bus, for device-space accesses.
    pub fn bus(&mut self) -> &mut B {
        self.bus
    }

    /// Reads line registers.
    ///
    /// # Errors
    ///
    /// Propagates the transport failure.
    pub fn read(&mut self, offset: u16, count: usize) -> Result<Vec<u16>, TransportError> {
        let target = self.target();
        self.bus.read_register(target, offset, count)
    }

    /// Reads one line register.
    ///
    /// # Errors
    ///
    /// Propagates the transport failure.
    pub fn read_word(&mut self, offset: u16) -> Result<u16, TransportError> {
        let target = self.target();
        self.bus.read_word(target, offset)
    }

    /// Writes line registers.
    ///
    /// # Errors
    ///
    /// Propagates the transport failure.
    pub fn write(&mut self, offset: u16, words: &[u16]) -> Result<(), TransportError> {
        let target = self.target();
        self.bus.write_register(target, offset, words)
    }

    /// Writes one line register.
    ///
    /// # Errors
    ///
    /// Propagates the transport failure.
    pub fn write_word(&mut self, offset: u16, word: u16) -> Result<(), TransportError> {
        self.write(offset, &[word])
    }

    /// Opens a critical section on the underlying bus.
    pub fn critical(&mut self) -> CriticalSection<'_, B> {
        CriticalSection::new(&mut *self.bus)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{RegisterBus, RegisterTarget};
    use crate::error::{TransportError, VpError};

    #[derive(Default)]
    struct MapBus {
        words: HashMap<(RegisterTarget, u16), u16>,
        depth: i32,
        max_depth: i32,
        fail_reads: bool,
    }

    impl RegisterBus for MapBus {
        fn read_register(
            &mut self,
            target: RegisterTarget,
            offset: u16,
            count: usize,
        ) -> Result<Vec<u16>, TransportError> {
            if self.fail_reads {
                return Err(TransportError::BusFault);
            }
            Ok((0..count)
                .map(|i| {
                    let addr = offset + u16::try_from(i).expect("small");
                    self.words.get(&(target, addr)).copied().unwrap_or(0)
                })
                .collect())
        }

        fn write_register(
            &mut self,
            target: RegisterTarget,
            offset: u16,
            words: &[u16],
        ) -> Result<(), TransportError> {
            for (i, word) in words.iter().enumerate() {
                let addr = offset + u16::try_from(i).expect("small");
                self.words.insert((target, addr), *word);
            }
            Ok(())
        }

        fn acquire_mailbox(&mut self) -> Result<(), VpError> {
            Ok(())
        }

        fn release_mailbox(&mut self) {}

        fn enter_critical(&mut self) {
            self.depth += 1;
            self.max_depth = self.max_depth.max(self.depth);
        }

        fn exit_critical(&mut self) {
            self.depth -= 1;
        }
    }

    #[test]
    fn guard_brackets_the_exclusion_domain() {
        let mut bus = MapBus::default();
        {
            let mut section = bus.critical();
            section
                .write_word(RegisterTarget::Line(0), 4, 0x00F0)
                .expect("write");
            let updated = section
                .modify(RegisterTarget::Line(0), 4, 0x0030, 0x0001)
                .expect("modify");
            assert_eq!(updated, 0x00C1);
        }
        assert_eq!(bus.depth, 0);
        assert_eq!(bus.max_depth, 1);
        assert_eq!(bus.read_word(RegisterTarget::Line(0), 4), Ok(0x00C1));
    }

    #[test]
    fn failed_modify_still_leaves_the_section() {
        let mut bus = MapBus {
            fail_reads: true,
            ..MapBus::default()
        };
        {
            let mut section = bus.critical();
            assert_eq!(
                section.modify(RegisterTarget::Device, 0, 0, 1),
                Err(TransportError::BusFault)
            );
        }
        assert_eq!(bus.depth, 0);
    }

    #[test]
    fn line_and_device_spaces_are_disjoint() {
        let mut bus = MapBus::default();
        bus.write_word(RegisterTarget::Line(1), 0, 7).expect("write");
        assert_eq!(bus.read_word(RegisterTarget::Device, 0), Ok(0));
        assert_eq!(bus.read_word(RegisterTarget::Line(0), 0), Ok(0));
        assert_eq!(bus.read_word(RegisterTarget::Line(1), 0), Ok(7));
    }
}
