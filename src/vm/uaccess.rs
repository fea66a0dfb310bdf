//! Kernel Access to User Memory
//!
//! Copies between kernel buffers and a process's user pages, behaving
//! like the MMU does for a real user access: a missing translation raises
//! a not-present fault, a write through a read-only translation raises a
//! protection fault, and every successful access sets the accessed bit
//! (and the dirty bit for writes).

use super::fault::PageFault;
use super::frame::FrameId;
use super::pmap::PteFlags;
use super::{pg_ofs, VmManager, PAGE_SIZE};
use crate::error::{VmError, VmResult};
use crate::types::{Pid, VirtAddr};

impl VmManager {
    /// Copy `buf.len()` bytes from user address `va`
    pub fn read_user(&mut self, pid: Pid, va: VirtAddr, buf: &mut [u8]) -> VmResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let addr = va
                .checked_add(done as u64)
                .ok_or(VmError::InvalidAddress(va))?;
            let frame = self.touch(pid, addr, false)?;
            let ofs = pg_ofs(addr) as usize;
            let n = (PAGE_SIZE - ofs).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&self.frames.data(frame)[ofs..ofs + n]);
            done += n;
        }
        Ok(())
    }

    /// Copy `data` to user address `va`
    pub fn write_user(&mut self, pid: Pid, va: VirtAddr, data: &[u8]) -> VmResult<()> {
        let mut done = 0;
        while done < data.len() {
            let addr = va
                .checked_add(done as u64)
                .ok_or(VmError::InvalidAddress(va))?;
            let frame = self.touch(pid, addr, true)?;
            let ofs = pg_ofs(addr) as usize;
            let n = (PAGE_SIZE - ofs).min(data.len() - done);
            self.frames.data_mut(frame)[ofs..ofs + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        Ok(())
    }

    /// Translate one access, faulting the page in if needed
    fn touch(&mut self, pid: Pid, addr: VirtAddr, write: bool) -> VmResult<FrameId> {
        if self.config.is_kernel_vaddr(addr) {
            return Err(VmError::InvalidAddress(addr));
        }
        let rsp = self.space(pid)?.user_rsp;
        let fault = PageFault::user(addr, write, rsp);

        // A resolved fault installs the translation, so one retry suffices
        for _ in 0..2 {
            let space = self.space_mut(pid)?;
            match space.pmap.translate(addr) {
                Some((_, flags)) if write && !flags.contains(PteFlags::WRITABLE) => {
                    self.handle_fault(pid, &fault.protection())?;
                }
                Some((kva, _)) => {
                    space.pmap.set_accessed(addr, true);
                    if write {
                        space.pmap.set_dirty(addr, true);
                    }
                    return self.frames.id_of(kva).ok_or(VmError::InvalidAddress(addr));
                }
                None => {
                    self.handle_fault(pid, &fault)?;
                }
            }
        }
        Err(VmError::InvalidAddress(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use crate::device::RamDisk;
    use crate::vm::VmType;
    use alloc::sync::Arc;
    use alloc::vec;

    const PID: Pid = Pid(4);

    fn setup(frames: usize) -> VmManager {
        let config = VmConfig::new().with_user_frames(frames);
        let mut vm = VmManager::new(config, Arc::new(RamDisk::with_pages(8))).unwrap();
        vm.create_default_space(PID).unwrap();
        vm
    }

    #[test]
    fn test_write_then_read_across_pages() {
        let mut vm = setup(4);
        vm.alloc_page(PID, VmType::ANON, 0x1000, true).unwrap();
        vm.alloc_page(PID, VmType::ANON, 0x2000, true).unwrap();

        let data: vec::Vec<u8> = (0..100).collect();
        vm.write_user(PID, 0x2000 - 50, &data).unwrap();
        let mut buf = vec![0u8; 100];
        vm.read_user(PID, 0x2000 - 50, &mut buf).unwrap();
        assert_eq!(buf, data);

        let pmap = vm.space(PID).unwrap().pmap();
        assert!(pmap.is_dirty(0x1000) && pmap.is_dirty(0x2000));
        assert!(pmap.is_accessed(0x1000));
    }

    #[test]
    fn test_write_to_read_only_page() {
        let mut vm = setup(4);
        vm.alloc_page(PID, VmType::ANON, 0x1000, false).unwrap();
        let mut buf = [0u8; 4];
        vm.read_user(PID, 0x1000, &mut buf).unwrap();
        assert_eq!(
            vm.write_user(PID, 0x1000, b"nope"),
            Err(VmError::ProtectionViolation(0x1000))
        );
    }

    #[test]
    fn test_unmapped_access_fails() {
        let mut vm = setup(4);
        let mut buf = [0u8; 1];
        assert_eq!(
            vm.read_user(PID, 0x9000, &mut buf),
            Err(VmError::NotFound(0x9000))
        );
    }

    #[test]
    fn test_accessed_pages_survive_clock() {
        let mut vm = setup(2);
        for va in [0x1000, 0x2000, 0x3000] {
            vm.alloc_page(PID, VmType::ANON, va, true).unwrap();
        }
        vm.write_user(PID, 0x1000, &[1]).unwrap();
        vm.write_user(PID, 0x2000, &[2]).unwrap();
        vm.read_user(PID, 0x1000, &mut [0u8; 1]).unwrap();
        // Both frames have their accessed bit set: the sweep clears 0x1000
        // then 0x2000 and takes 0x1000 on the second trip
        vm.write_user(PID, 0x3000, &[3]).unwrap();
        assert!(!vm.find_page(PID, 0x1000).unwrap().is_resident());
        assert!(vm.find_page(PID, 0x2000).unwrap().is_resident());

        let mut byte = [0u8; 1];
        vm.read_user(PID, 0x1000, &mut byte).unwrap();
        assert_eq!(byte, [1]);
    }
}
