use crate::util::Address;
use libc::{PROT_NONE, PROT_READ, PROT_WRITE};
use std::io::{Error, Result};

/// Reserve an address range of `size` bytes, aligned to `align` bytes, without committing any
/// memory. The range is inaccessible until [`commit`] is called on parts of it.
///
/// Returns the aligned start of the range and the raw mapping `(start, size)` that has to be
/// passed to [`release`] eventually.
pub fn reserve_aligned(size: usize, align: usize) -> Result<(Address, (Address, usize))> {
    debug_assert!(align.is_power_of_two());
    let raw_size = size + align;
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_NORESERVE;
    let ptr = unsafe { libc::mmap(std::ptr::null_mut(), raw_size, PROT_NONE, flags, -1, 0) };
    if ptr == libc::MAP_FAILED {
        return Err(Error::last_os_error());
    }
    let raw_start = Address::from_mut_ptr(ptr);
    let start = raw_start.align_up(align);
    Ok((start, (raw_start, raw_size)))
}

/// Demand-zero commit:
/// This function guarantees to zero all committed memory.
pub fn commit(start: Address, size: usize) -> Result<()> {
    let prot = PROT_READ | PROT_WRITE;
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_FIXED;
    mmap_fixed(start, size, prot, flags)
}

/// Give the memory back to the OS. The address range stays reserved, but becomes inaccessible.
pub fn uncommit(start: Address, size: usize) -> Result<()> {
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_FIXED | libc::MAP_NORESERVE;
    mmap_fixed(start, size, PROT_NONE, flags)
}

/// Release a range obtained from [`reserve_aligned`].
pub fn release(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(&|| unsafe { libc::munmap(start.to_mut_ptr(), size) }, 0)
}

fn mmap_fixed(start: Address, size: usize, prot: libc::c_int, flags: libc::c_int) -> Result<()> {
    let ptr = start.to_mut_ptr();
    wrap_libc_call(
        &|| unsafe { libc::mmap(start.to_mut_ptr(), size, prot, flags, -1, 0) },
        ptr,
    )
}

fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, expect: T) -> Result<()> {
    let ret = f();
    if ret == expect {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}
