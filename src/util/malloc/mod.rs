//! This module exposes the malloc API used for slab memory. It is implemented with the
//! library malloc selected by the `malloc_*` features, or the libc malloc by default.

/// Malloc provided by libraries
pub(crate) mod library;

use crate::util::Address;

/// Manually allocate memory. Similar to libc's malloc.
/// Returns a zero address if the allocation failed.
pub fn malloc(size: usize) -> Address {
    Address::from_mut_ptr(unsafe { self::library::malloc(size) })
}

/// Manually free the memory that is returned from other malloc functions in this module.
pub fn free(addr: Address) {
    unsafe { self::library::free(addr.to_mut_ptr()) }
}
