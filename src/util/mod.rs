//! Low-level utilities that are not specific to metaspace.

/// Address type and address arithmetic.
pub mod address;
/// Size constants.
pub mod constants;
/// Alignment and unit conversion.
pub mod conversions;
/// An address-stable slab pool.
pub mod fixed_item_array;
/// Logger initialization.
pub mod logger;
/// Malloc wrappers used as the backing store of slab pools.
pub mod malloc;
/// Wrappers around virtual memory syscalls.
pub mod memory;
/// Runtime options.
pub mod options;
/// An intrusive red-black tree.
pub mod rbtree;

#[cfg(test)]
pub(crate) mod test_util;

pub use self::address::Address;
pub use self::address::MetaWord;
