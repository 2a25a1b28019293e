// Export one of the malloc libraries.

#[cfg(feature = "malloc_jemalloc")]
pub use self::jemalloc::*;
#[cfg(not(any(feature = "malloc_jemalloc", feature = "malloc_mimalloc",)))]
pub use self::libc_malloc::*;
#[cfg(feature = "malloc_mimalloc")]
pub use self::mimalloc::*;

// Different malloc libraries

#[cfg(feature = "malloc_jemalloc")]
mod jemalloc {
    pub use jemalloc_sys::{free, malloc};
}

#[cfg(feature = "malloc_mimalloc")]
mod mimalloc {
    pub use mimalloc_sys::{mi_free as free, mi_malloc as malloc};
}

/// If no malloc lib is specified, use the libc implementation
#[cfg(not(any(feature = "malloc_jemalloc", feature = "malloc_mimalloc",)))]
mod libc_malloc {
    pub use libc::{free, malloc};
}
