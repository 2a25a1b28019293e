//! An address-stable pool of fixed-size items.
//!
//! Items are carved out of slabs of `ITEMS_PER_SLAB` slots each. Released items go to an
//! internal freelist and are handed out again before any fresh slot is used. Items never move,
//! and slab memory is only given back when the whole array is dropped.
//!
//! The array hands out raw, uninitialized storage shaped for `T`. It never runs constructors or
//! destructors of `T`; that is up to the caller.

use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop, MaybeUninit};
use std::ptr::{self, NonNull};

use crate::util::constants::MALLOC_ALIGNMENT;
use crate::util::malloc;
use crate::util::Address;

/// The low-level memory source for slabs.
pub trait SlabAllocator {
    /// Allocate `bytes` bytes aligned to at least [`MALLOC_ALIGNMENT`]. Returns `None` if the
    /// memory is exhausted.
    fn allocate(bytes: usize) -> Option<Address>;

    /// Release memory obtained from [`Self::allocate`].
    ///
    /// # Safety
    /// `addr` must come from `allocate` and must not be used afterwards.
    unsafe fn deallocate(addr: Address);
}

/// Slabs from the malloc library (see [`crate::util::malloc`]).
pub struct MallocSlabAllocator;

impl SlabAllocator for MallocSlabAllocator {
    fn allocate(bytes: usize) -> Option<Address> {
        let addr = malloc::malloc(bytes);
        if addr.is_zero() {
            None
        } else {
            Some(addr)
        }
    }

    unsafe fn deallocate(addr: Address) {
        malloc::free(addr)
    }
}

// A slot either holds an item, or, while it is on the freelist, the next free slot.
#[repr(C)]
union Slot<T> {
    item: ManuallyDrop<MaybeUninit<T>>,
    next_free: *mut Slot<T>,
}

#[repr(C)]
struct Slab<T, const N: usize> {
    next: *mut Slab<T, N>,
    slots: [Slot<T>; N],
}

/// See the module documentation.
///
/// `MAX_SLABS` bounds the number of slabs; 0 means unbounded. Once the bound is reached and no
/// free slot is left, [`FixedItemArray::allocate`] returns `None`.
pub struct FixedItemArray<
    T,
    const ITEMS_PER_SLAB: usize,
    const MAX_SLABS: usize,
    A = MallocSlabAllocator,
> where
    A: SlabAllocator,
{
    // Most recently allocated slab, the only one that may have unused slots. Older slabs
    // follow through `Slab::next`.
    current_slab: *mut Slab<T, ITEMS_PER_SLAB>,
    // Number of slots of the current slab that have been handed out at least once.
    top: usize,
    num_slabs: usize,
    freelist: *mut Slot<T>,
    freelist_len: usize,
    num_allocated: usize,
    _allocator: PhantomData<A>,
}

// The array is not thread-safe. It needs external synchronisation (e.g. using Mutex).
// On the other hand, to put the array into a Mutex<T>, it must implement Send.
unsafe impl<T: Send, const N: usize, const M: usize, A: SlabAllocator> Send
    for FixedItemArray<T, N, M, A>
{
}

impl<T, const ITEMS_PER_SLAB: usize, const MAX_SLABS: usize, A: SlabAllocator>
    FixedItemArray<T, ITEMS_PER_SLAB, MAX_SLABS, A>
{
    // Larger-than-malloc alignment is not supported.
    const LAYOUT_CHECK: () = {
        assert!(mem::align_of::<Slab<T, ITEMS_PER_SLAB>>() <= MALLOC_ALIGNMENT);
        assert!(ITEMS_PER_SLAB > 0);
    };

    pub const SLAB_BYTES: usize = mem::size_of::<Slab<T, ITEMS_PER_SLAB>>();

    pub fn new() -> Self {
        let () = Self::LAYOUT_CHECK;
        FixedItemArray {
            current_slab: ptr::null_mut(),
            top: ITEMS_PER_SLAB,
            num_slabs: 0,
            freelist: ptr::null_mut(),
            freelist_len: 0,
            num_allocated: 0,
            _allocator: PhantomData,
        }
    }

    /// Get storage for one item. The content is undefined.
    pub fn allocate(&mut self) -> Option<NonNull<T>> {
        let slot = if !self.freelist.is_null() {
            let slot = self.freelist;
            self.freelist = unsafe { (*slot).next_free };
            self.freelist_len -= 1;
            slot
        } else {
            if self.top == ITEMS_PER_SLAB && !self.add_slab() {
                return None;
            }
            let slot = unsafe { ptr::addr_of_mut!((*self.current_slab).slots[self.top]) };
            self.top += 1;
            slot
        };
        self.num_allocated += 1;
        // The item sits at offset 0 of the slot.
        NonNull::new(slot as *mut T)
    }

    /// Return storage obtained from [`Self::allocate`] to the freelist.
    ///
    /// # Safety
    /// `item` must come from this array, must not be on the freelist already, and must not be
    /// used afterwards. Whatever `T` holds is not dropped.
    pub unsafe fn deallocate(&mut self, item: NonNull<T>) {
        debug_assert!(self.num_allocated > 0);
        debug_assert!(self.contains(item), "item does not belong to this array");
        let slot = item.as_ptr() as *mut Slot<T>;
        ptr::addr_of_mut!((*slot).next_free).write(self.freelist);
        self.freelist = slot;
        self.freelist_len += 1;
        self.num_allocated -= 1;
    }

    fn add_slab(&mut self) -> bool {
        if MAX_SLABS > 0 && self.num_slabs >= MAX_SLABS {
            return false;
        }
        let Some(addr) = A::allocate(Self::SLAB_BYTES) else {
            return false;
        };
        debug_assert!(addr.is_aligned_to(mem::align_of::<Slab<T, ITEMS_PER_SLAB>>()));
        let slab = addr.to_mut_ptr::<Slab<T, ITEMS_PER_SLAB>>();
        unsafe { ptr::addr_of_mut!((*slab).next).write(self.current_slab) };
        self.current_slab = slab;
        self.top = 0;
        self.num_slabs += 1;
        true
    }

    /// Is `item` a slot of one of our slabs?
    pub fn contains(&self, item: NonNull<T>) -> bool {
        let p = Address::from_mut_ptr(item.as_ptr());
        let mut slab = self.current_slab;
        while !slab.is_null() {
            let first = unsafe { ptr::addr_of!((*slab).slots) } as *const Slot<T>;
            let start = Address::from_ptr(first);
            let end = start + ITEMS_PER_SLAB * mem::size_of::<Slot<T>>();
            if p.is_in_range(start, end) {
                return (p - start) % mem::size_of::<Slot<T>>() == 0;
            }
            slab = unsafe { (*slab).next };
        }
        false
    }

    /// Number of slabs allocated so far.
    pub fn num_slabs(&self) -> usize {
        self.num_slabs
    }

    /// Number of items currently handed out.
    pub fn num_allocated(&self) -> usize {
        self.num_allocated
    }

    /// Number of items on the freelist.
    pub fn freelist_len(&self) -> usize {
        self.freelist_len
    }

    /// Number of items that can be handed out without allocating a new slab: the freelist plus
    /// the untouched slots of the current slab.
    pub fn num_free(&self) -> usize {
        self.freelist_len + (ITEMS_PER_SLAB - self.top)
    }

    /// Number of slots in all slabs.
    pub fn capacity(&self) -> usize {
        self.num_slabs * ITEMS_PER_SLAB
    }

    pub fn memory_footprint_bytes(&self) -> usize {
        self.num_slabs * Self::SLAB_BYTES
    }

    /// Check the counters against the slab chain and the freelist. Panics on violation.
    pub fn verify(&self) {
        if MAX_SLABS > 0 {
            assert!(self.num_slabs <= MAX_SLABS);
        }
        let mut slabs = 0;
        let mut slab = self.current_slab;
        while !slab.is_null() {
            slabs += 1;
            slab = unsafe { (*slab).next };
        }
        assert_eq!(slabs, self.num_slabs);

        let mut free = 0;
        let mut slot = self.freelist;
        while !slot.is_null() {
            assert!(self.contains(unsafe { NonNull::new_unchecked(slot as *mut T) }));
            free += 1;
            slot = unsafe { (*slot).next_free };
        }
        assert_eq!(free, self.freelist_len);

        if self.num_slabs == 0 {
            assert_eq!(self.num_allocated, 0);
            assert_eq!(self.freelist_len, 0);
        } else {
            assert!(self.top <= ITEMS_PER_SLAB);
            // All slabs but the current one are full.
            assert_eq!(
                self.num_allocated + self.freelist_len,
                (self.num_slabs - 1) * ITEMS_PER_SLAB + self.top
            );
            assert_eq!(self.num_allocated + self.num_free(), self.capacity());
        }
    }
}

impl<T, const N: usize, const M: usize, A: SlabAllocator> Default for FixedItemArray<T, N, M, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize, const M: usize, A: SlabAllocator> Drop for FixedItemArray<T, N, M, A> {
    fn drop(&mut self) {
        let mut slab = self.current_slab;
        while !slab.is_null() {
            let next = unsafe { (*slab).next };
            unsafe { A::deallocate(Address::from_mut_ptr(slab)) };
            slab = next;
        }
    }
}
