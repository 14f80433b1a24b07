//! Kernel heap boundary: `kmm_malloc` / `kmm_free` as seen by the pool.
//!
//! **Contract:** allocation failure is reported as `None`, never as a panic
//! or an abort.  The pool turns it into [`MqError::OutOfMemory`] and lets
//! the sender decide what to drop.
//!
//! **Implementations:**
//! - [`GlobalHeap`] forwards to the crate-wide global allocator.  On the
//!   kernel image that is the kernel's `#[global_allocator]`.
//! - [`ArenaHeap`] is a bounded first-fit heap over one fixed region, backed
//!   by `linked_list_allocator::Heap`.  Memory is recycled and exhaustion is
//!   deterministic: it caps how many dynamic descriptors can exist at once.
//!
//! [`MqError::OutOfMemory`]: crate::error::MqError::OutOfMemory

use alloc::boxed::Box;
use core::alloc::Layout;
use core::mem::{size_of, MaybeUninit};
use core::ptr::NonNull;

use linked_list_allocator::Heap;
use spin::Mutex;

use crate::arch;
use crate::error::{MqError, Result};

/// Source of dynamically allocated memory.
///
/// # Safety
/// `allocate` must return memory valid for `layout` that stays valid until
/// it is passed back to `deallocate` with the same layout.  Implementations
/// must be callable from several cores at once.
pub unsafe trait KernelHeap: Sync {
	/// Allocates a block for `layout`, or `None` when the heap is exhausted.
	fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

	/// Returns a block to the heap.
	///
	/// # Safety
	/// `ptr` must come from `allocate` on this heap with the same `layout`,
	/// and must not be used afterwards.
	unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

// ── Global Heap ─────────────────────────────────────────────────

/// The crate-wide global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalHeap;

// Safety: `alloc::alloc` honours the layout it is given and is thread-safe.
unsafe impl KernelHeap for GlobalHeap {
	fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
		if layout.size() == 0 {
			return None;
		}
		// SAFETY: the layout has a non-zero size.
		NonNull::new(unsafe { alloc::alloc::alloc(layout) })
	}

	unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
		// SAFETY: forwarded caller contract.
		unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) }
	}
}

// ── Arena Heap ──────────────────────────────────────────────────

/// Smallest region `Heap::init` accepts for any base alignment.
const ARENA_MIN_SIZE: usize = 3 * size_of::<usize>();

/// A bounded heap over one fixed region.
pub struct ArenaHeap {
	inner: Mutex<Heap>,
	/// The managed region.
	region: NonNull<[MaybeUninit<u8>]>,
	/// Whether `region` was boxed by `with_capacity` and must be freed.
	owned: bool,
}

// Safety: the region is only reached through `inner`, which is locked.
unsafe impl Send for ArenaHeap {}
unsafe impl Sync for ArenaHeap {}

impl ArenaHeap {
	/// Manages a static region, e.g. a linker-reserved `.bss` block.
	pub fn from_static(region: &'static mut [MaybeUninit<u8>]) -> Result<Self> {
		let region = NonNull::from(region);
		// SAFETY: a `'static mut` region is ours for the rest of the system's life.
		unsafe { Self::init(region, false) }
	}

	/// Allocates a region of `size` bytes from the global allocator and
	/// manages it as a bounded heap.
	pub fn with_capacity(size: usize) -> Result<Self> {
		if size < ARENA_MIN_SIZE {
			return Err(MqError::InvalidConfig("arena smaller than the allocator minimum"));
		}
		let region = NonNull::from(Box::leak(Box::<[u8]>::new_uninit_slice(size)));
		// SAFETY: the leaked box is exclusively ours until `Drop` reclaims it.
		unsafe { Self::init(region, true) }
	}

	/// # Safety
	/// `region` must be valid, unaliased memory for as long as `self` lives.
	unsafe fn init(region: NonNull<[MaybeUninit<u8>]>, owned: bool) -> Result<Self> {
		let size = region.len();
		if size < ARENA_MIN_SIZE {
			return Err(MqError::InvalidConfig("arena smaller than the allocator minimum"));
		}

		let mut heap = Heap::empty();
		// SAFETY: forwarded caller contract; the size was checked above.
		unsafe {
			heap.init(region.as_ptr().cast::<u8>(), size);
		}

		log::debug!("ArenaHeap: managing {} bytes at {:p}", size, region.as_ptr().cast::<u8>());

		Ok(Self {
			inner: Mutex::new(heap),
			region,
			owned,
		})
	}

	/// Bytes handed out and not yet returned.
	pub fn used(&self) -> usize {
		self.inner.lock().used()
	}

	/// Bytes still available.
	pub fn free(&self) -> usize {
		self.inner.lock().free()
	}

	/// Bytes the allocator manages; the region less any alignment slack.
	pub fn size(&self) -> usize {
		self.inner.lock().size()
	}
}

unsafe impl KernelHeap for ArenaHeap {
	fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
		// No allocation may interleave with one on the same core from a
		// handler, so interrupts stay off while the mutex is held.
		let flags = arch::local_irq_save();
		let ptr = self.inner.lock().allocate_first_fit(layout).ok();
		arch::local_irq_restore(flags);
		ptr
	}

	unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
		let flags = arch::local_irq_save();
		// SAFETY: forwarded caller contract.
		unsafe { self.inner.lock().deallocate(ptr, layout) };
		arch::local_irq_restore(flags);
	}
}

impl Drop for ArenaHeap {
	fn drop(&mut self) {
		if self.owned {
			// SAFETY: `with_capacity` leaked exactly this box.
			drop(unsafe { Box::from_raw(self.region.as_ptr()) });
		}
	}
}

impl core::fmt::Debug for ArenaHeap {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("ArenaHeap")
			.field("size", &self.size())
			.field("used", &self.used())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn global_heap_round_trips() {
		let layout = Layout::new::<[u64; 4]>();
		let ptr = GlobalHeap.allocate(layout).expect("host heap");
		assert_eq!(ptr.as_ptr() as usize % layout.align(), 0);
		unsafe { GlobalHeap.deallocate(ptr, layout) };
	}

	#[test]
	fn global_heap_refuses_zero_sized() {
		assert!(GlobalHeap.allocate(Layout::new::<()>()).is_none());
	}

	#[test]
	fn arena_exhausts_then_recycles() {
		let arena = ArenaHeap::with_capacity(1024).unwrap();
		let layout = Layout::from_size_align(128, 8).unwrap();

		let mut blocks = Vec::new();
		while let Some(ptr) = arena.allocate(layout) {
			blocks.push(ptr);
			assert!(blocks.len() <= 8, "arena handed out more than it holds");
		}
		assert!(!blocks.is_empty());
		assert!(arena.used() > 0);

		let ptr = blocks.pop().unwrap();
		unsafe { arena.deallocate(ptr, layout) };
		let again = arena.allocate(layout).expect("freed block is reusable");
		assert_eq!(again, ptr);

		unsafe { arena.deallocate(again, layout) };
		for ptr in blocks {
			unsafe { arena.deallocate(ptr, layout) };
		}
		assert_eq!(arena.used(), 0);
	}

	#[test]
	fn static_region_arena_tracks_free_space() {
		let region: &'static mut [MaybeUninit<u8>] = Box::leak(Box::new_uninit_slice(512));
		let arena = ArenaHeap::from_static(region).unwrap();
		let size = arena.size();
		assert!(size > 0 && size <= 512);
		assert_eq!(arena.free(), size);

		let layout = Layout::from_size_align(64, 8).unwrap();
		let ptr = arena.allocate(layout).unwrap();
		assert_eq!(arena.used() + arena.free(), size);
		assert!(arena.free() <= size - 64);

		unsafe { arena.deallocate(ptr, layout) };
		assert_eq!(arena.free(), size);
	}

	#[test]
	fn arena_restores_interrupt_state() {
		let arena = ArenaHeap::with_capacity(256).unwrap();
		let layout = Layout::new::<u64>();
		let ptr = arena.allocate(layout).unwrap();
		assert!(arch::irqs_enabled());
		unsafe { arena.deallocate(ptr, layout) };
		assert!(arch::irqs_enabled());
	}

	#[test]
	fn tiny_arena_is_rejected() {
		assert!(matches!(
			ArenaHeap::with_capacity(1),
			Err(MqError::InvalidConfig(_))
		));
	}
}
