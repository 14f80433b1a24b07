//! Message descriptors and the handle that owns one.
//!
//! A descriptor carries one queued message: priority, length and an inline
//! payload, plus the link used while it sits on a free list and the tag that
//! records which pool it was drawn from.  The tag is stored as a raw byte and
//! is the only thing release trusts; a byte that decodes to no [`AllocType`]
//! means the descriptor memory has been overwritten.

use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use crate::config::CONFIG_MQ_MAXMSGSIZE;
use crate::error::{MqError, Result};

/// Inline payload capacity of a descriptor.
pub const MQ_MAX_BYTES: usize = CONFIG_MQ_MAXMSGSIZE;

/// Where a descriptor came from, and therefore where release sends it.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocType {
    /// Pre-allocated, for task-context senders.
    Fixed = 0,
    /// Pre-allocated, reserved for interrupt handlers.
    Irq = 1,
    /// Taken from the kernel heap after the fixed pool ran dry.
    Dynamic = 2,
}

impl AllocType {
    /// Decodes a stored tag. `None` means the descriptor is corrupt.
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Fixed),
            1 => Some(Self::Irq),
            2 => Some(Self::Dynamic),
            _ => None,
        }
    }

    pub const fn as_raw(self) -> u8 {
        self as u8
    }
}

/// One message descriptor.
#[repr(C)]
pub struct MqMsg {
    /// Free-list link. Only meaningful while the descriptor is on a list.
    pub(super) next: Option<NonNull<MqMsg>>,
    /// Raw [`AllocType`], stamped when the descriptor is produced.
    pub(super) alloc_type: u8,
    priority: u8,
    msglen: u16,
    mail: [u8; MQ_MAX_BYTES],
}

impl MqMsg {
    pub(super) const fn new(alloc_type: AllocType) -> Self {
        Self {
            next: None,
            alloc_type: alloc_type.as_raw(),
            priority: 0,
            msglen: 0,
            mail: [0; MQ_MAX_BYTES],
        }
    }

    /// The pool this descriptor belongs to, or `None` if the tag is corrupt.
    pub fn alloc_type(&self) -> Option<AllocType> {
        AllocType::from_raw(self.alloc_type)
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    /// The valid part of the inline buffer.
    pub fn payload(&self) -> &[u8] {
        &self.mail[..usize::from(self.msglen)]
    }

    pub fn len(&self) -> usize {
        usize::from(self.msglen)
    }

    pub fn is_empty(&self) -> bool {
        self.msglen == 0
    }

    /// Copies `data` into the descriptor.
    ///
    /// Fails without touching the descriptor if `data` does not fit.
    pub fn set_payload(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MQ_MAX_BYTES {
            return Err(MqError::MessageTooLong {
                len: data.len(),
                max: MQ_MAX_BYTES,
            });
        }
        self.mail[..data.len()].copy_from_slice(data);
        // MQ_MAX_BYTES fits a u16 (checked in config).
        self.msglen = data.len() as u16;
        Ok(())
    }

    /// Resets priority and payload; the tag is left alone.
    pub fn clear(&mut self) {
        self.priority = 0;
        self.msglen = 0;
    }
}

impl fmt::Debug for MqMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqMsg")
            .field("alloc_type", &self.alloc_type())
            .field("priority", &self.priority)
            .field("len", &self.msglen)
            .finish()
    }
}

/// Exclusive ownership of one descriptor, handed out by
/// [`MsgPool::alloc_msg`](super::MsgPool::alloc_msg).
///
/// The handle must go back through
/// [`MsgPool::free_msg`](super::MsgPool::free_msg) exactly once.  Dropping
/// it instead leaks the descriptor: a pooled one is gone from its pool until
/// reboot, a dynamic one is never returned to the heap.
#[must_use = "a descriptor taken from the pool must be released with free_msg"]
pub struct MsgBox<'pool> {
    ptr: NonNull<MqMsg>,
    /// Address of the issuing pool. The borrow below pins the pool there.
    origin: NonNull<()>,
    _pool: PhantomData<&'pool mut MqMsg>,
}

// SAFETY: the handle is the only path to its descriptor, so moving it to
// another core (e.g. from a sender to the queue consumer) moves the access.
unsafe impl Send for MsgBox<'_> {}
unsafe impl Sync for MsgBox<'_> {}

impl MsgBox<'_> {
    /// # Safety
    /// `ptr` must point to an initialized descriptor that nothing else
    /// references, valid for the chosen lifetime, and `origin` must be the
    /// address of the pool that handed it out.
    pub(super) unsafe fn from_raw(ptr: NonNull<MqMsg>, origin: NonNull<()>) -> Self {
        Self {
            ptr,
            origin,
            _pool: PhantomData,
        }
    }

    pub(super) fn origin(&self) -> NonNull<()> {
        self.origin
    }

    /// Gives up the handle without releasing the descriptor.
    pub(super) fn into_raw(self) -> NonNull<MqMsg> {
        self.ptr
    }

    /// Address of the descriptor, for identity checks.
    pub fn as_ptr(&self) -> *const MqMsg {
        self.ptr.as_ptr()
    }
}

impl Deref for MsgBox<'_> {
    type Target = MqMsg;

    fn deref(&self) -> &MqMsg {
        // SAFETY: the handle owns the descriptor exclusively.
        unsafe { self.ptr.as_ref() }
    }
}

impl DerefMut for MsgBox<'_> {
    fn deref_mut(&mut self) -> &mut MqMsg {
        // SAFETY: the handle owns the descriptor exclusively.
        unsafe { self.ptr.as_mut() }
    }
}

impl fmt::Debug for MsgBox<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MsgBox").field(&**self).finish()
    }
}
