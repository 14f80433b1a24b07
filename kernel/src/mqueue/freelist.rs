//! Intrusive FIFO free list of descriptors.
//!
//! Links run through [`MqMsg::next`]; the list itself is two pointers and a
//! count, so pushing and popping never allocate and are safe in interrupt
//! context. Pushing moves ownership of a descriptor into the list and popping
//! moves it back out. Release appends to the tail and acquire pops the head,
//! so descriptors are reused oldest-first and wear evenly.

use core::ptr::NonNull;

use super::msg::{AllocType, MqMsg};

pub(super) struct FreeList {
    head: Option<NonNull<MqMsg>>,
    tail: Option<NonNull<MqMsg>>,
    len: usize,
    /// Tag every member must carry.
    kind: AllocType,
}

// SAFETY: members are owned by the list; it is only reached under the pool
// lock.
unsafe impl Send for FreeList {}

impl FreeList {
    pub(super) const fn new(kind: AllocType) -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            kind,
        }
    }

    pub(super) fn kind(&self) -> AllocType {
        self.kind
    }

    pub(super) fn len(&self) -> usize {
        self.len
    }

    /// Appends a descriptor at the tail.
    ///
    /// # Safety
    /// `msg` must be a valid descriptor owned by the caller and not already a
    /// member of any list. Ownership passes to the list.
    pub(super) unsafe fn push_back(&mut self, mut msg: NonNull<MqMsg>) {
        // SAFETY: caller transfers exclusive ownership.
        unsafe { msg.as_mut().next = None };
        match self.tail {
            // SAFETY: `tail` is a member, owned by the list.
            Some(mut tail) => unsafe { tail.as_mut().next = Some(msg) },
            None => self.head = Some(msg),
        }
        self.tail = Some(msg);
        self.len += 1;
    }

    /// Detaches the head. Ownership passes to the caller.
    pub(super) fn pop_front(&mut self) -> Option<NonNull<MqMsg>> {
        let mut msg = self.head?;
        // SAFETY: `head` is a member, owned by the list.
        let next = unsafe { msg.as_mut().next.take() };
        self.head = next;
        if next.is_none() {
            self.tail = None;
        }
        self.len -= 1;
        Some(msg)
    }

    /// Walks the members head to tail.
    ///
    /// Stops after `limit` steps so a list corrupted into a cycle cannot hang
    /// the walker; the caller detects the overrun by counting.
    pub(super) fn iter(&self, limit: usize) -> impl Iterator<Item = NonNull<MqMsg>> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let msg = cursor?;
            // SAFETY: members stay valid while the list is borrowed.
            cursor = unsafe { msg.as_ref().next };
            Some(msg)
        })
        .take(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(n: usize) -> Vec<MqMsg> {
        (0..n).map(|_| MqMsg::new(AllocType::Fixed)).collect()
    }

    #[test]
    fn pops_in_push_order() {
        let mut storage = slots(3);
        let ptrs: Vec<_> = storage.iter_mut().map(NonNull::from).collect();
        let mut list = FreeList::new(AllocType::Fixed);

        for &ptr in &ptrs {
            unsafe { list.push_back(ptr) };
        }
        assert_eq!(list.len(), 3);
        assert_eq!(list.iter(10).collect::<Vec<_>>(), ptrs);

        for &ptr in &ptrs {
            assert_eq!(list.pop_front(), Some(ptr));
        }
        assert_eq!(list.pop_front(), None);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn refills_after_draining() {
        let mut storage = slots(2);
        let a = NonNull::from(&mut storage[0]);
        let b = NonNull::from(&mut storage[1]);
        let mut list = FreeList::new(AllocType::Fixed);

        unsafe { list.push_back(a) };
        assert_eq!(list.pop_front(), Some(a));
        unsafe { list.push_back(b) };
        unsafe { list.push_back(a) };
        assert_eq!(list.pop_front(), Some(b));
        assert_eq!(list.pop_front(), Some(a));
        assert!(list.pop_front().is_none());
    }

    #[test]
    fn iter_is_bounded_on_cycles() {
        let mut storage = slots(1);
        let a = NonNull::from(&mut storage[0]);
        let mut list = FreeList::new(AllocType::Fixed);
        unsafe {
            list.push_back(a);
            // A double release links the tail to itself.
            list.push_back(a);
        }
        assert_eq!(list.iter(5).count(), 5);
    }
}
