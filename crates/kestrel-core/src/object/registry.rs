//! Object registry
//!
//! Owns every object header. Headers live in a generational slot map; the
//! registry threads two disjoint lists through them:
//!
//! ```text
//! live:     head ⇄ obj ⇄ obj ⇄ obj        (doubly linked, O(1) unlink)
//! pending:  head ⇄ obj ⇄ obj              (doubly linked, detached as a batch)
//! ```
//!
//! Callers never touch the links directly; they insert, move between lists,
//! remove and iterate through snapshots.

use super::{ObjectHeader, ObjectId};

/// Which registry list an object is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMembership {
    /// On the live list
    Live,
    /// Waiting for deferred destruction
    Pending,
    /// On neither list (transiently, while being moved)
    Detached,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Link {
    prev: Option<u32>,
    next: Option<u32>,
    list: ListMembership,
}

impl Link {
    pub(crate) fn detached() -> Self {
        Self {
            prev: None,
            next: None,
            list: ListMembership::Detached,
        }
    }
}

struct Slot {
    generation: u32,
    header: Option<ObjectHeader>,
}

/// Registry of all object headers
pub struct ObjectRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live_head: Option<u32>,
    live_len: usize,
    pending_head: Option<u32>,
    pending_len: usize,
}

impl ObjectRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live_head: None,
            live_len: 0,
            pending_head: None,
            pending_len: 0,
        }
    }

    // ========================================================================
    // Headers
    // ========================================================================

    /// Insert a header and link it on the live list
    pub fn insert(&mut self, mut header: ObjectHeader) -> ObjectId {
        header.link = Link::detached();
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].header = Some(header);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    header: Some(header),
                });
                (self.slots.len() - 1) as u32
            }
        };
        let id = ObjectId::new(index, self.slots[index as usize].generation);
        self.link_live(id);
        id
    }

    /// Unlink and drop a header
    ///
    /// The slot's generation is bumped so `id` never resolves again.
    pub fn remove(&mut self, id: ObjectId) -> Option<ObjectHeader> {
        if !self.contains(id) {
            return None;
        }
        self.unlink(id);
        let slot = &mut self.slots[id.index() as usize];
        let header = slot.header.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());
        header
    }

    /// Check whether `id` resolves to a header
    #[inline]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    /// Borrow a header
    pub fn get(&self, id: ObjectId) -> Option<&ObjectHeader> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.header.as_ref()
    }

    /// Mutably borrow a header
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut ObjectHeader> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.header.as_mut()
    }

    /// List membership of a header
    pub fn membership(&self, id: ObjectId) -> Option<ListMembership> {
        self.get(id).map(|header| header.link.list)
    }

    /// Number of headers on either list or detached
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Check whether no headers exist
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // Lists
    // ========================================================================

    /// Number of live-list members
    #[inline]
    pub fn live_len(&self) -> usize {
        self.live_len
    }

    /// Number of pending-list members
    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending_len
    }

    /// Link a detached header at the head of the live list
    pub fn link_live(&mut self, id: ObjectId) {
        if self.membership(id) != Some(ListMembership::Detached) {
            return;
        }
        let index = id.index();
        let old_head = self.live_head;
        if let Some(head) = old_head {
            if let Some(header) = self.slots[head as usize].header.as_mut() {
                header.link.prev = Some(index);
            }
        }
        if let Some(header) = self.slots[index as usize].header.as_mut() {
            header.link = Link {
                prev: None,
                next: old_head,
                list: ListMembership::Live,
            };
        }
        self.live_head = Some(index);
        self.live_len += 1;
    }

    /// Push a detached header onto the pending list
    pub fn push_pending(&mut self, id: ObjectId) {
        if self.membership(id) != Some(ListMembership::Detached) {
            return;
        }
        let index = id.index();
        if let Some(head) = self.pending_head {
            if let Some(header) = self.slots[head as usize].header.as_mut() {
                header.link.prev = Some(index);
            }
        }
        if let Some(header) = self.slots[index as usize].header.as_mut() {
            header.link = Link {
                prev: None,
                next: self.pending_head,
                list: ListMembership::Pending,
            };
        }
        self.pending_head = Some(index);
        self.pending_len += 1;
    }

    /// Take a header off whichever list it is on
    pub fn unlink(&mut self, id: ObjectId) {
        let Some(link) = self.get(id).map(|header| header.link) else {
            return;
        };
        match link.list {
            ListMembership::Detached => return,
            ListMembership::Live => {
                match link.prev {
                    Some(prev) => self.set_next(prev, link.next),
                    None => self.live_head = link.next,
                }
                self.set_prev(link.next, link.prev);
                self.live_len -= 1;
            }
            ListMembership::Pending => {
                match link.prev {
                    Some(prev) => self.set_next(prev, link.next),
                    None => self.pending_head = link.next,
                }
                self.set_prev(link.next, link.prev);
                self.pending_len -= 1;
            }
        }
        if let Some(header) = self.get_mut(id) {
            header.link = Link::detached();
        }
    }

    /// Detach the whole pending list
    ///
    /// Every returned object is detached. Objects pushed afterwards start a
    /// fresh list.
    pub fn take_pending(&mut self) -> Vec<ObjectId> {
        let mut batch = Vec::with_capacity(self.pending_len);
        let mut cursor = self.pending_head.take();
        while let Some(index) = cursor {
            let slot = &mut self.slots[index as usize];
            let generation = slot.generation;
            cursor = slot.header.as_mut().and_then(|header| {
                let next = header.link.next;
                header.link = Link::detached();
                next
            });
            batch.push(ObjectId::new(index, generation));
        }
        self.pending_len = 0;
        batch
    }

    /// Snapshot of the live list, head first
    pub fn live_ids(&self) -> Vec<ObjectId> {
        self.walk(self.live_head)
    }

    /// Snapshot of the pending list, head first
    pub fn pending_ids(&self) -> Vec<ObjectId> {
        self.walk(self.pending_head)
    }

    /// Verify list structure
    ///
    /// # Errors
    ///
    /// Returns a description of the first broken link or count.
    pub fn verify_links(&self) -> Result<(), String> {
        let mut prev = None;
        let mut count = 0;
        let mut cursor = self.live_head;
        while let Some(index) = cursor {
            let header = self.slots[index as usize]
                .header
                .as_ref()
                .ok_or_else(|| format!("live list reaches freed slot {}", index))?;
            if header.link.list != ListMembership::Live {
                return Err(format!("slot {} on live list marked {:?}", index, header.link.list));
            }
            if header.link.prev != prev {
                return Err(format!("slot {} has a stale prev link", index));
            }
            count += 1;
            if count > self.live_len {
                return Err("live list longer than its count".to_string());
            }
            prev = Some(index);
            cursor = header.link.next;
        }
        if count != self.live_len {
            return Err(format!("live list has {} members, count says {}", count, self.live_len));
        }
        let mut prev = None;
        let mut count = 0;
        let mut cursor = self.pending_head;
        while let Some(index) = cursor {
            let header = self.slots[index as usize]
                .header
                .as_ref()
                .ok_or_else(|| format!("pending list reaches freed slot {}", index))?;
            if header.link.list != ListMembership::Pending {
                return Err(format!("slot {} on pending list marked {:?}", index, header.link.list));
            }
            if header.link.prev != prev {
                return Err(format!("slot {} has a stale pending prev link", index));
            }
            count += 1;
            if count > self.pending_len {
                return Err("pending list longer than its count".to_string());
            }
            prev = Some(index);
            cursor = header.link.next;
        }
        if count != self.pending_len {
            return Err(format!(
                "pending list has {} members, count says {}",
                count, self.pending_len
            ));
        }
        Ok(())
    }

    fn walk(&self, head: Option<u32>) -> Vec<ObjectId> {
        let mut ids = Vec::new();
        let mut cursor = head;
        while let Some(index) = cursor {
            let slot = &self.slots[index as usize];
            ids.push(ObjectId::new(index, slot.generation));
            cursor = slot.header.as_ref().and_then(|header| header.link.next);
        }
        ids
    }

    fn set_prev(&mut self, index: Option<u32>, prev: Option<u32>) {
        let Some(index) = index else {
            return;
        };
        if let Some(header) = self.slots[index as usize].header.as_mut() {
            header.link.prev = prev;
        }
    }

    fn set_next(&mut self, index: u32, next: Option<u32>) {
        if let Some(header) = self.slots[index as usize].header.as_mut() {
            header.link.next = next;
        }
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}
