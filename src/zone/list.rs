//! Intrusive zone lists (C3).
//!
//! Zones are linked by array index through the `prev`/`next` fields of
//! their records; the four list heads live in the metadata header. All
//! operations are methods on the store that owns the zone array, so links
//! and heads can never be mutated through two paths at once.
//!
//! Link encoding: `NIL` terminates a list; a zone with `prev == next == 0`
//! is in no list at all. The encoding is unambiguous because a linked zone
//! adjacent to zone 0 always keeps at least one non-zero field (zone 0
//! cannot appear twice in one list).

use tracing::error;

use crate::meta::layout::{ListId, ListRec, NIL};
use crate::meta::MetaStore;
use crate::zone::ZoneCond;

impl MetaStore {
    /// First zone of a list.
    pub fn list_head(&self, id: ListId) -> Option<u32> {
        let rec = self.list(id);
        (rec.head != NIL).then_some(rec.head)
    }

    /// Successor of `zi` within its list.
    pub fn list_next(&self, zi: u32) -> Option<u32> {
        let next = self.zone(zi).next;
        (next != NIL).then_some(next)
    }

    /// Collect a whole list in head-to-tail order.
    pub fn list_collect(&self, id: ListId) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.list(id).size as usize);
        let mut cur = self.list_head(id);
        while let Some(zi) = cur {
            out.push(zi);
            cur = self.list_next(zi);
        }
        out
    }

    pub fn list_push_head(&mut self, id: ListId, zi: u32) {
        let mut rec = self.list(id);
        if rec.is_empty() {
            self.link_sole(&mut rec, zi);
        } else {
            let old = rec.head;
            self.zone_mut(old).prev = zi;
            let z = self.zone_mut(zi);
            z.prev = NIL;
            z.next = old;
            rec.head = zi;
            rec.size += 1;
        }
        self.set_list(id, rec);
    }

    pub fn list_push_tail(&mut self, id: ListId, zi: u32) {
        let mut rec = self.list(id);
        if rec.is_empty() {
            self.link_sole(&mut rec, zi);
        } else {
            let old = rec.tail;
            self.zone_mut(old).next = zi;
            let z = self.zone_mut(zi);
            z.prev = old;
            z.next = NIL;
            rec.tail = zi;
            rec.size += 1;
        }
        self.set_list(id, rec);
    }

    fn link_sole(&mut self, rec: &mut ListRec, zi: u32) {
        let z = self.zone_mut(zi);
        z.prev = NIL;
        z.next = NIL;
        rec.head = zi;
        rec.tail = zi;
        rec.size = 1;
    }

    /// Remove `zi` from list `id` and restore the unlinked `(0, 0)` marker.
    pub fn list_remove(&mut self, id: ListId, zi: u32) {
        let mut rec = self.list(id);
        let (prev, next) = {
            let z = self.zone(zi);
            (z.prev, z.next)
        };
        rec.size -= 1;
        if rec.size == 0 {
            rec.head = NIL;
            rec.tail = NIL;
        } else if rec.head == zi {
            rec.head = next;
            self.zone_mut(next).prev = NIL;
        } else if rec.tail == zi {
            rec.tail = prev;
            self.zone_mut(prev).next = NIL;
        } else {
            self.zone_mut(prev).next = next;
            self.zone_mut(next).prev = prev;
        }
        self.zone_mut(zi).clear_links();
        self.set_list(id, rec);
    }

    /// List a zone belongs to according to its condition, if any.
    pub fn list_for_cond(cond: ZoneCond, seq_capable: bool) -> Option<ListId> {
        match cond {
            ZoneCond::ImpOpen => Some(ListId::ImpOpen),
            ZoneCond::ExpOpen => Some(ListId::ExpOpen),
            ZoneCond::Closed => Some(ListId::Closed),
            ZoneCond::Empty | ZoneCond::Full if seq_capable => Some(ListId::SeqActive),
            _ => None,
        }
    }

    /// Unlink a zone from whichever list its condition places it in.
    ///
    /// Calling this for a `NotWP`/`Inactive`/`ReadOnly`/`Offline` zone is a
    /// state-machine bug; it is logged and ignored.
    pub fn unlink_by_condition(&mut self, zi: u32) {
        let (cond, seq_capable) = {
            let z = self.zone(zi);
            (z.condition(), z.zone_type().has_wp())
        };
        match Self::list_for_cond(cond, seq_capable) {
            Some(id) => self.list_remove(id, zi),
            None => {
                error!(zone = zi, cond = ?cond, "unlink of a zone that is in no list");
            }
        }
    }
}
