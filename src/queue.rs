//! Ordered event index
//!
//! Held events live in a single arena keyed by event id. Each event carries
//! two independent pairs of links, one per [`Lane`], so the same event can
//! sit in the global arrival queue and in its location's queue at once.
//! An [`EventQueue`] only touches the link pair of its own lane, which gives
//! O(1) enqueue, dequeue and removal from any position in either queue.
//!
//! ```text
//!  Time lane:      [0] ⇄ [1] ⇄ [2] ⇄ [3]
//!  Location lane:  a: [0] ⇄ [2]      b: [1] ⇄ [3]
//! ```

use std::collections::HashMap;
use std::fmt::Write as _;

/// Identifier of a held event; doubles as its global arrival rank
pub type EventId = u64;

/// Arena holding every event that is linked into a queue
pub type Arena<T> = HashMap<EventId, T>;

/// Which ordering a queue maintains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Global arrival order
    Time,
    /// Arrival order within one location
    Location,
}

impl Lane {
    pub fn name(&self) -> &'static str {
        match self {
            Lane::Time => "Time",
            Lane::Location => "Location",
        }
    }

    fn slot(&self) -> usize {
        match self {
            Lane::Time => 0,
            Lane::Location => 1,
        }
    }
}

/// Neighbour links within one lane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Links {
    pub prev: Option<EventId>,
    pub next: Option<EventId>,
}

/// Both link pairs of an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneLinks([Links; 2]);

impl LaneLinks {
    pub fn get(&self, lane: Lane) -> &Links {
        &self.0[lane.slot()]
    }

    pub fn get_mut(&mut self, lane: Lane) -> &mut Links {
        &mut self.0[lane.slot()]
    }
}

/// An arena entry that can be linked into queues
pub trait Linked {
    fn id(&self) -> EventId;
    fn links(&self) -> &LaneLinks;
    fn links_mut(&mut self) -> &mut LaneLinks;
}

/// Doubly-linked queue over one lane of an arena
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQueue {
    lane: Lane,
    head: Option<EventId>,
    tail: Option<EventId>,
    len: usize,
}

impl EventQueue {
    pub fn new(lane: Lane) -> Self {
        Self {
            lane,
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Id at the head without removing it
    pub fn peek_head(&self) -> Option<EventId> {
        self.head
    }

    pub fn tail(&self) -> Option<EventId> {
        self.tail
    }

    /// Append an arena entry at the tail.
    ///
    /// Returns false (and does nothing) if `id` is not in the arena.
    pub fn enqueue<T: Linked>(&mut self, arena: &mut Arena<T>, id: EventId) -> bool {
        let lane = self.lane;
        let prev_tail = self.tail;
        match arena.get_mut(&id) {
            Some(entry) => {
                *entry.links_mut().get_mut(lane) = Links {
                    prev: prev_tail,
                    next: None,
                };
            }
            None => return false,
        }
        match prev_tail.and_then(|t| arena.get_mut(&t)) {
            Some(tail) => tail.links_mut().get_mut(lane).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
        true
    }

    /// Unlink and return the head id
    pub fn dequeue_head<T: Linked>(&mut self, arena: &mut Arena<T>) -> Option<EventId> {
        let head = self.head?;
        self.remove(arena, head);
        Some(head)
    }

    /// Unlink an entry from anywhere in this queue.
    ///
    /// Its links in the other lane are left untouched. Returns false if `id`
    /// is not in the arena or is not linked into this lane.
    pub fn remove<T: Linked>(&mut self, arena: &mut Arena<T>, id: EventId) -> bool {
        let lane = self.lane;
        let Some(prev) = arena.get(&id).map(|entry| entry.links().get(lane).prev) else {
            return false;
        };
        let linked = match prev {
            Some(p) => arena
                .get(&p)
                .is_some_and(|entry| entry.links().get(lane).next == Some(id)),
            None => self.head == Some(id),
        };
        if !linked {
            return false;
        }
        let links = match arena.get_mut(&id) {
            Some(entry) => std::mem::take(entry.links_mut().get_mut(lane)),
            None => return false,
        };

        match links.prev.and_then(|p| arena.get_mut(&p)) {
            Some(prev) => prev.links_mut().get_mut(lane).next = links.next,
            None => self.head = links.next,
        }
        match links.next.and_then(|n| arena.get_mut(&n)) {
            Some(next) => next.links_mut().get_mut(lane).prev = links.prev,
            None => self.tail = links.prev,
        }
        self.len = self.len.saturating_sub(1);
        true
    }

    /// Linear scan in arrival order
    pub fn find_by_id<'a, T: Linked>(&self, arena: &'a Arena<T>, id: EventId) -> Option<&'a T> {
        self.iter(arena).find(|entry| entry.id() == id)
    }

    /// Walk the queue in arrival order.
    ///
    /// The iterator follows live links; each call starts again from the head.
    pub fn iter<'a, T: Linked>(&self, arena: &'a Arena<T>) -> Iter<'a, T> {
        Iter {
            arena,
            lane: self.lane,
            cursor: self.head,
        }
    }

    /// Ids in arrival order
    pub fn ids<T: Linked>(&self, arena: &Arena<T>) -> Vec<EventId> {
        self.iter(arena).map(Linked::id).collect()
    }

    /// Human-readable dump of the queue
    pub fn dump<T: Linked>(&self, arena: &Arena<T>) -> String {
        let mut out = format!("MessageQueue {} [{}]\n", self.lane.name(), self.len);
        let _ = writeln!(out, "  head: {}", fmt_id(self.head));
        let _ = writeln!(out, "  tail: {}", fmt_id(self.tail));
        let list = self
            .ids(arena)
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(" > ");
        let _ = write!(out, "  list: {}", list);
        out
    }
}

fn fmt_id(id: Option<EventId>) -> String {
    id.map(|i| i.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Arrival-order iterator over one queue
pub struct Iter<'a, T> {
    arena: &'a Arena<T>,
    lane: Lane,
    cursor: Option<EventId>,
}

impl<'a, T: Linked> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.arena.get(&self.cursor?)?;
        self.cursor = entry.links().get(self.lane).next;
        Some(entry)
    }
}
