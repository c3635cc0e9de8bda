//! Packet identifier allocation.
//!
//! Identifiers run 1..=65535 and wrap back to 1, 0 is never handed out.
//! An identifier stays reserved until its outbound exchange finishes, so a
//! retransmission always reuses the id of the original send.

const WORDS: usize = 65536 / 64;

/// Issues identifiers for outbound PUBLISH, SUBSCRIBE and UNSUBSCRIBE.
///
/// Reservations are kept in a 64 Kbit bitmap indexed by id.
#[derive(Debug, Clone)]
pub struct PacketIdAllocator {
    next_id: u16,
    reserved: Box<[u64; WORDS]>,
    count: usize,
}

impl Default for PacketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketIdAllocator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            reserved: Box::new([0; WORDS]),
            count: 0,
        }
    }

    /// Allocate the next unreserved identifier after the last one issued.
    ///
    /// Returns `None` when all 65535 identifiers are reserved.
    pub fn allocate(&mut self) -> Option<u16> {
        if self.count == u16::MAX as usize {
            return None;
        }
        loop {
            let id = self.next_id;
            self.next_id = if id == u16::MAX { 1 } else { id + 1 };
            if self.set(id) {
                return Some(id);
            }
        }
    }

    /// Reserve an identifier carried over from a restored session.
    pub fn reserve(&mut self, id: u16) {
        if id != 0 {
            self.set(id);
        }
    }

    /// Release an identifier once its exchange completes or is abandoned.
    pub fn release(&mut self, id: u16) {
        let (word, bit) = slot(id);
        if self.reserved[word] & bit != 0 {
            self.reserved[word] &= !bit;
            self.count -= 1;
        }
    }

    pub fn is_in_use(&self, id: u16) -> bool {
        let (word, bit) = slot(id);
        self.reserved[word] & bit != 0
    }

    pub fn in_use_count(&self) -> usize {
        self.count
    }

    /// Drop every reservation and start again from 1.
    pub fn clear(&mut self) {
        self.reserved.fill(0);
        self.count = 0;
        self.next_id = 1;
    }

    /// Mark `id` reserved. Returns false if it already was.
    fn set(&mut self, id: u16) -> bool {
        let (word, bit) = slot(id);
        if self.reserved[word] & bit != 0 {
            return false;
        }
        self.reserved[word] |= bit;
        self.count += 1;
        true
    }
}

fn slot(id: u16) -> (usize, u64) {
    (id as usize / 64, 1u64 << (id % 64))
}
