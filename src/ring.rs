//! Bounded circular buffer of pending connect requests.
//!
//! Owned by the dispatcher loop only, so no synchronization lives here.

use crate::protocol::ConnectRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

pub struct WaitQueue {
    slots: Vec<Option<ConnectRequest>>,
    head: usize,
    len: usize,
}

impl WaitQueue {
    pub fn new(capacity: usize) -> Self {
        WaitQueue {
            slots: vec![None; capacity],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn index(&self, offset: usize) -> usize {
        (self.head + offset) % self.slots.len()
    }

    pub fn push(&mut self, request: ConnectRequest) -> Result<(), QueueFull> {
        if self.len == self.slots.len() {
            return Err(QueueFull);
        }
        let tail = self.index(self.len);
        self.slots[tail] = Some(request);
        self.len += 1;
        Ok(())
    }

    /// Oldest pending request.
    pub fn pop(&mut self) -> Option<ConnectRequest> {
        if self.len == 0 {
            return None;
        }
        let request = self.slots[self.head].take();
        self.head = self.index(1);
        self.len -= 1;
        request
    }

    /// Drops the entry of `pid`, keeping the order of everyone else.
    pub fn remove(&mut self, pid: u32) -> Option<ConnectRequest> {
        let position = self.iter().position(|req| req.pid == pid)?;
        let at = self.index(position);
        let removed = self.slots[at].take();
        for offset in position..self.len - 1 {
            let from = self.index(offset + 1);
            let next = self.slots[from].take();
            let at = self.index(offset);
            self.slots[at] = next;
        }
        self.len -= 1;
        removed
    }

    /// Empties the queue, oldest first.
    pub fn drain(&mut self) -> Vec<ConnectRequest> {
        std::iter::from_fn(|| self.pop()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectRequest> + '_ {
        (0..self.len).filter_map(move |offset| self.slots[self.index(offset)].as_ref())
    }
}
