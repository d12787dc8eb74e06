use std::collections::VecDeque;
use std::fmt;

/// Session-local id of a held connection, handed back to the transport so
/// it can report a client disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug)]
pub struct HeldConnection<C> {
    pub id: ConnectionId,
    pub rid: Option<i64>,
    pub connection: C,
}

/// Connections held open for a session, oldest first.
#[derive(Debug)]
pub struct ConnectionPool<C> {
    held: VecDeque<HeldConnection<C>>,
}

impl<C> Default for ConnectionPool<C> {
    fn default() -> Self {
        Self {
            held: VecDeque::new(),
        }
    }
}

impl<C> ConnectionPool<C> {
    pub fn push(&mut self, held: HeldConnection<C>) {
        self.held.push_back(held);
    }

    pub fn pop_oldest(&mut self) -> Option<HeldConnection<C>> {
        self.held.pop_front()
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<HeldConnection<C>> {
        let idx = self.held.iter().position(|held| held.id == id)?;
        self.held.remove(idx)
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}
