use std::collections::VecDeque;

use crate::body::Element;

/// Stanzas waiting for a held connection, oldest first.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    stanzas: VecDeque<Element>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, stanza: Element) {
        self.stanzas.push_back(stanza);
    }

    pub fn extend(&mut self, stanzas: impl IntoIterator<Item = Element>) {
        self.stanzas.extend(stanzas);
    }

    /// Removes up to `max` stanzas from the front.
    pub fn drain_batch(&mut self, max: usize) -> Vec<Element> {
        let count = max.min(self.stanzas.len());
        self.stanzas.drain(..count).collect()
    }

    pub fn drain_all(&mut self) -> Vec<Element> {
        self.stanzas.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.stanzas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stanzas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stanza(id: &str) -> Element {
        Element::new("message").with_attr("id", id)
    }

    #[test]
    fn batches_preserve_fifo_order() {
        let mut queue = OutboundQueue::new();
        queue.extend(["1", "2", "3"].map(stanza));

        let first = queue.drain_batch(2);
        let ids: Vec<_> = first.iter().map(|s| s.attr("id")).collect();
        assert_eq!(ids, [Some("1"), Some("2")]);
        let second = queue.drain_batch(2);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].attr("id"), Some("3"));
        assert!(queue.is_empty());
        assert!(queue.drain_batch(2).is_empty());
    }
}
