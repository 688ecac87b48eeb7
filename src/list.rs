//! Intrusive doubly-linked list of flow indices (design note §9): O(1)
//! head/tail insert and O(1) removal from anywhere, using stable indices
//! into a tin's flow table instead of pointers. The flows themselves are
//! owned by that table; a `FlowList` only describes a relation between
//! them (`ListMembership`, `prev`/`next` fields on `Flow`).

use crate::flow::{Flow, ListMembership};

#[derive(Debug, Clone, Copy, Default)]
pub struct FlowList {
    head: Option<usize>,
    tail: Option<usize>,
}

impl FlowList {
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn front(&self) -> Option<usize> {
        self.head
    }

    pub fn push_back(&mut self, flows: &mut [Flow], idx: usize, membership: ListMembership) {
        debug_assert!(flows[idx].membership == ListMembership::None, "flow already on a list");
        flows[idx].prev = self.tail;
        flows[idx].next = None;
        flows[idx].membership = membership;

        if let Some(tail) = self.tail {
            flows[tail].next = Some(idx);
        } else {
            self.head = Some(idx);
        }
        self.tail = Some(idx);
    }

    /// Removes `idx` from this list, wherever in the list it sits.
    pub fn remove(&mut self, flows: &mut [Flow], idx: usize) {
        let prev = flows[idx].prev;
        let next = flows[idx].next;

        match prev {
            Some(p) => flows[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => flows[n].prev = prev,
            None => self.tail = prev,
        }

        flows[idx].prev = None;
        flows[idx].next = None;
        flows[idx].membership = ListMembership::None;
    }

    /// Pops the head flow off the list (caller is responsible for deciding
    /// what to do with it — re-add to the tail, move to the other list, or
    /// drop it).
    pub fn pop_front(&mut self, flows: &mut [Flow]) -> Option<usize> {
        let idx = self.head?;
        self.remove(flows, idx);
        Some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flows(n: usize) -> Vec<Flow> {
        (0..n).map(Flow::new).collect()
    }

    #[test]
    fn push_back_and_pop_front_is_fifo() {
        let mut fs = flows(4);
        let mut list = FlowList::default();
        list.push_back(&mut fs, 0, ListMembership::New);
        list.push_back(&mut fs, 1, ListMembership::New);
        list.push_back(&mut fs, 2, ListMembership::New);

        assert_eq!(list.pop_front(&mut fs), Some(0));
        assert_eq!(list.pop_front(&mut fs), Some(1));
        assert_eq!(list.pop_front(&mut fs), Some(2));
        assert_eq!(list.pop_front(&mut fs), None);
    }

    #[test]
    fn remove_from_middle_relinks_neighbors() {
        let mut fs = flows(3);
        let mut list = FlowList::default();
        list.push_back(&mut fs, 0, ListMembership::Old);
        list.push_back(&mut fs, 1, ListMembership::Old);
        list.push_back(&mut fs, 2, ListMembership::Old);

        list.remove(&mut fs, 1);
        assert_eq!(fs[1].membership, ListMembership::None);

        assert_eq!(list.pop_front(&mut fs), Some(0));
        assert_eq!(list.pop_front(&mut fs), Some(2));
        assert_eq!(list.pop_front(&mut fs), None);
    }

    #[test]
    fn membership_is_cleared_on_removal() {
        let mut fs = flows(1);
        let mut list = FlowList::default();
        list.push_back(&mut fs, 0, ListMembership::New);
        assert_eq!(fs[0].membership, ListMembership::New);
        list.pop_front(&mut fs);
        assert_eq!(fs[0].membership, ListMembership::None);
    }
}
