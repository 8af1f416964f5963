use crate::types::CellIndex;

use super::handlers::{HandlerIndex, HandlerSet};

/// Dedup FIFO of handlers awaiting execution.
///
/// Implemented as an intrusive singly-linked list embedded in an array
/// indexed by handler id, so insert and pop are O(1) with no allocation.
/// Exclusion enforcers jump the queue: they produce the cheapest
/// eliminations, so they run before ordinary handlers.
pub struct HandlerAccumulator {
    ordinary_by_cell: Vec<Vec<HandlerIndex>>,
    aux_by_cell: Vec<Vec<HandlerIndex>>,
    exclusion_by_cell: Vec<Option<HandlerIndex>>,
    linked_list: IndexLinkedList,
}

impl HandlerAccumulator {
    pub fn new(num_cells: usize, handler_set: &HandlerSet) -> HandlerAccumulator {
        let mut ordinary_by_cell = vec![Vec::new(); num_cells];
        for &index in handler_set.ordinary_handlers() {
            for &cell in handler_set.handler(index).cells() {
                ordinary_by_cell[cell].push(index);
            }
        }

        let mut aux_by_cell = vec![Vec::new(); num_cells];
        for &index in handler_set.aux_handlers() {
            for &cell in handler_set.handler(index).cells() {
                aux_by_cell[cell].push(index);
            }
        }

        HandlerAccumulator {
            ordinary_by_cell,
            aux_by_cell,
            exclusion_by_cell: handler_set.exclusion_by_cell().to_vec(),
            linked_list: IndexLinkedList::new(handler_set.len()),
        }
    }

    /// Queue every ordinary handler covering `cell`.
    pub fn add_for_cell(&mut self, cell: CellIndex) {
        for &handler_index in &self.ordinary_by_cell[cell] {
            self.linked_list.push_back(handler_index);
        }
    }

    /// Queue the auxiliary handlers attached to `cell`. Only called when
    /// `cell` has just become fixed and the grid is still incomplete.
    pub fn add_aux_for_cell(&mut self, cell: CellIndex) {
        for &handler_index in &self.aux_by_cell[cell] {
            self.linked_list.push_back(handler_index);
        }
    }

    /// Queue the exclusion enforcer for a just-fixed cell at the head of
    /// the queue.
    pub fn add_for_fixed_cell(&mut self, cell: CellIndex) {
        if let Some(handler_index) = self.exclusion_by_cell[cell] {
            self.linked_list.push_front(handler_index);
        }
    }

    pub fn take_next(&mut self) -> Option<HandlerIndex> {
        self.linked_list.pop()
    }

    /// Park `index` so it cannot re-queue itself while it runs.
    pub fn hold(&mut self, index: HandlerIndex) {
        self.linked_list.hold(index)
    }

    pub fn clear_hold(&mut self) {
        self.linked_list.clear_hold()
    }

    pub fn clear(&mut self) {
        self.linked_list.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.linked_list.is_empty()
    }
}

struct IndexLinkedList {
    linked_list: Vec<usize>,
    head: usize,
    tail: usize,
    hold: usize,
}

impl IndexLinkedList {
    const NOT_IN_LIST: usize = usize::MAX;
    const NIL: usize = usize::MAX - 1;

    fn new(size: usize) -> IndexLinkedList {
        IndexLinkedList {
            linked_list: vec![Self::NOT_IN_LIST; size],
            head: Self::NIL,
            tail: Self::NIL,
            hold: Self::NIL,
        }
    }

    fn push_back(&mut self, index: usize) {
        if self.linked_list[index] != Self::NOT_IN_LIST {
            return;
        }
        self.linked_list[index] = Self::NIL;
        if self.tail == Self::NIL {
            self.head = index;
        } else {
            self.linked_list[self.tail] = index;
        }
        self.tail = index;
    }

    fn push_front(&mut self, index: usize) {
        if self.linked_list[index] != Self::NOT_IN_LIST {
            return;
        }
        self.linked_list[index] = self.head;
        self.head = index;
        if self.tail == Self::NIL {
            self.tail = index;
        }
    }

    fn pop(&mut self) -> Option<usize> {
        match self.head {
            Self::NIL => None,
            index => {
                self.head = self.linked_list[index];
                if self.head == Self::NIL {
                    self.tail = Self::NIL;
                }
                self.linked_list[index] = Self::NOT_IN_LIST;
                Some(index)
            }
        }
    }

    fn hold(&mut self, index: usize) {
        if self.linked_list[index] == Self::NOT_IN_LIST {
            self.linked_list[index] = self.hold;
            self.hold = index;
        }
    }

    fn clear_hold(&mut self) {
        while self.hold != Self::NIL {
            let new_hold = self.linked_list[self.hold];
            self.linked_list[self.hold] = Self::NOT_IN_LIST;
            self.hold = new_hold;
        }
    }

    fn clear(&mut self) {
        while self.head != Self::NIL {
            let new_head = self.linked_list[self.head];
            self.linked_list[self.head] = Self::NOT_IN_LIST;
            self.head = new_head;
        }
        self.tail = Self::NIL;
        self.clear_hold();
    }

    fn is_empty(&self) -> bool {
        self.head == Self::NIL
    }
}
