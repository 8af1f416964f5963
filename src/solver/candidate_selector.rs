use crate::types::CellIndex;
use crate::value_set::ValueSet;

use super::StepState;

/// What the selector decided for the current node.
///
/// `batch_size` cells starting at `cell_order[cell_depth]` are consumed in
/// this step: the first is the branched cell, the rest are free singletons
/// queued up behind it. `count` is the number of sibling branches at this
/// node; zero means the node is exhausted.
pub struct Selection {
    pub batch_size: usize,
    pub value: ValueSet,
    pub count: usize,
}

#[derive(Copy, Clone)]
struct SelectionState {
    cell: CellIndex,
    value: ValueSet,
}

impl SelectionState {
    const NO_CELL: CellIndex = usize::MAX;

    fn cleared() -> SelectionState {
        SelectionState {
            cell: Self::NO_CELL,
            value: ValueSet::empty(),
        }
    }

    fn is_set(&self) -> bool {
        self.cell != Self::NO_CELL
    }
}

/// Chooses the next branch: either a cell (lowest remaining count weighted
/// by backtrack triggers) or a value inside a house that only two cells
/// can still hold.
pub struct CandidateSelector {
    cell_order: Vec<CellIndex>,
    initial_cell_order: Vec<CellIndex>,
    selection_states: Vec<SelectionState>,
    houses: Vec<Vec<CellIndex>>,
}

impl CandidateSelector {
    pub fn new(num_cells: usize, houses: Vec<Vec<CellIndex>>) -> CandidateSelector {
        let cell_order = (0..num_cells).collect::<Vec<_>>();
        CandidateSelector {
            initial_cell_order: cell_order.clone(),
            cell_order,
            selection_states: vec![SelectionState::cleared(); num_cells + 1],
            houses,
        }
    }

    /// Install a custom initial ordering (e.g. a shuffled one).
    pub fn set_initial_cell_order(&mut self, cell_order: Vec<CellIndex>) {
        assert_eq!(cell_order.len(), self.cell_order.len());
        self.initial_cell_order = cell_order;
    }

    pub fn cell_order(&self) -> &[CellIndex] {
        &self.cell_order
    }

    /// Restore the order and forget pending branches, so runs over the
    /// same layout replay identically.
    pub fn reset(&mut self) {
        self.cell_order.copy_from_slice(&self.initial_cell_order);
        self.selection_states.fill(SelectionState::cleared());
    }

    pub fn select_next_candidate(
        &mut self,
        cell_depth: usize,
        grid: &[ValueSet],
        backtrack_triggers: &[u32],
        step_state: Option<&StepState>,
        is_new_node: bool,
    ) -> Selection {
        let num_cells = self.cell_order.len();
        debug_assert!(cell_depth < num_cells);

        if is_new_node {
            self.selection_states[cell_depth] = SelectionState::cleared();
        } else if self.selection_states[cell_depth].is_set() {
            // Second arm of a house-value branch: the recorded cell now
            // takes the contested value, as a forced singleton.
            let state = self.selection_states[cell_depth];
            self.selection_states[cell_depth] = SelectionState::cleared();

            let pos = (cell_depth..num_cells)
                .find(|&i| self.cell_order[i] == state.cell)
                .expect("pending branch cell left the search window");
            self.cell_order.swap(cell_depth, pos);

            let batch_size = self.gather_singletons(cell_depth, grid);
            let selection = Selection {
                batch_size,
                value: state.value,
                count: 1,
            };
            return self.adjust_for_step_guide(selection, cell_depth, grid, step_state);
        }

        // Fast path: the cell in place is already decided.
        let cell = self.cell_order[cell_depth];
        let values = grid[cell];
        if !values.has_multiple() {
            if values.is_empty() {
                return Selection {
                    batch_size: 1,
                    value: values,
                    count: 0,
                };
            }
            let batch_size = self.gather_singletons(cell_depth, grid);
            let selection = Selection {
                batch_size,
                value: values,
                count: 1,
            };
            return self.adjust_for_step_guide(selection, cell_depth, grid, step_state);
        }

        if !is_new_node {
            // A revisit stays committed to the cell chosen on first entry;
            // only the untried values remain in its mask.
            let selection = Selection {
                batch_size: 1,
                value: values.min(),
                count: values.count(),
            };
            return self.adjust_for_step_guide(selection, cell_depth, grid, step_state);
        }

        // Scan for the best cell: maximise triggers per remaining value.
        let mut best_index = cell_depth;
        let mut best_score = -1.0f64;
        let mut min_count_index = cell_depth;
        let mut min_count = usize::MAX;
        let mut singleton_index = None;

        for i in cell_depth..num_cells {
            let c = self.cell_order[i];
            let count = grid[c].count();
            if count <= 1 {
                singleton_index = Some(i);
                break;
            }
            let score = backtrack_triggers[c] as f64 / count as f64;
            if score > best_score {
                best_score = score;
                best_index = i;
            }
            if count < min_count {
                min_count = count;
                min_count_index = i;
            }
        }

        if let Some(i) = singleton_index {
            self.cell_order.swap(cell_depth, i);
            let batch_size = self.gather_singletons(cell_depth, grid);
            let selection = Selection {
                batch_size,
                value: grid[self.cell_order[cell_depth]],
                count: 1,
            };
            return self.adjust_for_step_guide(selection, cell_depth, grid, step_state);
        }

        if best_score <= 0.0 {
            // No trigger signal anywhere; fall back to the fewest values.
            best_index = min_count_index;
        }
        self.cell_order.swap(cell_depth, best_index);

        let cell = self.cell_order[cell_depth];
        let values = grid[cell];
        let count = values.count();
        let mut selection = Selection {
            batch_size: 1,
            value: values.min(),
            count,
        };

        // Try to branch on a contested house value instead.
        let bt = backtrack_triggers[cell];
        if count > 2 && bt > 0 {
            let cell_score = bt as f64 / count as f64;
            if let Some(branch) =
                self.find_house_value_branch(grid, backtrack_triggers, cell_score)
            {
                let pos = (cell_depth..num_cells)
                    .find(|&i| self.cell_order[i] == branch.0)
                    .expect("house-value cell below the search window");
                self.cell_order.swap(cell_depth, pos);
                self.selection_states[cell_depth] = SelectionState {
                    cell: branch.1,
                    value: branch.2,
                };
                selection = Selection {
                    batch_size: 1,
                    value: branch.2,
                    count: 2,
                };
            }
        }

        self.adjust_for_step_guide(selection, cell_depth, grid, step_state)
    }

    /// Find a house value down to two possible cells whose triggers beat
    /// the cell-branch score. Returns (first cell, second cell, value).
    fn find_house_value_branch(
        &self,
        grid: &[ValueSet],
        backtrack_triggers: &[u32],
        cell_score: f64,
    ) -> Option<(CellIndex, CellIndex, ValueSet)> {
        let threshold = (cell_score * 2.0).ceil() as u32;
        let mut best = None;
        let mut best_score = cell_score;

        for house in &self.houses {
            let house_bt = house
                .iter()
                .map(|&c| backtrack_triggers[c])
                .max()
                .unwrap_or(0);
            if house_bt < threshold {
                continue;
            }

            // Values seen in exactly two cells of the house.
            let mut seen_once = ValueSet::empty();
            let mut seen_twice = ValueSet::empty();
            let mut seen_many = ValueSet::empty();
            for &c in house {
                let v = grid[c];
                seen_many |= seen_twice & v;
                seen_twice |= seen_once & v;
                seen_once |= v;
            }

            let mut exactly_two = seen_twice;
            exactly_two.remove_set(seen_many);
            for value_index in exactly_two.indices() {
                let value = ValueSet::from_index(value_index);
                let mut pair = [0; 2];
                let mut found = 0;
                for &c in house {
                    if !(grid[c] & value).is_empty() {
                        pair[found] = c;
                        found += 1;
                        if found == 2 {
                            break;
                        }
                    }
                }
                debug_assert_eq!(found, 2);
                // A pair with a decided cell is not a real choice.
                if !grid[pair[0]].has_multiple() || !grid[pair[1]].has_multiple() {
                    continue;
                }

                let score =
                    backtrack_triggers[pair[0]].max(backtrack_triggers[pair[1]]) as f64 / 2.0;
                if score > best_score {
                    best_score = score;
                    best = Some((pair[0], pair[1], value));
                }
            }
        }

        best
    }

    /// Pull every already-fixed cell up behind `cell_depth` so the driver
    /// consumes the whole run of singletons in one step.
    fn gather_singletons(&mut self, cell_depth: usize, grid: &[ValueSet]) -> usize {
        let mut batch_size = 1;
        for i in cell_depth + 1..self.cell_order.len() {
            if !grid[self.cell_order[i]].has_multiple() {
                self.cell_order.swap(cell_depth + batch_size, i);
                batch_size += 1;
            }
        }
        batch_size
    }

    /// User-directed override for step mode. May pick a worse branch; that
    /// is the point.
    fn adjust_for_step_guide(
        &mut self,
        mut selection: Selection,
        cell_depth: usize,
        grid: &[ValueSet],
        step_state: Option<&StepState>,
    ) -> Selection {
        let Some(state) = step_state else {
            return selection;
        };
        let Some(guide) = state.guides.get(&state.step) else {
            return selection;
        };

        if let Some(guide_cell) = guide.cell {
            let pos = (cell_depth..self.cell_order.len())
                .find(|&i| self.cell_order[i] == guide_cell);
            if let Some(pos) = pos {
                if pos != cell_depth {
                    self.cell_order.swap(cell_depth, pos);
                    self.selection_states[cell_depth] = SelectionState::cleared();
                    let values = grid[guide_cell];
                    selection = Selection {
                        batch_size: 1,
                        value: values.min(),
                        count: values.count(),
                    };
                }
            }
        }

        if let Some(guide_value) = guide.value {
            let cell = self.cell_order[cell_depth];
            let value = ValueSet::from_index(guide_value.index());
            if grid[cell].contains_set(value) {
                // Forcing a value turns the node into a plain cell branch;
                // a pending house-value arm would no longer be exhaustive.
                self.selection_states[cell_depth] = SelectionState::cleared();
                selection.value = value;
                selection.count = grid[cell].count();
            }
        }

        selection
    }
}
