use std::cmp;

use crate::types::CellIndex;
use crate::value_set::ValueSet;

use super::handler_accumulator::HandlerAccumulator;
use super::{Contradiction, SolverResult};

/// Régin-style all-different enforcement over one house:
/// a maximum bipartite matching proves feasibility, then Tarjan's SCC
/// decomposition of the residual value graph finds the removable edges.
/// Algorithm: http://www.constraint-programming.com/people/regin/papers/alldiff.pdf
///
/// Scratch buffers are reused across calls; one enforcer serves every house
/// of a given size. `ValueSet` doubles as a small bitset over cell
/// positions, which is safe because houses never exceed the value count.
pub struct AllDifferentEnforcer {
    assignees: Vec<usize>,
    assignees_inv: Vec<ValueSet>,
    ids: Vec<u32>,
    lowlinks: Vec<u32>,
    cell_nodes: Vec<ValueSet>,
    rec_stack: Vec<usize>,
    scc_stack: Vec<usize>,
    path_values: Vec<u32>,
}

impl AllDifferentEnforcer {
    pub fn new(num_values: u32) -> AllDifferentEnforcer {
        let num_values = num_values as usize;
        AllDifferentEnforcer {
            assignees: vec![0; num_values],
            assignees_inv: vec![ValueSet::empty(); num_values],
            ids: vec![0; num_values],
            lowlinks: vec![0; num_values],
            cell_nodes: Vec::with_capacity(num_values),
            rec_stack: Vec::with_capacity(num_values),
            scc_stack: Vec::with_capacity(num_values),
            path_values: vec![0; num_values],
        }
    }

    /// Narrow `grid` so the values of `cells` can form a permutation.
    /// Changed cells are queued on the accumulator. `candidate_matching`
    /// carries the matching between calls for the same house, warm-starting
    /// the next run.
    pub fn enforce_all_different(
        &mut self,
        grid: &mut [ValueSet],
        cells: &[CellIndex],
        candidate_matching: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        self.enforce_all_different_internal(grid, cells, candidate_matching)?;

        // The remaining bits in cell_nodes are the removable candidates.
        for (i, &cell) in cells.iter().enumerate() {
            let removals = self.cell_nodes[i];
            if removals.is_empty() {
                continue;
            }
            grid[cell].remove_set(removals);
            accumulator.add_for_cell(cell);
        }

        Ok(())
    }

    pub fn enforce_all_different_internal(
        &mut self,
        grid: &[ValueSet],
        cells: &[CellIndex],
        candidate_matching: &mut [ValueSet],
    ) -> SolverResult {
        debug_assert_eq!(cells.len(), self.assignees.len());

        self.cell_nodes.clear();
        self.cell_nodes.extend(cells.iter().map(|&c| grid[c]));

        self.max_matching(candidate_matching)?;
        self.remove_scc();

        Ok(())
    }

    /// Candidates to remove from each cell, valid after
    /// [`Self::enforce_all_different_internal`].
    pub fn removals(&self) -> &[ValueSet] {
        &self.cell_nodes
    }

    fn max_matching(&mut self, candidate_matching: &mut [ValueSet]) -> SolverResult {
        let num_cells = self.cell_nodes.len();
        let mut assigned = ValueSet::empty();
        let mut matched_cells = ValueSet::empty();

        // Warm start from the previous run's matching where it still holds.
        for i in 0..num_cells {
            let warm = candidate_matching[i] & self.cell_nodes[i];
            if !warm.is_empty() && (assigned & warm).is_empty() {
                self.assignees[warm.min_index() as usize] = i;
                assigned |= warm;
                matched_cells |= ValueSet::from_index(i as u32);
            }
        }

        for i in 0..num_cells {
            if matched_cells.contains_set(ValueSet::from_index(i as u32)) {
                continue;
            }
            let values = self.cell_nodes[i] & !assigned;
            if !values.is_empty() {
                let value = values.min();
                self.assignees[value.min_index() as usize] = i;
                assigned |= value;
            } else {
                let matched = self.update_matching(i, assigned);
                if matched.is_empty() {
                    return Err(Contradiction);
                }
                assigned |= matched;
            }
        }

        // Record the matching for the next warm start.
        candidate_matching.fill(ValueSet::empty());
        for v in assigned.indices() {
            candidate_matching[self.assignees[v as usize]] |= ValueSet::from_index(v);
        }

        Ok(())
    }

    // Augmenting-path search for a cell whose values are all assigned.
    fn update_matching(&mut self, cell: usize, assigned: ValueSet) -> ValueSet {
        let c_stack = &mut self.rec_stack;
        c_stack.clear();
        c_stack.push(cell);

        let mut seen = ValueSet::empty();

        while let Some(&c) = c_stack.last() {
            // Check any unseen values.
            let values = self.cell_nodes[c] & !seen;

            // We've run out of legal values, backtrack.
            if values.is_empty() {
                c_stack.pop();
                continue;
            }

            // Find the next value. We know this is already assigned.
            let value = values.min();
            let v = value.min_index();
            self.path_values[c_stack.len() - 1] = v;

            // Check if the current assignee has a free value. If so we can
            // shift the whole path and take over this value.
            let next_c = self.assignees[v as usize];
            let next_values = self.cell_nodes[next_c] & !assigned;
            if !next_values.is_empty() {
                let next_v = next_values.min_index();
                self.assignees[next_v as usize] = next_c;
                while let Some(c) = c_stack.pop() {
                    self.assignees[self.path_values[c_stack.len()] as usize] = c;
                }

                return next_values.min();
            }

            // Otherwise recurse, because v's assignee must find a new value.
            seen |= value;
            c_stack.push(next_c);
        }

        ValueSet::empty()
    }

    // https://en.wikipedia.org/wiki/Tarjan%27s_strongly_connected_components_algorithm
    // Leaves in cell_nodes only the edges leaving each SCC, i.e. the
    // candidates that can never appear in a solution of this house.
    fn remove_scc(&mut self) {
        let num_cells = self.cell_nodes.len();
        self.rec_stack.clear();
        self.scc_stack.clear();

        let mut seen = ValueSet::empty();
        let mut inv_seen = ValueSet::empty();
        let mut inv_stack_member = ValueSet::empty();
        let mut index = 0;
        let mut prev_rec_stack_top = 0;

        // Strip the matched edges; remember each cell's matched value.
        for (v, &assignee) in self.assignees.iter().enumerate() {
            let v_set = ValueSet::from_index(v as u32);
            self.cell_nodes[assignee].remove_set(v_set);
            self.assignees_inv[assignee] = v_set;
        }

        for i in 0..num_cells {
            let cell_node = self.cell_nodes[i];
            // Try the next unseen node.
            // If it has no edges, ignore it (it's a fixed value).
            if cell_node.is_empty() || !(seen & ValueSet::from_index(i as u32)).is_empty() {
                continue;
            }

            self.rec_stack.push(i);

            while let Some(&u) = self.rec_stack.last() {
                let u_set = ValueSet::from_index(u as u32);
                if (seen & u_set).is_empty() {
                    // First time we've seen u.
                    self.ids[u] = index;
                    self.lowlinks[u] = index;
                    index += 1;
                    seen |= u_set;
                    let u_inv = self.assignees_inv[u];
                    inv_stack_member |= u_inv;
                    inv_seen |= u_inv;
                    self.scc_stack.push(u);
                } else {
                    // We returned from a recursive call.
                    // n is the node we just finished processing.
                    let n = prev_rec_stack_top;
                    self.lowlinks[u] = cmp::min(self.lowlinks[u], self.lowlinks[n]);
                }

                // Recurse into the next unseen node.
                let unseen_adj = self.cell_nodes[u] & !inv_seen;
                if !unseen_adj.is_empty() {
                    let n = self.assignees[unseen_adj.min_index() as usize];
                    self.rec_stack.push(n);
                    continue;
                }

                // Handle any adjacent nodes already in the stack.
                let mut stack_adj = self.cell_nodes[u] & inv_stack_member;
                while !stack_adj.is_empty() {
                    let node = stack_adj.min();
                    stack_adj.remove_set(node);
                    let n = self.assignees[node.min_index() as usize];
                    self.lowlinks[u] = cmp::min(self.lowlinks[u], self.ids[n]);
                }

                // We have looked at all the relevant edges.
                // If u is a root node, pop the scc_stack and generate an SCC.
                if self.lowlinks[u] == self.ids[u] {
                    // Determine the edges to remove.
                    let mut mask = ValueSet::max();
                    for scc_index in (0..self.scc_stack.len()).rev() {
                        let w = self.scc_stack[scc_index];
                        let inv_mask = !self.assignees_inv[w];
                        inv_stack_member &= inv_mask;
                        mask &= inv_mask;
                        if w == u {
                            break;
                        }
                    }

                    let mut w = u;
                    loop {
                        // Remove the edges in the SCC from the graph.
                        self.cell_nodes[w] &= mask;
                        w = self.scc_stack.pop().unwrap();
                        if w == u {
                            break;
                        }
                    }
                }

                prev_rec_stack_top = *self.rec_stack.last().unwrap();
                self.rec_stack.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enforce(grid: &mut [ValueSet]) -> Result<(), Contradiction> {
        let num_values = grid.len() as u32;
        let cells = (0..grid.len()).collect::<Vec<_>>();
        let mut matching = vec![ValueSet::empty(); grid.len()];
        let mut enforcer = AllDifferentEnforcer::new(num_values);
        enforcer.enforce_all_different_internal(grid, &cells, &mut matching)?;
        for (i, removals) in enforcer.removals().iter().enumerate() {
            grid[i].remove_set(*removals);
        }
        Ok(())
    }

    #[test]
    fn full_house_removes_nothing() {
        let full = ValueSet::full(4);
        let mut grid = vec![full; 4];
        enforce(&mut grid).unwrap();
        assert_eq!(grid, vec![full; 4]);
    }

    #[test]
    fn solved_house_is_consistent() {
        let mut grid = (0..4).map(ValueSet::from_index).collect::<Vec<_>>();
        let expected = grid.clone();
        enforce(&mut grid).unwrap();
        assert_eq!(grid, expected);
    }

    #[test]
    fn naked_pair_is_eliminated() {
        let mut grid = vec![
            ValueSet::from_iter([0, 1]),
            ValueSet::from_iter([0, 1]),
            ValueSet::from_iter([0, 1, 2]),
            ValueSet::full(4),
        ];
        enforce(&mut grid).unwrap();
        assert_eq!(grid[0], ValueSet::from_iter([0, 1]));
        assert_eq!(grid[1], ValueSet::from_iter([0, 1]));
        assert_eq!(grid[2], ValueSet::from_index(2));
        assert_eq!(grid[3], ValueSet::from_index(3));
    }

    #[test]
    fn overconstrained_house_is_contradictory() {
        let mut grid = vec![
            ValueSet::from_iter([0, 1]),
            ValueSet::from_iter([0, 1]),
            ValueSet::from_iter([0, 1]),
            ValueSet::full(4),
        ];
        assert!(enforce(&mut grid).is_err());
    }

    #[test]
    fn repeated_enforcement_is_idempotent() {
        let mut grid = vec![
            ValueSet::from_iter([0, 1]),
            ValueSet::from_iter([0, 1]),
            ValueSet::from_iter([0, 1, 2]),
            ValueSet::full(4),
        ];
        enforce(&mut grid).unwrap();
        let once = grid.clone();
        enforce(&mut grid).unwrap();
        assert_eq!(grid, once);
    }
}
