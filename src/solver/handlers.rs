use std::cell::RefCell;

use crate::types::{CellIndex, Constraint, Shape};
use crate::value_set::ValueSet;

use super::all_different::AllDifferentEnforcer;
use super::cell_exclusions::CellExclusions;
use super::handler_accumulator::HandlerAccumulator;
use super::{Contradiction, Counters, SolverResult};

pub type HandlerIndex = usize;

/// Run queued handlers until the queue drains or a domain wipes out.
///
/// A handler popped while the grid is complete is skipped unless it is
/// essential. Handlers may re-queue each other within one drain; the
/// accumulator's dedup keeps each in the queue at most once at a time.
pub fn enforce_constraints(
    grid: &mut [ValueSet],
    grid_complete: bool,
    accumulator: &mut HandlerAccumulator,
    handler_set: &mut HandlerSet,
    counters: &mut Counters,
) -> SolverResult {
    let mut all_diff_enforcer = handler_set.all_diff_enforcer.borrow_mut();

    while let Some(handler_index) = accumulator.take_next() {
        if grid_complete && !handler_set.handlers[handler_index].essential() {
            continue;
        }
        accumulator.hold(handler_index);
        counters.constraints_processed += 1;

        match &mut handler_set.handlers[handler_index] {
            ConstraintHandler::House(h) => {
                h.enforce_consistency(grid, accumulator, &mut all_diff_enforcer)
            }
            ConstraintHandler::SameValue(h) => h.enforce_consistency(grid, accumulator),
            ConstraintHandler::Exclusion(h) => h.enforce_consistency(grid, accumulator),
            ConstraintHandler::Priority(_) => Ok(()),
        }
        .map_err(|e| {
            accumulator.clear();
            e
        })?;

        accumulator.clear_hold();
    }

    Ok(())
}

/// One-shot initialization pass. A handler reporting an unsatisfiable
/// setup invalidates its cells (or the whole grid if it has none), so the
/// search terminates with zero solutions instead of erroring.
pub fn initialize_handlers(
    handler_set: &mut HandlerSet,
    grid: &mut [ValueSet],
    cell_exclusions: &mut CellExclusions,
    shape: &Shape,
) -> bool {
    let mut ok = true;

    for handler in &mut handler_set.handlers {
        if handler.initialize(grid, cell_exclusions, shape) {
            continue;
        }
        ok = false;
        if handler.cells().is_empty() {
            grid.fill(ValueSet::empty());
        } else {
            for &cell in handler.cells() {
                grid[cell] = ValueSet::empty();
            }
        }
    }

    ok
}

/// A house: its cells must hold a permutation of all values.
pub struct HouseHandler {
    cells: Vec<CellIndex>,
    all_values: ValueSet,
    num_values: usize,
    candidate_matching: Vec<ValueSet>,
}

impl HouseHandler {
    pub fn new(cells: Vec<CellIndex>, shape: &Shape) -> HouseHandler {
        HouseHandler {
            cells,
            num_values: shape.num_values as usize,
            all_values: ValueSet::full(shape.num_values),
            candidate_matching: vec![ValueSet::empty(); shape.num_values as usize],
        }
    }

    fn initialize(&mut self, _grid: &mut [ValueSet], shape: &Shape) -> bool {
        self.cells.len() == shape.num_values as usize
    }

    fn enforce_consistency(
        &mut self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
        all_diff_enforcer: &mut AllDifferentEnforcer,
    ) -> SolverResult {
        let mut all_values = ValueSet::empty();
        let mut total_count = 0;

        for &cell in &self.cells {
            let v = grid[cell];
            all_values |= v;
            total_count += v.count();
        }

        if all_values != self.all_values {
            return Err(Contradiction);
        }
        if total_count == self.num_values {
            return Ok(());
        }

        all_diff_enforcer.enforce_all_different(
            grid,
            &self.cells,
            &mut self.candidate_matching,
            accumulator,
        )
    }
}

/// Forces two disjoint cell sets to the same value universe. Created for
/// house pairs with a box-sized overlap, where the difference sets must
/// hold the same values. Pruning only; implied by the houses once the
/// grid is fixed.
pub struct SameValueHandler {
    cells: Vec<CellIndex>,
    cells0: Vec<CellIndex>,
    cells1: Vec<CellIndex>,
}

impl SameValueHandler {
    pub fn new(cells0: Vec<CellIndex>, cells1: Vec<CellIndex>) -> SameValueHandler {
        let mut cells = Vec::new();
        cells.extend(cells0.iter());
        cells.extend(cells1.iter());
        SameValueHandler {
            cells,
            cells0,
            cells1,
        }
    }

    fn enforce_consistency(
        &self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        // Find the values in each cell set.
        let values0 = self
            .cells0
            .iter()
            .map(|&c| grid[c])
            .reduce(|a, b| a | b)
            .unwrap_or_else(ValueSet::empty);
        let values1 = self
            .cells1
            .iter()
            .map(|&c| grid[c])
            .reduce(|a, b| a | b)
            .unwrap_or_else(ValueSet::empty);

        if values0 == values1 {
            return Ok(());
        }

        // Determine all available values.
        let values = values0 & values1;

        // Check if we have enough values.
        if values.count() < self.cells0.len() {
            return Err(Contradiction);
        }

        // Enforce the constrained value set.
        if values0 != values {
            Self::remove_extra_values(grid, values, &self.cells0, accumulator)?
        }
        if values1 != values {
            Self::remove_extra_values(grid, values, &self.cells1, accumulator)?
        }

        Ok(())
    }

    fn remove_extra_values(
        grid: &mut [ValueSet],
        allowed_values: ValueSet,
        cells: &[CellIndex],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        for &c0 in cells {
            let v = grid[c0] & allowed_values;
            if v.is_empty() {
                return Err(Contradiction);
            }
            if v != grid[c0] {
                grid[c0] = v;
                accumulator.add_for_cell(c0);
            }
        }
        Ok(())
    }
}

/// The N-way not-equal for one cell: once the cell fixes, its value is
/// cleared from every mutually-exclusive peer. `cells[0]` is the owner,
/// the rest are its peers.
pub struct ExclusionHandler {
    cells: Vec<CellIndex>,
}

impl ExclusionHandler {
    pub fn new(cell: CellIndex, peers: &[CellIndex]) -> ExclusionHandler {
        let mut cells = Vec::with_capacity(peers.len() + 1);
        cells.push(cell);
        cells.extend_from_slice(peers);
        ExclusionHandler { cells }
    }

    fn enforce_consistency(
        &self,
        grid: &mut [ValueSet],
        accumulator: &mut HandlerAccumulator,
    ) -> SolverResult {
        let value = grid[self.cells[0]];
        if value.is_empty() || value.has_multiple() {
            return Ok(());
        }

        for &peer in &self.cells[1..] {
            if (grid[peer] & value).is_empty() {
                continue;
            }
            grid[peer].remove_set(value);
            if grid[peer].is_empty() {
                return Err(Contradiction);
            }
            accumulator.add_for_cell(peer);
        }

        Ok(())
    }
}

/// Overrides the search priority of its cells. Never narrows the grid.
pub struct PriorityHandler {
    cells: Vec<CellIndex>,
    priority: u32,
}

impl PriorityHandler {
    pub fn new(cells: Vec<CellIndex>, priority: u32) -> PriorityHandler {
        PriorityHandler { cells, priority }
    }
}

pub enum ConstraintHandler {
    House(HouseHandler),
    SameValue(SameValueHandler),
    Exclusion(ExclusionHandler),
    Priority(PriorityHandler),
}

impl ConstraintHandler {
    pub fn cells(&self) -> &[CellIndex] {
        match self {
            ConstraintHandler::House(h) => &h.cells,
            ConstraintHandler::SameValue(h) => &h.cells,
            ConstraintHandler::Exclusion(h) => &h.cells,
            ConstraintHandler::Priority(h) => &h.cells,
        }
    }

    /// Cells known pairwise mutually exclusive under this handler alone.
    pub fn exclusion_cells(&self) -> &[CellIndex] {
        match self {
            ConstraintHandler::House(h) => &h.cells,
            // Same-value sets and exclusion enforcers derive their edges
            // from the houses; priority handlers constrain nothing.
            ConstraintHandler::SameValue(_)
            | ConstraintHandler::Exclusion(_)
            | ConstraintHandler::Priority(_) => &[],
        }
    }

    pub fn priority(&self) -> u32 {
        match self {
            ConstraintHandler::House(_) => 1,
            ConstraintHandler::SameValue(_) | ConstraintHandler::Exclusion(_) => 0,
            ConstraintHandler::Priority(h) => h.priority,
        }
    }

    /// Essential handlers still run once the grid is fully fixed; the
    /// rest only prune.
    pub fn essential(&self) -> bool {
        matches!(self, ConstraintHandler::House(_))
    }

    pub fn initialize(
        &mut self,
        grid: &mut [ValueSet],
        _cell_exclusions: &mut CellExclusions,
        shape: &Shape,
    ) -> bool {
        match self {
            ConstraintHandler::House(h) => h.initialize(grid, shape),
            ConstraintHandler::SameValue(h) => h.cells0.len() == h.cells1.len(),
            ConstraintHandler::Exclusion(_) | ConstraintHandler::Priority(_) => true,
        }
    }
}

/// All handlers of one puzzle, partitioned into registration classes.
pub struct HandlerSet {
    handlers: Vec<ConstraintHandler>,
    ordinary: Vec<HandlerIndex>,
    auxiliary: Vec<HandlerIndex>,
    priority_handlers: Vec<HandlerIndex>,
    house_handlers: Vec<HandlerIndex>,
    exclusion_by_cell: Vec<Option<HandlerIndex>>,
    all_diff_enforcer: RefCell<AllDifferentEnforcer>,
}

impl HandlerSet {
    pub fn new(shape: &Shape) -> HandlerSet {
        HandlerSet {
            handlers: Vec::new(),
            ordinary: Vec::new(),
            auxiliary: Vec::new(),
            priority_handlers: Vec::new(),
            house_handlers: Vec::new(),
            exclusion_by_cell: vec![None; shape.num_cells],
            all_diff_enforcer: RefCell::new(AllDifferentEnforcer::new(shape.num_values)),
        }
    }

    pub fn add_ordinary(&mut self, handler: ConstraintHandler) -> HandlerIndex {
        let index = self.push(handler);
        if matches!(self.handlers[index], ConstraintHandler::House(_)) {
            self.house_handlers.push(index);
        }
        self.ordinary.push(index);
        index
    }

    /// Auxiliary handlers run only for a just-fixed cell while the grid is
    /// still incomplete.
    pub fn add_auxiliary(&mut self, handler: ConstraintHandler) -> HandlerIndex {
        let index = self.push(handler);
        self.auxiliary.push(index);
        index
    }

    pub fn add_exclusion(&mut self, cell: CellIndex, handler: ExclusionHandler) -> HandlerIndex {
        let index = self.push(ConstraintHandler::Exclusion(handler));
        self.exclusion_by_cell[cell] = Some(index);
        index
    }

    pub fn add_priority(&mut self, handler: PriorityHandler) -> HandlerIndex {
        let index = self.push(ConstraintHandler::Priority(handler));
        self.priority_handlers.push(index);
        index
    }

    fn push(&mut self, handler: ConstraintHandler) -> HandlerIndex {
        let index = self.handlers.len();
        self.handlers.push(handler);
        index
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn handler(&self, index: HandlerIndex) -> &ConstraintHandler {
        &self.handlers[index]
    }

    pub fn ordinary_handlers(&self) -> &[HandlerIndex] {
        &self.ordinary
    }

    pub fn aux_handlers(&self) -> &[HandlerIndex] {
        &self.auxiliary
    }

    pub fn exclusion_by_cell(&self) -> &[Option<HandlerIndex>] {
        &self.exclusion_by_cell
    }

    pub fn house_cells(&self) -> impl Iterator<Item = &[CellIndex]> {
        self.house_handlers
            .iter()
            .map(|&index| self.handlers[index].cells())
    }

    /// Static per-cell search priorities: the sum of ordinary handler
    /// priorities over each cell, overwritten by priority handlers in
    /// registration order (the last one wins).
    pub fn cell_priorities(&self, num_cells: usize) -> Vec<u32> {
        let mut priorities = vec![0; num_cells];
        for &index in &self.ordinary {
            let handler = &self.handlers[index];
            for &cell in handler.cells() {
                priorities[cell] += handler.priority();
            }
        }
        for &index in &self.priority_handlers {
            let handler = &self.handlers[index];
            for &cell in handler.cells() {
                priorities[cell] = handler.priority();
            }
        }
        priorities
    }
}

fn make_houses(constraint: &Constraint) -> Vec<Vec<CellIndex>> {
    let mut houses = Vec::new();
    let shape = &constraint.shape;
    let side_len = shape.side_len;
    let box_size = shape.box_size;

    // Make rows.
    for r in 0..side_len {
        let f = |c| shape.make_cell_index(r, c);
        houses.push((0..side_len).map(f).collect());
    }

    // Make columns.
    for c in 0..side_len {
        let f = |r| shape.make_cell_index(r, c);
        houses.push((0..side_len).map(f).collect());
    }

    // Make boxes, or take the explicit jigsaw regions instead.
    match &constraint.regions {
        Some(regions) => houses.extend(regions.iter().cloned()),
        None => {
            for b in 0..side_len {
                let f = |i| {
                    let r = (b % box_size) * box_size + (i / box_size);
                    let c = (b / box_size) * box_size + (i % box_size);
                    shape.make_cell_index(r, c)
                };
                houses.push((0..side_len).map(f).collect());
            }
        }
    }

    if constraint.sudoku_x {
        let f = |r| shape.make_cell_index(r, r);
        houses.push((0..side_len).map(f).collect());

        let f = |r| shape.make_cell_index(r, side_len - r - 1);
        houses.push((0..side_len).map(f).collect());
    }

    houses
}

fn array_intersection_size<T: PartialEq>(v0: &[T], v1: &[T]) -> usize {
    v0.iter().filter(|e| v1.contains(e)).count()
}

fn array_difference<T: PartialEq + Copy>(v0: &[T], v1: &[T]) -> Vec<T> {
    v0.iter().filter(|e| !v1.contains(e)).copied().collect()
}

fn make_house_intersections(
    houses: &[Vec<CellIndex>],
    shape: &Shape,
) -> Vec<SameValueHandler> {
    let box_size = shape.box_size as usize;

    let mut handlers = Vec::new();

    for (i, h0) in houses.iter().enumerate() {
        for h1 in houses.iter().skip(i + 1) {
            if array_intersection_size(h0, h1) == box_size {
                handlers.push(SameValueHandler::new(
                    array_difference(h0, h1),
                    array_difference(h1, h0),
                ));
            }
        }
    }

    handlers
}

/// Build the handler set and exclusion graph for a puzzle layout.
pub fn make_handlers(constraint: &Constraint) -> (HandlerSet, CellExclusions) {
    let shape = &constraint.shape;

    let mut handler_set = HandlerSet::new(shape);

    let houses = make_houses(constraint);
    let intersection_handlers = make_house_intersections(&houses, shape);

    for house in houses {
        handler_set.add_ordinary(ConstraintHandler::House(HouseHandler::new(house, shape)));
    }
    for handler in intersection_handlers {
        handler_set.add_ordinary(ConstraintHandler::SameValue(handler));
    }

    let cell_exclusions = CellExclusions::new(
        shape.num_cells,
        handler_set.handlers.iter().map(|h| h.exclusion_cells()),
    );

    for cell in 0..shape.num_cells {
        let handler = ExclusionHandler::new(cell, cell_exclusions.exclusions(cell));
        handler_set.add_exclusion(cell, handler);
    }

    (handler_set, cell_exclusions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classic_constraint() -> Constraint {
        Constraint::new(Shape::new(3), Vec::new())
    }

    #[test]
    fn classic_geometry_handler_counts() {
        let constraint = classic_constraint();
        let (handler_set, cell_exclusions) = make_handlers(&constraint);

        // 27 houses, 54 box/line intersections, 81 exclusion enforcers.
        assert_eq!(handler_set.house_cells().count(), 27);
        assert_eq!(handler_set.ordinary_handlers().len(), 27 + 54);
        assert_eq!(handler_set.len(), 27 + 54 + 81);

        // Every cell sees 8 row + 8 column + 4 box peers.
        for cell in 0..81 {
            assert_eq!(cell_exclusions.exclusions(cell).len(), 20);
            assert!(handler_set.exclusion_by_cell()[cell].is_some());
        }
    }

    #[test]
    fn sudoku_x_adds_diagonals() {
        let mut constraint = classic_constraint();
        constraint.sudoku_x = true;
        let (handler_set, cell_exclusions) = make_handlers(&constraint);
        assert_eq!(handler_set.house_cells().count(), 29);
        // The centre cell now also excludes the rest of both diagonals.
        assert_eq!(cell_exclusions.exclusions(40).len(), 20 + 12);
    }

    #[test]
    fn cell_priorities_sum_houses_and_respect_overrides() {
        let constraint = classic_constraint();
        let (mut handler_set, _) = make_handlers(&constraint);

        let priorities = handler_set.cell_priorities(81);
        // Row + column + box.
        assert!(priorities.iter().all(|&p| p == 3));

        handler_set.add_priority(PriorityHandler::new(vec![40], 10));
        handler_set.add_priority(PriorityHandler::new(vec![40, 41], 7));
        let priorities = handler_set.cell_priorities(81);
        // Last registration wins.
        assert_eq!(priorities[40], 7);
        assert_eq!(priorities[41], 7);
        assert_eq!(priorities[0], 3);
    }

    #[test]
    fn exclusion_handler_clears_fixed_value_from_peers() {
        let constraint = classic_constraint();
        let (mut handler_set, _) = make_handlers(&constraint);
        let mut accumulator = HandlerAccumulator::new(81, &handler_set);
        let mut counters = Counters::default();

        let mut grid = vec![ValueSet::full(9); 81];
        grid[0] = ValueSet::from_index(4);

        accumulator.add_for_fixed_cell(0);
        enforce_constraints(&mut grid, false, &mut accumulator, &mut handler_set, &mut counters)
            .unwrap();

        for &peer in [1, 8, 9, 10, 20, 72].iter() {
            assert!((grid[peer] & ValueSet::from_index(4)).is_empty());
        }
        assert_eq!(grid[0], ValueSet::from_index(4));
        // Cells sharing no house with R1C1 keep the full mask minus
        // whatever the drain propagated; the far corner is untouched.
        assert_eq!(grid[80], ValueSet::full(9));
        assert!(counters.constraints_processed > 0);
    }
}
