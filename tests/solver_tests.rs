use variant_sudoku_solver::io::parser::parse_text;
use variant_sudoku_solver::solver::debug_log::DebugRecord;
use variant_sudoku_solver::solver::engine::Engine;
use variant_sudoku_solver::solver::handler_accumulator::HandlerAccumulator;
use variant_sudoku_solver::solver::handlers::{
    enforce_constraints, initialize_handlers, make_handlers, ConstraintHandler, SameValueHandler,
};
use variant_sudoku_solver::solver::{
    Config, Counters, Solver, SolverError, StepGuide, StepGuides, YieldMode,
};
use variant_sudoku_solver::types::{CellValue, Constraint, Shape};
use variant_sudoku_solver::value_set::ValueSet;

// A 17-clue classic with a unique, well-known completion.
const SEVENTEEN_CLUES: &str =
    "000000010400000000020000000000050407008000300001090000300400200050100000000806000";
const SEVENTEEN_CLUES_SOLUTION: &str =
    "693784512487512936125963874932651487568247391741398625319475268856129743274836159";

// A complete classic grid used to build derived puzzles.
const COMPLETE_BOARD: &str =
    "534678912672195348198342567859761423426853791713924856961537284287419635345286179";

// Removing these four cells leaves a deadly rectangle on values 1/3:
// R4C6, R4C9, R5C6, R5C9.
const RECTANGLE_CELLS: [usize; 4] = [32, 35, 41, 44];

fn parse(text: &str) -> Constraint {
    parse_text(text).unwrap()
}

fn solution_string(solution: &[CellValue]) -> String {
    solution.iter().map(|v| v.to_string()).collect()
}

fn two_solution_puzzle() -> String {
    let mut chars: Vec<char> = COMPLETE_BOARD.chars().collect();
    for &cell in &RECTANGLE_CELLS {
        chars[cell] = '0';
    }
    chars.into_iter().collect()
}

fn classic_houses() -> Vec<Vec<usize>> {
    let shape = Shape::new(3);
    let mut houses = Vec::new();
    for r in 0..9 {
        houses.push((0..9).map(|c| shape.make_cell_index(r, c)).collect());
    }
    for c in 0..9 {
        houses.push((0..9).map(|r| shape.make_cell_index(r, c)).collect());
    }
    for b in 0..9 {
        houses.push(
            (0..9)
                .map(|i| shape.make_cell_index((b % 3) * 3 + i / 3, (b / 3) * 3 + i % 3))
                .collect(),
        );
    }
    houses
}

fn assert_classic_solution(solution: &[CellValue]) {
    for house in classic_houses() {
        let mut seen = [false; 9];
        for cell in house {
            let v = solution[cell].index() as usize;
            assert!(!seen[v], "value {} repeated in a house", v + 1);
            seen[v] = true;
        }
    }
}

#[test]
fn seventeen_clue_puzzle_has_unique_solution() {
    let constraint = parse(SEVENTEEN_CLUES);
    let mut solver = Solver::new(&constraint, Config::default());

    let solution = solver.nth_solution(0).unwrap().expect("puzzle is solvable");
    assert_eq!(solution_string(&solution), SEVENTEEN_CLUES_SOLUTION);
    assert_classic_solution(&solution);

    assert!(solver.nth_solution(1).unwrap().is_none());
}

#[test]
fn deadly_rectangle_puzzle_has_two_solutions() {
    let constraint = parse(&two_solution_puzzle());
    let mut solver = Solver::new(&constraint, Config::default());
    assert_eq!(solver.count_solutions(), 2);

    let first = solver.nth_solution(0).unwrap().unwrap();
    let second = solver.nth_solution(1).unwrap().unwrap();
    assert_classic_solution(&first);
    assert_classic_solution(&second);

    let differing = (0..81).filter(|&c| first[c] != second[c]).collect::<Vec<_>>();
    assert_eq!(differing, RECTANGLE_CELLS);
}

#[test]
fn nth_solution_moves_forward_and_back() {
    let constraint = parse(&two_solution_puzzle());
    let mut solver = Solver::new(&constraint, Config::default());

    let second = solver.nth_solution(1).unwrap().unwrap();
    // Moving backward restarts the run and replays the same order.
    let first = solver.nth_solution(0).unwrap().unwrap();
    assert_ne!(first, second);
    assert_eq!(solver.nth_solution(1).unwrap().unwrap(), second);
    assert!(solver.nth_solution(2).unwrap().is_none());
}

#[test]
fn solution_union_matches_pencilmarks() {
    let constraint = parse(&two_solution_puzzle());
    let mut solver = Solver::new(&constraint, Config::default());
    let all = solver.solve_all_possibilities().unwrap();

    assert_eq!(all.solutions.len(), 2);
    let mut expected = vec![ValueSet::empty(); 81];
    for solution in &all.solutions {
        for (cell, value) in solution.iter().enumerate() {
            expected[cell] |= ValueSet::from_index(value.index());
        }
    }
    assert_eq!(all.pencilmarks, expected);

    for &cell in &RECTANGLE_CELLS {
        assert_eq!(all.pencilmarks[cell].count(), 2);
    }
}

#[test]
fn empty_grid_has_solutions() {
    let constraint = parse(&"0".repeat(81));
    let mut solver = Solver::new(&constraint, Config::default());
    let solution = solver.nth_solution(0).unwrap().expect("empty grid solves");
    assert_classic_solution(&solution);
}

#[test]
fn empty_four_grid_union_is_full() {
    let constraint = parse(&"0".repeat(16));
    let mut solver = Solver::new(&constraint, Config::default());
    let all = solver.solve_all_possibilities().unwrap();
    assert!(all.solutions.len() >= 2);
    for pencilmarks in &all.pencilmarks {
        assert_eq!(*pencilmarks, ValueSet::full(4));
    }
}

#[test]
fn conflicting_givens_have_no_solutions() {
    // Two 5s in the first row.
    let mut puzzle = "0".repeat(81);
    puzzle.replace_range(0..2, "55");
    let constraint = parse(&puzzle);
    let mut solver = Solver::new(&constraint, Config::default());
    assert_eq!(solver.count_solutions(), 0);
    assert!(solver.nth_solution(0).unwrap().is_none());

    let counters = solver.counters();
    let total = counters.progress_ratio + counters.branches_ignored;
    assert!((total - 1.0).abs() < 1e-6);
}

#[test]
fn progress_is_conserved() {
    let constraint = parse(SEVENTEEN_CLUES);
    let mut solver = Solver::new(&constraint, Config::default());
    solver.count_solutions();

    let counters = solver.counters();
    let total = counters.progress_ratio + counters.branches_ignored;
    assert!((total - 1.0).abs() < 1e-6, "progress total was {total}");
}

#[test]
fn runs_are_deterministic() {
    let run = || {
        let mut solver = Solver::new(&parse(&two_solution_puzzle()), Config::default());
        let count = solver.count_solutions();
        let solutions = (0..count as usize)
            .map(|n| solver.nth_solution(n).unwrap().unwrap())
            .collect::<Vec<_>>();
        (solutions, *solver.counters())
    };

    let (solutions_a, counters_a) = run();
    let (solutions_b, counters_b) = run();
    assert_eq!(solutions_a, solutions_b);
    assert_eq!(counters_a.guesses, counters_b.guesses);
    assert_eq!(counters_a.backtracks, counters_b.backtracks);
}

#[test]
fn step_mode_on_trivial_last_cell_puzzle() {
    let mut puzzle: Vec<char> = COMPLETE_BOARD.chars().collect();
    puzzle[80] = '0';
    let constraint = parse(&puzzle.into_iter().collect::<String>());
    let mut solver = Solver::new(&constraint, Config::default());
    let guides = StepGuides::new();

    // The first step is the state after setup, with nothing removed.
    let step = solver.nth_step(0, &guides).unwrap().unwrap();
    assert!(step.latest_cell.is_none());
    assert!(!step.is_solution && !step.has_contradiction);
    assert!(step.diff_pencilmarks.iter().all(|d| d.is_empty()));
    // Initialization already pinned the last cell.
    assert_eq!(step.pencilmarks[80].value(), Some(8));

    // The second step fixes the cells.
    let step = solver.nth_step(1, &guides).unwrap().unwrap();
    assert_eq!(step.latest_cell, Some(0));
    assert!(!step.is_solution);

    // The third step reports the solution.
    let step = solver.nth_step(2, &guides).unwrap().unwrap();
    assert!(step.is_solution);
    assert!(!step.has_contradiction);

    assert!(solver.nth_step(3, &guides).unwrap().is_none());
}

#[test]
fn step_guides_override_branching() {
    let constraint = parse(&two_solution_puzzle());
    let mut solver = Solver::new(&constraint, Config::default());

    let mut guides = StepGuides::new();
    guides.insert(
        1,
        StepGuide {
            cell: Some(RECTANGLE_CELLS[0]),
            value: Some(CellValue::from_display_value(3)),
        },
    );

    let step = solver.nth_step(1, &guides).unwrap().unwrap();
    assert_eq!(step.latest_cell, Some(RECTANGLE_CELLS[0]));
    assert_eq!(step.pencilmarks[RECTANGLE_CELLS[0]].value(), Some(2));
}

#[test]
fn stale_iterators_raise() {
    let constraint = parse(SEVENTEEN_CLUES);
    let mut engine = Engine::new(&constraint, Config::default());

    let stale = engine.start_run(YieldMode::OnSolution);
    let fresh = engine.start_run(YieldMode::OnSolution);

    assert!(matches!(
        engine.next_event(&stale),
        Err(SolverError::StaleIterator)
    ));
    // The newer iterator is unaffected.
    assert!(matches!(engine.next_event(&fresh), Ok(Some(_))));
}

#[test]
fn propagation_is_idempotent() {
    let constraint = parse(SEVENTEEN_CLUES);
    let (mut handler_set, mut cell_exclusions) = make_handlers(&constraint);

    let mut grid = vec![ValueSet::full(9); 81];
    for (cell, value) in &constraint.fixed_values {
        grid[*cell] = ValueSet::from_index(value.index());
    }
    assert!(initialize_handlers(
        &mut handler_set,
        &mut grid,
        &mut cell_exclusions,
        &constraint.shape
    ));

    let mut accumulator = HandlerAccumulator::new(81, &handler_set);
    let mut counters = Counters::default();

    for cell in 0..81 {
        accumulator.add_for_cell(cell);
    }
    enforce_constraints(&mut grid, false, &mut accumulator, &mut handler_set, &mut counters)
        .unwrap();
    let fixpoint = grid.clone();

    for cell in 0..81 {
        accumulator.add_for_cell(cell);
    }
    enforce_constraints(&mut grid, false, &mut accumulator, &mut handler_set, &mut counters)
        .unwrap();
    assert_eq!(grid, fixpoint);
}

#[test]
fn auxiliary_handlers_run_on_fixed_cells() {
    // Tie cells R1C1 and R3C3 of a 4x4 grid (which share no house) to the
    // same value through an auxiliary same-value handler.
    let mut puzzle = "0".repeat(16);
    puzzle.replace_range(0..1, "1");
    let constraint = parse(&puzzle);

    let (mut handler_set, cell_exclusions) = make_handlers(&constraint);
    handler_set.add_auxiliary(ConstraintHandler::SameValue(SameValueHandler::new(
        vec![0],
        vec![10],
    )));

    let mut engine =
        Engine::with_handler_set(&constraint, handler_set, cell_exclusions, Config::default());
    let token = engine.start_run(YieldMode::OnSolution);
    let output = engine.next_event(&token).unwrap().expect("solvable");
    assert_eq!(output.grid[0].value(), Some(0));
    assert_eq!(output.grid[10].value(), Some(0));
}

#[test]
fn validate_layout_accepts_classic_geometry() {
    let constraint = parse(&"0".repeat(81));
    let mut solver = Solver::new(&constraint, Config::default());
    assert!(solver.validate_layout().unwrap());
}

#[test]
fn validate_layout_accepts_transversal_jigsaw() {
    let shape = Shape::new(3);
    let regions = (0..9u32)
        .map(|k| {
            (0..9u32)
                .map(|r| shape.make_cell_index(r, (k + 5 * r) % 9))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let mut constraint = Constraint::new(shape, Vec::new());
    constraint.regions = Some(regions);
    let mut solver = Solver::new(&constraint, Config::default());
    assert!(solver.validate_layout().unwrap());
}

#[test]
fn validate_layout_rejects_impossible_jigsaw() {
    // The first two regions are rows 1 and 2 with their leading cells
    // swapped, forcing R1C1 and R2C1 to the same value in one column.
    let shape = Shape::new(3);
    let mut regions: Vec<Vec<usize>> = Vec::new();
    let mut region0 = vec![9];
    region0.extend(1..=8);
    let mut region1 = vec![0];
    region1.extend(10..=17);
    regions.push(region0);
    regions.push(region1);
    for r in 2..9 {
        regions.push((r * 9..r * 9 + 9).collect());
    }

    let mut constraint = Constraint::new(shape, Vec::new());
    constraint.regions = Some(regions);
    let mut solver = Solver::new(&constraint, Config::default());
    assert!(!solver.validate_layout().unwrap());
}

#[test]
fn debug_sink_receives_trigger_dump() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let records = Rc::new(RefCell::new(Vec::new()));
    let sink_records = Rc::clone(&records);

    let mut config = Config::default();
    config.debug_sink = Some(Box::new(move |record: &DebugRecord| {
        sink_records.borrow_mut().push(record.msg.to_string());
    }));

    let constraint = parse(SEVENTEEN_CLUES);
    let mut solver = Solver::new(&constraint, config);
    solver.count_solutions();
    solver.dump_backtrack_triggers();

    assert!(!records.borrow().is_empty());
}
