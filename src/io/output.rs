use crate::solver::{AllPossibilities, Counters, Solution};
use crate::types::Constraint;
use crate::value_set::ValueSet;

pub fn solution_as_grid(constraint: &Constraint, solution: &Solution) -> String {
    let mut output = String::new();

    let shape = &constraint.shape;
    assert_eq!(shape.num_cells, solution.len());

    let pad_size = shape.num_values.to_string().len() + 1;

    for r in 0..shape.side_len {
        for c in 0..shape.side_len {
            let index = shape.make_cell_index(r, c);
            let value = solution[index].to_string();
            (0..pad_size - value.len()).for_each(|_| output.push(' '));
            output.push_str(&value);
        }
        output.push('\n');
    }

    output
}

pub fn solution_compact(solution: &Solution) -> String {
    format!(
        "[{}]",
        solution
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    )
}

/// Pencilmark rendering: each cell shows its candidate display values.
pub fn pencilmarks_as_grid(constraint: &Constraint, all: &AllPossibilities) -> String {
    let shape = &constraint.shape;
    let pad_size = pencilmark_width(&all.pencilmarks) + 1;
    let mut output = String::new();

    for r in 0..shape.side_len {
        for c in 0..shape.side_len {
            let cell = pencilmark_string(all.pencilmarks[shape.make_cell_index(r, c)]);
            (0..pad_size - cell.len()).for_each(|_| output.push(' '));
            output.push_str(&cell);
        }
        output.push('\n');
    }

    output
}

fn pencilmark_string(values: ValueSet) -> String {
    if values.is_empty() {
        return String::from(".");
    }
    values
        .indices()
        .map(|i| (i + 1).to_string())
        .collect::<Vec<_>>()
        .join("")
}

fn pencilmark_width(pencilmarks: &[ValueSet]) -> usize {
    pencilmarks
        .iter()
        .map(|values| pencilmark_string(*values).len())
        .max()
        .unwrap_or(1)
}

pub fn counters(counters: &Counters) -> String {
    format!(
        "{{ solutions: {} guesses: {} backtracks: {} values_tried: {} constraints_processed: {} progress_ratio: {:.4} branches_ignored: {:.4} }}",
        counters.solutions,
        counters.guesses,
        counters.backtracks,
        counters.values_tried,
        counters.constraints_processed,
        counters.progress_ratio,
        counters.branches_ignored,
    )
}
