use std::fmt;

pub type CellIndex = usize;
pub type ValueType = u32;

/// A cell value, stored as a zero-based index. Display values are one-based.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CellValue(ValueType);

impl CellValue {
    pub fn from_index(index: ValueType) -> CellValue {
        CellValue(index)
    }

    pub fn from_display_value(value: ValueType) -> CellValue {
        assert!(value > 0);
        CellValue(value - 1)
    }

    pub fn index(&self) -> ValueType {
        self.0
    }

    pub fn display_value(&self) -> ValueType {
        self.0 + 1
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_value())
    }
}

/// Grid dimensions. `num_values` values per cell, `num_cells` cells total.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Shape {
    pub box_size: u32,
    pub num_values: u32,
    pub num_cells: usize,
    pub side_len: u32,
}

impl Shape {
    pub fn new(dim: u32) -> Shape {
        let num_values = dim * dim;
        Shape {
            box_size: dim,
            num_values,
            num_cells: (num_values * num_values).try_into().unwrap(),
            side_len: num_values,
        }
    }

    pub fn make_cell_index(&self, row: u32, col: u32) -> CellIndex {
        ((row * self.side_len) + col).try_into().unwrap()
    }

    pub fn cell_row(&self, cell: CellIndex) -> u32 {
        cell as u32 / self.side_len
    }

    pub fn cell_col(&self, cell: CellIndex) -> u32 {
        cell as u32 % self.side_len
    }

    /// Human-readable cell id, e.g. cell 0 of a 9x9 grid is "R1C1".
    pub fn cell_name(&self, cell: CellIndex) -> String {
        format!("R{}C{}", self.cell_row(cell) + 1, self.cell_col(cell) + 1)
    }

    /// Inverse of [`Shape::cell_name`].
    pub fn cell_index_from_name(&self, name: &str) -> Option<CellIndex> {
        let rest = name.strip_prefix(['R', 'r'])?;
        let (row, col) = rest.split_once(['C', 'c'])?;
        let row = row.parse::<u32>().ok()?.checked_sub(1)?;
        let col = col.parse::<u32>().ok()?.checked_sub(1)?;
        if row >= self.side_len || col >= self.side_len {
            return None;
        }
        Some(self.make_cell_index(row, col))
    }
}

pub type FixedValues = Vec<(CellIndex, CellValue)>;

/// A puzzle layout: the shape, the given values, and the house geometry.
/// `regions` replaces the default boxes with an explicit jigsaw partition.
#[derive(Debug)]
pub struct Constraint {
    pub shape: Shape,
    pub fixed_values: FixedValues,
    pub sudoku_x: bool,
    pub regions: Option<Vec<Vec<CellIndex>>>,
}

impl Constraint {
    pub fn new(shape: Shape, fixed_values: FixedValues) -> Constraint {
        Constraint {
            shape,
            fixed_values,
            sudoku_x: false,
            regions: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_name_round_trip() {
        let shape = Shape::new(3);
        assert_eq!(shape.cell_name(0), "R1C1");
        assert_eq!(shape.cell_name(80), "R9C9");
        for cell in [0, 8, 9, 40, 80] {
            let name = shape.cell_name(cell);
            assert_eq!(shape.cell_index_from_name(&name), Some(cell));
        }
        assert_eq!(shape.cell_index_from_name("R10C1"), None);
        assert_eq!(shape.cell_index_from_name("bogus"), None);
    }

    #[test]
    fn display_values_are_one_based() {
        let value = CellValue::from_display_value(9);
        assert_eq!(value.index(), 8);
        assert_eq!(value.to_string(), "9");
    }
}
