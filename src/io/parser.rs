use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::solver;
use crate::types::{CellIndex, CellValue, Constraint, FixedValues, Shape, ValueType};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("cell count does not make a valid grid size: {0}")]
    BadCellCount(usize),
    #[error("grid size not supported, side length: {0}")]
    UnsupportedSize(u32),
    #[error("too many values for short input: {0}")]
    TooManyValues(u32),
    #[error("unrecognized character: {0}")]
    UnrecognizedCharacter(char),
    #[error("value out of range: {0}")]
    ValueOutOfRange(ValueType),
    #[error("region map must cover {expected} cells, found {found}")]
    BadRegionMapSize { expected: usize, found: usize },
    #[error("region '{0}' has the wrong number of cells")]
    BadRegionSize(char),
    #[error("no parser matched the input:\n{0}")]
    NoMatch(String),
}

pub type ParserResult = Result<Constraint, ParseError>;

pub fn parse_text(input: &str) -> ParserResult {
    let mut input = String::from(input);

    remove_comments(&mut input);
    let sudoku_x = extract_sudoku_x(&mut input);
    let region_map = extract_region_map(&mut input);

    let parse_fns: Vec<fn(&str) -> ParserResult> = vec![parse_short_text, parse_grid_layout];

    let mut constraint = None;
    let mut errors = Vec::new();
    for parse_fn in parse_fns {
        match (parse_fn)(&input) {
            Ok(parsed) => {
                constraint = Some(parsed);
                break;
            }
            Err(msg) => {
                errors.push(msg.to_string());
            }
        }
    }

    match constraint {
        None => Err(ParseError::NoMatch(errors.join("\n"))),
        Some(mut constraint) => {
            constraint.sudoku_x = sudoku_x;
            if let Some(region_map) = region_map {
                constraint.regions = Some(parse_regions(&region_map, &constraint.shape)?);
            }
            Ok(constraint)
        }
    }
}

fn remove_comments(input: &mut String) {
    lazy_static! {
        static ref COMMENT_REGEX: Regex = Regex::new("(?m)#.*$").unwrap();
    }

    *input = COMMENT_REGEX.replace_all(input, "").to_string();
}

fn extract_sudoku_x(input: &mut String) -> bool {
    lazy_static! {
        static ref SUDOKU_X_REGEX: Regex = Regex::new("(?i)sudoku[ -]x").unwrap();
    }

    if !SUDOKU_X_REGEX.is_match(input) {
        return false;
    }

    *input = SUDOKU_X_REGEX.replace(input, "").to_string();
    true
}

// A "regions:" line assigns each cell to a jigsaw region by letter.
fn extract_region_map(input: &mut String) -> Option<String> {
    lazy_static! {
        static ref REGIONS_REGEX: Regex =
            Regex::new("(?im)^\\s*regions:\\s*([a-zA-Z0-9]+)\\s*$").unwrap();
    }

    let map = REGIONS_REGEX.captures(input)?.get(1)?.as_str().to_string();
    *input = REGIONS_REGEX.replace(input, "").to_string();
    Some(map)
}

fn parse_regions(region_map: &str, shape: &Shape) -> Result<Vec<Vec<CellIndex>>, ParseError> {
    if region_map.len() != shape.num_cells {
        return Err(ParseError::BadRegionMapSize {
            expected: shape.num_cells,
            found: region_map.len(),
        });
    }

    let mut regions: Vec<(char, Vec<CellIndex>)> = Vec::new();
    for (cell, label) in region_map.chars().enumerate() {
        match regions.iter_mut().find(|(l, _)| *l == label) {
            Some((_, cells)) => cells.push(cell),
            None => regions.push((label, vec![cell])),
        }
    }

    let expected = shape.num_values as usize;
    for (label, cells) in &regions {
        if cells.len() != expected {
            return Err(ParseError::BadRegionSize(*label));
        }
    }

    Ok(regions.into_iter().map(|(_, cells)| cells).collect())
}

fn remove_whitespace(s: &mut String) {
    s.retain(|c| !c.is_whitespace());
}

fn guess_dimension(num_cells: usize) -> Result<u32, ParseError> {
    let dim = (num_cells as f64).sqrt().sqrt() as u32;
    let num_values = dim * dim;
    if num_values * num_values != (num_cells as u32) {
        return Err(ParseError::BadCellCount(num_cells));
    }

    if !solver::VALID_NUM_VALUE_RANGE.contains(&num_values) {
        return Err(ParseError::UnsupportedSize(num_values));
    }

    Ok(dim)
}

fn parse_short_text(input: &str) -> ParserResult {
    let mut input = String::from(input);
    remove_whitespace(&mut input);

    let dim = guess_dimension(input.len())?;
    let num_values = dim * dim;
    let radix = num_values + 1;
    if radix > 36 {
        return Err(ParseError::TooManyValues(num_values));
    }

    let mut fixed_values = FixedValues::new();

    for (i, c) in input.chars().enumerate() {
        match c {
            '.' | '0' => {}
            c if c.is_digit(radix) => {
                fixed_values.push((
                    i,
                    CellValue::from_display_value(c.to_digit(radix).unwrap()),
                ));
            }
            c => {
                return Err(ParseError::UnrecognizedCharacter(c));
            }
        }
    }

    Ok(Constraint::new(Shape::new(dim), fixed_values))
}

fn parse_grid_layout(input: &str) -> ParserResult {
    lazy_static! {
        static ref CELL_REGEX: Regex = Regex::new("[.]|\\d+").unwrap();
    }

    let parts = CELL_REGEX
        .find_iter(input)
        .map(|mat| mat.as_str())
        .collect::<Vec<_>>();
    let dim = guess_dimension(parts.len())?;
    let num_values = dim * dim;

    let mut fixed_values = FixedValues::new();

    for (i, part) in parts.iter().enumerate() {
        match *part {
            "." => (),
            _ => {
                let value = part.parse::<ValueType>().expect("unparsable number");
                if value == 0 || value > num_values {
                    return Err(ParseError::ValueOutOfRange(value));
                }
                fixed_values.push((i, CellValue::from_display_value(value)));
            }
        }
    }

    Ok(Constraint::new(Shape::new(dim), fixed_values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_with_comments() {
        let input = format!("# a puzzle\n4{}\n", ".".repeat(80));
        let constraint = parse_text(&input).unwrap();
        assert_eq!(constraint.shape.num_values, 9);
        assert_eq!(constraint.fixed_values.len(), 1);
        assert_eq!(constraint.fixed_values[0], (0, CellValue::from_display_value(4)));
        assert!(!constraint.sudoku_x);
        assert!(constraint.regions.is_none());
    }

    #[test]
    fn grid_layout_with_large_values() {
        // A 16x16 grid: 255 empty cells and one 12.
        let mut parts = vec!["."; 256];
        parts[10] = "12";
        let input = parts.join(" ");
        let constraint = parse_text(&input).unwrap();
        assert_eq!(constraint.shape.num_values, 16);
        assert_eq!(
            constraint.fixed_values[0],
            (10, CellValue::from_display_value(12))
        );
    }

    #[test]
    fn sudoku_x_flag_is_extracted() {
        let input = format!("sudoku-x\n{}", ".".repeat(81));
        let constraint = parse_text(&input).unwrap();
        assert!(constraint.sudoku_x);
    }

    #[test]
    fn region_map_is_parsed() {
        let mut map = String::new();
        for band in 0..3 {
            for _ in 0..3 {
                for stack in 0..3 {
                    let label = (b'a' + band * 3 + stack) as char;
                    map.push_str(&label.to_string().repeat(3));
                }
            }
        }
        let input = format!("regions: {}\n{}", map, ".".repeat(81));
        let constraint = parse_text(&input).unwrap();
        let regions = constraint.regions.unwrap();
        assert_eq!(regions.len(), 9);
        // First region is the top-left box.
        assert_eq!(regions[0], vec![0, 1, 2, 9, 10, 11, 18, 19, 20]);
    }

    #[test]
    fn bad_region_sizes_are_rejected() {
        let map = "a".repeat(80) + "b";
        let input = format!("regions: {}\n{}", map, ".".repeat(81));
        assert_eq!(
            parse_text(&input).unwrap_err(),
            ParseError::BadRegionSize('a')
        );
    }

    #[test]
    fn bad_cell_counts_are_rejected() {
        assert!(matches!(
            parse_text(&".".repeat(80)),
            Err(ParseError::NoMatch(_))
        ));
    }
}
