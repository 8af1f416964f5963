use std::collections::HashMap;

use crate::types::CellIndex;

/// Precomputed mutual-exclusion graph: for each cell, the cells that must
/// take a different value. Handlers query it during initialization; the
/// pair and tuple intersections are cached on first use.
pub struct CellExclusions {
    exclusions: Vec<Vec<CellIndex>>,
    pair_cache: HashMap<(CellIndex, CellIndex), Vec<CellIndex>>,
    list_cache: HashMap<Vec<CellIndex>, Vec<CellIndex>>,
}

impl CellExclusions {
    /// Build the graph from the exclusion sets of every handler. Each set
    /// makes its members pairwise mutually exclusive.
    pub fn new<'a, I>(num_cells: usize, exclusion_sets: I) -> CellExclusions
    where
        I: IntoIterator<Item = &'a [CellIndex]>,
    {
        let mut exclusions = vec![Vec::new(); num_cells];
        for set in exclusion_sets {
            for &c0 in set {
                for &c1 in set {
                    if c0 != c1 {
                        exclusions[c0].push(c1);
                    }
                }
            }
        }

        for cells in &mut exclusions {
            cells.sort_unstable();
            cells.dedup();
        }

        CellExclusions {
            exclusions,
            pair_cache: HashMap::new(),
            list_cache: HashMap::new(),
        }
    }

    /// Sorted cells which must differ from `cell`.
    pub fn exclusions(&self, cell: CellIndex) -> &[CellIndex] {
        &self.exclusions[cell]
    }

    pub fn are_mutually_exclusive(&self, c0: CellIndex, c1: CellIndex) -> bool {
        self.exclusions[c0].binary_search(&c1).is_ok()
    }

    /// Cells mutually exclusive with both `c0` and `c1`. Cached.
    pub fn pair_exclusions(&mut self, c0: CellIndex, c1: CellIndex) -> &[CellIndex] {
        let key = (c0.min(c1), c0.max(c1));
        if !self.pair_cache.contains_key(&key) {
            let intersection =
                sorted_intersection(&self.exclusions[key.0], &self.exclusions[key.1]);
            self.pair_cache.insert(key, intersection);
        }
        &self.pair_cache[&key]
    }

    /// Cells mutually exclusive with every cell in `cells`. Cached.
    pub fn list_exclusions(&mut self, cells: &[CellIndex]) -> &[CellIndex] {
        let mut key = cells.to_vec();
        key.sort_unstable();
        key.dedup();
        if !self.list_cache.contains_key(&key) {
            let intersection = match key.first() {
                None => Vec::new(),
                Some(&first) => {
                    let mut result = self.exclusions[first].clone();
                    for &cell in &key[1..] {
                        result = sorted_intersection(&result, &self.exclusions[cell]);
                    }
                    result
                }
            };
            self.list_cache.insert(key.clone(), intersection);
        }
        &self.list_cache[&key]
    }
}

fn sorted_intersection(v0: &[CellIndex], v1: &[CellIndex]) -> Vec<CellIndex> {
    let mut result = Vec::new();
    let mut iter = v1.iter().peekable();
    for &cell in v0 {
        while iter.next_if(|&&other| other < cell).is_some() {}
        if iter.peek() == Some(&&cell) {
            result.push(cell);
        }
    }
    result
}
