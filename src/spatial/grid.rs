use crate::core::geo::Point;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Integer cell coordinates in a uniform Web Mercator grid.
///
/// Ordered by `x` then `y`, which fixes the visiting order of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub x: i64,
    pub y: i64,
}

impl CellKey {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Uniform grid with square cells measured in projected meters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub cell_size_meters: f64,
}

impl GridSpec {
    pub fn new(cell_size_meters: f64) -> Self {
        Self { cell_size_meters }
    }

    /// Cell containing a projected point
    pub fn cell_for(&self, point: &Point) -> CellKey {
        CellKey::new(
            (point.x / self.cell_size_meters).floor() as i64,
            (point.y / self.cell_size_meters).floor() as i64,
        )
    }

    /// Grid with doubled cells, capped at `max_size`.
    ///
    /// Returns `None` when the cells cannot grow any further.
    pub fn coarsened(&self, max_size: f64) -> Option<GridSpec> {
        if self.cell_size_meters >= max_size {
            return None;
        }
        Some(GridSpec::new((self.cell_size_meters * 2.0).min(max_size)))
    }

    /// Group items by cell. Items keep their input order within a cell.
    pub fn bucket<'a, T>(
        &self,
        items: impl IntoIterator<Item = &'a (Point, T)>,
    ) -> BTreeMap<CellKey, Vec<&'a T>>
    where
        T: 'a,
    {
        let mut cells: BTreeMap<CellKey, Vec<&'a T>> = BTreeMap::new();
        for (point, item) in items {
            cells.entry(self.cell_for(point)).or_default().push(item);
        }
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_for_floors_negative_coordinates() {
        let grid = GridSpec::new(100.0);
        assert_eq!(grid.cell_for(&Point::new(50.0, 150.0)), CellKey::new(0, 1));
        assert_eq!(grid.cell_for(&Point::new(-0.5, -100.0)), CellKey::new(-1, -1));
        assert_eq!(grid.cell_for(&Point::new(-100.5, 0.0)), CellKey::new(-2, 0));
    }

    #[test]
    fn test_coarsened_stops_at_max() {
        let grid = GridSpec::new(300.0);
        let next = grid.coarsened(500.0).unwrap();
        assert_eq!(next.cell_size_meters, 500.0);
        assert!(next.coarsened(500.0).is_none());
    }

    #[test]
    fn test_bucket_groups_in_sorted_cell_order() {
        let grid = GridSpec::new(10.0);
        let items = vec![
            (Point::new(25.0, 5.0), 'a'),
            (Point::new(-5.0, 5.0), 'b'),
            (Point::new(21.0, 9.0), 'c'),
        ];
        let cells = grid.bucket(&items);
        let keys: Vec<_> = cells.keys().copied().collect();
        assert_eq!(keys, vec![CellKey::new(-1, 0), CellKey::new(2, 0)]);
        assert_eq!(cells[&CellKey::new(2, 0)], vec![&'a', &'c']);
    }
}
