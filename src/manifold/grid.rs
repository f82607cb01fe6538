//! Grid helpers shared by the grid-physics and adaptive-grid families.

pub type Grid = Vec<Vec<i64>>;

/// (rows, cols) of a grid; cols of the first row for ragged input.
pub fn shape(grid: &Grid) -> (usize, usize) {
    let rows = grid.len();
    let cols = grid.first().map(|r| r.len()).unwrap_or(0);
    (rows, cols)
}

pub fn is_rectangular(grid: &Grid) -> bool {
    let (_, cols) = shape(grid);
    grid.iter().all(|row| row.len() == cols)
}

/// Parse a grid from JSON text: either a bare 2D array or any JSON value that
/// is one.
pub fn parse_grid(text: &str) -> Option<Grid> {
    let value: serde_json::Value = serde_json::from_str(text.trim()).ok()?;
    grid_from_value(&value)
}

pub fn grid_from_value(value: &serde_json::Value) -> Option<Grid> {
    let rows = value.as_array()?;
    let mut grid = Grid::with_capacity(rows.len());
    for row in rows {
        let cells = row.as_array()?;
        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            out.push(cell.as_i64()?);
        }
        grid.push(out);
    }
    Some(grid)
}

/// Scan text for the first parseable JSON object or array. Used as the
/// fallback extraction heuristic when a model ignores the envelope contract.
pub fn extract_first_json_block(text: &str) -> Option<serde_json::Value> {
    let bytes = text.as_bytes();
    for start_char in [b'{', b'['] {
        let mut start = 0usize;
        while let Some(offset) = bytes[start..].iter().position(|&b| b == start_char) {
            let begin = start + offset;
            for end in (begin + 1..=text.len()).rev() {
                if !text.is_char_boundary(end) {
                    continue;
                }
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text[begin..end]) {
                    return Some(value);
                }
            }
            start = begin + 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grid() {
        let grid = parse_grid("[[0,1],[2,3]]").unwrap();
        assert_eq!(grid, vec![vec![0, 1], vec![2, 3]]);
        assert_eq!(shape(&grid), (2, 2));
        assert!(is_rectangular(&grid));
        assert!(parse_grid("not json").is_none());
        assert!(parse_grid("[[0,\"x\"]]").is_none());
    }

    #[test]
    fn test_ragged_grid_detected() {
        let ragged = vec![vec![0, 1], vec![2]];
        assert!(!is_rectangular(&ragged));
    }

    #[test]
    fn test_extract_first_json_block() {
        let text = "Sure! Here is the answer: {\"grid\": [[1,2]]} hope it helps";
        let value = extract_first_json_block(text).unwrap();
        assert_eq!(value["grid"][0][1], 2);
        assert!(extract_first_json_block("nothing here").is_none());
    }
}
