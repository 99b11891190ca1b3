//! Value generators for synthetic forcing grids.
//!
//! Every generator is a pure function of (variable, time step, row, col)
//! so tests can compute the expected value of any cell directly.

/// Signature shared by all generators.
pub type ValueFn = dyn Fn(&str, usize, usize, usize) -> f32 + Send + Sync;

/// `col * 1000 + row`, the same for every variable and step.
///
/// ```
/// use test_utils::indexed_value;
///
/// assert_eq!(indexed_value("T2D", 0, 0, 0), 0.0);
/// assert_eq!(indexed_value("T2D", 5, 2, 1), 1002.0);
/// ```
pub fn indexed_value(_variable: &str, _step: usize, row: usize, col: usize) -> f32 {
    (col * 1000 + row) as f32
}

/// `step * 100 + row * 10 + col`, handy for checking time ordering.
pub fn stepped_value(_variable: &str, step: usize, row: usize, col: usize) -> f32 {
    (step * 100 + row * 10 + col) as f32
}

/// Creates a row-major test grid with `generator` evaluated at every cell.
pub fn create_test_grid(
    rows: usize,
    cols: usize,
    generator: impl Fn(usize, usize) -> f32,
) -> Vec<f32> {
    let mut data = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            data.push(generator(row, col));
        }
    }
    data
}

/// Temperature-like field in Kelvin, 250K top-left to 310K bottom-right.
pub fn temperature_value(_variable: &str, _step: usize, row: usize, col: usize) -> f32 {
    250.0 + (col as f32 * 3.0) + (row as f32 * 3.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_grid() {
        let grid = create_test_grid(2, 3, |r, c| indexed_value("x", 0, r, c));
        assert_eq!(grid, vec![0.0, 1000.0, 2000.0, 1.0, 1001.0, 2001.0]);
    }

    #[test]
    fn test_stepped_value_distinguishes_steps() {
        assert_ne!(stepped_value("x", 0, 1, 1), stepped_value("x", 1, 1, 1));
    }
}
