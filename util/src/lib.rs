use nalgebra::DMatrix;

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

/// Approx assertion for tables, comparing shapes and then each entity matrix.
#[macro_export]
macro_rules! assert_approx_table_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let (x, y) = (&$x, &$y);
        assert_eq!(x.shape(), y.shape(), "Table shapes differ.");
        for (x_entity, y_entity) in x.entities().iter().zip(y.entities()) {
            $crate::assert_approx_matrix_eq!(x_entity, y_entity, abstol = $tol);
        }
    }};
}

/// Builds one matrix per entity from row-major entity values.
pub fn entity_matrices(num_rows: usize, num_cols: usize, entities: &[&[f64]]) -> Vec<DMatrix<f64>> {
    entities
        .iter()
        .map(|values| DMatrix::from_row_slice(num_rows, num_cols, values))
        .collect()
}
