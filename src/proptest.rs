//! Strategies for property-based testing.
use crate::integral::IntegralType;
use crate::tables::{Table, TableType};
use ::proptest::collection::vec;
use ::proptest::prelude::*;
use nalgebra::DMatrix;

impl Arbitrary for TableType {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    /// Types of tables of modified terminals. Generated block table types are left out.
    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        prop_oneof![
            Just(TableType::Zeros),
            Just(TableType::Ones),
            Just(TableType::Fixed),
            Just(TableType::Piecewise),
            Just(TableType::Uniform),
            Just(TableType::Varying),
            Just(TableType::Quadrature),
        ]
        .boxed()
    }
}

impl Arbitrary for IntegralType {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        prop_oneof![
            Just(IntegralType::Cell),
            Just(IntegralType::ExteriorFacet),
            Just(IntegralType::InteriorFacet),
            Just(IntegralType::Vertex),
            Just(IntegralType::Custom),
            Just(IntegralType::Expression),
        ]
        .boxed()
    }
}

/// Argument table types of a monomial, excluding `zeros` which never survive factorization.
pub fn argument_table_types(max_rank: usize) -> impl Strategy<Value = Vec<TableType>> {
    vec(
        any::<TableType>().prop_filter("Arguments never have zero tables", |ttype| *ttype != TableType::Zeros),
        0..=max_rank,
    )
}

/// Tables with up to the given number of entities, rows and columns, with values in `[-1, 1]`.
pub fn table(max_entities: usize, max_rows: usize, max_cols: usize) -> impl Strategy<Value = Table> {
    (1..=max_entities.max(1), 1..=max_rows.max(1), 1..=max_cols.max(1)).prop_flat_map(
        |(num_entities, num_rows, num_cols)| {
            vec(vec(-1.0..=1.0, num_rows * num_cols), num_entities).prop_map(move |entities| {
                let entities = entities
                    .into_iter()
                    .map(|values| DMatrix::from_row_slice(num_rows, num_cols, &values))
                    .collect();
                Table::from_entities(entities)
            })
        },
    )
}
