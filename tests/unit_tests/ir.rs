use crate::{
    cell_integral, coefficient, constant_table, quadrature_rule, quadrature_rules, table, test_function,
    trial_function,
};
use formir::blocks::{BlockContribution, BlockMode, DofBlock};
use formir::expr::{Expr, FiniteElement, Restriction, ScalarOp, Terminal};
use formir::factorization::{ArgumentFactorizer, Factorization, MonomialFactorizer};
use formir::graph::{ScalarGraph, Vertex};
use formir::integral::{Cell, EntityType, IntegralType};
use formir::quadrature::QuadratureRules;
use formir::tables::{TableType, TabulatedTables};
use formir::{build_integral_ir, build_integral_ir_with, FormError, IntegralData, IntegralIr, Integrands, Parameters};
use matrixcompare::assert_matrix_eq;
use nalgebra::DMatrix;
use std::cell::Cell as CallCount;
use std::collections::BTreeMap;

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn table_names(ir: &IntegralIr) -> Vec<&str> {
    ir.unique_tables.keys().map(String::as_str).collect()
}

/// Point-independent P0-like tables with values `[2, 3]` for the test function and `[5, 7]`
/// for the trial function.
fn mass_matrix_tables(tables: TabulatedTables, num_points: usize) -> TabulatedTables {
    tables
        .with_table(Some(num_points), &test_function(), "FE_V", constant_table(num_points, &[2.0, 3.0]))
        .unwrap()
        .with_table(Some(num_points), &trial_function(), "FE_U", constant_table(num_points, &[5.0, 7.0]))
        .unwrap()
}

/// Table varying over two points for coefficient 0.
fn varying_coefficient_tables(tables: TabulatedTables) -> TabulatedTables {
    tables
        .with_table(Some(2), &coefficient(0), "FE_F", table(2, 2, &[&[1.0, 0.0, 0.0, 1.0]]))
        .unwrap()
}

fn build(data: &IntegralData, rules: &QuadratureRules, tables: &TabulatedTables) -> Result<IntegralIr, FormError> {
    build_integral_ir(data, rules, tables, &Parameters::default())
}

fn mass_matrix_block() -> DofBlock {
    vec![(0, 2), (0, 2)]
}

#[test]
fn constant_functional_gives_single_full_block() {
    let data = cell_integral(vec![(1, Expr::one())], vec![]);
    let rules = quadrature_rules(vec![quadrature_rule(&[0.5])]);
    let ir = build(&data, &rules, &TabulatedTables::new()).unwrap();

    assert_eq!(ir.all_num_points, vec![Some(1)]);
    assert!(ir.expect_weight);
    assert!(ir.piecewise_ir.block_contributions.is_empty());
    assert!(ir.unique_tables.is_empty());

    let expr_ir = &ir.varying_irs[&Some(1)];
    assert_eq!(expr_ir.block_mode_counts(), BTreeMap::from([(BlockMode::Full, 1)]));
    let scalar_block: DofBlock = vec![];
    match &expr_ir.block_contributions[&scalar_block][..] {
        [BlockContribution::Full { common, ma_data }] => {
            assert!(ma_data.is_empty());
            assert!(common.factor_is_piecewise);
            assert!(common.table_names.is_empty());
            assert_eq!(
                ir.piecewise_ir.vertices()[common.factor_index].as_literal(),
                Some(1.0)
            );
        }
        other => panic!("Unexpected contributions {:?}", other),
    }
    assert!(expr_ir.need_weights);
    assert!(!expr_ir.need_points);
}

#[test]
fn mass_matrix_is_preintegrated() {
    let (v, u) = (test_function(), trial_function());
    let data = cell_integral(vec![(1, &u * &v)], vec![2, 2]);
    let rules = quadrature_rules(vec![quadrature_rule(&[0.5])]);
    let tables = mass_matrix_tables(TabulatedTables::new(), 1);
    let ir = build(&data, &rules, &tables).unwrap();

    let pir = &ir.piecewise_ir;
    assert_eq!(
        pir.preintegrated_blocks,
        BTreeMap::from([(names(&["FE_V", "FE_U"]), "PI0".to_string())])
    );
    match &pir.block_contributions[&mass_matrix_block()][..] {
        [BlockContribution::Preintegrated { common, name }] => {
            assert_eq!(name, "PI0");
            assert_eq!(common.block_mode, BlockMode::Preintegrated);
            assert_eq!(common.ttypes, vec![TableType::Fixed, TableType::Fixed]);
            assert_eq!(common.table_names, names(&["PI0"]));
            assert_eq!(common.restrictions, vec![None, None]);
            assert!(common.factor_is_piecewise);
        }
        other => panic!("Unexpected contributions {:?}", other),
    }
    assert_eq!(pir.modified_arguments().len(), 2);

    let expr_ir = &ir.varying_irs[&Some(1)];
    assert!(expr_ir.block_contributions.is_empty());
    assert!(!expr_ir.need_weights);
    assert!(!expr_ir.need_points);

    // Argument tables are only read by the preintegrated block
    assert_eq!(table_names(&ir), vec!["PI0"]);
    let expected = DMatrix::from_row_slice(2, 2, &[5.0, 7.0, 7.5, 10.5]);
    assert_matrix_eq!(ir.unique_tables["PI0"].entity(0).clone(), expected, comp = abs, tol = 1e-12);
    assert_eq!(ir.unique_tables["PI0"].shape(), (1, 2, 2));
    assert_eq!(ir.unique_table_types["PI0"], TableType::Preintegrated);
    assert_eq!(ir.unique_table_types["FE_V"], TableType::Fixed);
    assert_eq!(ir.unique_table_types["FE_U"], TableType::Fixed);
}

#[test]
fn explicit_quadrature_weight_is_folded_away() {
    let (v, u) = (test_function(), trial_function());
    let rules = quadrature_rules(vec![quadrature_rule(&[0.5])]);
    let tables = mass_matrix_tables(TabulatedTables::new(), 1);

    let implicit = build(&cell_integral(vec![(1, &u * &v)], vec![2, 2]), &rules, &tables).unwrap();
    let weighted = &u * &v * Expr::quadrature_weight();
    let explicit = build(&cell_integral(vec![(1, weighted)], vec![2, 2]), &rules, &tables).unwrap();

    assert_eq!(explicit.unique_tables, implicit.unique_tables);
    assert_eq!(
        explicit.piecewise_ir.block_contributions,
        implicit.piecewise_ir.block_contributions
    );
    assert_eq!(explicit.varying_irs, implicit.varying_irs);
}

#[test]
fn preintegrated_tables_are_shared_between_rules() {
    let (v, u) = (test_function(), trial_function());
    let data = cell_integral(vec![(1, &u * &v), (2, &u * &v)], vec![2, 2]);
    let rules = quadrature_rules(vec![quadrature_rule(&[0.5]), quadrature_rule(&[0.25, 0.25])]);
    let tables = mass_matrix_tables(mass_matrix_tables(TabulatedTables::new(), 1), 2);
    let ir = build(&data, &rules, &tables).unwrap();

    assert_eq!(ir.all_num_points, vec![Some(1), Some(2)]);
    let pir = &ir.piecewise_ir;
    assert_eq!(pir.preintegrated_blocks.len(), 1);
    let contributions = &pir.block_contributions[&mass_matrix_block()];
    assert_eq!(contributions.len(), 2);
    assert!(contributions
        .iter()
        .all(|c| c.referenced_table_names() == vec!["PI0"]));

    // The factor and the modified arguments are stored once
    assert_eq!(pir.vertices().len(), 1);
    assert_eq!(pir.modified_arguments().len(), 2);
    assert_eq!(table_names(&ir), vec!["PI0"]);
}

#[test]
fn commuted_piecewise_factors_are_stored_once() {
    let (v, u) = (test_function(), trial_function());
    let c0 = Expr::coefficient(0, FiniteElement::lagrange(0));
    let c1 = Expr::coefficient(1, FiniteElement::lagrange(0));
    let data = cell_integral(
        vec![
            (1, (&c0 + &c1) * u.clone() * v.clone()),
            (2, (&c1 + &c0) * u.clone() * v.clone()),
        ],
        vec![2, 2],
    );
    let rules = quadrature_rules(vec![quadrature_rule(&[0.5]), quadrature_rule(&[0.25, 0.25])]);
    let tables = mass_matrix_tables(mass_matrix_tables(TabulatedTables::new(), 1), 2);
    let ir = build(&data, &rules, &tables).unwrap();

    let pir = &ir.piecewise_ir;
    let sums: Vec<_> = pir
        .vertices()
        .iter()
        .filter(|vertex| matches!(vertex, Vertex::Operator { op: ScalarOp::Sum, .. }))
        .collect();
    assert_eq!(sums.len(), 1, "Piecewise vertices: {:?}", pir.vertices());
    assert_eq!(pir.vertices().len(), 3);

    // Both rules scale the same preintegrated table by the same factor
    let contributions = &pir.block_contributions[&mass_matrix_block()];
    assert_eq!(contributions.len(), 2);
    assert_eq!(contributions[0].common().factor_index, contributions[1].common().factor_index);
    assert_eq!(pir.preintegrated_blocks.len(), 1);
}

#[test]
fn preintegrated_tables_are_named_in_monomial_order() {
    let (v, u) = (test_function(), trial_function());
    let third = 1.0 / 3.0;
    let mut tables = TabulatedTables::new();
    for argument in [&v, &u] {
        tables.insert(Some(1), argument, "FE_P1", constant_table(1, &[third; 3])).unwrap();
        let dx = argument.grad(2).index(&[0]);
        tables.insert(Some(1), &dx, "FE_D0", constant_table(1, &[-1.0, 1.0, 0.0])).unwrap();
        let dy = argument.grad(2).index(&[1]);
        tables.insert(Some(1), &dy, "FE_D1", constant_table(1, &[-1.0, 0.0, 1.0])).unwrap();
    }
    let integrand = Expr::inner(&u.grad(2), &v.grad(2)) + &u * &v;
    let data = cell_integral(vec![(1, integrand)], vec![3, 3]);
    let rules = quadrature_rules(vec![quadrature_rule(&[0.5])]);
    let ir = build(&data, &rules, &tables).unwrap();

    let pir = &ir.piecewise_ir;
    assert_eq!(pir.preintegrated_blocks[&names(&["FE_P1", "FE_P1"])], "PI0");
    assert_eq!(pir.preintegrated_blocks[&names(&["FE_D0", "FE_D0"])], "PI1");
    assert_eq!(pir.preintegrated_blocks[&names(&["FE_D1", "FE_D1"])], "PI2");
    assert_eq!(pir.block_mode_counts(), BTreeMap::from([(BlockMode::Preintegrated, 3)]));

    // Trailing zero dofs of the x-derivative are stripped
    assert_eq!(pir.block_contributions[&vec![(0, 2), (0, 2)]].len(), 1);
    assert_eq!(pir.block_contributions[&vec![(0, 3), (0, 3)]].len(), 2);
    let expected = DMatrix::from_row_slice(2, 2, &[0.5, -0.5, -0.5, 0.5]);
    assert_matrix_eq!(ir.unique_tables["PI1"].entity(0).clone(), expected, comp = abs, tol = 1e-12);
}

#[test]
fn safe_mode_integrates_everything_at_runtime() {
    let (v, u) = (test_function(), trial_function());
    let data = cell_integral(vec![(1, &u * &v)], vec![2, 2]);
    let rules = quadrature_rules(vec![quadrature_rule(&[0.5])]);
    let tables = mass_matrix_tables(TabulatedTables::new(), 1);
    let parameters = Parameters::default().with_preintegration(false);
    let ir = build_integral_ir(&data, &rules, &tables, &parameters).unwrap();

    assert!(ir.piecewise_ir.block_contributions.is_empty());
    assert!(ir.piecewise_ir.preintegrated_blocks.is_empty());
    let expr_ir = &ir.varying_irs[&Some(1)];
    match &expr_ir.block_contributions[&mass_matrix_block()][..] {
        [BlockContribution::Full { common, ma_data }] => {
            assert_eq!(common.block_mode, BlockMode::Safe);
            assert_eq!(common.table_names, names(&["FE_V", "FE_U"]));
            let ma_indices: Vec<_> = ma_data.iter().map(|data| data.ma_index).collect();
            assert_eq!(ma_indices, vec![0, 1]);
            assert!(ma_data.iter().all(|data| data.table_data.is_piecewise));
        }
        other => panic!("Unexpected contributions {:?}", other),
    }
    assert!(expr_ir.need_weights);
    assert_eq!(table_names(&ir), vec!["FE_U", "FE_V"]);
}

#[test]
fn terminals_with_zero_tables_are_eliminated() {
    let (v, u) = (test_function(), trial_function());
    let integrand = &u * &v + coefficient(0) * u.clone() * v.clone();
    let data = cell_integral(vec![(1, integrand)], vec![2, 2]);
    let rules = quadrature_rules(vec![quadrature_rule(&[0.5])]);
    let tables = mass_matrix_tables(TabulatedTables::new(), 1)
        .with_table(Some(1), &coefficient(0), "FE_F", constant_table(1, &[0.0, 0.0]))
        .unwrap();
    let ir = build(&data, &rules, &tables).unwrap();

    assert_eq!(ir.unique_table_types["FE_F"], TableType::Zeros);
    assert_eq!(table_names(&ir), vec!["PI0"]);
    assert_eq!(
        ir.piecewise_ir.block_mode_counts(),
        BTreeMap::from([(BlockMode::Preintegrated, 1)])
    );
    let expected = DMatrix::from_row_slice(2, 2, &[5.0, 7.0, 7.5, 10.5]);
    assert_matrix_eq!(ir.unique_tables["PI0"].entity(0).clone(), expected, comp = abs, tol = 1e-12);
}

#[test]
fn arguments_with_zero_tables_remove_their_monomials() {
    let (v, u) = (test_function(), trial_function());
    let data = cell_integral(vec![(1, &u * &v)], vec![2, 2]);
    let rules = quadrature_rules(vec![quadrature_rule(&[0.5])]);
    let tables = TabulatedTables::new()
        .with_table(Some(1), &v, "FE_V", constant_table(1, &[0.0, 0.0]))
        .unwrap()
        .with_table(Some(1), &u, "FE_U", constant_table(1, &[5.0, 7.0]))
        .unwrap();
    let ir = build(&data, &rules, &tables).unwrap();

    assert!(ir.piecewise_ir.block_contributions.is_empty());
    let expr_ir = &ir.varying_irs[&Some(1)];
    assert!(expr_ir.block_contributions.is_empty());
    assert!(!expr_ir.need_weights);
    assert!(ir.unique_tables.is_empty());
}

#[test]
fn conflicting_tables_between_rules_are_rejected() {
    let v = test_function();
    let data = cell_integral(vec![(1, v.clone()), (2, v.clone())], vec![2]);
    let rules = quadrature_rules(vec![quadrature_rule(&[0.5]), quadrature_rule(&[0.25, 0.25])]);
    let tables = TabulatedTables::new()
        .with_table(Some(1), &v, "FE_V", constant_table(1, &[2.0, 3.0]))
        .unwrap()
        .with_table(Some(2), &v, "FE_V", constant_table(2, &[4.0, 5.0]))
        .unwrap();
    let parameters = Parameters::default().with_preintegration(false);

    match build_integral_ir(&data, &rules, &tables, &parameters) {
        Err(FormError::TableMismatch { name }) => assert_eq!(name, "FE_V"),
        other => panic!("Expected table mismatch, got {:?}", other.map(|ir| ir.all_num_points)),
    }
}

#[test]
fn interior_facet_blocks_are_partial_with_restrictions() {
    let (v, u) = (test_function(), trial_function());
    let v_minus = v.restricted(Restriction::Minus);
    let u_plus = u.restricted(Restriction::Plus);
    let data = IntegralData {
        cell: Cell::triangle(),
        integral_type: IntegralType::InteriorFacet,
        entity_type: EntityType::Facet,
        integrands: Integrands::Quadrature(BTreeMap::from([(1, &u_plus * &v_minus)])),
        tensor_shape: vec![2, 2],
        coefficient_numbering: BTreeMap::new(),
    };
    let rules = quadrature_rules(vec![quadrature_rule(&[1.0])]);
    let tables = TabulatedTables::new()
        .with_table(Some(1), &v_minus, "FE_V", table(1, 2, &[&[1.0, 2.0], &[3.0, 4.0], &[5.0, 6.0]]))
        .unwrap()
        .with_table(Some(1), &u_plus, "FE_U", table(1, 2, &[&[1.0, 1.0], &[2.0, 2.0], &[3.0, 3.0]]))
        .unwrap();
    let ir = build(&data, &rules, &tables).unwrap();

    assert!(ir.expect_weight);
    assert!(ir.piecewise_ir.block_contributions.is_empty());
    let expr_ir = &ir.varying_irs[&Some(1)];
    match &expr_ir.block_contributions[&mass_matrix_block()][..] {
        [BlockContribution::Partial {
            common,
            ma_data,
            piecewise_ma_index,
        }] => {
            assert_eq!(*piecewise_ma_index, 0);
            assert_eq!(common.table_names, names(&["FE_U"]));
            assert_eq!(common.ttypes, vec![TableType::Piecewise, TableType::Piecewise]);
            assert_eq!(
                common.restrictions,
                vec![Some(Restriction::Minus), Some(Restriction::Plus)]
            );
            assert_eq!(ma_data.len(), 2);
        }
        other => panic!("Unexpected contributions {:?}", other),
    }
    assert!(expr_ir.need_weights);
    assert_eq!(table_names(&ir), vec!["FE_U", "FE_V"]);
    assert_eq!(ir.unique_tables["FE_V"].shape(), (3, 1, 2));
}

#[test]
fn varying_factor_with_piecewise_arguments_is_premultiplied() {
    let (v, u) = (test_function(), trial_function());
    let data = cell_integral(vec![(2, coefficient(0) * u.clone() * v.clone())], vec![2, 2]);
    let rules = quadrature_rules(vec![quadrature_rule(&[0.25, 0.25])]);
    let tables = varying_coefficient_tables(mass_matrix_tables(TabulatedTables::new(), 2));
    let ir = build(&data, &rules, &tables).unwrap();

    assert_eq!(
        ir.piecewise_ir.premultiplied_blocks,
        BTreeMap::from([(names(&["FE_V", "FE_U"]), "PM0".to_string())])
    );
    let expr_ir = &ir.varying_irs[&Some(2)];
    match &expr_ir.block_contributions[&mass_matrix_block()][..] {
        [BlockContribution::Premultiplied { common, name }] => {
            assert_eq!(name, "PM0");
            assert!(!common.factor_is_piecewise);
            assert!(expr_ir.varying[common.factor_index]);
            assert_eq!(expr_ir.vertices[common.factor_index], Vertex::Terminal(coefficient(0)));
        }
        other => panic!("Unexpected contributions {:?}", other),
    }
    assert!(expr_ir.need_weights);

    assert_eq!(table_names(&ir), vec!["FE_F", "PM0"]);
    assert_eq!(ir.unique_table_types["FE_F"], TableType::Uniform);
    assert_eq!(ir.unique_table_types["PM0"], TableType::Premultiplied);
    let expected = DMatrix::from_row_slice(2, 2, &[10.0, 14.0, 15.0, 21.0]);
    assert_matrix_eq!(ir.unique_tables["PM0"].entity(0).clone(), expected, comp = abs, tol = 1e-12);
}

#[test]
fn one_varying_argument_gives_partial_block() {
    let (v, u) = (test_function(), trial_function());
    let data = cell_integral(vec![(2, coefficient(0) * u.clone() * v.clone())], vec![2, 2]);
    let rules = quadrature_rules(vec![quadrature_rule(&[0.25, 0.25])]);
    let tables = varying_coefficient_tables(TabulatedTables::new())
        .with_table(Some(2), &v, "FE_V", constant_table(2, &[2.0, 3.0]))
        .unwrap()
        .with_table(Some(2), &u, "FE_U", table(2, 2, &[&[1.0, 2.0, 3.0, 4.0]]))
        .unwrap();
    let ir = build(&data, &rules, &tables).unwrap();

    let expr_ir = &ir.varying_irs[&Some(2)];
    match &expr_ir.block_contributions[&mass_matrix_block()][..] {
        [BlockContribution::Partial {
            common,
            ma_data,
            piecewise_ma_index,
        }] => {
            assert_eq!(*piecewise_ma_index, 0);
            assert_eq!(common.table_names, names(&["FE_U"]));
            assert_eq!(common.ttypes, vec![TableType::Fixed, TableType::Uniform]);
            assert!(ma_data[0].table_data.is_piecewise);
            assert!(!ma_data[1].table_data.is_piecewise);
            assert_eq!(ma_data[1].ma_index, 1);
        }
        other => panic!("Unexpected contributions {:?}", other),
    }
    assert_eq!(table_names(&ir), vec!["FE_F", "FE_U", "FE_V"]);
}

#[test]
fn reference_coordinates_require_points_in_cell_integrals() {
    let v = test_function();
    let x = Expr::terminal(Terminal::CellCoordinate { tdim: 2 }).index(&[0]);
    let rules = quadrature_rules(vec![quadrature_rule(&[0.5])]);
    let tables = TabulatedTables::new()
        .with_table(Some(1), &v, "FE_V", constant_table(1, &[2.0, 3.0]))
        .unwrap();

    let data = cell_integral(vec![(1, &x * &v)], vec![2]);
    let ir = build(&data, &rules, &tables).unwrap();
    let expr_ir = &ir.varying_irs[&Some(1)];
    assert!(expr_ir.need_points);
    assert_eq!(
        expr_ir.block_mode_counts(),
        BTreeMap::from([(BlockMode::Premultiplied, 1)])
    );

    let facet_data = IntegralData {
        integral_type: IntegralType::ExteriorFacet,
        entity_type: EntityType::Facet,
        ..data
    };
    let ir = build(&facet_data, &rules, &tables).unwrap();
    assert!(!ir.varying_irs[&Some(1)].need_points);
}

#[test]
fn expression_integrals_are_built_without_quadrature() {
    let data = IntegralData {
        cell: Cell::triangle(),
        integral_type: IntegralType::Expression,
        entity_type: EntityType::Cell,
        integrands: Integrands::Expression(vec![coefficient(0) * coefficient(1)]),
        tensor_shape: vec![],
        coefficient_numbering: BTreeMap::from([(0, 3), (1, 5)]),
    };
    let ir = build(&data, &QuadratureRules::new(), &TabulatedTables::new()).unwrap();

    assert_eq!(ir.all_num_points, vec![None]);
    assert!(!ir.expect_weight);
    assert_eq!(ir.coefficient_numbering, data.coefficient_numbering);
    let expr_ir = &ir.varying_irs[&None];
    assert_eq!(expr_ir.block_mode_counts(), BTreeMap::from([(BlockMode::Full, 1)]));
    assert!(!expr_ir.need_weights);
    assert!(!expr_ir.need_points);
}

#[test]
fn expressions_must_factorize_to_a_single_target() {
    let w = Expr::coefficient(0, FiniteElement::new("Lagrange", 1, vec![2]));
    let expression_data = |expressions: Vec<Expr>| IntegralData {
        cell: Cell::triangle(),
        integral_type: IntegralType::Expression,
        entity_type: EntityType::Cell,
        integrands: Integrands::Expression(expressions),
        tensor_shape: vec![],
        coefficient_numbering: BTreeMap::new(),
    };
    let rules = QuadratureRules::new();
    let tables = TabulatedTables::new();

    let vector_valued = expression_data(vec![w]);
    assert!(matches!(
        build(&vector_valued, &rules, &tables),
        Err(FormError::InconsistentForm(_))
    ));
    let two_expressions = expression_data(vec![coefficient(0), coefficient(1)]);
    assert!(matches!(
        build(&two_expressions, &rules, &tables),
        Err(FormError::InconsistentForm(_))
    ));
}

#[test]
fn inconsistent_inputs_are_rejected() {
    let (v, u) = (test_function(), trial_function());
    let rules = quadrature_rules(vec![quadrature_rule(&[0.5])]);

    // Expression integrands for a cell integral
    let data = IntegralData {
        integrands: Integrands::Expression(vec![Expr::one()]),
        ..cell_integral(vec![], vec![])
    };
    assert!(matches!(
        build(&data, &rules, &TabulatedTables::new()),
        Err(FormError::InconsistentForm(_))
    ));

    // Arguments without tables
    let data = cell_integral(vec![(1, &u * &v)], vec![2, 2]);
    assert!(matches!(
        build(&data, &rules, &TabulatedTables::new()),
        Err(FormError::InconsistentForm(_))
    ));

    // Rank of the integrand differs from the rank of the form
    let tables = mass_matrix_tables(TabulatedTables::new(), 1);
    let data = cell_integral(vec![(1, &u * &v)], vec![2]);
    assert!(matches!(
        build(&data, &rules, &tables),
        Err(FormError::InconsistentForm(_))
    ));

    // No rule to preintegrate with
    let tables = mass_matrix_tables(TabulatedTables::new(), 3);
    let data = cell_integral(vec![(3, &u * &v)], vec![2, 2]);
    assert!(matches!(
        build(&data, &rules, &tables),
        Err(FormError::InconsistentForm(_))
    ));
}

#[test]
fn table_provider_failures_are_reported() {
    let v = test_function();
    let data = cell_integral(vec![(2, v.clone())], vec![2]);
    let rules = quadrature_rules(vec![quadrature_rule(&[0.25, 0.25])]);
    let tables = TabulatedTables::new()
        .with_table(Some(2), &v, "FE_V", constant_table(3, &[2.0, 3.0]))
        .unwrap();
    assert!(matches!(
        build(&data, &rules, &tables),
        Err(FormError::TableService(_))
    ));
}

#[test]
fn construction_is_deterministic() {
    let (v, u) = (test_function(), trial_function());
    let data = cell_integral(
        vec![
            (1, &u * &v),
            (2, coefficient(0) * u.clone() * v.clone() + &u * &v),
        ],
        vec![2, 2],
    );
    let rules = quadrature_rules(vec![quadrature_rule(&[0.5]), quadrature_rule(&[0.25, 0.25])]);
    let tables = varying_coefficient_tables(mass_matrix_tables(mass_matrix_tables(TabulatedTables::new(), 1), 2));

    let first = build(&data, &rules, &tables).unwrap();
    let second = build(&data, &rules, &tables).unwrap();
    assert_eq!(first.varying_irs, second.varying_irs);
    assert_eq!(first.unique_tables, second.unique_tables);
    assert_eq!(first.unique_table_types, second.unique_table_types);
    assert_eq!(first.piecewise_ir.vertices(), second.piecewise_ir.vertices());
    assert_eq!(
        first.piecewise_ir.block_contributions,
        second.piecewise_ir.block_contributions
    );
    assert_eq!(
        first.piecewise_ir.preintegrated_blocks,
        second.piecewise_ir.preintegrated_blocks
    );
    assert_eq!(
        first.piecewise_ir.premultiplied_blocks,
        second.piecewise_ir.premultiplied_blocks
    );
    assert_eq!(table_names(&first), vec!["FE_F", "PI0", "PM0"]);
}

/// Factorizer counting how often it is invoked.
#[derive(Default)]
struct CountingFactorizer {
    calls: CallCount<usize>,
}

impl ArgumentFactorizer for CountingFactorizer {
    fn factorize(&self, graph: &ScalarGraph, rank: usize) -> Result<Factorization, FormError> {
        self.calls.set(self.calls.get() + 1);
        MonomialFactorizer.factorize(graph, rank)
    }
}

#[test]
fn custom_factorizers_are_invoked_once_per_rule() {
    let (v, u) = (test_function(), trial_function());
    let data = cell_integral(vec![(1, &u * &v), (2, &u * &v)], vec![2, 2]);
    let rules = quadrature_rules(vec![quadrature_rule(&[0.5]), quadrature_rule(&[0.25, 0.25])]);
    let tables = mass_matrix_tables(mass_matrix_tables(TabulatedTables::new(), 1), 2);
    let factorizer = CountingFactorizer::default();

    let ir = build_integral_ir_with(&data, &rules, &tables, &factorizer, &Parameters::default()).unwrap();
    assert_eq!(factorizer.calls.get(), 2);
    assert_eq!(ir.varying_irs.len(), 2);
}
