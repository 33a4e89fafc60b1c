//! Block modes of element tensor contributions and the tables computed for them.
use crate::config::Parameters;
use crate::error::FormError;
use crate::expr::Restriction;
use crate::integral::IntegralType;
use crate::tables::{Table, TableData, TableType};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Display, Formatter};

/// Strategy for computing the contribution of one argument monomial to the element tensor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockMode {
    /// `A[block] += f * P` with `P = sum_q w_q * prod_args table` computed ahead of time.
    Preintegrated,
    /// `A[block] += (sum_q w_q * f_q) * P` with `P = prod_args table` computed ahead of time.
    Premultiplied,
    /// `P[i] = sum_q w_q * f_q * u_q[i]` in the quadrature loop, `A[block] += P[i] * v[j]` after it.
    Partial,
    /// `A[block] += sum_q w_q * f_q * prod_args table_q` in the quadrature loop.
    Full,
    /// Same as `Full`, used when ahead of time integration is disabled.
    Safe,
}

impl BlockMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Preintegrated => "preintegrated",
            Self::Premultiplied => "premultiplied",
            Self::Partial => "partial",
            Self::Full => "full",
            Self::Safe => "safe",
        }
    }
}

impl Display for BlockMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Chooses the block mode of a monomial from the types of its argument tables.
///
/// Modes are tried in the order preintegrated, premultiplied, partial, full. The rank of the
/// monomial is the number of argument table types.
pub fn classify_block(
    ttypes: &[TableType],
    factor_is_piecewise: bool,
    integral_type: IntegralType,
    parameters: &Parameters,
) -> BlockMode {
    let rank = ttypes.len();
    if !parameters.enable_preintegration {
        BlockMode::Safe
    } else if factor_is_piecewise
        && rank > 0
        && !ttypes.contains(&TableType::Quadrature)
        && !integral_type.skips_preintegration()
    {
        BlockMode::Preintegrated
    } else if rank > 0 && ttypes.iter().all(TableType::is_piecewise) && !integral_type.skips_premultiplication() {
        BlockMode::Premultiplied
    } else if rank == 2 && ttypes.iter().any(TableType::is_piecewise) {
        BlockMode::Partial
    } else {
        BlockMode::Full
    }
}

/// A tuple of dof ranges, one per argument, addressing a block of the element tensor.
pub type DofBlock = Vec<(usize, usize)>;

/// Contributions to each block of the element tensor.
pub type BlockContributions = BTreeMap<DofBlock, Vec<BlockContribution>>;

/// Data shared by all block modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCommon {
    pub block_mode: BlockMode,
    pub ttypes: Vec<TableType>,
    /// Vertex computing the scalar factor, in the piecewise numbering if the factor is piecewise.
    pub factor_index: usize,
    pub factor_is_piecewise: bool,
    /// Tables the block reads from.
    pub table_names: Vec<String>,
    /// Restriction of each argument, `None` for arguments with uniform tables.
    pub restrictions: Vec<Option<Restriction>>,
}

/// A modified argument of a block together with its table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedArgumentData {
    /// Index of the modified argument, in the piecewise numbering if its table is piecewise.
    pub ma_index: usize,
    pub table_data: TableData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockContribution {
    Preintegrated {
        common: BlockCommon,
        /// Name of the preintegrated table.
        name: String,
    },
    Premultiplied {
        common: BlockCommon,
        /// Name of the premultiplied table.
        name: String,
    },
    Partial {
        common: BlockCommon,
        ma_data: Vec<ModifiedArgumentData>,
        /// Position of the argument multiplied outside of the quadrature loop.
        piecewise_ma_index: usize,
    },
    /// Covers both the `full` and the `safe` block modes.
    Full {
        common: BlockCommon,
        ma_data: Vec<ModifiedArgumentData>,
    },
}

impl BlockContribution {
    pub fn common(&self) -> &BlockCommon {
        match self {
            Self::Preintegrated { common, .. }
            | Self::Premultiplied { common, .. }
            | Self::Partial { common, .. }
            | Self::Full { common, .. } => common,
        }
    }

    pub fn block_mode(&self) -> BlockMode {
        self.common().block_mode
    }

    /// Names of the tables this contribution reads from.
    pub fn referenced_table_names(&self) -> Vec<&str> {
        match self {
            Self::Preintegrated { name, .. } | Self::Premultiplied { name, .. } => vec![name.as_str()],
            Self::Partial { ma_data, .. } | Self::Full { ma_data, .. } => ma_data
                .iter()
                .map(|data| data.table_data.name.as_str())
                .collect(),
        }
    }
}

/// Computes the outer product of the argument tables at the given point.
///
/// The result is indexed `[entity, dofs_0, dofs_1]`, with a single column for rank 1 blocks.
/// Tables compacted to one entity or one point are broadcast. Tables missing from
/// `unique_tables` must be of type `ones`.
pub fn multiply_block(
    point_index: usize,
    table_names: &[String],
    ttypes: &[TableType],
    unique_tables: &BTreeMap<String, Table>,
    table_num_dofs: &BTreeMap<String, usize>,
) -> Result<Table, FormError> {
    if table_names.is_empty() || table_names.len() > 2 {
        return Err(FormError::InconsistentForm(format!(
            "Cannot multiply block of rank {}.",
            table_names.len()
        )));
    }

    let tables: Vec<Option<&Table>> = table_names.iter().map(|name| unique_tables.get(name)).collect();
    let num_dofs = table_names
        .iter()
        .map(|name| {
            table_num_dofs
                .get(name)
                .copied()
                .ok_or_else(|| FormError::InconsistentForm(format!("Unknown number of dofs for table {name}.")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    for (i, table) in tables.iter().enumerate() {
        if table.is_none() && ttypes.get(i) != Some(&TableType::Ones) {
            return Err(FormError::InconsistentForm(format!(
                "Missing table {} of type {:?}.",
                table_names[i],
                ttypes.get(i)
            )));
        }
    }
    let num_entities = tables
        .iter()
        .flatten()
        .map(|table| table.num_entities())
        .max()
        .unwrap_or(1);

    let mut entities = Vec::with_capacity(num_entities);
    for entity in 0..num_entities {
        let vectors: Vec<Vec<f64>> = tables
            .iter()
            .zip(&num_dofs)
            .map(|(table, &n)| match table {
                Some(table) => {
                    let e = if table.num_entities() == 1 { 0 } else { entity };
                    let q = if table.num_rows() == 1 { 0 } else { point_index };
                    (0..n).map(|dof| table[(e, q, dof)]).collect()
                }
                None => vec![1.0; n],
            })
            .collect();
        let block = match vectors.as_slice() {
            [u] => DMatrix::from_column_slice(u.len(), 1, u),
            [u, v] => DMatrix::from_fn(u.len(), v.len(), |i, j| u[i] * v[j]),
            _ => return Err(FormError::InconsistentForm("Nothing to multiply.".to_string())),
        };
        entities.push(block);
    }
    Ok(Table::from_entities(entities))
}

/// Integrates the outer product of the argument tables with the given quadrature weights.
pub fn integrate_block(
    weights: &[f64],
    table_names: &[String],
    ttypes: &[TableType],
    unique_tables: &BTreeMap<String, Table>,
    table_num_dofs: &BTreeMap<String, usize>,
) -> Result<Table, FormError> {
    let mut integrated: Option<Table> = None;
    for (q, &w) in weights.iter().enumerate() {
        let product = multiply_block(q, table_names, ttypes, unique_tables, table_num_dofs)?;
        match integrated.as_mut() {
            Some(sum) => {
                for e in 0..sum.num_entities() {
                    *sum.entity_mut(e) += product.entity(e) * w;
                }
            }
            None => {
                let entities = product.entities().iter().map(|m| m * w).collect();
                integrated = Some(Table::from_entities(entities));
            }
        }
    }
    integrated.ok_or_else(|| {
        FormError::InconsistentForm("Cannot integrate block without quadrature points.".to_string())
    })
}
