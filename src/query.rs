//! Filtering of track tables by boolean expressions.
//!
//! Expressions are evaluated by [`evalexpr`] for each row. Columns are
//! available as variables:
//!
//! | name | type |
//! |---|---|
//! | `particle`, `frame` | int |
//! | `donor_mass`, `acceptor_mass`, `x`, `y` | float |
//! | `has_neighbor`, `interp` | bool |
//! | `fret_exc_type` | string (`"d"`, `"a"`, ...) |
//! | `fret_d_mass`, `fret_eff`, `fret_stoi`, `fret_a_mass` | float |
//! | `fret_a_seg` | int |
//!
//! Values that have not been computed are NaN (floats and `fret_a_seg`), `false`
//! (`has_neighbor`) or the empty string (`fret_exc_type`).
//!
//! ```text
//! fret_a_mass > 500 && fret_exc_type == "a"
//! ```

use std::collections::HashMap;

use evalexpr::{build_operator_tree, ContextWithMutableVariables, HashMapContext, Node, Value};
use log::info;

use crate::error::{AnalysisError, Result};
use crate::structure::{Observation, TrackTable};

/// Column names usable in expressions
pub const COLUMNS: &[&str] = &[
    "particle",
    "frame",
    "donor_mass",
    "acceptor_mass",
    "x",
    "y",
    "has_neighbor",
    "interp",
    "fret_exc_type",
    "fret_d_mass",
    "fret_eff",
    "fret_stoi",
    "fret_a_mass",
    "fret_a_seg",
];

fn float(v: Option<f64>) -> Value {
    Value::Float(v.unwrap_or(f64::NAN))
}

/// Value of a named column for one row
pub fn column_value(row: &Observation, name: &str) -> Option<Value> {
    let v = match name {
        "particle" => Value::Int(row.particle),
        "frame" => Value::Int(row.frame),
        "donor_mass" => Value::Float(row.donor_mass),
        "acceptor_mass" => Value::Float(row.acceptor_mass),
        "x" => float(row.coords.map(|c| c.x)),
        "y" => float(row.coords.map(|c| c.y)),
        "has_neighbor" => Value::Boolean(row.has_neighbor.unwrap_or(false)),
        "interp" => Value::Boolean(row.interp),
        "fret_exc_type" => Value::String(
            row.fret
                .exc_type
                .map(|t| t.to_string())
                .unwrap_or_default(),
        ),
        "fret_d_mass" => float(row.fret.d_mass),
        "fret_eff" => float(row.fret.eff),
        "fret_stoi" => float(row.fret.stoi),
        "fret_a_mass" => float(row.fret.a_mass),
        "fret_a_seg" => match row.fret.a_seg {
            Some(s) => Value::Int(s),
            None => Value::Float(f64::NAN),
        },
        _ => return None,
    };
    Some(v)
}

/// A parsed filter expression
#[derive(Debug, Clone)]
pub struct Query {
    expr: String,
    node: Node,
    variables: Vec<String>,
}

impl Query {
    /// Parse `expr` and check that all variables it uses are known columns
    pub fn parse(expr: &str) -> Result<Self> {
        let node = build_operator_tree(expr)
            .map_err(|e| AnalysisError::expression(expr, e.to_string()))?;
        let mut variables: Vec<String> = node
            .iter_variable_identifiers()
            .map(|s| s.to_string())
            .collect();
        variables.sort();
        variables.dedup();
        if let Some(unknown) = variables.iter().find(|v| !COLUMNS.contains(&v.as_str())) {
            return Err(AnalysisError::UnknownColumn(unknown.clone()));
        }
        Ok(Self {
            expr: expr.to_string(),
            node,
            variables,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Whether `row` fulfills the expression
    pub fn matches(&self, row: &Observation) -> Result<bool> {
        let mut ctx = HashMapContext::new();
        for name in &self.variables {
            if let Some(v) = column_value(row, name) {
                ctx.set_value(name.clone(), v)
                    .map_err(|e| AnalysisError::expression(&self.expr, e.to_string()))?;
            }
        }
        self.node
            .eval_boolean_with_context(&ctx)
            .map_err(|e| AnalysisError::expression(&self.expr, e.to_string()))
    }
}

/// Boolean mask telling which rows fulfill `expr`
pub fn evaluate(table: &TrackTable, expr: &str) -> Result<Vec<bool>> {
    let query = Query::parse(expr)?;
    table.rows().iter().map(|r| query.matches(r)).collect()
}

/// Remove rows not fulfilling `expr`, in place
pub fn filter_in_place(table: &mut TrackTable, expr: &str) -> Result<()> {
    let mask = evaluate(table, expr)?;
    let before = table.len();
    table.retain_mask(&mask);
    info!("Query '{}': kept {} of {} localizations", expr, table.len(), before);
    Ok(())
}

/// Rows fulfilling `expr`
pub fn filter(table: &TrackTable, expr: &str) -> Result<TrackTable> {
    let mut out = table.clone();
    filter_in_place(&mut out, expr)?;
    Ok(out)
}

/// Mask of rows belonging to particles that fulfill `expr` often enough.
///
/// A particle is kept if `expr` holds in at least `min_count` of its frames.
/// If `min_count` is zero or negative, it means "all but `|min_count|`"
/// frames of that particle. A particle fulfilling `expr` nowhere is never kept.
pub fn particle_mask(table: &TrackTable, expr: &str, min_count: i64) -> Result<Vec<bool>> {
    let matches = evaluate(table, expr)?;

    // particle -> (number of frames, number of matches)
    let mut counts: HashMap<i64, (i64, i64)> = HashMap::new();
    for (row, &m) in table.rows().iter().zip(&matches) {
        let c = counts.entry(row.particle).or_insert((0, 0));
        c.0 += 1;
        if m {
            c.1 += 1;
        }
    }

    let good = |p: i64| -> bool {
        let (total, n_match) = counts.get(&p).copied().unwrap_or((0, 0));
        let required = if min_count > 0 {
            min_count
        } else {
            total + min_count
        };
        n_match > 0 && n_match >= required
    };
    Ok(table.rows().iter().map(|r| good(r.particle)).collect())
}

/// Remove particles that do not fulfill `expr` often enough, in place
pub fn filter_particles_in_place(table: &mut TrackTable, expr: &str, min_count: i64) -> Result<()> {
    let mask = particle_mask(table, expr, min_count)?;
    let before = table.particles().len();
    table.retain_mask(&mask);
    info!(
        "Particle filter '{}' (min_count {}): kept {} of {} particles",
        expr,
        min_count,
        table.particles().len(),
        before
    );
    Ok(())
}

/// Particles fulfilling `expr` at least `min_count` times, see [`particle_mask`]
pub fn filter_particles(table: &TrackTable, expr: &str, min_count: i64) -> Result<TrackTable> {
    let mut out = table.clone();
    filter_particles_in_place(&mut out, expr, min_count)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excitation::ExcitationType;

    fn table() -> TrackTable {
        let mut rows = Vec::new();
        // particle 1: a_mass 1000 in 5 of 6 frames
        for f in 0..6 {
            let mut o = Observation::new(1, f, 10.0, 20.0);
            o.fret.a_mass = Some(if f == 3 { 100.0 } else { 1000.0 });
            rows.push(o);
        }
        // particle 2: a_mass 1000 in 4 of 6 frames
        for f in 0..6 {
            let mut o = Observation::new(2, f, 10.0, 20.0);
            o.fret.a_mass = Some(if f < 2 { 100.0 } else { 1000.0 });
            rows.push(o);
        }
        TrackTable::new(rows)
    }

    #[test]
    fn test_evaluate() {
        let mask = evaluate(&table(), "fret_a_mass > 500").unwrap();
        assert_eq!(mask.iter().filter(|&&m| m).count(), 9);
        assert!(!mask[3]);

        let mask = evaluate(&table(), "particle == 2 && frame >= 4").unwrap();
        assert_eq!(mask.iter().filter(|&&m| m).count(), 2);
    }

    #[test]
    fn test_filter() {
        let out = filter(&table(), "fret_a_mass <= 500").unwrap();
        let keys: Vec<(i64, i64)> = out.rows().iter().map(|r| (r.particle, r.frame)).collect();
        assert_eq!(keys, vec![(1, 3), (2, 0), (2, 1)]);
    }

    #[test]
    fn test_filter_particles_all_but_one() {
        let out = filter_particles(&table(), "fret_a_mass > 500", -1).unwrap();
        assert_eq!(out.particles(), vec![1]);
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn test_filter_particles_min_count() {
        let t = table();
        assert_eq!(filter_particles(&t, "fret_a_mass > 500", 4).unwrap().particles(), vec![1, 2]);
        assert_eq!(filter_particles(&t, "fret_a_mass > 500", 5).unwrap().particles(), vec![1]);
        assert!(filter_particles(&t, "fret_a_mass > 500", 0).unwrap().is_empty());
        assert_eq!(filter_particles(&t, "fret_a_mass > 500", -2).unwrap().particles(), vec![1, 2]);
        // never fulfilled
        assert!(filter_particles(&t, "fret_a_mass > 5000", -10).unwrap().is_empty());
    }

    #[test]
    fn test_nan_and_missing_values() {
        let mut t = table();
        t.rows_mut()[0].fret.a_mass = Some(f64::NAN);
        t.rows_mut()[1].fret.a_mass = None;
        let mask = evaluate(&t, "fret_a_mass > 500").unwrap();
        assert!(!mask[0]);
        assert!(!mask[1]);
        assert!(mask[2]);
    }

    #[test]
    fn test_string_and_bool_columns() {
        let mut t = table();
        t.rows_mut()[0].fret.exc_type = Some(ExcitationType::Acceptor);
        t.rows_mut()[1].has_neighbor = Some(true);
        let mask = evaluate(&t, "fret_exc_type == \"a\"").unwrap();
        assert_eq!(mask.iter().filter(|&&m| m).count(), 1);
        let mask = evaluate(&t, "!has_neighbor").unwrap();
        assert_eq!(mask.iter().filter(|&&m| !m).count(), 1);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            evaluate(&table(), "fret_a_mas > 500"),
            Err(AnalysisError::UnknownColumn(c)) if c == "fret_a_mas"
        ));
        assert!(matches!(
            evaluate(&table(), "fret_a_mass >"),
            Err(AnalysisError::Expression { .. })
        ));
        // not a boolean
        assert!(matches!(
            evaluate(&table(), "fret_a_mass + 1"),
            Err(AnalysisError::Expression { .. })
        ));
    }

    #[test]
    fn test_empty_table() {
        let t = TrackTable::default();
        assert!(evaluate(&t, "frame > 1").unwrap().is_empty());
        assert!(filter_particles(&t, "frame > 1", -1).unwrap().is_empty());
    }
}
