//! Linear programs for cost and quality objectives.
//!
//! Objectives and `SUBJECT_TO` constraints are written in the constraint
//! expression language and must be linear in the declared allocation
//! variables. Other identifiers resolve against the schedule metrics
//! (`makespan`, `duration.<a>`, ...) and enter as constants.
//!
//! Solved with a dense two-phase simplex. Variables are shifted by their
//! lower bounds so every column is non-negative, upper bounds become rows,
//! and Bland's rule picks both the entering and leaving columns, which
//! rules out cycling on degenerate vertices.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::csp::expr::{ArithOp, CmpOp, LogicOp};
use crate::csp::{Constraint, Env, Expr, Value};
use crate::error::{ScheduleError, SolveError};

use super::ScheduleResult;

const PIVOT_EPS: f64 = 1e-9;
const FEASIBILITY_EPS: f64 = 1e-7;

/// A continuous allocation variable with bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpVariable {
    pub name: String,
    #[serde(default)]
    pub lower: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
}

impl LpVariable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lower: 0.0,
            upper: None,
        }
    }

    pub fn bounded(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            lower,
            upper: Some(upper),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearProgram {
    #[serde(default)]
    pub variables: Vec<LpVariable>,
    pub objective: Expr,
    #[serde(default, alias = "SUBJECT_TO")]
    pub subject_to: Vec<Constraint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sense {
    Minimize,
    Maximize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LpSolution {
    pub sense: Sense,
    pub objective: f64,
    pub values: IndexMap<String, f64>,
    pub pivots: usize,
}

// ---------------------------------------------------------------------------
// Linearization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Linear {
    coeffs: Vec<f64>,
    constant: f64,
}

impl Linear {
    fn constant(n: usize, value: f64) -> Self {
        Self {
            coeffs: vec![0.0; n],
            constant: value,
        }
    }

    fn is_constant(&self) -> bool {
        self.coeffs.iter().all(|c| *c == 0.0)
    }

    fn scale(mut self, k: f64) -> Self {
        self.coeffs.iter_mut().for_each(|c| *c *= k);
        self.constant *= k;
        self
    }

    fn add(mut self, other: &Linear, sign: f64) -> Self {
        for (c, o) in self.coeffs.iter_mut().zip(&other.coeffs) {
            *c += sign * o;
        }
        self.constant += sign * other.constant;
        self
    }

    fn dot(&self, x: &[f64]) -> f64 {
        self.coeffs.iter().zip(x).map(|(c, v)| c * v).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Le,
    Ge,
    Eq,
}

#[derive(Debug, Clone)]
struct Row {
    coeffs: Vec<f64>,
    relation: Relation,
    rhs: f64,
}

struct Linearizer<'a> {
    index: HashMap<&'a str, usize>,
    metrics: &'a dyn Env,
}

impl Linearizer<'_> {
    fn non_linear(expr: &Expr, message: &str) -> ScheduleError {
        ScheduleError::NonLinear {
            expr: expr.to_string(),
            message: message.to_string(),
        }
    }

    fn linear(&self, expr: &Expr) -> ScheduleResult<Linear> {
        let n = self.index.len();
        match expr {
            Expr::Const(v) => v
                .as_f64()
                .map(|c| Linear::constant(n, c))
                .map_err(|_| Self::non_linear(expr, "non-numeric constant")),
            Expr::Var(name) => {
                if let Some(&j) = self.index.get(name.as_str()) {
                    let mut lin = Linear::constant(n, 0.0);
                    lin.coeffs[j] = 1.0;
                    return Ok(lin);
                }
                match self.metrics.lookup(name) {
                    Some(value) => value
                        .as_f64()
                        .map(|c| Linear::constant(n, c))
                        .map_err(|_| Self::non_linear(expr, "metric is not numeric")),
                    None => Err(ScheduleError::UnknownLpVariable {
                        variable: name.clone(),
                    }),
                }
            }
            Expr::Neg(e) => Ok(self.linear(e)?.scale(-1.0)),
            Expr::Arith(op, l, r) => {
                let (l, r) = (self.linear(l)?, self.linear(r)?);
                match op {
                    ArithOp::Add => Ok(l.add(&r, 1.0)),
                    ArithOp::Sub => Ok(l.add(&r, -1.0)),
                    ArithOp::Mul if r.is_constant() => Ok(l.scale(r.constant)),
                    ArithOp::Mul if l.is_constant() => Ok(r.scale(l.constant)),
                    ArithOp::Mul => Err(Self::non_linear(expr, "product of two variables")),
                    ArithOp::Div if r.is_constant() && r.constant != 0.0 => {
                        Ok(l.scale(1.0 / r.constant))
                    }
                    ArithOp::Div => Err(Self::non_linear(expr, "division by a variable or zero")),
                }
            }
            _ => Err(Self::non_linear(expr, "unsupported operator")),
        }
    }

    /// Rows for a constraint; `&&` splits into several rows.
    fn rows(&self, expr: &Expr, out: &mut Vec<Row>) -> ScheduleResult<()> {
        match expr {
            Expr::Logic(LogicOp::And, l, r) => {
                self.rows(l, out)?;
                self.rows(r, out)
            }
            Expr::Compare(op, l, r) => {
                let relation = match op {
                    CmpOp::Le | CmpOp::Lt => Relation::Le,
                    CmpOp::Ge | CmpOp::Gt => Relation::Ge,
                    CmpOp::Eq => Relation::Eq,
                    CmpOp::Ne => return Err(Self::non_linear(expr, "!= is not a linear constraint")),
                };
                let diff = self.linear(l)?.add(&self.linear(r)?, -1.0);
                out.push(Row {
                    relation,
                    rhs: -diff.constant,
                    coeffs: diff.coeffs,
                });
                Ok(())
            }
            _ => Err(Self::non_linear(expr, "expected a comparison")),
        }
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// A program with every expression resolved to rows.
struct Model<'p> {
    program: &'p LinearProgram,
    sense: Sense,
    objective: Linear,
    /// Rows of each SUBJECT_TO constraint.
    constraints: Vec<Vec<Row>>,
}

impl<'p> Model<'p> {
    fn compile(program: &'p LinearProgram, sense: Sense, metrics: &dyn Env) -> ScheduleResult<Self> {
        let mut index = HashMap::new();
        for (j, v) in program.variables.iter().enumerate() {
            if !v.lower.is_finite() || v.upper.is_some_and(|u| !u.is_finite()) {
                return Err(ScheduleError::NonLinear {
                    expr: v.name.clone(),
                    message: "bounds must be finite".into(),
                });
            }
            index.insert(v.name.as_str(), j);
        }
        let lin = Linearizer { index, metrics };
        let objective = lin.linear(&program.objective)?;
        let constraints = program
            .subject_to
            .iter()
            .map(|c| {
                let mut rows = Vec::new();
                lin.rows(&c.predicate, &mut rows)?;
                Ok(rows)
            })
            .collect::<ScheduleResult<Vec<_>>>()?;
        Ok(Self {
            program,
            sense,
            objective,
            constraints,
        })
    }

    fn lower(&self) -> Vec<f64> {
        self.program.variables.iter().map(|v| v.lower).collect()
    }

    /// Rows over the shifted variables `y = x - lower >= 0` for the chosen
    /// constraints, plus one row per finite upper bound.
    fn shifted_rows(&self, chosen: &[usize]) -> Vec<Row> {
        let lower = self.lower();
        let n = lower.len();
        let mut rows: Vec<Row> = chosen
            .iter()
            .flat_map(|&c| &self.constraints[c])
            .map(|row| Row {
                coeffs: row.coeffs.clone(),
                relation: row.relation,
                rhs: row.rhs - row.coeffs.iter().zip(&lower).map(|(a, l)| a * l).sum::<f64>(),
            })
            .collect();
        for (j, v) in self.program.variables.iter().enumerate() {
            if let Some(upper) = v.upper {
                let mut coeffs = vec![0.0; n];
                coeffs[j] = 1.0;
                rows.push(Row {
                    coeffs,
                    relation: Relation::Le,
                    rhs: upper - v.lower,
                });
            }
        }
        rows
    }

    fn solve(&self) -> ScheduleResult<LpSolution> {
        let n = self.program.variables.len();
        if let Some(v) = self
            .program
            .variables
            .iter()
            .find(|v| v.upper.is_some_and(|u| u < v.lower))
        {
            return Err(SolveError::Unsatisfiable {
                conflicts: vec![format!("bounds of {}", v.name)],
            }
            .into());
        }

        let all: Vec<usize> = (0..self.constraints.len()).collect();
        let mut tableau = Tableau::new(n, &self.shifted_rows(&all));
        if !tableau.phase_one() {
            return Err(self.conflict().into());
        }

        let sign = match self.sense {
            Sense::Minimize => 1.0,
            Sense::Maximize => -1.0,
        };
        let mut cost = vec![0.0; tableau.cols];
        for (j, c) in self.objective.coeffs.iter().enumerate() {
            cost[j] = sign * c;
        }
        tableau.phase_two(&cost)?;

        let x: Vec<f64> = tableau
            .solution(n)
            .iter()
            .zip(self.lower())
            .map(|(y, l)| y + l)
            .collect();
        let objective = self.objective.dot(&x) + self.objective.constant;
        Ok(LpSolution {
            sense: self.sense,
            objective,
            values: self
                .program
                .variables
                .iter()
                .map(|v| v.name.clone())
                .zip(x)
                .collect(),
            pivots: tableau.pivots,
        })
    }

    fn feasible(&self, chosen: &[usize]) -> bool {
        Tableau::new(self.program.variables.len(), &self.shifted_rows(chosen)).phase_one()
    }

    /// Deletion filter over the SUBJECT_TO constraints; bounds always stay.
    fn conflict(&self) -> SolveError {
        let mut kept: Vec<usize> = (0..self.constraints.len()).collect();
        let mut at = 0;
        while at < kept.len() {
            let mut trial = kept.clone();
            trial.remove(at);
            if self.feasible(&trial) {
                at += 1;
            } else {
                kept = trial;
            }
        }
        let conflicts = kept
            .into_iter()
            .map(|c| self.program.subject_to[c].name.clone())
            .collect();
        tracing::debug!(?conflicts, "infeasible linear program");
        SolveError::Unsatisfiable { conflicts }
    }
}

// ---------------------------------------------------------------------------
// Simplex
// ---------------------------------------------------------------------------

/// Dense tableau: `m` rows of `cols` coefficients plus the right-hand side.
struct Tableau {
    rows: Vec<Vec<f64>>,
    basis: Vec<usize>,
    artificial: Vec<bool>,
    cols: usize,
    pivots: usize,
}

struct Unbounded;

impl Tableau {
    fn new(n: usize, rows: &[Row]) -> Self {
        let mut extra = 0;
        for row in rows {
            extra += match normalized(row).1 {
                Relation::Le | Relation::Eq => 1,
                Relation::Ge => 2,
            };
        }
        let cols = n + extra;
        let mut artificial = vec![false; cols];
        let mut tableau_rows = Vec::with_capacity(rows.len());
        let mut basis = Vec::with_capacity(rows.len());
        let mut next = n;
        for row in rows {
            let (sign, relation) = normalized(row);
            let mut line = vec![0.0; cols + 1];
            for (j, a) in row.coeffs.iter().enumerate() {
                line[j] = sign * a;
            }
            line[cols] = sign * row.rhs;
            match relation {
                Relation::Le => {
                    line[next] = 1.0;
                    basis.push(next);
                    next += 1;
                }
                Relation::Ge => {
                    line[next] = -1.0;
                    line[next + 1] = 1.0;
                    artificial[next + 1] = true;
                    basis.push(next + 1);
                    next += 2;
                }
                Relation::Eq => {
                    line[next] = 1.0;
                    artificial[next] = true;
                    basis.push(next);
                    next += 1;
                }
            }
            tableau_rows.push(line);
        }
        Self {
            rows: tableau_rows,
            basis,
            artificial,
            cols,
            pivots: 0,
        }
    }

    fn rhs(&self, i: usize) -> f64 {
        self.rows[i][self.cols]
    }

    fn reduced_cost(&self, cost: &[f64], j: usize) -> f64 {
        cost[j]
            - self
                .rows
                .iter()
                .zip(&self.basis)
                .map(|(row, &b)| cost[b] * row[j])
                .sum::<f64>()
    }

    fn value(&self, cost: &[f64]) -> f64 {
        (0..self.rows.len())
            .map(|i| cost[self.basis[i]] * self.rhs(i))
            .sum()
    }

    fn pivot(&mut self, r: usize, e: usize) {
        let p = self.rows[r][e];
        self.rows[r].iter_mut().for_each(|v| *v /= p);
        let pivot_row = self.rows[r].clone();
        for (i, row) in self.rows.iter_mut().enumerate() {
            if i == r {
                continue;
            }
            let factor = row[e];
            if factor.abs() > 0.0 {
                for (v, pv) in row.iter_mut().zip(&pivot_row) {
                    *v -= factor * pv;
                }
            }
        }
        self.basis[r] = e;
        self.pivots += 1;
    }

    /// Minimize `cost` over the columns `allowed` admits.
    fn minimize(&mut self, cost: &[f64], allowed: impl Fn(usize) -> bool) -> Result<(), Unbounded> {
        loop {
            // Bland: lowest-index improving column.
            let Some(e) = (0..self.cols)
                .filter(|&j| allowed(j))
                .find(|&j| self.reduced_cost(cost, j) < -PIVOT_EPS)
            else {
                return Ok(());
            };
            let ratios: Vec<(usize, f64)> = (0..self.rows.len())
                .filter(|&i| self.rows[i][e] > PIVOT_EPS)
                .map(|i| (i, self.rhs(i) / self.rows[i][e]))
                .collect();
            let Some(best) = ratios.iter().map(|&(_, q)| q).min_by(f64::total_cmp) else {
                return Err(Unbounded);
            };
            // Bland: among minimal ratios, the lowest basic column leaves.
            let Some(r) = ratios
                .iter()
                .filter(|&&(_, q)| q <= best + PIVOT_EPS)
                .map(|&(i, _)| i)
                .min_by_key(|&i| self.basis[i])
            else {
                return Err(Unbounded);
            };
            self.pivot(r, e);
        }
    }

    /// Drive the artificial columns to zero. `false` when that is impossible.
    fn phase_one(&mut self) -> bool {
        if !self.artificial.iter().any(|&a| a) {
            return true;
        }
        let cost: Vec<f64> = self
            .artificial
            .iter()
            .map(|&a| if a { 1.0 } else { 0.0 })
            .collect();
        if self.minimize(&cost, |_| true).is_err() || self.value(&cost) > FEASIBILITY_EPS {
            return false;
        }
        // Pivot remaining zero-valued artificials out of the basis where a
        // real column can replace them; rows with none are redundant.
        for i in 0..self.rows.len() {
            if !self.artificial[self.basis[i]] {
                continue;
            }
            if let Some(j) = (0..self.cols)
                .find(|&j| !self.artificial[j] && self.rows[i][j].abs() > PIVOT_EPS)
            {
                self.pivot(i, j);
            }
        }
        true
    }

    fn phase_two(&mut self, cost: &[f64]) -> ScheduleResult<()> {
        let artificial = self.artificial.clone();
        self.minimize(cost, |j| !artificial[j])
            .map_err(|Unbounded| ScheduleError::Unbounded)
    }

    /// Values of the first `n` columns.
    fn solution(&self, n: usize) -> Vec<f64> {
        let mut x = vec![0.0; n];
        for (i, &b) in self.basis.iter().enumerate() {
            if b < n {
                x[b] = self.rhs(i);
            }
        }
        x
    }
}

/// Sign that makes the right-hand side non-negative, and the relation after
/// applying it.
fn normalized(row: &Row) -> (f64, Relation) {
    if row.rhs >= 0.0 {
        return (1.0, row.relation);
    }
    let flipped = match row.relation {
        Relation::Le => Relation::Ge,
        Relation::Ge => Relation::Le,
        Relation::Eq => Relation::Eq,
    };
    (-1.0, flipped)
}

/// Solve `program` with schedule `metrics` bound as constants.
pub fn optimize(program: &LinearProgram, sense: Sense, metrics: &dyn Env) -> ScheduleResult<LpSolution> {
    let model = Model::compile(program, sense, metrics)?;
    let solution = model.solve()?;
    tracing::info!(
        objective = solution.objective,
        pivots = solution.pivots,
        ?sense,
        "linear program solved"
    );
    Ok(solution)
}

/// Metrics-free convenience for programs that reference no schedule values.
pub fn optimize_standalone(program: &LinearProgram, sense: Sense) -> ScheduleResult<LpSolution> {
    let empty: HashMap<String, Value> = HashMap::new();
    optimize(program, sense, &empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(vars: Vec<LpVariable>, objective: &str, constraints: &[(&str, &str)]) -> LinearProgram {
        LinearProgram {
            variables: vars,
            objective: objective.parse().unwrap(),
            subject_to: constraints
                .iter()
                .map(|(name, text)| Constraint::parse(*name, text).unwrap())
                .collect(),
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn maximizes_with_upper_bound() {
        let lp = program(
            vec![LpVariable::bounded("x", 0.0, 3.0), LpVariable::new("y")],
            "3 * x + 2 * y",
            &[("c1", "x + y <= 4"), ("c2", "x + 3 * y <= 6")],
        );
        let s = optimize_standalone(&lp, Sense::Maximize).unwrap();
        assert!(close(s.objective, 11.0));
        assert!(close(s.values["x"], 3.0));
        assert!(close(s.values["y"], 1.0));
    }

    #[test]
    fn minimizes_with_covering_constraint() {
        let lp = program(
            vec![LpVariable::bounded("a", 0.0, 6.0), LpVariable::new("b")],
            "2 * a + 3 * b",
            &[("demand", "a + b >= 10")],
        );
        let s = optimize_standalone(&lp, Sense::Minimize).unwrap();
        assert!(close(s.objective, 24.0));
        assert!(close(s.values["a"], 6.0));
    }

    #[test]
    fn equality_and_lower_bounds() {
        let lp = program(
            vec![LpVariable::bounded("x", 1.0, 10.0), LpVariable::new("y")],
            "x - y",
            &[("total", "x + y == 5")],
        );
        let s = optimize_standalone(&lp, Sense::Minimize).unwrap();
        assert!(close(s.values["x"], 1.0));
        assert!(close(s.values["y"], 4.0));
        assert!(close(s.objective, -3.0));
    }

    #[test]
    fn infeasible_program_reports_minimal_conflict() {
        let lp = program(
            vec![LpVariable::new("x"), LpVariable::new("y")],
            "x + y",
            &[("min_x", "x >= 5"), ("cap_y", "y <= 3"), ("max_x", "x <= 2")],
        );
        let err = optimize_standalone(&lp, Sense::Minimize).unwrap_err();
        match err {
            ScheduleError::Optimization(SolveError::Unsatisfiable { conflicts }) => {
                assert_eq!(conflicts, vec!["min_x", "max_x"]);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn unbounded_program() {
        let lp = program(vec![LpVariable::new("x")], "x", &[("floor", "x >= 1")]);
        assert!(matches!(
            optimize_standalone(&lp, Sense::Maximize),
            Err(ScheduleError::Unbounded)
        ));
    }

    #[test]
    fn metrics_enter_as_constants() {
        let lp = program(vec![LpVariable::new("x")], "x", &[("cover", "x >= makespan / 2")]);
        let metrics: HashMap<String, Value> = HashMap::from([("makespan".into(), Value::Num(12.0))]);
        let s = optimize(&lp, Sense::Minimize, &metrics).unwrap();
        assert!(close(s.objective, 6.0));
    }

    #[test]
    fn rejects_non_linear_terms() {
        let lp = program(
            vec![LpVariable::new("x"), LpVariable::new("y")],
            "x * y",
            &[],
        );
        assert!(matches!(
            optimize_standalone(&lp, Sense::Minimize),
            Err(ScheduleError::NonLinear { .. })
        ));
        let lp = program(vec![LpVariable::new("x")], "x + ghost", &[]);
        assert!(matches!(
            optimize_standalone(&lp, Sense::Minimize),
            Err(ScheduleError::UnknownLpVariable { .. })
        ));
    }
}
