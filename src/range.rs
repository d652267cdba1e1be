//! Interval range analysis.
//!
//! A worklist fixpoint over the [`Interval`] domain that assigns every
//! supported instruction a conservative range. Termination is forced by
//! widening each candidate interval to a finite set of landmark bounds:
//! `{−∞, +∞, 0, 1}`, every integer constant used by a `phi` or binary
//! operation in the function, and the geometric series `±2^k`. The lattice
//! restricted to landmark bounds is finite and the transfer functions are
//! monotone, so the iteration reaches a fixpoint.
//!
//! The analysis is intraprocedural and does not track memory: `alloca`,
//! `load` and `call` results are immediately [`Interval::FULL`].

use std::collections::{HashMap, VecDeque};

use log::debug;

use crate::error::AnalysisError;
use crate::interval::{Interval, MINF, PINF};
use crate::ir::{BinOp, Function, InstId, Instruction, Operand, Predicate};

/// Configuration for the range analysis.
#[derive(Debug, Clone)]
pub struct RangeOptions {
    /// Project every non-empty candidate interval onto the landmark set.
    /// Disabling this is only guaranteed to terminate on cycle-free
    /// dataflow (a loop counter ascends forever without widening).
    pub widening: bool,
    /// Size of the geometric series `±2^k, k ∈ [0, max_exponent)` added to
    /// the landmark set.
    pub max_exponent: u32,
    /// Dump per-iteration state transitions to the log.
    pub debug: bool,
}

impl Default for RangeOptions {
    fn default() -> Self {
        RangeOptions {
            widening: true,
            max_exponent: 32,
            debug: false,
        }
    }
}

/// Per-function result: a map from every supported instruction to its
/// interval.
#[derive(Debug, Clone)]
pub struct RangeResult {
    state: HashMap<InstId, Interval>,
}

impl RangeResult {
    pub fn get(&self, id: InstId) -> Option<Interval> {
        self.state.get(&id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InstId, Interval)> + '_ {
        self.state.iter().map(|(&id, &iv)| (id, iv))
    }

    /// Renders one `inst = [l,u]` line per supported instruction, in
    /// program order.
    pub fn report(&self, f: &Function) -> String {
        let mut out = String::new();
        for id in f.inst_ids() {
            if let Some(iv) = self.get(id) {
                out.push_str(&format!("{} = {}\n", f.display_inst(id), iv));
            }
        }
        out
    }
}

/// The fragment of the IR the range analysis assigns intervals to.
pub fn is_supported(inst: &Instruction) -> bool {
    matches!(
        inst,
        Instruction::Phi { .. }
            | Instruction::BinOp { .. }
            | Instruction::Alloca
            | Instruction::Load { .. }
            | Instruction::Call { .. }
            | Instruction::Select { .. }
            | Instruction::ICmp { .. }
    )
}

/// The sorted landmark set `B` driving widening.
#[derive(Debug)]
struct Landmarks {
    bounds: Vec<f64>,
}

impl Landmarks {
    fn collect(f: &Function, max_exponent: u32) -> Self {
        let mut bounds = vec![MINF, PINF, 0.0, 1.0];

        // Every integer constant used by a binary operation or a phi.
        for id in f.inst_ids() {
            match f.inst(id) {
                Instruction::BinOp { lhs, rhs, .. } => {
                    for op in [lhs, rhs] {
                        if let Some(c) = op.as_const() {
                            bounds.push(c as f64);
                        }
                    }
                }
                Instruction::Phi { incoming } => {
                    for op in incoming {
                        if let Some(c) = op.as_const() {
                            bounds.push(c as f64);
                        }
                    }
                }
                _ => {}
            }
        }

        for k in 0..max_exponent {
            let b = 2f64.powi(k as i32);
            bounds.push(b);
            bounds.push(-b);
        }

        bounds.sort_by(f64::total_cmp);
        bounds.dedup();
        Landmarks { bounds }
    }

    /// Projects the lower bound onto the greatest landmark `<=` it (a bound
    /// already in `B` stays put) and the upper bound onto the least
    /// landmark `>=` it. Both lookups are total because `±∞ ∈ B`.
    fn widen(&self, iv: Interval) -> Interval {
        let li = self.bounds.partition_point(|&b| b <= iv.lower()) - 1;
        let ui = self.bounds.partition_point(|&b| b < iv.upper());
        Interval::new(self.bounds[li], self.bounds[ui])
    }
}

/// Runs the range analysis with default options.
pub fn analyze_ranges(f: &Function) -> Result<RangeResult, AnalysisError> {
    analyze_ranges_with(f, &RangeOptions::default())
}

/// Runs the range analysis with explicit options.
pub fn analyze_ranges_with(f: &Function, opts: &RangeOptions) -> Result<RangeResult, AnalysisError> {
    let landmarks = Landmarks::collect(f, opts.max_exponent);
    if opts.debug {
        debug!("range analysis for {}: {} landmarks", f.name, landmarks.bounds.len());
    }

    let mut state: HashMap<InstId, Interval> = HashMap::new();
    let mut worklist: VecDeque<InstId> = VecDeque::new();
    for id in f.inst_ids() {
        if is_supported(f.inst(id)) {
            state.insert(id, Interval::EMPTY);
            worklist.push_back(id);
        }
    }

    let users = f.users();

    while let Some(id) = worklist.pop_front() {
        let old = state[&id];
        let mut current = eval(f, id, &state)?;

        if opts.debug {
            debug!("{}: old = {}, new = {}", f.display_inst(id), old, current);
        }

        if opts.widening && current != Interval::EMPTY {
            current = landmarks.widen(current);
            if opts.debug {
                debug!("  widened = {current}");
            }
        }

        if current != old {
            state.insert(id, current);
            for &user in &users[id.index()] {
                if is_supported(f.inst(user)) && !worklist.contains(&user) {
                    worklist.push_back(user);
                    if opts.debug {
                        debug!("  requeue {}", f.display_inst(user));
                    }
                }
            }
        }
    }

    Ok(RangeResult { state })
}

/// Interval of an operand: singleton for constants, current state for
/// instruction results. An operand defined by an unsupported instruction
/// was never initialized and reads as empty.
fn operand_interval(op: Operand, state: &HashMap<InstId, Interval>) -> Interval {
    match op {
        Operand::Const(c) => Interval::singleton(c),
        Operand::Inst(id) => state.get(&id).copied().unwrap_or(Interval::EMPTY),
    }
}

fn eval(f: &Function, id: InstId, state: &HashMap<InstId, Interval>) -> Result<Interval, AnalysisError> {
    let current = match f.inst(id) {
        Instruction::Phi { incoming } => {
            let mut acc = Interval::EMPTY;
            for &op in incoming {
                acc = acc.lub(operand_interval(op, state));
            }
            acc
        }
        Instruction::Select { on_true, on_false, .. } => {
            operand_interval(*on_true, state).lub(operand_interval(*on_false, state))
        }
        Instruction::BinOp { op, lhs, rhs } => {
            let l = operand_interval(*lhs, state);
            let r = operand_interval(*rhs, state);
            match op {
                BinOp::Add => l.add(r),
                BinOp::Sub => l.sub(r),
                BinOp::Mul => l.mul(r),
                BinOp::SDiv => l.div(r),
                other => {
                    return Err(AnalysisError::invariant(format!(
                        "unsupported binary opcode `{}` in range analysis",
                        other.mnemonic()
                    )))
                }
            }
        }
        Instruction::ICmp { pred, lhs, rhs } => {
            let l = operand_interval(*lhs, state);
            let r = operand_interval(*rhs, state);
            match pred {
                Predicate::Eq => l.cmp_eq(r),
                Predicate::Ne => l.cmp_ne(r),
                Predicate::Slt => l.cmp_lt(r),
                Predicate::Sgt => l.cmp_gt(r),
                other => {
                    return Err(AnalysisError::invariant(format!(
                        "unsupported comparison predicate `{}` in range analysis",
                        other.mnemonic()
                    )))
                }
            }
        }
        // Memory is not tracked, so these yield the full interval.
        Instruction::Alloca | Instruction::Load { .. } | Instruction::Call { .. } => Interval::FULL,
        other => {
            return Err(AnalysisError::invariant(format!(
                "unsupported instruction variant {other:?} in range analysis dispatch"
            )))
        }
    };
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Operand::{Const, Inst};

    fn straight_line(build: impl FnOnce(&mut Function, crate::ir::BlockId)) -> Function {
        let mut f = Function::new("test");
        let bb = f.add_block();
        build(&mut f, bb);
        f.push(bb, Instruction::Ret { value: None });
        f
    }

    #[test]
    fn constant_arithmetic_snaps_to_landmarks() {
        let mut ids = Vec::new();
        let f = straight_line(|f, bb| {
            // %0 = add 3, 4   -> [7,7] widens to [4,8]
            ids.push(f.push(bb, Instruction::BinOp { op: BinOp::Add, lhs: Const(3), rhs: Const(4) }));
        });
        let result = analyze_ranges(&f).unwrap();
        // Landmarks near 7: constants {3,4} and powers {4,8}.
        assert_eq!(result.get(ids[0]).unwrap(), Interval::new(4.0, 8.0));
    }

    #[test]
    fn widening_keeps_bounds_already_in_landmarks() {
        let mut ids = Vec::new();
        let f = straight_line(|f, bb| {
            // %0 = add 3, 1 -> [4,4]: both bounds are landmarks, kept as is.
            ids.push(f.push(bb, Instruction::BinOp { op: BinOp::Add, lhs: Const(3), rhs: Const(1) }));
        });
        let result = analyze_ranges(&f).unwrap();
        assert_eq!(result.get(ids[0]).unwrap(), Interval::new(4.0, 4.0));
    }

    #[test]
    fn widening_disabled_keeps_exact_value() {
        let mut ids = Vec::new();
        let f = straight_line(|f, bb| {
            ids.push(f.push(bb, Instruction::BinOp { op: BinOp::Add, lhs: Const(3), rhs: Const(4) }));
        });
        let opts = RangeOptions { widening: false, ..RangeOptions::default() };
        let result = analyze_ranges_with(&f, &opts).unwrap();
        assert_eq!(result.get(ids[0]).unwrap(), Interval::new(7.0, 7.0));
    }

    #[test]
    fn memory_results_are_full() {
        let mut ids = Vec::new();
        let f = straight_line(|f, bb| {
            let a = f.push(bb, Instruction::Alloca);
            ids.push(a);
            ids.push(f.push(bb, Instruction::Load { ptr: Inst(a) }));
            ids.push(f.push(bb, Instruction::Call { callee: "input".into(), args: vec![] }));
        });
        let result = analyze_ranges(&f).unwrap();
        for &id in &ids {
            assert_eq!(result.get(id).unwrap(), Interval::FULL);
        }
    }

    #[test]
    fn select_joins_both_arms() {
        let mut ids = Vec::new();
        let f = straight_line(|f, bb| {
            let c = f.push(bb, Instruction::ICmp { pred: Predicate::Eq, lhs: Const(0), rhs: Const(0) });
            ids.push(f.push(
                bb,
                Instruction::Select { cond: Inst(c), on_true: Const(2), on_false: Const(8) },
            ));
        });
        let result = analyze_ranges(&f).unwrap();
        assert_eq!(result.get(ids[0]).unwrap(), Interval::new(2.0, 8.0));
    }

    #[test]
    fn unsupported_opcode_is_an_invariant_violation() {
        let f = straight_line(|f, bb| {
            f.push(bb, Instruction::BinOp { op: BinOp::Xor, lhs: Const(1), rhs: Const(2) });
        });
        let err = analyze_ranges(&f).unwrap_err();
        assert!(matches!(err, AnalysisError::InternalInvariantViolated(_)));
    }

    #[test]
    fn unsupported_predicate_is_an_invariant_violation() {
        let f = straight_line(|f, bb| {
            f.push(bb, Instruction::ICmp { pred: Predicate::Ult, lhs: Const(1), rhs: Const(2) });
        });
        assert!(analyze_ranges(&f).is_err());
    }

    #[test]
    fn widened_bounds_are_landmarks() {
        // Loop-shaped dataflow: every fixpoint bound must be a landmark.
        let mut f = Function::new("loop");
        let bb = f.add_block();
        let phi = f.push(bb, Instruction::Phi { incoming: vec![Const(0), Inst(InstId::new(1))] });
        let add = f.push(bb, Instruction::BinOp { op: BinOp::Add, lhs: Inst(phi), rhs: Const(1) });
        assert_eq!(add, InstId::new(1));
        f.push(bb, Instruction::Branch { targets: vec![bb] });

        let opts = RangeOptions::default();
        let landmarks = Landmarks::collect(&f, opts.max_exponent);
        let result = analyze_ranges_with(&f, &opts).unwrap();
        for (_, iv) in result.iter() {
            assert!(landmarks.bounds.iter().any(|&b| b == iv.lower()), "lower {} not a landmark", iv.lower());
            assert!(landmarks.bounds.iter().any(|&b| b == iv.upper()), "upper {} not a landmark", iv.upper());
        }
    }

    #[test]
    fn rerun_is_idempotent() {
        let mut f = Function::new("loop");
        let bb = f.add_block();
        let phi = f.push(bb, Instruction::Phi { incoming: vec![Const(0), Inst(InstId::new(1))] });
        let add = f.push(bb, Instruction::BinOp { op: BinOp::Add, lhs: Inst(phi), rhs: Const(1) });
        assert_eq!(add, InstId::new(1));
        f.push(bb, Instruction::Branch { targets: vec![bb] });

        let first = analyze_ranges(&f).unwrap();
        let second = analyze_ranges(&f).unwrap();
        for (id, iv) in first.iter() {
            assert_eq!(second.get(id).unwrap(), iv);
        }
    }
}
