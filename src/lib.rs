//! # absint-rs: intraprocedural static analyses over a small SSA IR
//!
//! **`absint-rs`** implements two dataflow analyses and a legality checker
//! for an imperative language compiled to a typed SSA-form IR:
//!
//! - **Interval range analysis** ([`analyze_ranges`]): a worklist fixpoint
//!   over an interval domain with ±∞ bounds, accelerated by widening onto a
//!   finite set of landmark bounds derived from the function's constants
//!   and a geometric series.
//! - **Memory safety analysis** ([`analyze_memory_safety`]): a cubic
//!   Andersen-style points-to solver feeding a per-program-point cell-state
//!   dataflow, whose facts the checker uses to flag double frees,
//!   uses-after-free, and frees of stack memory.
//!
//! Both analyses are intraprocedural, single-threaded, and total on
//! well-formed IR; they are plain functions taking a [`Function`] and
//! returning a `Result`, with no registry or host coupling, so any IR
//! producer can drive them. Violations are reports, not errors: a run
//! always completes and may return an empty list.
//!
//! ## Quick start
//!
//! ```rust
//! use absint_rs::{analyze_memory_safety, Function, Instruction, Operand, ViolationKind};
//!
//! // p = calloc(1, 8); free(p); free(p)
//! let mut f = Function::new("double_free");
//! let bb = f.add_block();
//! let p = f.push(bb, Instruction::Call {
//!     callee: "calloc".into(),
//!     args: vec![Operand::Const(1), Operand::Const(8)],
//! });
//! f.push(bb, Instruction::Call { callee: "free".into(), args: vec![Operand::Inst(p)] });
//! let second = f.push(bb, Instruction::Call { callee: "free".into(), args: vec![Operand::Inst(p)] });
//! f.push(bb, Instruction::Ret { value: None });
//!
//! let violations = analyze_memory_safety(&f).unwrap();
//! assert_eq!(violations.len(), 1);
//! assert_eq!(violations[0].kind, ViolationKind::DoubleFree);
//! assert_eq!(violations[0].inst, second);
//! ```
//!
//! ## Core components
//!
//! - [`ir`]: the SSA IR surface the analyses consume.
//! - [`interval`]: pure interval arithmetic with first-class infinities.
//! - [`range`]: the interval range analysis and its widening landmarks.
//! - [`pointsto`]: constraint collection and the cubic inclusion solver.
//! - [`cellstate`]: the five-point allocation-lifecycle dataflow.
//! - [`safety`]: the legality checker and the one-shot pipeline driver.

pub mod cellstate;
pub mod dot;
pub mod error;
pub mod interval;
pub mod ir;
pub mod pointsto;
pub mod range;
pub mod safety;

// Re-exports for convenience
pub use cellstate::{run_cell_state, CellState, CellStateResult, EligibleCells, MapState};
pub use error::AnalysisError;
pub use interval::Interval;
pub use ir::{BasicBlock, BinOp, BlockId, Function, InstId, Instruction, Operand, Predicate};
pub use pointsto::{
    collect_constraints, solve_points_to, CellId, CellTable, Constraint, PointsToResult,
    PointsToSolver,
};
pub use range::{analyze_ranges, analyze_ranges_with, RangeOptions, RangeResult};
pub use safety::{
    analyze_memory_safety, check_legality, report_violations, Violation, ViolationKind,
};
