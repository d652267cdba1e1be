//! Memory safety checking.
//!
//! The legality checker combines the points-to solution with the
//! cell-state facts: at every load, store, and `free` call it resolves the
//! syntactic root pointer, closes it over the cast-equivalence relation,
//! and reports a violation for every referenced cell in an incompatible
//! lifecycle state. Violations are reports, not errors: the analysis
//! always completes and may return an empty list.

use std::collections::BTreeSet;
use std::fmt;

use log::debug;

use crate::cellstate::{run_cell_state, CellState, CellStateResult};
use crate::error::AnalysisError;
use crate::ir::{Function, InstId, Instruction};
use crate::pointsto::{solve_points_to, CellId, PointsToResult};

/// Classes of memory safety violations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    UseAfterFree,
    DoubleFree,
    /// A `free` whose argument may reference stack memory.
    NonHeapFree,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationKind::UseAfterFree => "Use after free",
            ViolationKind::DoubleFree => "Double free",
            ViolationKind::NonHeapFree => "Freeing non-heap memory",
        };
        f.write_str(s)
    }
}

/// One reported violation: a kind and the offending instruction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub inst: InstId,
}

impl Violation {
    pub fn render(&self, f: &Function) -> String {
        format!("{}: {}", self.kind, f.display_inst(self.inst))
    }
}

/// Cells an instruction may reference: the transitive closure of the
/// syntactic root under the cast-equivalence relation. Empty when the root
/// is not a registered cell.
fn referenced_cells(pt: &PointsToResult, root: InstId) -> BTreeSet<CellId> {
    let Some(root) = pt.cells().get(root) else {
        return BTreeSet::new();
    };
    let mut seen = BTreeSet::from([root]);
    let mut stack = vec![root];
    while let Some(cell) = stack.pop() {
        for &e in pt.equiv(cell) {
            if seen.insert(e) {
                stack.push(e);
            }
        }
    }
    seen
}

/// Inspects every load, store, and `free` call and reports the violations
/// implied by the cell states at that point.
///
/// A referenced cell missing from the eligible set carries no state and is
/// silently skipped. Several violations may be reported for one
/// instruction, one per offending cell.
pub fn check_legality(f: &Function, pt: &PointsToResult, csa: &CellStateResult) -> Vec<Violation> {
    let mut violations = Vec::new();

    for id in f.inst_ids() {
        let inst = f.inst(id);
        let root = match inst {
            Instruction::Load { ptr } => ptr.as_inst(),
            Instruction::Store { ptr, .. } => ptr.as_inst(),
            Instruction::Call { callee, args } if callee == "free" => {
                args.first().and_then(|a| a.as_inst())
            }
            _ => None,
        };
        let Some(root) = root else { continue };

        let state = csa.state_at(id);
        for cell in referenced_cells(pt, root) {
            let value = pt.cells().value(cell);
            let Some(idx) = csa.eligible().position(value) else {
                continue;
            };
            let kind = match (inst, state.get(idx)) {
                (Instruction::Load { .. } | Instruction::Store { .. }, CellState::HeapFreed) => {
                    Some(ViolationKind::UseAfterFree)
                }
                (Instruction::Call { .. }, CellState::HeapFreed) => Some(ViolationKind::DoubleFree),
                (Instruction::Call { .. }, CellState::StackAllocated) => {
                    Some(ViolationKind::NonHeapFree)
                }
                _ => None,
            };
            if let Some(kind) = kind {
                debug!("violation: {} at {}", kind, f.display_inst(id));
                violations.push(Violation { kind, inst: id });
            }
        }
    }

    violations
}

/// Runs the whole memory safety pipeline on one function: points-to
/// solving, cell-state dataflow, then the legality check.
pub fn analyze_memory_safety(f: &Function) -> Result<Vec<Violation>, AnalysisError> {
    let pt = solve_points_to(f);
    let csa = run_cell_state(f, &pt);
    Ok(check_legality(f, &pt, &csa))
}

/// Renders one line per violation.
pub fn report_violations(violations: &[Violation], f: &Function) -> String {
    let mut out = String::new();
    for v in violations {
        out.push_str(&v.render(f));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Operand::{Const, Inst};

    #[test]
    fn double_free_is_reported_on_the_second_free() {
        let mut f = Function::new("t");
        let bb = f.add_block();
        let p = f.push(bb, Instruction::Call { callee: "calloc".into(), args: vec![Const(1), Const(8)] });
        let free1 = f.push(bb, Instruction::Call { callee: "free".into(), args: vec![Inst(p)] });
        let free2 = f.push(bb, Instruction::Call { callee: "free".into(), args: vec![Inst(p)] });
        f.push(bb, Instruction::Ret { value: None });

        let violations = analyze_memory_safety(&f).unwrap();
        assert_eq!(violations, vec![Violation { kind: ViolationKind::DoubleFree, inst: free2 }]);
        let _ = free1;
    }

    #[test]
    fn use_after_free_through_a_cast() {
        let mut f = Function::new("t");
        let bb = f.add_block();
        let p = f.push(bb, Instruction::Call { callee: "calloc".into(), args: vec![Const(1), Const(8)] });
        let q = f.push(bb, Instruction::Cast { src: Inst(p) });
        f.push(bb, Instruction::Call { callee: "free".into(), args: vec![Inst(p)] });
        let load = f.push(bb, Instruction::Load { ptr: Inst(q) });
        f.push(bb, Instruction::Ret { value: None });

        let violations = analyze_memory_safety(&f).unwrap();
        assert_eq!(violations, vec![Violation { kind: ViolationKind::UseAfterFree, inst: load }]);
    }

    #[test]
    fn freeing_stack_memory() {
        let mut f = Function::new("t");
        let bb = f.add_block();
        let p = f.push(bb, Instruction::Alloca);
        let fr = f.push(bb, Instruction::Call { callee: "free".into(), args: vec![Inst(p)] });
        f.push(bb, Instruction::Ret { value: None });

        let violations = analyze_memory_safety(&f).unwrap();
        assert_eq!(violations, vec![Violation { kind: ViolationKind::NonHeapFree, inst: fr }]);
    }

    #[test]
    fn safe_program_reports_nothing() {
        let mut f = Function::new("t");
        let bb = f.add_block();
        let p = f.push(bb, Instruction::Call { callee: "calloc".into(), args: vec![Const(1), Const(8)] });
        f.push(bb, Instruction::Store { src: Const(0), ptr: Inst(p) });
        f.push(bb, Instruction::Load { ptr: Inst(p) });
        f.push(bb, Instruction::Call { callee: "free".into(), args: vec![Inst(p)] });
        f.push(bb, Instruction::Ret { value: None });

        assert!(analyze_memory_safety(&f).unwrap().is_empty());
    }

    #[test]
    fn store_after_free_is_a_use() {
        let mut f = Function::new("t");
        let bb = f.add_block();
        let p = f.push(bb, Instruction::Call { callee: "calloc".into(), args: vec![Const(1), Const(8)] });
        f.push(bb, Instruction::Call { callee: "free".into(), args: vec![Inst(p)] });
        let st = f.push(bb, Instruction::Store { src: Const(7), ptr: Inst(p) });
        f.push(bb, Instruction::Ret { value: None });

        let violations = analyze_memory_safety(&f).unwrap();
        assert_eq!(violations, vec![Violation { kind: ViolationKind::UseAfterFree, inst: st }]);
    }
}
