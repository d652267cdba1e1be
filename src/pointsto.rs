//! Andersen-style points-to analysis.
//!
//! Variables and allocation sites are abstracted to a finite set of
//! **cells**; the solver computes an inclusion-based solution over them:
//!
//! ```text
//! alloc site s     =>  s ∈ pt(s)
//! dst = src (cast) =>  pt(src) ⊆ pt(dst)
//! dst = *ptr       =>  ∀c ∈ pt(ptr): pt(c) ⊆ pt(dst)
//! *ptr = src       =>  ∀c ∈ pt(ptr): pt(src) ⊆ pt(c)
//! ```
//!
//! The solver is the classic cubic construction: subset edges (`succ`)
//! propagate tokens, and the universally quantified load/store rules are
//! installed lazily as **conditional edges** keyed on `(cell, token)` pairs
//! that fire the moment the token reaches the cell. Both `sol` and `succ`
//! only ever grow on a finite domain, which bounds the run at `O(n³)` and
//! makes subset-edge cycles harmless.
//!
//! Cells are interned to dense [`CellId`]s so that `sol`, `succ`, `equiv`
//! and `cond` are keyed by small integers rather than IR references.

use std::collections::{BTreeSet, HashMap, VecDeque};

use log::debug;

use crate::ir::{Function, InstId, Instruction};

/// Dense identifier of an abstract cell.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CellId(u32);

impl CellId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Interner mapping IR values to dense cell ids.
///
/// The cell set is fixed before solving begins: every allocation site and
/// every value referenced by a constraint is registered here during
/// constraint collection.
#[derive(Debug, Clone, Default)]
pub struct CellTable {
    ids: HashMap<InstId, CellId>,
    values: Vec<InstId>,
}

impl CellTable {
    pub fn intern(&mut self, value: InstId) -> CellId {
        if let Some(&id) = self.ids.get(&value) {
            return id;
        }
        let id = CellId(self.values.len() as u32);
        self.ids.insert(value, id);
        self.values.push(value);
        id
    }

    pub fn get(&self, value: InstId) -> Option<CellId> {
        self.ids.get(&value).copied()
    }

    /// The IR value a cell abstracts.
    pub fn value(&self, cell: CellId) -> InstId {
        self.values[cell.index()]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = CellId> {
        (0..self.values.len() as u32).map(CellId)
    }
}

/// A points-to constraint produced by scanning the IR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// `site ∈ pt(site)` for an alloca or calloc call.
    Alloc { site: InstId },
    /// `pt(src) ⊆ pt(dst)`; produced by casts.
    Assign { src: InstId, dst: InstId },
    /// `∀c ∈ pt(ptr): pt(c) ⊆ pt(dst)`.
    Load { ptr: InstId, dst: InstId },
    /// `∀c ∈ pt(ptr): pt(src) ⊆ pt(c)`.
    Store { src: InstId, ptr: InstId },
}

/// Scans a function for pointer-relevant instructions, registering every
/// participating value as a cell.
///
/// Stores of literal constants are skipped, and constant operands in
/// general never become cells: a literal has an always-empty points-to set,
/// so any constraint over it is vacuous.
pub fn collect_constraints(f: &Function) -> (Vec<Constraint>, CellTable) {
    let mut constraints = Vec::new();
    let mut cells = CellTable::default();

    for id in f.inst_ids() {
        match f.inst(id) {
            Instruction::Call { callee, .. } if callee == "calloc" => {
                cells.intern(id);
                constraints.push(Constraint::Alloc { site: id });
            }
            Instruction::Alloca => {
                cells.intern(id);
                constraints.push(Constraint::Alloc { site: id });
            }
            Instruction::Store { src, ptr } => {
                if let (Some(src), Some(ptr)) = (src.as_inst(), ptr.as_inst()) {
                    cells.intern(src);
                    cells.intern(ptr);
                    constraints.push(Constraint::Store { src, ptr });
                }
            }
            Instruction::Load { ptr } => {
                if let Some(ptr) = ptr.as_inst() {
                    cells.intern(ptr);
                    cells.intern(id);
                    constraints.push(Constraint::Load { ptr, dst: id });
                }
            }
            Instruction::Cast { src } | Instruction::IntToPtr { src } | Instruction::PtrToInt { src } => {
                if let Some(src) = src.as_inst() {
                    cells.intern(src);
                    cells.intern(id);
                    constraints.push(Constraint::Assign { src, dst: id });
                }
            }
            _ => {}
        }
    }

    (constraints, cells)
}

/// Solution of the points-to analysis for one function.
#[derive(Debug, Clone)]
pub struct PointsToResult {
    cells: CellTable,
    pt: Vec<BTreeSet<CellId>>,
    equiv: Vec<BTreeSet<CellId>>,
}

impl PointsToResult {
    pub fn cells(&self) -> &CellTable {
        &self.cells
    }

    /// The points-to set of a cell.
    pub fn points_to(&self, cell: CellId) -> &BTreeSet<CellId> {
        &self.pt[cell.index()]
    }

    /// Cells syntactically aliased to `cell` via casts. Asymmetric: only
    /// the destination of a cast is credited with its source. Every cell is
    /// equivalent to itself.
    pub fn equiv(&self, cell: CellId) -> &BTreeSet<CellId> {
        &self.equiv[cell.index()]
    }

    /// The points-to set of an IR value, as IR values. Empty for values
    /// that are not cells.
    pub fn points_to_values(&self, value: InstId) -> Vec<InstId> {
        match self.cells.get(value) {
            Some(cell) => self.points_to(cell).iter().map(|&c| self.cells.value(c)).collect(),
            None => Vec::new(),
        }
    }

    /// Renders the solution: per variable, its points-to set and its
    /// equivalent cells.
    pub fn report(&self, f: &Function) -> String {
        let mut out = String::new();
        for cell in self.cells.iter() {
            out.push_str(&format!("{}\n", f.display_inst(self.cells.value(cell))));
            out.push_str("  points to:\n");
            for &c in self.points_to(cell) {
                out.push_str(&format!("    {}\n", f.display_inst(self.cells.value(c))));
            }
            out.push_str("  equivalent:\n");
            for &c in self.equiv(cell) {
                out.push_str(&format!("    {}\n", f.display_inst(self.cells.value(c))));
            }
        }
        out
    }
}

/// The cubic solver.
#[derive(Debug)]
pub struct PointsToSolver {
    cells: CellTable,
    sol: Vec<BTreeSet<CellId>>,
    succ: Vec<BTreeSet<CellId>>,
    equiv: Vec<BTreeSet<CellId>>,
    cond: HashMap<(CellId, CellId), BTreeSet<(CellId, CellId)>>,
    worklist: VecDeque<(CellId, CellId)>,
}

impl PointsToSolver {
    pub fn new(cells: CellTable) -> Self {
        let n = cells.len();
        let equiv = (0..n as u32).map(|i| BTreeSet::from([CellId(i)])).collect();
        PointsToSolver {
            cells,
            sol: vec![BTreeSet::new(); n],
            succ: vec![BTreeSet::new(); n],
            equiv,
            cond: HashMap::new(),
            worklist: VecDeque::new(),
        }
    }

    /// Processes every constraint and returns the stable solution.
    ///
    /// The result is independent of constraint order: tokens and edges only
    /// accumulate, and every conditional edge fires exactly when its
    /// trigger token arrives, whichever side is installed first.
    pub fn solve(mut self, constraints: &[Constraint]) -> PointsToResult {
        for constraint in constraints {
            debug!("pt: processing {constraint:?}");
            match *constraint {
                Constraint::Alloc { site } => {
                    let s = self.cell(site);
                    self.add_token(s, s);
                    self.propagate();
                }
                Constraint::Store { src, ptr } => {
                    let x = self.cell(ptr);
                    let y = self.cell(src);
                    // Record the stored value as an alias of the pointer's
                    // target before installing the subset edges.
                    self.add_token(y, x);
                    self.propagate();
                    for c in self.all_cells() {
                        if self.sol[x.index()].contains(&c) {
                            self.add_edge(y, c);
                            self.propagate();
                        } else {
                            self.cond.entry((x, c)).or_default().insert((y, c));
                        }
                    }
                }
                Constraint::Load { ptr, dst } => {
                    let x = self.cell(ptr);
                    let z = self.cell(dst);
                    for c in self.all_cells() {
                        if self.sol[x.index()].contains(&c) {
                            self.add_token(c, z);
                            self.propagate();
                        } else {
                            self.cond.entry((x, c)).or_default().insert((c, z));
                        }
                    }
                }
                Constraint::Assign { src, dst } => {
                    let s = self.cell(src);
                    let d = self.cell(dst);
                    self.add_edge(s, d);
                    self.equiv[d.index()].insert(s);
                    self.propagate();
                }
            }
        }

        PointsToResult {
            cells: self.cells,
            pt: self.sol,
            equiv: self.equiv,
        }
    }

    fn cell(&self, value: InstId) -> CellId {
        match self.cells.get(value) {
            Some(cell) => cell,
            None => unreachable!("constraint references unregistered cell {value}"),
        }
    }

    fn all_cells(&self) -> Vec<CellId> {
        self.cells.iter().collect()
    }

    /// Inserts `t` into `sol(x)`; on first insertion, queues the pair for
    /// propagation and re-adds every cell equivalent to the token.
    fn add_token(&mut self, t: CellId, x: CellId) {
        if self.sol[x.index()].insert(t) {
            debug!("pt: token {t:?} -> cell {x:?}");
            self.worklist.push_back((t, x));
            let equivs: Vec<CellId> = self.equiv[t.index()].iter().copied().collect();
            for e in equivs {
                self.add_token(e, x);
            }
        }
    }

    /// Installs the subset edge `pt(x) ⊆ pt(y)` and forwards the tokens
    /// already in `sol(x)`.
    fn add_edge(&mut self, x: CellId, y: CellId) {
        if x == y {
            return;
        }
        if !self.succ[x.index()].insert(y) {
            return;
        }
        debug!("pt: edge {x:?} -> {y:?}");
        let tokens: Vec<CellId> = self.sol[x.index()].iter().copied().collect();
        for t in tokens {
            self.add_token(t, y);
        }
    }

    /// Drains the worklist: each popped `(t, x)` fires the conditional
    /// edges keyed on it and forwards `t` along the subset edges of `x`.
    fn propagate(&mut self) {
        while let Some((t, x)) = self.worklist.pop_front() {
            if let Some(conds) = self.cond.get(&(x, t)).cloned() {
                for (y, z) in conds {
                    self.add_edge(y, z);
                }
            }
            let succs: Vec<CellId> = self.succ[x.index()].iter().copied().collect();
            for y in succs {
                self.add_token(t, y);
            }
        }
    }
}

/// Collects constraints and solves them in one step.
pub fn solve_points_to(f: &Function) -> PointsToResult {
    let (constraints, cells) = collect_constraints(f);
    PointsToSolver::new(cells).solve(&constraints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, Operand};

    /// p = calloc(); q = bitcast p; r = alloca; store q, r; s = load r
    fn casts_and_memory() -> (Function, [InstId; 5]) {
        let mut f = Function::new("t");
        let bb = f.add_block();
        let p = f.push(bb, Instruction::Call { callee: "calloc".into(), args: vec![Operand::Const(1), Operand::Const(8)] });
        let q = f.push(bb, Instruction::Cast { src: Operand::Inst(p) });
        let r = f.push(bb, Instruction::Alloca);
        let st = f.push(bb, Instruction::Store { src: Operand::Inst(q), ptr: Operand::Inst(r) });
        let s = f.push(bb, Instruction::Load { ptr: Operand::Inst(r) });
        f.push(bb, Instruction::Ret { value: None });
        (f, [p, q, r, st, s])
    }

    #[test]
    fn alloc_seeds_its_own_site() {
        let (f, [p, _, r, _, _]) = casts_and_memory();
        let result = solve_points_to(&f);
        assert!(result.points_to_values(p).contains(&p));
        assert!(result.points_to_values(r).contains(&r));
    }

    #[test]
    fn cast_propagates_and_records_equivalence() {
        let (f, [p, q, _, _, _]) = casts_and_memory();
        let result = solve_points_to(&f);
        // Subset edge p -> q forwards the allocation token.
        assert!(result.points_to_values(q).contains(&p));
        // equiv is asymmetric: q is credited with p, not the reverse.
        let qc = result.cells().get(q).unwrap();
        let pc = result.cells().get(p).unwrap();
        assert!(result.equiv(qc).contains(&pc));
        assert!(!result.equiv(pc).contains(&qc));
        // Every cell is equivalent to itself.
        assert!(result.equiv(pc).contains(&pc));
    }

    #[test]
    fn store_then_load_flows_through_the_cell() {
        let (f, [p, _, _, _, s]) = casts_and_memory();
        let result = solve_points_to(&f);
        // store q, r puts q's targets into r's pointees; load r reads them
        // back out, so the loaded value may reference the calloc site.
        assert!(result.points_to_values(s).contains(&p));
    }

    #[test]
    fn load_before_aliasing_store_still_fires() {
        // The load is scanned before the store that makes its pointer
        // meaningful, exercising the conditional-edge path.
        let mut f = Function::new("t");
        let bb = f.add_block();
        let r = f.push(bb, Instruction::Alloca);
        let s = f.push(bb, Instruction::Load { ptr: Operand::Inst(r) });
        let p = f.push(bb, Instruction::Call { callee: "calloc".into(), args: vec![] });
        let q = f.push(bb, Instruction::Cast { src: Operand::Inst(p) });
        f.push(bb, Instruction::Store { src: Operand::Inst(q), ptr: Operand::Inst(r) });
        f.push(bb, Instruction::Ret { value: None });

        let result = solve_points_to(&f);
        assert!(result.points_to_values(s).contains(&p));
        let _ = q;
    }

    #[test]
    fn solution_is_order_independent() {
        let (f, _) = casts_and_memory();
        let (constraints, cells) = collect_constraints(&f);

        let baseline = PointsToSolver::new(cells.clone()).solve(&constraints);

        let mut reversed = constraints.clone();
        reversed.reverse();
        let permuted = PointsToSolver::new(cells).solve(&reversed);

        for cell in baseline.cells().iter() {
            assert_eq!(baseline.points_to(cell), permuted.points_to(cell));
        }
    }

    #[test]
    fn growth_is_monotone_under_extra_constraints() {
        let (f, [p, q, _, _, _]) = casts_and_memory();
        let (constraints, cells) = collect_constraints(&f);

        let partial = PointsToSolver::new(cells.clone()).solve(&constraints[..2]);
        let complete = PointsToSolver::new(cells).solve(&constraints);

        for cell in partial.cells().iter() {
            assert!(
                partial.points_to(cell).is_subset(complete.points_to(cell)),
                "solution shrank for cell {cell:?}"
            );
        }
        let _ = (p, q);
    }
}
