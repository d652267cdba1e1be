//! Per-program-point cell-state dataflow.
//!
//! Tracks, for every eligible allocation cell, where it stands in its
//! lifecycle at every instruction: stack-allocated, heap-allocated, freed,
//! or unknown. The fact at each point is a total map from eligible cells to
//! [`CellState`], joined pointwise over the simplified instruction-level
//! CFG.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use log::debug;

use crate::ir::{Function, InstId, Instruction, Operand};
use crate::pointsto::PointsToResult;

/// Lifecycle state of one allocation cell.
///
/// Five-point lattice: `⊥ ⊑ {HeapAllocated, StackAllocated, HeapFreed} ⊑ ⊤`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CellState {
    Bottom,
    HeapAllocated,
    StackAllocated,
    HeapFreed,
    Top,
}

impl CellState {
    /// Join of two states.
    ///
    /// `HeapAllocated ⊔ HeapFreed = HeapFreed`: a possibly-freed cell
    /// counts as freed.
    pub fn lub(self, other: CellState) -> CellState {
        use CellState::*;
        if self == other {
            return self;
        }
        match (self, other) {
            (Top, _) | (_, Top) => Top,
            (Bottom, s) | (s, Bottom) => s,
            (StackAllocated, _) | (_, StackAllocated) => Top,
            // The remaining distinct pair is HeapAllocated vs HeapFreed.
            _ => HeapFreed,
        }
    }
}

impl fmt::Display for CellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CellState::Bottom => "bottom",
            CellState::HeapAllocated => "heap-allocated",
            CellState::StackAllocated => "stack-allocated",
            CellState::HeapFreed => "heap-freed",
            CellState::Top => "top",
        };
        f.write_str(s)
    }
}

/// The dataflow fact at one program point: a total map from eligible cells
/// (by dense index) to their states.
#[derive(Debug, Clone, PartialEq)]
pub struct MapState(Vec<CellState>);

impl MapState {
    fn bottom(len: usize) -> Self {
        MapState(vec![CellState::Bottom; len])
    }

    pub fn get(&self, idx: usize) -> CellState {
        self.0[idx]
    }

    fn set(&mut self, idx: usize, state: CellState) {
        self.0[idx] = state;
    }

    /// Pointwise join.
    fn join(&self, other: &MapState) -> MapState {
        MapState(
            self.0
                .iter()
                .zip(&other.0)
                .map(|(&a, &b)| a.lub(b))
                .collect(),
        )
    }
}

/// The cells whose lifecycle the analysis tracks: points-to cells that are
/// alloca sites or calls to `calloc`.
#[derive(Debug, Clone)]
pub struct EligibleCells {
    values: Vec<InstId>,
    index: HashMap<InstId, usize>,
}

impl EligibleCells {
    fn collect(f: &Function, pt: &PointsToResult) -> Self {
        let mut values = Vec::new();
        let mut index = HashMap::new();
        for cell in pt.cells().iter() {
            let value = pt.cells().value(cell);
            let eligible = match f.inst(value) {
                Instruction::Alloca => true,
                Instruction::Call { callee, .. } => callee == "calloc",
                _ => false,
            };
            if eligible {
                index.insert(value, values.len());
                values.push(value);
            }
        }
        EligibleCells { values, index }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Dense index of an eligible cell, by the IR value it abstracts.
    pub fn position(&self, value: InstId) -> Option<usize> {
        self.index.get(&value).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = InstId> + '_ {
        self.values.iter().copied()
    }
}

/// Instruction-level successor graph: a non-terminator falls through to the
/// next instruction in its block; a terminator succeeds to the first
/// instruction of each successor block.
pub fn simplified_cfg(f: &Function) -> Vec<Vec<InstId>> {
    let mut succs = vec![Vec::new(); f.inst_count()];
    for (_, block) in f.blocks() {
        for (pos, &id) in block.insts.iter().enumerate() {
            let inst = f.inst(id);
            if inst.is_terminator() {
                for &target in inst.successors() {
                    if let Some(&first) = f.block(target).insts.first() {
                        if !succs[id.index()].contains(&first) {
                            succs[id.index()].push(first);
                        }
                    }
                }
            } else if let Some(&next) = block.insts.get(pos + 1) {
                succs[id.index()].push(next);
            }
        }
    }
    succs
}

/// Result of the cell-state analysis.
///
/// For every instruction two facts are recorded: the joined predecessor
/// state (the program point *at* the instruction, which the safety checker
/// consults) and the post-transfer state (which the fixpoint compares and
/// successors join over).
#[derive(Debug, Clone)]
pub struct CellStateResult {
    eligible: EligibleCells,
    before: Vec<MapState>,
    after: Vec<MapState>,
}

impl CellStateResult {
    pub fn eligible(&self) -> &EligibleCells {
        &self.eligible
    }

    /// The fact at the program point of `id`, before its own transfer.
    pub fn state_at(&self, id: InstId) -> &MapState {
        &self.before[id.index()]
    }

    /// The fact after the transfer of `id`.
    pub fn state_after(&self, id: InstId) -> &MapState {
        &self.after[id.index()]
    }

    pub fn report(&self, f: &Function) -> String {
        let mut out = String::new();
        for id in f.inst_ids() {
            out.push_str(&format!("{}\n", f.display_inst(id)));
            for (idx, cell) in self.eligible.iter().enumerate() {
                out.push_str(&format!(
                    "    {} : {}\n",
                    f.display_inst(cell),
                    self.after[id.index()].get(idx)
                ));
            }
        }
        out
    }
}

/// Transfer function: updates at most one cell.
fn transfer(f: &Function, id: InstId, mut state: MapState, eligible: &EligibleCells) -> MapState {
    match f.inst(id) {
        Instruction::Alloca => {
            if let Some(idx) = eligible.position(id) {
                state.set(idx, CellState::StackAllocated);
            }
        }
        Instruction::Call { callee, args } => {
            if callee == "calloc" {
                if let Some(idx) = eligible.position(id) {
                    state.set(idx, CellState::HeapAllocated);
                }
            } else if callee == "free" {
                // The freed cell is the one named by the first argument,
                // when that argument is itself an eligible cell.
                if let Some(Operand::Inst(p)) = args.first().copied() {
                    if let Some(idx) = eligible.position(p) {
                        state.set(idx, CellState::HeapFreed);
                    }
                }
            }
            // Any other callee is an unknown call with no effect.
        }
        _ => {}
    }
    state
}

/// Runs the forward dataflow to a fixpoint.
pub fn run_cell_state(f: &Function, pt: &PointsToResult) -> CellStateResult {
    let eligible = EligibleCells::collect(f, pt);
    let succs = simplified_cfg(f);

    let mut preds: Vec<Vec<InstId>> = vec![Vec::new(); f.inst_count()];
    for id in f.inst_ids() {
        for &s in &succs[id.index()] {
            preds[s.index()].push(id);
        }
    }

    let bottom = MapState::bottom(eligible.len());
    let mut after: Vec<MapState> = vec![bottom.clone(); f.inst_count()];
    let mut worklist: VecDeque<InstId> = f.inst_ids().collect();

    let joined_preds = |after: &[MapState], id: InstId| -> MapState {
        let mut merged: Option<MapState> = None;
        for &p in &preds[id.index()] {
            let state = &after[p.index()];
            merged = Some(match merged {
                Some(acc) => acc.join(state),
                None => state.clone(),
            });
        }
        merged.unwrap_or_else(|| bottom.clone())
    };

    while let Some(id) = worklist.pop_front() {
        let merged = joined_preds(&after, id);
        let updated = transfer(f, id, merged, &eligible);
        if updated != after[id.index()] {
            debug!("cellstate: {} changed", f.display_inst(id));
            after[id.index()] = updated;
            for &s in &succs[id.index()] {
                worklist.push_back(s);
            }
        }
    }

    let mut before = vec![bottom.clone(); f.inst_count()];
    for id in f.inst_ids() {
        before[id.index()] = joined_preds(&after, id);
    }

    CellStateResult { eligible, before, after }
}
