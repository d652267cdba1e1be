//! Graphviz export for the analysis graphs.
//!
//! Renders the instruction-level control flow graph and the points-to
//! subset graph in DOT format, for inspecting what the fixpoints iterate
//! over.

use std::fmt::Write as _;

use crate::cellstate::simplified_cfg;
use crate::ir::Function;
use crate::pointsto::PointsToResult;

/// Renders the simplified instruction-level CFG.
///
/// Nodes are instructions grouped by basic block; edges are intra-block
/// fallthrough and terminator-to-block-head successors.
pub fn cfg_to_dot(f: &Function) -> Result<String, std::fmt::Error> {
    let succs = simplified_cfg(f);

    let mut dot = String::new();
    writeln!(dot, "digraph \"{}\" {{", f.name)?;
    writeln!(dot, "node [shape=box, fontname=monospace];")?;

    for (bb, block) in f.blocks() {
        writeln!(dot, "subgraph cluster_{} {{", bb.index())?;
        writeln!(dot, "label=\"{bb}\";")?;
        for &id in &block.insts {
            writeln!(dot, "n{} [label=\"{}\"];", id.index(), escape(&f.display_inst(id)))?;
        }
        writeln!(dot, "}}")?;
    }

    for id in f.inst_ids() {
        for &s in &succs[id.index()] {
            writeln!(dot, "n{} -> n{};", id.index(), s.index())?;
        }
    }

    writeln!(dot, "}}")?;
    Ok(dot)
}

/// Renders the solved points-to relation.
///
/// Solid edges are membership (`cell -> member of its points-to set`);
/// dashed edges are cast equivalence (`cell -> equivalent source`).
pub fn points_to_dot(f: &Function, pt: &PointsToResult) -> Result<String, std::fmt::Error> {
    let mut dot = String::new();
    writeln!(dot, "digraph \"{}-pt\" {{", f.name)?;
    writeln!(dot, "node [shape=ellipse, fontname=monospace];")?;

    for cell in pt.cells().iter() {
        let value = pt.cells().value(cell);
        writeln!(dot, "c{} [label=\"{}\"];", cell.index(), escape(&f.display_inst(value)))?;
    }

    for cell in pt.cells().iter() {
        for &target in pt.points_to(cell) {
            writeln!(dot, "c{} -> c{};", cell.index(), target.index())?;
        }
        for &eq in pt.equiv(cell) {
            if eq != cell {
                writeln!(dot, "c{} -> c{} [style=dashed];", cell.index(), eq.index())?;
            }
        }
    }

    writeln!(dot, "}}")?;
    Ok(dot)
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
