//! Demo driver: builds a handful of sample functions in code, runs both
//! analyses on each, and prints their reports.

use clap::Parser;

use absint_rs::ir::Operand::{Const, Inst};
use absint_rs::{
    analyze_memory_safety, analyze_ranges_with, report_violations, BinOp, Function, InstId,
    Instruction, Predicate, RangeOptions,
};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Disable widening (terminates only on loop-free dataflow).
    #[clap(long)]
    no_widening: bool,

    /// Size of the geometric landmark series added for widening.
    #[clap(long, value_name = "INT", default_value = "32")]
    max_exponent: u32,

    /// Enable per-iteration trace output.
    #[clap(long)]
    debug: bool,

    /// Print the simplified CFG and points-to graph in DOT format.
    #[clap(long)]
    dot: bool,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Cli::parse();

    simplelog::TermLogger::init(
        if args.debug {
            simplelog::LevelFilter::Debug
        } else {
            simplelog::LevelFilter::Info
        },
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let opts = RangeOptions {
        widening: !args.no_widening,
        max_exponent: args.max_exponent,
        debug: args.debug,
    };

    for f in [counter_loop(), zero_straddling_div(), double_free(), use_after_free_via_cast(), stack_free()] {
        println!("=== {} ===", f.name);
        for id in f.inst_ids() {
            println!("  {}", f.display_inst(id));
        }

        println!("--- interval ranges ---");
        match analyze_ranges_with(&f, &opts) {
            Ok(result) => print!("{}", result.report(&f)),
            Err(e) => println!("range analysis failed: {e}"),
        }

        println!("--- memory safety ---");
        let violations = analyze_memory_safety(&f)?;
        if violations.is_empty() {
            println!("no violations");
        } else {
            print!("{}", report_violations(&violations, &f));
        }

        if args.dot {
            println!("--- dot ---");
            print!("{}", absint_rs::dot::cfg_to_dot(&f)?);
            let pt = absint_rs::solve_points_to(&f);
            print!("{}", absint_rs::dot::points_to_dot(&f, &pt)?);
        }
        println!();
    }

    Ok(())
}

/// i0 = phi(0, i1); i1 = i0 + 1; cond = i0 < 10
fn counter_loop() -> Function {
    let mut f = Function::new("counter_loop");
    let bb = f.add_block();
    // Ids are dense in push order, so the phi can name the add up front.
    let phi = f.push(bb, Instruction::Phi { incoming: vec![Const(0), Inst(InstId::new(1))] });
    f.push(bb, Instruction::BinOp { op: BinOp::Add, lhs: Inst(phi), rhs: Const(1) });
    f.push(bb, Instruction::ICmp { pred: Predicate::Slt, lhs: Inst(phi), rhs: Const(10) });
    f.push(bb, Instruction::Branch { targets: vec![bb] });
    f
}

/// r = [10,10] sdiv [-1,1]
fn zero_straddling_div() -> Function {
    let mut f = Function::new("zero_straddling_div");
    let bb = f.add_block();
    let num = f.push(bb, Instruction::BinOp { op: BinOp::Add, lhs: Const(10), rhs: Const(0) });
    let den = f.push(bb, Instruction::Select {
        cond: Const(0),
        on_true: Const(-1),
        on_false: Const(1),
    });
    f.push(bb, Instruction::BinOp { op: BinOp::SDiv, lhs: Inst(num), rhs: Inst(den) });
    f.push(bb, Instruction::Ret { value: None });
    f
}

fn double_free() -> Function {
    let mut f = Function::new("double_free");
    let bb = f.add_block();
    let p = f.push(bb, Instruction::Call { callee: "calloc".into(), args: vec![Const(1), Const(8)] });
    f.push(bb, Instruction::Call { callee: "free".into(), args: vec![Inst(p)] });
    f.push(bb, Instruction::Call { callee: "free".into(), args: vec![Inst(p)] });
    f.push(bb, Instruction::Ret { value: None });
    f
}

fn use_after_free_via_cast() -> Function {
    let mut f = Function::new("use_after_free_via_cast");
    let bb = f.add_block();
    let p = f.push(bb, Instruction::Call { callee: "calloc".into(), args: vec![Const(1), Const(8)] });
    let q = f.push(bb, Instruction::Cast { src: Inst(p) });
    f.push(bb, Instruction::Call { callee: "free".into(), args: vec![Inst(p)] });
    f.push(bb, Instruction::Load { ptr: Inst(q) });
    f.push(bb, Instruction::Ret { value: None });
    f
}

fn stack_free() -> Function {
    let mut f = Function::new("stack_free");
    let bb = f.add_block();
    let p = f.push(bb, Instruction::Alloca);
    f.push(bb, Instruction::Call { callee: "free".into(), args: vec![Inst(p)] });
    f.push(bb, Instruction::Ret { value: None });
    f
}
