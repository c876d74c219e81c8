/// Benchmark runner for the register interpreter.
///
/// Compares the two dispatch strategies on hand-assembled bytecode and times
/// the scope resolver on a generated script.

extern crate justvm;

use std::rc::Rc;
use std::time::{Duration, Instant};

use justvm::compiler::{self, ContextType, ResolverOptions};
use justvm::parser::JsParser;
use justvm::runner::ds::object_property::PropertyDescriptor;
use justvm::runner::ds::value::{JsNumberType, JsValue};
use justvm::runner::vm::bytecode::{AluOp, CallTarget, CompiledFunction, FunctionBuilder, FunctionMetadata, OpCode, Operand};
use justvm::runner::vm::config::{DispatchStrategy, EngineConfig};
use justvm::runner::vm::ExecutionEngine;

fn engine(dispatch: DispatchStrategy) -> ExecutionEngine {
    let mut engine = ExecutionEngine::new(EngineConfig {
        dispatch,
        ..EngineConfig::default()
    });
    let o = engine.new_object();
    o.borrow_mut()
        .define_own_property("x".into(), PropertyDescriptor::data(JsValue::integer(1)));
    engine.global_set("o", JsValue::Object(o));
    engine
}

/// Run a benchmark and return the execution time.
fn run_benchmark(function: &Rc<CompiledFunction>, dispatch: DispatchStrategy, iterations: u32) -> Duration {
    let mut engine = engine(dispatch);
    let start = Instant::now();
    for _ in 0..iterations {
        let _ = engine.run(function.clone());
    }
    start.elapsed()
}

fn run_and_get(function: &Rc<CompiledFunction>, dispatch: DispatchStrategy) -> i64 {
    match engine(dispatch).run(function.clone()) {
        Ok(JsValue::Number(JsNumberType::Integer(n))) => n,
        _ => -1,
    }
}

// ============================================================================
// Benchmark definitions
// ============================================================================

/// `for (i = 0; i < n; i++) { body(acc, i) } return acc;` with the loop
/// counter in t0 and the accumulator in t1.
fn counted_loop(name: &str, n: i64, temps: u32, body: impl Fn(&mut FunctionBuilder)) -> Rc<CompiledFunction> {
    let mut b = FunctionBuilder::new(name);
    b.init_stack_frame(temps);
    let zero = b.add_constant(JsValue::integer(0));
    let limit = b.add_constant(JsValue::integer(n));
    let (i, acc, done) = (Operand::temp(0), Operand::temp(1), Operand::temp(2));
    b.mov(i, zero);
    b.mov(acc, zero);
    let top = b.new_label();
    let end = b.new_label();
    b.bind(top);
    b.binop(AluOp::Ge, done, i, limit);
    b.jump_eq(done, end);
    body(&mut b);
    b.unary(OpCode::PreIncrement, done, i);
    b.jump(top);
    b.bind(end);
    b.ret(acc);
    b.build().unwrap()
}

fn bench_loop_sum() -> Rc<CompiledFunction> {
    counted_loop("loopSum", 10_000, 3, |b| {
        b.binary(OpCode::Add, Operand::temp(1), Operand::temp(1), Operand::temp(0));
    })
}

fn bench_bitwise() -> Rc<CompiledFunction> {
    counted_loop("bitwise", 1_000, 4, |b| {
        b.binary_const(OpCode::ShlConst, Operand::temp(3), Operand::temp(0), 1);
        b.binary_const(OpCode::BitXorConst, Operand::temp(3), Operand::temp(3), 0x55);
        b.binary(OpCode::BitOr, Operand::temp(1), Operand::temp(1), Operand::temp(3));
    })
}

fn bench_property_reads() -> Rc<CompiledFunction> {
    counted_loop("propertyReads", 1_000, 5, |b| {
        b.get_global_lookup(Operand::temp(3), "o");
        b.get_lookup(Operand::temp(4), Operand::temp(3), "x");
        b.binary(OpCode::Add, Operand::temp(1), Operand::temp(1), Operand::temp(4));
    })
}

fn bench_calls() -> Rc<CompiledFunction> {
    let inc = {
        let mut b = FunctionBuilder::new("inc").metadata(FunctionMetadata {
            formal_names: vec!["v".to_string()],
            has_simple_parameters: true,
            ..FunctionMetadata::default()
        });
        b.init_stack_frame(1);
        let one = b.add_constant(JsValue::integer(1));
        b.binary(OpCode::Add, Operand::temp(0), Operand::argument(0, 0), one);
        b.ret(Operand::temp(0));
        b.build().unwrap()
    };
    let mut b = FunctionBuilder::new("calls");
    // t0 i, t1 acc, t2 done, t3 callee, t4.. record with one argument.
    b.init_stack_frame(4 + 3 + 1);
    let zero = b.add_constant(JsValue::integer(0));
    let limit = b.add_constant(JsValue::integer(1_000));
    let f = b.add_nested(inc);
    b.load_closure(Operand::temp(3), f);
    let (i, acc, done) = (Operand::temp(0), Operand::temp(1), Operand::temp(2));
    b.mov(i, zero);
    b.mov(acc, zero);
    let top = b.new_label();
    let end = b.new_label();
    b.bind(top);
    b.binop(AluOp::Ge, done, i, limit);
    b.jump_eq(done, end);
    b.mov(FunctionBuilder::call_arg(4, 0), acc);
    b.call(OpCode::CallValue, acc, CallTarget::Value(Operand::temp(3)), 4, 1);
    b.unary(OpCode::PreIncrement, done, i);
    b.jump(top);
    b.bind(end);
    b.ret(acc);
    b.build().unwrap()
}

/// A script with `n` functions each closing over a counter.
fn resolver_script(n: usize) -> String {
    (0..n)
        .map(|i| {
            format!(
                "function make{i}() {{ var count = 0; var local = {i}; \
                 return function () {{ count++; return count + local; }}; }}\n"
            )
        })
        .collect()
}

fn main() {
    println!("=======================================================");
    println!("  justvm - Performance Benchmarks");
    println!("  Switch dispatch vs Jump table dispatch");
    println!("=======================================================\n");

    let benchmarks: Vec<(&str, Rc<CompiledFunction>, u32)> = vec![
        ("Loop Sum (10K iterations)", bench_loop_sum(), 100),
        ("Bitwise Operations (1K)", bench_bitwise(), 500),
        ("Property Reads (1K)", bench_property_reads(), 500),
        ("Calls (1K)", bench_calls(), 200),
    ];

    println!("{:<30} {:>14} {:>14} {:>10}", "Benchmark", "Switch", "JumpTable", "Ratio");
    println!("{}", "-".repeat(70));

    let mut total_switch = Duration::ZERO;
    let mut total_table = Duration::ZERO;

    for (name, function, iterations) in &benchmarks {
        let switch_dur = run_benchmark(function, DispatchStrategy::Switch, *iterations);
        let table_dur = run_benchmark(function, DispatchStrategy::JumpTable, *iterations);
        total_switch += switch_dur;
        total_table += table_dur;

        let ratio = switch_dur.as_secs_f64() / table_dur.as_secs_f64();
        println!("{:<30} {:>12.2?} {:>12.2?} {:>9.2}x", name, switch_dur, table_dur, ratio);
    }

    println!("{}", "-".repeat(70));
    let total_ratio = total_switch.as_secs_f64() / total_table.as_secs_f64();
    println!(
        "{:<30} {:>12.2?} {:>12.2?} {:>9.2}x",
        "TOTAL", total_switch, total_table, total_ratio
    );

    println!("\n=======================================================");
    println!("  Scope Resolver");
    println!("=======================================================\n");

    let script = resolver_script(200);
    let start = Instant::now();
    let mut contexts = 0;
    for _ in 0..20 {
        let program = JsParser::parse_to_ast_from_str(&script).unwrap();
        let graph = compiler::resolve(&program, ContextType::Global, &ResolverOptions::default()).unwrap();
        contexts = graph.len();
    }
    println!("{:<30} {:>12.2?} ({} contexts)", "Parse + resolve (x20)", start.elapsed(), contexts);

    println!("\n=======================================================");
    println!("  Correctness Verification");
    println!("=======================================================\n");

    let verifications: Vec<(&str, &Rc<CompiledFunction>, i64)> = vec![
        ("Loop Sum", &benchmarks[0].1, 49_995_000),
        ("Property Reads", &benchmarks[2].1, 1_000),
        ("Calls", &benchmarks[3].1, 1_000),
    ];

    println!("{:<20} {:>12} {:>12} {:>12}", "Test", "Expected", "Switch", "JumpTable");
    println!("{}", "-".repeat(58));

    for (name, function, expected) in verifications {
        let switch_val = run_and_get(function, DispatchStrategy::Switch);
        let table_val = run_and_get(function, DispatchStrategy::JumpTable);
        let s_status = if switch_val == expected { "✓" } else { "✗" };
        let t_status = if table_val == expected { "✓" } else { "✗" };
        println!(
            "{:<20} {:>12} {:>4} {:>7} {:>4} {:>7}",
            name, expected, s_status, switch_val, t_status, table_val
        );
    }
}
