//! Cross-module scenarios: source text through [`icarus::frontend`], into
//! [`icarus::Emitter`], executed by [`icarus::interp::Interpreter`].
//! Colocated unit tests exercise each module against hand-built `ast::Expr`
//! trees; these exercise the whole pipeline against source text instead,
//! matching `cranelift-codegen`'s split between inline tests and its
//! top-level `filetests` integration suite.

use icarus::frontend;
use icarus::interp::Interpreter;
use icarus::interp::value::RuntimeValue;
use icarus::module::Module;
use icarus::types::Evaluation;

fn run_source(source: &str) -> RuntimeValue {
    let expr = frontend::parse_expr(source).expect("parse failure");
    let mut module = Module::new();
    let binding = {
        let mut emitter = module.emitter();
        emitter
            .emit_function("main", &[], None, Evaluation::PreferRuntime, &expr)
            .expect("emit failure")
    };
    let registry = module.registry_mut();
    let functions = module.functions_mut();
    let mut interp = Interpreter::new();
    interp
        .run(functions, registry, binding.function_ref, vec![])
        .expect("evaluation failure")
        .into_iter()
        .next()
        .expect("main returns a value")
}

#[test]
fn arithmetic_precedence_from_source() {
    assert_eq!(run_source("2 + 3 * 4"), RuntimeValue::I64(14));
}

#[test]
fn let_bindings_thread_through_a_block() {
    let source = "{ let a = 10; let b = a * 2; a + b }";
    assert_eq!(run_source(source), RuntimeValue::I64(30));
}

#[test]
fn if_else_picks_the_taken_branch() {
    assert_eq!(run_source("if 1 < 2 { 100 } else { 200 }"), RuntimeValue::I64(100));
    assert_eq!(run_source("if 2 < 1 { 100 } else { 200 }"), RuntimeValue::I64(200));
}

#[test]
fn switch_falls_through_to_default() {
    let source = "switch 7 { 1 => 10, 2 => 20, default => -1 }";
    assert_eq!(run_source(source), RuntimeValue::I64(-1));
}

#[test]
fn switch_matches_a_declared_arm() {
    let source = "switch 2 { 1 => 10, 2 => 20, default => -1 }";
    assert_eq!(run_source(source), RuntimeValue::I64(20));
}

#[test]
fn comparison_and_logical_operators_compose() {
    assert_eq!(run_source("(1 < 2) && (3 == 3)"), RuntimeValue::Bool(true));
    assert_eq!(run_source("(1 < 2) && (3 == 4)"), RuntimeValue::Bool(false));
    assert_eq!(run_source("!(1 == 2)"), RuntimeValue::Bool(true));
}

#[test]
fn function_literal_evaluates_to_a_function_value() {
    // A source-level lambda is itself an expression; evaluating it (rather
    // than calling it) produces a `Function`-typed runtime value.
    let result = run_source("fn(n: i64) -> i64 => n * 2");
    assert!(matches!(result, RuntimeValue::FunctionRef(_)));
}
