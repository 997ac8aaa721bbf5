//! The `icarusc` CLI: `spec.md` §6's single verb, `compile --output <path>
//! <source>`. Wires together the external-collaborator interfaces this
//! crate defines (lexer/parser stand-ins in [`icarus::frontend`], the
//! diagnostic sink in [`icarus::diagnostics`]) with the core proper
//! ([`icarus::Module`], [`icarus::Emitter`], [`icarus::interp`]).
//!
//! Grounded on `wasmtime-cli-flags`' `clap::Parser` derive style (a single
//! struct per subcommand, no builder boilerplate) and on `wasmtime-cli`'s
//! `main()` shape: parse flags, initialize `env_logger` from `RUST_LOG`,
//! run the subcommand, translate its `Result` into a process exit code.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use icarus::diagnostics::{CollectingConsumer, DiagnosticConsumer};
use icarus::frontend;
use icarus::interp::Interpreter;
use icarus::module::Module;
use icarus::types::Evaluation;

#[derive(Parser)]
#[command(name = "icarusc", about = "Icarus compile-time evaluation core driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a single source file to a module image.
    Compile {
        /// Path the compiled module image is written to.
        #[arg(long)]
        output: PathBuf,
        /// The Icarus source file to compile.
        source: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Compile { output, source } => run_compile(&output, &source),
    }
}

fn run_compile(output: &PathBuf, source: &PathBuf) -> ExitCode {
    let mut consumer = CollectingConsumer::new();

    let text = match fs::read_to_string(source) {
        Ok(text) => text,
        Err(err) => {
            log::error!("could not read {}: {err}", source.display());
            eprintln!("icarusc: could not read {}: {err}", source.display());
            return ExitCode::FAILURE;
        }
    };

    let expr = match frontend::parse_expr(&text) {
        Ok(expr) => expr,
        Err(err) => {
            log::debug!("parse failure in {}: {err}", source.display());
            eprintln!("icarusc: {}: {err}", source.display());
            return ExitCode::FAILURE;
        }
    };

    let mut module = Module::new();
    log::debug!("emitting top-level expression from {}", source.display());
    let binding = {
        let mut emitter = module.emitter();
        emitter.emit_function("main", &[], None, Evaluation::PreferRuntime, &expr)
    };
    let binding = match binding {
        Ok(binding) => binding,
        Err(err) => {
            consumer.consume(err.to_message());
            eprintln!("icarusc: {}", err);
            return ExitCode::FAILURE;
        }
    };

    log::debug!("running {} to capture its exported value", "main");
    let mut interp = Interpreter::new();
    let returns = {
        let registry = module.registry_mut();
        let functions = module.functions_mut();
        interp.run(functions, registry, binding.function_ref, vec![])
    };
    let returns = match returns {
        Ok(returns) => returns,
        Err(failure) => {
            let err = icarus::Error::EvaluationFailure(failure);
            consumer.consume(err.to_message());
            eprintln!("icarusc: {}", err);
            return ExitCode::FAILURE;
        }
    };

    if let Some(value) = returns.into_iter().next() {
        let mut bytes = vec![0u8; 16];
        value.encode_into(&mut bytes);
        let ty = module.registry().decompose_function(binding.function_type).returns[0];
        module.export("main", ty, bytes);
    }

    if let Err(err) = write_image(&module, output) {
        eprintln!("icarusc: could not write {}: {err}", output.display());
        return ExitCode::FAILURE;
    }

    if consumer.has_errors() {
        return ExitCode::FAILURE;
    }
    log::info!("wrote module image to {}", output.display());
    ExitCode::SUCCESS
}

#[cfg(feature = "module-image")]
fn write_image(module: &Module, output: &PathBuf) -> std::io::Result<()> {
    use icarus::module::image::ModuleImage;

    let image = ModuleImage::capture(module);
    let bytes = image
        .to_bincode()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    fs::write(output, bytes)
}

#[cfg(not(feature = "module-image"))]
fn write_image(_module: &Module, _output: &PathBuf) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "icarusc requires the `module-image` feature to write an output file",
    ))
}
