//! Driver for the rvcc compiler: command-line surface, the compile
//! session, and the pass pipeline from an elaborated program to assembly.
//!
//! The lexer and parser are external collaborators; they feed an
//! [`rvcc_sema::Elaborator`] and hand the resulting [`Program`] to
//! [`compile_program`].

pub mod options;
pub mod session;

use log::debug;

use rvcc_ast::{Declaration, Program};
use rvcc_backend::{emit_global_data, AsmStream, TargetIsa};
use rvcc_common::{CompileError, CompileResult};
use rvcc_ir::{alloc_registers, IrBuilder};

pub use options::{CompileOptions, Options};
pub use session::Session;

/// Initialize logging the way the CLI expects it.
pub fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else if quiet {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Info
    };
    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .try_init();
}

/// Run the back half of the pipeline: every function is lowered to IR,
/// tweaked for the target, register-allocated and emitted; globals go to
/// the data sections. Returns the assembly text.
pub fn compile_program(
    program: &Program,
    session: &mut Session,
    isa: &dyn TargetIsa,
    options: &CompileOptions,
) -> CompileResult<String> {
    debug!("compiling for target `{}`", isa.name());
    if !options.exports.is_empty() {
        // Export lists drive module-format back ends; the assembly back
        // end links through the system toolchain instead.
        debug!("ignoring {} exported symbols for this target", options.exports.len());
    }

    let mut asm = AsmStream::new();
    let settings = isa.alloc_settings();
    let config = isa.build_config();

    for decl in &program.decls {
        let Declaration::Func(func) = decl else { continue };
        if func.body.is_none() {
            continue;
        }
        let mut ir = IrBuilder::build(program, func, &mut session.diags, config.clone());
        isa.tweak(&mut ir);
        let extra = isa.extra_occupied(&ir);
        alloc_registers(&mut ir, &settings, extra);
        isa.emit_function(&mut ir, &mut asm);
    }

    emit_global_data(program, &mut asm, &mut session.diags);

    if session.diags.has_fatal() {
        return Err(CompileError::Failed);
    }
    if session.diags.at_limit() {
        return Err(CompileError::TooManyErrors);
    }
    if session.diags.has_errors() {
        return Err(CompileError::Failed);
    }
    Ok(asm.to_string())
}

/// Write the assembly to the requested output path, or stdout when none
/// was given.
pub fn write_output(asm: &str, output: Option<&std::path::Path>) -> CompileResult<()> {
    match output {
        Some(path) => std::fs::write(path, asm)
            .map_err(|e| CompileError::io(format!("cannot write {}: {}", path.display(), e))),
        None => {
            use std::io::Write;
            std::io::stdout()
                .write_all(asm.as_bytes())
                .map_err(|e| CompileError::io(e.to_string()))
        }
    }
}
