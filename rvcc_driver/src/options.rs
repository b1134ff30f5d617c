//! Command-line surface of the compiler.

use clap::Parser;
use std::path::PathBuf;

use rvcc_common::{CompileError, CompileResult};

/// The rvcc C compiler driver options.
///
/// The binary that owns the parser embeds this struct; unknown options are
/// rejected by clap with a non-zero exit.
#[derive(Parser, Debug, Clone)]
#[command(name = "rvcc")]
#[command(about = "A small C compiler targeting RV64")]
#[command(version)]
pub struct Options {
    /// Input files; standard input when empty.
    pub inputs: Vec<PathBuf>,

    /// Output path for the generated assembly.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Symbols to export when targeting a module format.
    #[arg(long = "export", value_delimiter = ',')]
    pub exports: Vec<String>,

    /// Stack size for module-format back ends (bytes, positive).
    #[arg(long)]
    pub stack_size: Option<i64>,

    /// Treat warnings as errors.
    #[arg(long)]
    pub werror: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress output.
    #[arg(short, long)]
    pub quiet: bool,
}

impl Options {
    /// Validate and convert into the engine-facing subset.
    pub fn to_compile_options(&self) -> CompileResult<CompileOptions> {
        let stack_size = match self.stack_size {
            Some(size) if size <= 0 => {
                return Err(CompileError::fatal(format!(
                    "stack size must be positive: {}",
                    size
                )));
            }
            Some(size) => Some(size as u64),
            None => None,
        };
        Ok(CompileOptions {
            output: self.output.clone(),
            exports: self.exports.clone(),
            stack_size,
            warnings_as_errors: self.werror,
        })
    }
}

/// The options the compile pipeline actually consumes.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub output: Option<PathBuf>,
    pub exports: Vec<String>,
    pub stack_size: Option<u64>,
    pub warnings_as_errors: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_the_documented_surface() {
        let opts = Options::parse_from([
            "rvcc",
            "a.c",
            "b.c",
            "-o",
            "out.s",
            "--export",
            "main,setup",
            "--stack-size",
            "4096",
        ]);
        assert_eq!(opts.inputs.len(), 2);
        assert_eq!(opts.exports, vec!["main", "setup"]);
        let compile = opts.to_compile_options().unwrap();
        assert_eq!(compile.stack_size, Some(4096));
    }

    #[test]
    fn rejects_unknown_options() {
        assert!(Options::try_parse_from(["rvcc", "--no-such-flag"]).is_err());
    }

    #[test]
    fn rejects_non_positive_stack_size() {
        let opts = Options::parse_from(["rvcc", "--stack-size", "0"]);
        assert!(opts.to_compile_options().is_err());
    }
}
