//! shivc: a self-hosting-oriented compiler for a substantial subset of
//! C, targeting x86-64 Linux via generated GAS assembly and an
//! external assembler/linker.
//!
//! The pipeline is a strict forward pass (spec.md 3 "data flows
//! strictly forward"): resolve `#include`s, lex + parse into an AST,
//! run semantic analysis to lower the AST into IL while collecting
//! diagnostics, and — if no error was diagnosed — hand the IL to the
//! register allocator and code generator to produce assembly text.
//! Diagnostics are printed by the caller regardless of whether the
//! overall `Result` is `Ok`; this crate only ever returns `Err` for
//! conditions a diagnostic cannot represent (I/O failure, a missing
//! header, a failed external assembler/linker invocation).

pub mod ast;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod il;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod sema;
pub mod symtab;
pub mod types;

pub use ast::Program;
pub use config::CompilerConfig;
pub use diagnostics::{DiagnosticBag, SourceBuffer};
pub use error::CompileError;
pub use parser::Parser;
pub use resolver::Resolver;
pub use symtab::SymbolTable;

use std::fs;
use std::path::Path;
use std::process::Command;

/// Lex, parse, and semantically analyze `source_path`, returning the
/// generated assembly text and the diagnostics collected along the
/// way. Does not invoke the external assembler/linker; use
/// [`compile_file_with_config`] for the full executable-producing
/// pipeline. The `DiagnosticBag` is always returned, even on `Err`, so
/// the caller can print diagnostics regardless of outcome; `Err` is
/// reserved for conditions a diagnostic cannot represent (I/O, a
/// missing header) plus the "analysis found at least one error"
/// outcome itself (`CompileError::Diagnosed`, checked via
/// `diags.has_errors()` — spec.md 7 "code generation is gated on no
/// errors").
pub fn compile_to_assembly(
    source_path: &Path,
    config: &CompilerConfig,
) -> (DiagnosticBag, Result<String, CompileError>) {
    let mut diags = DiagnosticBag::new();

    let source = match fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => return (diags, Err(e.into())),
    };
    let base_dir = source_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| Path::new(".").to_path_buf());

    let mut resolver = Resolver::new(config.include_dirs.clone());
    let resolved = match resolver.resolve(&source, &base_dir) {
        Ok(r) => r,
        Err(e) => return (diags, Err(CompileError::Resolve(e))),
    };

    let mut symtab = SymbolTable::new();
    let mut program = Program::default();

    if !resolved.prelude.trim().is_empty() {
        let mut prelude_parser = Parser::new(&resolved.prelude, &mut symtab, &mut diags);
        program.externals.extend(prelude_parser.parse_program().externals);
    }
    let mut main_parser = Parser::new(&resolved.main, &mut symtab, &mut diags);
    program.externals.extend(main_parser.parse_program().externals);

    let module = sema::analyze(&program, &mut diags);

    if diags.has_errors() {
        return (
            diags,
            Err(CompileError::Diagnosed(format!(
                "{} compiled with errors",
                source_path.display()
            ))),
        );
    }

    let result = codegen::generate(&module).map_err(CompileError::from);
    (diags, result)
}

/// Compile `source_path` to an executable at `output_path`, using the
/// default configuration.
pub fn compile_file(
    source_path: &Path,
    output_path: &Path,
) -> (DiagnosticBag, Result<(), CompileError>) {
    compile_file_with_config(source_path, output_path, &CompilerConfig::default())
}

/// Compile `source_path` to `output_path` with a custom
/// [`CompilerConfig`]. When `config.emit_assembly_only` is set,
/// `output_path` receives the `.s` text directly and the external
/// assembler/linker is never invoked.
pub fn compile_file_with_config(
    source_path: &Path,
    output_path: &Path,
    config: &CompilerConfig,
) -> (DiagnosticBag, Result<(), CompileError>) {
    let (diags, result) = compile_to_assembly(source_path, config);
    let assembly = match result {
        Ok(a) => a,
        Err(e) => return (diags, Err(e)),
    };

    if config.emit_assembly_only {
        let result = fs::write(output_path, assembly).map_err(CompileError::from);
        return (diags, result);
    }

    let asm_path = output_path.with_extension("s");
    if let Err(e) = fs::write(&asm_path, &assembly) {
        return (diags, Err(e.into()));
    }

    let status = Command::new("cc")
        .arg(&asm_path)
        .arg("-o")
        .arg(output_path)
        .arg("-no-pie")
        .status();

    let result = match status {
        Ok(status) if status.success() => {
            fs::remove_file(&asm_path).ok();
            Ok(())
        }
        Ok(status) => Err(CompileError::Toolchain(format!(
            "assembler/linker exited with status {:?}",
            status.code()
        ))),
        Err(e) => Err(CompileError::Toolchain(format!(
            "failed to run assembler/linker: {}",
            e
        ))),
    };
    (diags, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn a_trivial_program_compiles_to_assembly_with_no_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.c");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"int main(void) { return 0; }\n")
            .unwrap();

        let config = CompilerConfig::new();
        let (diags, result) = compile_to_assembly(&path, &config);
        let asm = result.unwrap();
        assert!(asm.contains("main:"));
        assert!(diags.is_empty());
    }

    #[test]
    fn an_undeclared_identifier_is_reported_and_compilation_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.c");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"int main(void) { return x; }\n")
            .unwrap();

        let config = CompilerConfig::new();
        let (diags, result) = compile_to_assembly(&path, &config);
        assert!(matches!(result, Err(CompileError::Diagnosed(_))));
        assert!(diags.has_errors());
    }
}
