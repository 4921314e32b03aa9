//! Compiler configuration, threaded into the compile entry point so
//! callers (the CLI, or an embedder) can extend header search without
//! touching the pipeline internals (spec.md 2 ambient stack).

use std::path::PathBuf;

/// Bundled `include/` directory shipped alongside the binary, used when
/// no `--include-dir` is given (spec.md 6 "resolved from a compiler-
/// bundled `include/` directory").
pub fn bundled_include_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("include")
}

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Directories searched for `#include <...>` headers, in order,
    /// after the bundled `include/` directory.
    pub include_dirs: Vec<PathBuf>,
    /// Stop after writing the `.s` file; skip invoking the external
    /// assembler/linker (spec.md 6 names that invocation an external
    /// collaborator the driver may or may not exercise).
    pub emit_assembly_only: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            include_dirs: vec![bundled_include_dir()],
            emit_assembly_only: false,
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_include_dir(mut self, dir: PathBuf) -> Self {
        self.include_dirs.push(dir);
        self
    }

    pub fn with_emit_assembly_only(mut self, only: bool) -> Self {
        self.emit_assembly_only = only;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_searches_the_bundled_include_dir() {
        let config = CompilerConfig::default();
        assert_eq!(config.include_dirs, vec![bundled_include_dir()]);
        assert!(!config.emit_assembly_only);
    }

    #[test]
    fn with_include_dir_appends_after_the_bundled_dir() {
        let config = CompilerConfig::default().with_include_dir(PathBuf::from("/opt/headers"));
        assert_eq!(config.include_dirs.len(), 2);
        assert_eq!(config.include_dirs[1], PathBuf::from("/opt/headers"));
    }
}
