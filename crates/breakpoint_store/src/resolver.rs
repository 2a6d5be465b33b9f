use crate::{format_address, BreakpointError};
use async_trait::async_trait;
use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
};

/// Maps requested locations onto locations the backend can place a trap at.
///
/// Implementations never fail the whole request: an unknown file, or a line
/// with no code at or after it, comes back as
/// [`BreakpointError::UnresolvableLocation`].
#[async_trait]
pub trait LocationResolver: 'static + Send + Sync {
    /// Resolves `line` to the first line at or after it that has code. The
    /// column is accepted for protocol parity and otherwise ignored.
    async fn resolve_line(
        &self,
        path: &Path,
        line: u32,
        column: Option<u32>,
    ) -> Result<u32, BreakpointError>;

    /// Instruction addresses are never relocated.
    async fn resolve_instruction(&self, address: u64) -> Result<u64, BreakpointError>;
}

/// Line table of a loaded program: for every source file, the lines that
/// emitted code, plus every instruction address a trap can be placed at.
#[derive(Clone, Debug, Default)]
pub struct LineTable {
    files: HashMap<PathBuf, BTreeSet<u32>>,
    instructions: BTreeSet<u64>,
}

impl LineTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `line` emitted code starting at `address`.
    pub fn add_line(&mut self, path: impl Into<PathBuf>, line: u32, address: u64) {
        self.files.entry(path.into()).or_default().insert(line);
        self.instructions.insert(address);
    }

    pub fn add_instruction(&mut self, address: u64) {
        self.instructions.insert(address);
    }

    fn next_line_with_code(&self, path: &Path, line: u32) -> Result<u32, BreakpointError> {
        let lines = self.files.get(path).ok_or_else(|| {
            BreakpointError::UnresolvableLocation(format!(
                "No source file named {}.",
                path.display()
            ))
        })?;
        lines
            .range(line..)
            .next()
            .copied()
            .ok_or_else(|| {
                BreakpointError::UnresolvableLocation(format!(
                    "No line {line} in file \"{}\".",
                    path.display()
                ))
            })
    }
}

#[async_trait]
impl LocationResolver for LineTable {
    async fn resolve_line(
        &self,
        path: &Path,
        line: u32,
        _column: Option<u32>,
    ) -> Result<u32, BreakpointError> {
        self.next_line_with_code(path, line)
    }

    async fn resolve_instruction(&self, address: u64) -> Result<u64, BreakpointError> {
        if self.instructions.contains(&address) {
            Ok(address)
        } else {
            Err(BreakpointError::UnresolvableLocation(format!(
                "Cannot access memory at address {}",
                format_address(address)
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_table() -> LineTable {
        let mut table = LineTable::new();
        table.add_line("/src/count.c", 2, 0x1000);
        table.add_line("/src/count.c", 6, 0x1010);
        table.add_line("/src/count.c", 9, 0x1024);
        table
    }

    #[test]
    fn test_exact_line_is_kept() {
        let table = line_table();
        let line = smol::block_on(table.resolve_line(Path::new("/src/count.c"), 6, None));
        assert_eq!(line, Ok(6));
    }

    #[test]
    fn test_line_without_code_moves_forward() {
        let table = line_table();
        let path = Path::new("/src/count.c");
        assert_eq!(smol::block_on(table.resolve_line(path, 3, None)), Ok(6));
        assert_eq!(smol::block_on(table.resolve_line(path, 5, Some(12))), Ok(6));
        // Repeating a relocated request lands on the same line.
        assert_eq!(smol::block_on(table.resolve_line(path, 5, None)), Ok(6));
    }

    #[test]
    fn test_line_past_last_code_fails() {
        let table = line_table();
        let result = smol::block_on(table.resolve_line(Path::new("/src/count.c"), 40, None));
        assert_eq!(
            result,
            Err(BreakpointError::UnresolvableLocation(
                "No line 40 in file \"/src/count.c\".".into()
            ))
        );
    }

    #[test]
    fn test_unknown_file_fails_with_message() {
        let table = line_table();
        let error = smol::block_on(table.resolve_line(Path::new("/src/missing.c"), 1, None))
            .unwrap_err();
        assert!(!error.to_string().is_empty());
    }

    #[test]
    fn test_instruction_requires_exact_address() {
        let table = line_table();
        assert_eq!(smol::block_on(table.resolve_instruction(0x1010)), Ok(0x1010));
        assert!(smol::block_on(table.resolve_instruction(0x1011)).is_err());
    }

    #[test]
    fn test_instructions_outside_line_table() {
        let mut table = line_table();
        assert!(smol::block_on(table.resolve_instruction(0x2000)).is_err());
        table.add_instruction(0x2000);
        assert_eq!(smol::block_on(table.resolve_instruction(0x2000)), Ok(0x2000));
    }
}
