//! Breakpoint bookkeeping and instruction to source mapping
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::{types::DebugInfo, utils::normalize_path_and_casing};

pub type BreakpointId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeBreakpoint {
    pub id: BreakpointId,
    pub line: i64,
    pub verified: bool,
}

/// How a data breakpoint is triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataAccess {
    Read,
    Write,
    ReadWrite,
}

impl DataAccess {
    /// Combine with another request for the same address; never narrows
    pub fn widen(self, other: DataAccess) -> DataAccess {
        if self == other {
            self
        } else {
            DataAccess::ReadWrite
        }
    }
}

impl FromStr for DataAccess {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(DataAccess::Read),
            "write" => Ok(DataAccess::Write),
            "readWrite" | "read write" => Ok(DataAccess::ReadWrite),
            other => Err(eyre::eyre!("invalid data access type {other}")),
        }
    }
}

impl fmt::Display for DataAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataAccess::Read => f.write_str("read"),
            DataAccess::Write => f.write_str("write"),
            DataAccess::ReadWrite => f.write_str("read write"),
        }
    }
}

/// Source, data and instruction breakpoints of one session
///
/// Source breakpoints are kept per normalised file path in insertion order.
/// Ids start at 1 and are never handed out twice.
#[derive(Debug)]
pub struct BreakpointStore {
    source: HashMap<String, Vec<RuntimeBreakpoint>>,
    next_id: BreakpointId,
    data: HashMap<String, DataAccess>,
    instructions: HashSet<i64>,
}

impl Default for BreakpointStore {
    fn default() -> Self {
        Self {
            source: HashMap::new(),
            next_id: 1,
            data: HashMap::new(),
            instructions: HashSet::new(),
        }
    }
}

impl BreakpointStore {
    pub fn set_breakpoint(&mut self, path: &str, line: i64) -> RuntimeBreakpoint {
        let path = normalize_path_and_casing(path);
        let breakpoint = RuntimeBreakpoint {
            id: self.next_id,
            line,
            verified: false,
        };
        self.next_id += 1;
        self.source.entry(path.clone()).or_default().push(breakpoint);
        tracing::debug!(%path, line, id = breakpoint.id, "added breakpoint");

        self.verify_breakpoints(&path);
        breakpoint
    }

    /// Remove the first breakpoint on `line` in `path`
    pub fn clear_breakpoint(&mut self, path: &str, line: i64) -> Option<RuntimeBreakpoint> {
        let breakpoints = self.source.get_mut(&normalize_path_and_casing(path))?;
        let index = breakpoints.iter().position(|bp| bp.line == line)?;
        Some(breakpoints.remove(index))
    }

    pub fn clear_breakpoints(&mut self, path: &str) {
        self.source.remove(&normalize_path_and_casing(path));
    }

    pub fn breakpoints(&self, path: &str) -> &[RuntimeBreakpoint] {
        self.source
            .get(&normalize_path_and_casing(path))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Check the breakpoints of `path` against the loaded source
    ///
    /// The interpreter offers no way to validate a line, so breakpoints stay
    /// unverified.
    pub fn verify_breakpoints(&mut self, path: &str) {
        let Some(breakpoints) = self.source.get(&normalize_path_and_casing(path)) else {
            return;
        };
        let unverified = breakpoints.iter().filter(|bp| !bp.verified).count();
        tracing::trace!(%path, unverified, "verifying breakpoints");
    }

    /// Whether any file has a breakpoint on `line`
    ///
    /// Files are not compared, so a breakpoint in another file on the same
    /// line matches too. Line 0 and unmapped positions never match.
    pub fn there_is_breakpoint(&self, line: Option<i64>) -> bool {
        let Some(line) = line.filter(|l| *l != 0) else {
            return false;
        };
        self.source
            .values()
            .any(|breakpoints| breakpoints.iter().any(|bp| bp.line == line))
    }

    pub fn set_data_breakpoint(&mut self, address: impl Into<String>, access: DataAccess) -> bool {
        let address = address.into();
        let access = match self.data.get(&address) {
            Some(existing) => existing.widen(access),
            None => access,
        };
        tracing::debug!(%address, %access, "data breakpoint");
        self.data.insert(address, access);
        true
    }

    pub fn data_breakpoint(&self, address: &str) -> Option<DataAccess> {
        self.data.get(address).copied()
    }

    pub fn clear_data_breakpoints(&mut self) {
        self.data.clear();
    }

    pub fn set_instruction_breakpoint(&mut self, address: i64) -> bool {
        self.instructions.insert(address);
        true
    }

    pub fn has_instruction_breakpoint(&self, address: i64) -> bool {
        self.instructions.contains(&address)
    }

    pub fn clear_instruction_breakpoints(&mut self) {
        self.instructions.clear();
    }
}

/// Find the debug info entry covering `offset`
///
/// Ranges may overlap; the last matching entry in table order wins.
pub fn instruction_to_debug_info(table: &[DebugInfo], offset: i64) -> Option<&DebugInfo> {
    table.iter().rev().find(|info| info.contains(offset))
}
