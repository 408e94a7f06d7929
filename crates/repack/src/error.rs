//! Fatal faults of a merge run
//!
//! Every variant aborts the run; recoverable conditions (resource collisions,
//! ambiguous public types) are reported as warnings in
//! [`MergeReport`](crate::report::MergeReport) instead.

use std::fmt;

/// Errors that abort a merge run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// An initializer instruction carries an operand kind that cannot be remapped
    NotImplemented {
        operand: &'static str,
        routine: String,
        module: String,
    },
    /// An exported-type forwarding chain revisits an entry it already walked
    CyclicForwarder { chain: Vec<String> },
    /// No input module was flagged as primary
    NoPrimaryModule,
    /// More than one input module was flagged as primary
    MultiplePrimaryModules { first: String, second: String },
    /// Two input modules share a name (compared case-insensitively)
    DuplicateModule { name: String },
    /// An internalization exclude pattern failed to compile
    InvalidPattern { pattern: String, message: String },
    /// Input modules target different runtimes
    IncompatibleRuntime {
        module: String,
        runtime: String,
        expected: String,
    },
    /// A reference names a symbol that none of the merged modules define
    UnknownSymbol { module: String, symbol: String },
    /// An input module's tables point at entries it does not have
    MalformedModule { module: String, detail: String },
    /// A branch operand points outside its routine body
    InvalidBranchTarget {
        routine: String,
        module: String,
        target: usize,
    },
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotImplemented {
                operand,
                routine,
                module,
            } => write!(
                f,
                "Operand kind '{operand}' in '{routine}' of module '{module}' is not supported \
                 when merging initializers"
            ),
            Self::CyclicForwarder { chain } => {
                write!(f, "Cyclic type forwarder chain: {}", chain.join(" -> "))
            }
            Self::NoPrimaryModule => write!(f, "No primary module was designated"),
            Self::MultiplePrimaryModules { first, second } => write!(
                f,
                "Both '{first}' and '{second}' are designated as the primary module"
            ),
            Self::DuplicateModule { name } => {
                write!(f, "Module '{name}' was supplied more than once")
            }
            Self::InvalidPattern { pattern, message } => {
                write!(f, "Invalid internalize exclude pattern '{pattern}': {message}")
            }
            Self::IncompatibleRuntime {
                module,
                runtime,
                expected,
            } => write!(
                f,
                "Module '{module}' targets runtime '{runtime}' but the primary module targets \
                 '{expected}'"
            ),
            Self::UnknownSymbol { module, symbol } => {
                write!(f, "Unresolved reference to '{symbol}' from module '{module}'")
            }
            Self::MalformedModule { module, detail } => {
                write!(f, "Module '{module}' is malformed: {detail}")
            }
            Self::InvalidBranchTarget {
                routine,
                module,
                target,
            } => write!(
                f,
                "Branch target {target} is outside the body of '{routine}' in module '{module}'"
            ),
        }
    }
}

impl std::error::Error for MergeError {}
