//! Error Types
//!
//! The main error type [`ShaderError`] covers every failure mode of the
//! shader pipeline:
//! - source parsing (FX declarations, code sections, include resolution)
//! - fragment assembly (include cycles, dangling references)
//! - flag-conditioned region gating
//! - per-combination compilation
//!
//! Parse errors are fatal to loading one shader. Compile errors are scoped to
//! a single (context, mask) entry and never disable sibling combinations.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::flags::FlagMask;
use crate::fragment::FragmentId;
use crate::stage::ShaderStage;

/// A malformed shader or fragment source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{source_name}:{line}: {message}")]
pub struct ParseError {
    /// Shader or fragment name the error was found in.
    pub source_name: String,
    /// 1-based line number; `0` when the error is not tied to a line.
    pub line: u32,
    pub message: String,
}

impl ParseError {
    pub fn new(source_name: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            line,
            message: message.into(),
        }
    }
}

/// Diagnostic reported by the external compiler collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileFailure {
    /// Stage that failed, when the compiler can attribute it.
    pub stage: Option<ShaderStage>,
    /// 1-based line within that stage's assembled source.
    pub line: Option<u32>,
    pub message: String,
}

impl CompileFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            stage: None,
            line: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn at(mut self, stage: ShaderStage, line: u32) -> Self {
        self.stage = Some(stage);
        self.line = Some(line);
        self
    }
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.stage, self.line) {
            (Some(stage), Some(line)) => write!(f, "[{stage}:{line}] {}", self.message),
            (Some(stage), None) => write!(f, "[{stage}] {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Compiler rejection of one (shader, context, mask) combination.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to compile shader '{shader}' context '{context}' combination {mask}: {failure}")]
pub struct CompileError {
    pub shader: String,
    pub context: String,
    pub mask: FlagMask,
    pub failure: CompileFailure,
}

/// The main error type for the shader pipeline.
///
/// Cloneable so a failed build can be cached on its combination.
#[derive(Error, Debug, Clone)]
pub enum ShaderError {
    // ========================================================================
    // Loading
    // ========================================================================
    /// Malformed declarations, code section or unresolvable include.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// The resource loader could not supply a source.
    #[error("Failed to read source '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The shader's last load failed; the diagnostic is kept on the shader.
    #[error("Shader '{shader}' is not loaded: {diagnostic}")]
    NotLoaded { shader: String, diagnostic: String },

    // ========================================================================
    // Assembly
    // ========================================================================
    /// The include graph contains a cycle. The first name is repeated at the end.
    #[error("Cyclic include dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// An include or stage reference no longer resolves.
    #[error("Dangling fragment reference {id:?}")]
    DanglingFragment { id: FragmentId },

    /// Unbalanced or malformed flag-conditioned region.
    #[error("Conditional error at line {line}: {message}")]
    Conditional { line: u32, message: String },

    // ========================================================================
    // Lookup
    // ========================================================================
    #[error("Unknown shader '{0}'")]
    UnknownShader(String),

    #[error("Shader '{shader}' has no context '{context}'")]
    UnknownContext { shader: String, context: String },

    /// Context without a vertex + fragment pair and without a compute stage.
    #[error("Invalid context '{context}' in shader '{shader}': {reason}")]
    InvalidContext {
        shader: String,
        context: String,
        reason: String,
    },

    /// Only produced by the strict flag encoder.
    #[error("Unknown flag '{0}'")]
    UnknownFlag(String),

    /// Removal of a fragment that is still included or bound.
    #[error("Fragment '{name}' is still referenced")]
    FragmentInUse { name: String },

    // ========================================================================
    // Compilation
    // ========================================================================
    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl ShaderError {
    /// Returns the compile error when this is a per-combination failure.
    #[must_use]
    pub fn as_compile_error(&self) -> Option<&CompileError> {
        match self {
            ShaderError::Compile(err) => Some(err),
            _ => None,
        }
    }
}

/// Alias for `Result<T, ShaderError>`.
pub type Result<T> = std::result::Result<T, ShaderError>;
