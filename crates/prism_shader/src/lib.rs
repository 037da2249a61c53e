//! Prism Shader
//!
//! Builds GPU shader variants from flag-parameterised source:
//!
//! - [`parser`]: splits a shader file into its `[[FX]]` declarations and
//!   named code sections
//! - [`fragment`]: shared code fragments with `#include` resolution and
//!   cycle detection
//! - [`gating`]: per-variant `#ifdef`/`#ifndef` selection over flag masks
//! - [`shader`] / [`context`] / [`combination`]: the per-context variant
//!   cache with generation-stamped staleness
//! - [`library`]: ownership, loading and invalidation propagation
//! - [`query`]: integer-addressed element queries for tooling
//!
//! Compilation itself is delegated to a [`ProgramCompiler`].

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod combination;
pub mod compiler;
pub mod context;
pub mod errors;
pub mod flags;
pub mod fragment;
pub mod gating;
pub mod library;
pub mod loader;
pub mod parser;
pub mod query;
pub mod render_state;
pub mod settings;
pub mod shader;
pub mod stage;
pub mod tokenizer;

pub use combination::{Combination, EngineUniform, UNRESOLVED_SLOT};
pub use compiler::{
    CompileFailure, CompileRequest, DryRunCompiler, ProgramCompiler, ProgramHandle, SlotKind,
    StageSource,
};
pub use context::ShaderContext;
pub use errors::{CompileError, ParseError, Result, ShaderError};
pub use flags::{FlagMask, FlagVocabulary, MAX_FLAGS};
pub use fragment::{CodeFragment, FragmentId, FragmentStore};
pub use library::{ShaderId, ShaderLibrary, SharedShaderLibrary};
pub use loader::{FileSourceLoader, MemorySourceLoader, SourceLoader};
pub use parser::{BufferDecl, SamplerDecl, UniformDecl};
pub use query::{ElementKind, ElementParam};
pub use render_state::{BlendFactor, BlendPreset, CullMode, DepthFunc, RenderState};
pub use settings::{LibrarySettings, StagePreambles};
pub use shader::{CompileEnv, CompileReport, Shader};
pub use stage::{ShaderStage, StageBindings, StageFlags};
