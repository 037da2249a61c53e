#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

//! # Prism
//!
//! Shader-variant build pipeline. A shader file declares flags, samplers,
//! uniforms and render contexts; Prism assembles the per-stage sources for
//! each requested flag combination, hands them to a [`ProgramCompiler`],
//! caches the result and rebuilds it when a shared include changes.
//!
//! ```rust,ignore
//! use prism::prelude::*;
//!
//! let mut library = ShaderLibrary::new(FileSourceLoader::new("assets/shaders"));
//! let mut compiler = DryRunCompiler::new();
//!
//! let id = library.load_shader("model.shader")?;
//! let mask = library.encode_flags(id, &["SKINNING"])?;
//! let program = library.program(id, "LIGHTING", mask, &mut compiler);
//! ```
//!
//! [`ProgramCompiler`]: prism_shader::ProgramCompiler

pub use prism_core as core;
pub use prism_shader as shader;

pub use prism_core::{Generation, Symbol};
pub use prism_shader::{
    Combination, DryRunCompiler, FileSourceLoader, FlagMask, MemorySourceLoader, ProgramCompiler,
    ProgramHandle, Shader, ShaderError, ShaderId, ShaderLibrary, SharedShaderLibrary,
};

pub mod prelude {
    pub use prism_shader::{
        Combination, CompileReport, DryRunCompiler, ElementKind, ElementParam, FileSourceLoader,
        FlagMask, LibrarySettings, MemorySourceLoader, ProgramCompiler, ProgramHandle, ShaderError,
        ShaderId, ShaderLibrary, ShaderStage, SharedShaderLibrary, SourceLoader,
    };
}
