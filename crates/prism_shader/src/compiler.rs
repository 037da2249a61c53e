//! Compiler Collaborator
//!
//! The pipeline never talks to a graphics driver itself. Assembled per-stage
//! sources are handed to a [`ProgramCompiler`], which returns an opaque
//! [`ProgramHandle`] or a [`CompileFailure`], and later resolves uniform,
//! sampler and buffer slots of a linked program.
//!
//! [`DryRunCompiler`] is a deterministic in-process implementation used by
//! tests and tooling.

use std::fmt;

use rustc_hash::FxHashMap;

pub use crate::errors::CompileFailure;
use crate::flags::FlagMask;
use crate::render_state::RenderState;
use crate::stage::ShaderStage;

/// Opaque program object owned by one combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub u32);

impl fmt::Display for ProgramHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program#{}", self.0)
    }
}

/// Final source text of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSource {
    pub stage: ShaderStage,
    pub source: String,
}

/// Everything the compiler needs to build one combination.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    pub shader: &'a str,
    pub context: &'a str,
    pub mask: FlagMask,
    pub stages: &'a [StageSource],
    pub render_state: &'a RenderState,
}

/// Kind of a slot looked up in a linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Uniform,
    /// Sampler bound to texture `unit`.
    Sampler { unit: u32 },
    /// Storage buffer bound at binding `index`.
    Buffer { index: u32 },
}

/// External compile/link collaborator.
pub trait ProgramCompiler {
    /// Compiles and links the stage sources of `request`.
    fn compile(&mut self, request: &CompileRequest<'_>) -> Result<ProgramHandle, CompileFailure>;

    /// Destroys a program previously returned by [`compile`](Self::compile).
    fn release(&mut self, program: ProgramHandle);

    /// Slot of `name` in `program`, or `None` when the program does not use it.
    fn resolve_slot(&self, program: ProgramHandle, kind: SlotKind, name: &str) -> Option<i32>;
}

#[derive(Debug)]
struct DryRunProgram {
    stages: Vec<StageSource>,
    /// Identifier to ordinal of first occurrence across all stages.
    identifiers: FxHashMap<String, i32>,
}

fn collect_identifiers(stages: &[StageSource]) -> FxHashMap<String, i32> {
    let mut identifiers = FxHashMap::default();
    for stage in stages {
        for word in stage
            .source
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .filter(|w| w.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_'))
        {
            let next = identifiers.len() as i32;
            identifiers.entry(word.to_string()).or_insert(next);
        }
    }
    identifiers
}

fn find_error_directive(stage: &StageSource) -> Option<CompileFailure> {
    stage
        .source
        .lines()
        .enumerate()
        .find_map(|(idx, line)| {
            let rest = line.trim_start().strip_prefix("#error")?;
            Some(CompileFailure::new(rest.trim()).at(stage.stage, idx as u32 + 1))
        })
}

/// Deterministic compiler that never touches a GPU.
///
/// - Handles are sequential, starting at 1.
/// - A stage containing an `#error` line fails with that line's message.
/// - Uniform slots are the ordinal of the name's first occurrence; sampler and
///   buffer slots are their unit / index when the name occurs at all.
#[derive(Debug, Default)]
pub struct DryRunCompiler {
    next_handle: u32,
    programs: FxHashMap<ProgramHandle, DryRunProgram>,
    compile_count: usize,
    failure_count: usize,
    release_count: usize,
}

impl DryRunCompiler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of compile calls, successful or not.
    #[must_use]
    pub fn compile_count(&self) -> usize {
        self.compile_count
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failure_count
    }

    #[must_use]
    pub fn release_count(&self) -> usize {
        self.release_count
    }

    /// Programs compiled and not yet released.
    #[must_use]
    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn is_live(&self, program: ProgramHandle) -> bool {
        self.programs.contains_key(&program)
    }

    /// Stage sources a live program was built from.
    #[must_use]
    pub fn sources(&self, program: ProgramHandle) -> Option<&[StageSource]> {
        self.programs.get(&program).map(|p| p.stages.as_slice())
    }
}

impl ProgramCompiler for DryRunCompiler {
    fn compile(&mut self, request: &CompileRequest<'_>) -> Result<ProgramHandle, CompileFailure> {
        self.compile_count += 1;

        if request.stages.is_empty() {
            self.failure_count += 1;
            return Err(CompileFailure::new("program has no stages"));
        }
        if let Some(failure) = request.stages.iter().find_map(find_error_directive) {
            self.failure_count += 1;
            return Err(failure);
        }

        self.next_handle += 1;
        let handle = ProgramHandle(self.next_handle);
        self.programs.insert(
            handle,
            DryRunProgram {
                identifiers: collect_identifiers(request.stages),
                stages: request.stages.to_vec(),
            },
        );
        log::trace!(
            "dry-run compiled {}/{} {} as {handle}",
            request.shader,
            request.context,
            request.mask
        );
        Ok(handle)
    }

    fn release(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program).is_some() {
            self.release_count += 1;
        } else {
            log::warn!("dry-run release of unknown {program}");
        }
    }

    fn resolve_slot(&self, program: ProgramHandle, kind: SlotKind, name: &str) -> Option<i32> {
        let ordinal = *self.programs.get(&program)?.identifiers.get(name)?;
        match kind {
            SlotKind::Uniform => Some(ordinal),
            SlotKind::Sampler { unit } => Some(unit as i32),
            SlotKind::Buffer { index } => Some(index as i32),
        }
    }
}
