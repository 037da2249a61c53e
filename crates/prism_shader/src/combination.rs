//! Combinations
//!
//! A [`Combination`] is one compiled program variant of a context, identified
//! by its [`FlagMask`]. Besides the program handle it records the generation
//! it was built at, the hash of its final sources and every resolved slot.
//! Slots that the program does not use are [`UNRESOLVED_SLOT`] (`-1`).

use prism_core::Generation;
use smallvec::SmallVec;

use crate::compiler::ProgramHandle;
use crate::errors::ShaderError;
use crate::flags::FlagMask;

/// Slot value of a uniform, sampler or buffer the program does not use.
pub const UNRESOLVED_SLOT: i32 = -1;

macro_rules! engine_uniforms {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Uniforms the engine feeds to every program that declares them.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EngineUniform {
            $($variant),+
        }

        impl EngineUniform {
            pub const ALL: &'static [EngineUniform] = &[$(EngineUniform::$variant),+];
            pub const COUNT: usize = Self::ALL.len();

            /// Identifier looked up in the program.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(EngineUniform::$variant => $name),+
                }
            }
        }
    };
}

engine_uniforms! {
    FrameBufSize => "frameBufSize",
    ViewMat => "viewMat",
    ViewMatInv => "viewMatInv",
    ProjMat => "projMat",
    ViewProjMat => "viewProjMat",
    ViewProjMatInv => "viewProjMatInv",
    ViewerPos => "viewerPos",
    WorldMat => "worldMat",
    WorldNormalMat => "worldNormalMat",
    NodeId => "nodeId",
    CustomInstData => "customInstData",
    SkinMatRows => "skinMatRows",
    LightPos => "lightPos",
    LightDir => "lightDir",
    LightColor => "lightColor",
    ShadowSplitDists => "shadowSplitDists",
    ShadowMats => "shadowMats",
    ShadowMapSize => "shadowMapSize",
    ShadowBias => "shadowBias",
    ParPosArray => "parPosArray",
    ParSizeAndRotArray => "parSizeAndRotArray",
    ParColorArray => "parColorArray",
    OlayColor => "olayColor",
}

impl EngineUniform {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Slots resolved for a freshly linked program.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedSlots {
    pub engine: [i32; EngineUniform::COUNT],
    pub samplers: SmallVec<[i32; 8]>,
    pub uniforms: SmallVec<[i32; 8]>,
    pub buffers: SmallVec<[i32; 4]>,
}

/// One cached program variant.
#[derive(Debug, Clone)]
pub struct Combination {
    mask: FlagMask,
    program: Option<ProgramHandle>,
    last_update_stamp: Generation,
    source_hash: u128,
    engine_slots: [i32; EngineUniform::COUNT],
    sampler_slots: SmallVec<[i32; 8]>,
    uniform_slots: SmallVec<[i32; 8]>,
    buffer_slots: SmallVec<[i32; 4]>,
    last_error: Option<ShaderError>,
    compile_count: u32,
}

impl Combination {
    pub(crate) fn new(mask: FlagMask) -> Self {
        Self {
            mask,
            program: None,
            last_update_stamp: Generation::new(),
            source_hash: 0,
            engine_slots: [UNRESOLVED_SLOT; EngineUniform::COUNT],
            sampler_slots: SmallVec::new(),
            uniform_slots: SmallVec::new(),
            buffer_slots: SmallVec::new(),
            last_error: None,
            compile_count: 0,
        }
    }

    /// Installs a newly linked program and returns the one it replaces.
    pub(crate) fn install(
        &mut self,
        program: ProgramHandle,
        stamp: Generation,
        source_hash: u128,
        slots: ResolvedSlots,
    ) -> Option<ProgramHandle> {
        self.compile_count += 1;
        self.last_update_stamp = stamp;
        self.source_hash = source_hash;
        self.engine_slots = slots.engine;
        self.sampler_slots = slots.samplers;
        self.uniform_slots = slots.uniforms;
        self.buffer_slots = slots.buffers;
        self.last_error = None;
        self.program.replace(program)
    }

    /// Records a failed (re)build, from assembly or from the compiler.
    /// A previously linked program is kept.
    pub(crate) fn record_failure(&mut self, error: ShaderError, stamp: Generation) {
        self.compile_count += 1;
        self.last_update_stamp = stamp;
        self.last_error = Some(error);
    }

    pub(crate) fn take_program(&mut self) -> Option<ProgramHandle> {
        self.program.take()
    }

    /// Flag mask identifying this combination.
    #[inline]
    #[must_use]
    pub fn mask(&self) -> FlagMask {
        self.mask
    }

    /// Program handle. After a failed recompile this is the previous,
    /// stale but functional program.
    #[inline]
    #[must_use]
    pub fn program(&self) -> Option<ProgramHandle> {
        self.program
    }

    /// Generation of the owning shader at the last (re)compile attempt.
    #[inline]
    #[must_use]
    pub fn last_update_stamp(&self) -> Generation {
        self.last_update_stamp
    }

    /// xxh3-128 of the final stage sources of the installed program.
    #[must_use]
    pub fn source_hash(&self) -> u128 {
        self.source_hash
    }

    #[must_use]
    pub fn engine_uniform(&self, uniform: EngineUniform) -> i32 {
        self.engine_slots[uniform.index()]
    }

    /// Slot of the shader's `index`-th declared sampler.
    #[must_use]
    pub fn sampler_slot(&self, index: usize) -> i32 {
        self.sampler_slots
            .get(index)
            .copied()
            .unwrap_or(UNRESOLVED_SLOT)
    }

    /// Slot of the shader's `index`-th declared uniform.
    #[must_use]
    pub fn uniform_slot(&self, index: usize) -> i32 {
        self.uniform_slots
            .get(index)
            .copied()
            .unwrap_or(UNRESOLVED_SLOT)
    }

    /// Slot of the shader's `index`-th declared buffer.
    #[must_use]
    pub fn buffer_slot(&self, index: usize) -> i32 {
        self.buffer_slots
            .get(index)
            .copied()
            .unwrap_or(UNRESOLVED_SLOT)
    }

    /// Diagnostic of the last build attempt, if it failed.
    #[must_use]
    pub fn last_error(&self) -> Option<&ShaderError> {
        self.last_error.as_ref()
    }

    /// Number of build attempts for this entry.
    #[must_use]
    pub fn compile_count(&self) -> u32 {
        self.compile_count
    }

    /// `true` when the owning shader moved past this entry's stamp.
    #[inline]
    #[must_use]
    pub fn is_stale(&self, generation: Generation) -> bool {
        generation.is_newer_than(self.last_update_stamp)
    }

    /// `true` when the last attempt succeeded and a program is installed.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.program.is_some() && self.last_error.is_none()
    }
}
