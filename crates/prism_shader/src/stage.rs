//! Shader stages and per-context stage bindings.

use std::fmt;

use bitflags::bitflags;

/// Programmable pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    TessControl,
    TessEval,
    Compute,
}

impl ShaderStage {
    pub const COUNT: usize = 6;

    pub const ALL: [ShaderStage; Self::COUNT] = [
        ShaderStage::Vertex,
        ShaderStage::Fragment,
        ShaderStage::Geometry,
        ShaderStage::TessControl,
        ShaderStage::TessEval,
        ShaderStage::Compute,
    ];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Stage for a context key such as `VertexShader`.
    #[must_use]
    pub fn from_fx_key(key: &str) -> Option<Self> {
        match key {
            "VertexShader" => Some(ShaderStage::Vertex),
            "PixelShader" | "FragmentShader" => Some(ShaderStage::Fragment),
            "GeometryShader" => Some(ShaderStage::Geometry),
            "TessCtlShader" => Some(ShaderStage::TessControl),
            "TessEvalShader" => Some(ShaderStage::TessEval),
            "ComputeShader" => Some(ShaderStage::Compute),
            _ => None,
        }
    }

    #[must_use]
    pub const fn flag(self) -> StageFlags {
        match self {
            ShaderStage::Vertex => StageFlags::VERTEX,
            ShaderStage::Fragment => StageFlags::FRAGMENT,
            ShaderStage::Geometry => StageFlags::GEOMETRY,
            ShaderStage::TessControl => StageFlags::TESS_CONTROL,
            ShaderStage::TessEval => StageFlags::TESS_EVAL,
            ShaderStage::Compute => StageFlags::COMPUTE,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Geometry => "geometry",
            ShaderStage::TessControl => "tess_control",
            ShaderStage::TessEval => "tess_eval",
            ShaderStage::Compute => "compute",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

bitflags! {
    /// Set of stages, e.g. the stages a context binds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StageFlags: u8 {
        const VERTEX       = 1 << 0;
        const FRAGMENT     = 1 << 1;
        const GEOMETRY     = 1 << 2;
        const TESS_CONTROL = 1 << 3;
        const TESS_EVAL    = 1 << 4;
        const COMPUTE      = 1 << 5;

        const GRAPHICS = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

/// Stage to code-section binding of one context.
///
/// Each slot holds the index of a section of the owning shader, or `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StageBindings([Option<usize>; ShaderStage::COUNT]);

impl StageBindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn get(&self, stage: ShaderStage) -> Option<usize> {
        self.0[stage.index()]
    }

    /// Binds `section` to `stage`, returning the previous binding.
    pub fn set(&mut self, stage: ShaderStage, section: usize) -> Option<usize> {
        self.0[stage.index()].replace(section)
    }

    pub fn clear(&mut self, stage: ShaderStage) -> Option<usize> {
        self.0[stage.index()].take()
    }

    /// Stages with a binding.
    #[must_use]
    pub fn bound(&self) -> StageFlags {
        self.iter()
            .fold(StageFlags::empty(), |acc, (stage, _)| acc | stage.flag())
    }

    /// Bound `(stage, section)` pairs in pipeline order.
    pub fn iter(&self) -> impl Iterator<Item = (ShaderStage, usize)> + '_ {
        ShaderStage::ALL
            .into_iter()
            .filter_map(|stage| self.get(stage).map(|section| (stage, section)))
    }

    #[must_use]
    pub fn uses_section(&self, section: usize) -> bool {
        self.0.contains(&Some(section))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }
}
