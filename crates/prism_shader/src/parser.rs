//! Shader Source Parser
//!
//! A shader file is split into sections by `[[NAME]]` header lines. The
//! `[[FX]]` section holds declarations:
//!
//! ```text
//! [[FX]]
//! flag SKINNING;
//! sampler2D albedoMap = sampler_state { Texture = "textures/white.png"; Address = Clamp; };
//! float4 matDiffuseCol <alias = "Albedo"> = { 1.0, 1.0, 1.0, 1.0 };
//! buffer LightList;
//!
//! context LIGHTING {
//!     VertexShader = compile GLSL VS_GENERAL;
//!     PixelShader = compile GLSL FS_LIGHTING;
//!     ZWriteEnable = false;
//!     BlendMode = Add;
//! }
//! ```
//!
//! Every other section is shader code. Its `#include` directives are
//! extracted here but resolved to shared fragments by the library.

use rustc_hash::FxHashSet;

use crate::context::ShaderContext;
use crate::errors::ParseError;
use crate::flags::FlagVocabulary;
use crate::fragment::{ScannedSource, scan_source};
use crate::render_state::{BlendFactor, BlendPreset, CullMode, DepthFunc};
use crate::stage::ShaderStage;
use crate::tokenizer::Tokenizer;

/// Name of the declarations section.
pub const FX_SECTION: &str = "FX";

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SamplerType {
    #[default]
    Tex2D,
    Tex3D,
    TexCube,
    Tex2DArray,
}

impl SamplerType {
    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "sampler2D" => Some(SamplerType::Tex2D),
            "sampler3D" => Some(SamplerType::Tex3D),
            "samplerCube" => Some(SamplerType::TexCube),
            "sampler2DArray" => Some(SamplerType::Tex2DArray),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AddressMode {
    #[default]
    Wrap,
    Clamp,
    Border,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FilterMode {
    None,
    Bilinear,
    #[default]
    Trilinear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerDecl {
    pub name: String,
    pub sampler_type: SamplerType,
    /// Texture bound when the material does not provide one.
    pub default_texture: Option<String>,
    pub tex_unit: u32,
    pub address: AddressMode,
    pub filter: FilterMode,
    pub max_anisotropy: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformDecl {
    pub name: String,
    /// Number of components, 1 or 4.
    pub size: u8,
    pub default: [f32; 4],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDecl {
    pub name: String,
}

/// A code section of the shader file, with include directives extracted.
#[derive(Debug, Clone)]
pub struct ParsedSection {
    pub name: String,
    /// Line of the first body line within the shader file.
    pub first_line: u32,
    pub source: ScannedSource,
}

/// Everything derived from one shader source.
#[derive(Debug, Clone, Default)]
pub struct ParsedShader {
    pub vocabulary: FlagVocabulary,
    pub samplers: Vec<SamplerDecl>,
    pub uniforms: Vec<UniformDecl>,
    pub buffers: Vec<BufferDecl>,
    pub contexts: Vec<ShaderContext>,
    pub sections: Vec<ParsedSection>,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// A `[[NAME]]` section borrowed from the shader text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSection<'a> {
    pub name: &'a str,
    pub body: &'a str,
    pub first_line: u32,
}

fn section_header(line: &str) -> Option<&str> {
    line.trim_end()
        .strip_prefix("[[")?
        .strip_suffix("]]")
        .map(str::trim)
}

/// Splits shader text at `[[NAME]]` header lines.
pub fn split_sections<'a>(
    source_name: &str,
    text: &'a str,
) -> Result<Vec<RawSection<'a>>, ParseError> {
    let mut sections: Vec<RawSection<'a>> = Vec::new();
    // (name, body start, first line)
    let mut open: Option<(&'a str, usize, u32)> = None;
    let mut offset = 0;

    for (idx, line) in text.split_inclusive('\n').enumerate() {
        let line_no = idx as u32 + 1;

        if let Some(name) = section_header(line) {
            if name.is_empty() {
                return Err(ParseError::new(source_name, line_no, "empty section name"));
            }
            if let Some((prev, start, first_line)) = open.take() {
                sections.push(RawSection {
                    name: prev,
                    body: &text[start..offset],
                    first_line,
                });
            } else if !text[..offset].trim().is_empty() {
                return Err(ParseError::new(
                    source_name,
                    1,
                    "content before the first section header",
                ));
            }
            if sections.iter().any(|s| s.name == name) {
                return Err(ParseError::new(
                    source_name,
                    line_no,
                    format!("section '{name}' is defined twice"),
                ));
            }
            open = Some((name, offset + line.len(), line_no + 1));
        }

        offset += line.len();
    }

    match open {
        Some((name, start, first_line)) => sections.push(RawSection {
            name,
            body: &text[start..],
            first_line,
        }),
        None if !text.trim().is_empty() => {
            return Err(ParseError::new(source_name, 1, "missing section headers"));
        }
        None => {}
    }

    Ok(sections)
}

// ---------------------------------------------------------------------------
// Shader
// ---------------------------------------------------------------------------

/// Parses a complete shader source.
pub fn parse_shader(source_name: &str, text: &str) -> Result<ParsedShader, ParseError> {
    let raw_sections = split_sections(source_name, text)?;

    let fx = raw_sections
        .iter()
        .find(|s| s.name == FX_SECTION)
        .ok_or_else(|| ParseError::new(source_name, 0, "missing [[FX]] section"))?;

    let mut parsed = ParsedShader::default();
    for section in raw_sections.iter().filter(|s| s.name != FX_SECTION) {
        parsed.sections.push(ParsedSection {
            name: section.name.to_string(),
            first_line: section.first_line,
            source: scan_source(source_name, section.body, section.first_line)?,
        });
    }

    let mut parser = FxParser {
        tok: Tokenizer::new(source_name, fx.body, fx.first_line),
        source_name,
        shader: parsed,
        explicit_units: Vec::new(),
        names: FxHashSet::default(),
    };
    parser.parse()?;
    parser.assign_tex_units()?;

    log::debug!(
        "parsed '{source_name}': {} flags, {} contexts, {} sections",
        parser.shader.vocabulary.len(),
        parser.shader.contexts.len(),
        parser.shader.sections.len()
    );
    Ok(parser.shader)
}

struct FxParser<'a> {
    tok: Tokenizer<'a>,
    source_name: &'a str,
    shader: ParsedShader,
    /// Per sampler, whether `TexUnit` was given explicitly.
    /// Per sampler: whether `TexUnit` was given, and the declaration line.
    explicit_units: Vec<(bool, u32)>,
    /// Declared sampler, uniform and buffer names.
    names: FxHashSet<String>,
}

impl FxParser<'_> {
    fn error_at(&self, line: u32, message: impl Into<String>) -> ParseError {
        ParseError::new(self.source_name, line, message)
    }

    fn parse(&mut self) -> Result<(), ParseError> {
        while !self.tok.at_end() {
            let line = self.tok.line();
            let keyword = self.tok.ident()?;

            match keyword {
                "flag" => self.parse_flag(line)?,
                "float" | "float4" => self.parse_uniform(keyword, line)?,
                "buffer" => self.parse_buffer(line)?,
                "context" => self.parse_context(line)?,
                _ => match SamplerType::from_keyword(keyword) {
                    Some(sampler_type) => self.parse_sampler(sampler_type, line)?,
                    None => {
                        return Err(self.error_at(line, format!("unexpected '{keyword}'")));
                    }
                },
            }
        }
        Ok(())
    }

    fn declare_name(&mut self, name: &str, line: u32) -> Result<(), ParseError> {
        if self.names.insert(name.to_string()) {
            Ok(())
        } else {
            Err(self.error_at(line, format!("'{name}' is declared twice")))
        }
    }

    fn parse_flag(&mut self, line: u32) -> Result<(), ParseError> {
        let name = self.tok.ident()?;
        self.tok.expect(";")?;
        self.shader
            .vocabulary
            .push(name)
            .map_err(|err| self.error_at(line, err.to_string()))?;
        Ok(())
    }

    fn parse_sampler(&mut self, sampler_type: SamplerType, line: u32) -> Result<(), ParseError> {
        let name = self.tok.ident()?;
        self.declare_name(name, line)?;

        let mut decl = SamplerDecl {
            name: name.to_string(),
            sampler_type,
            default_texture: None,
            tex_unit: 0,
            address: AddressMode::default(),
            filter: FilterMode::default(),
            max_anisotropy: 8,
        };
        let mut explicit_unit = false;

        if self.tok.check("=") {
            self.tok.expect("sampler_state")?;
            self.tok.expect("{")?;
            while !self.tok.check("}") {
                let key = self.tok.ident()?;
                self.tok.expect("=")?;
                match key {
                    "Texture" => decl.default_texture = Some(self.tok.string()?.to_string()),
                    "TexUnit" => {
                        let unit = self.tok.int()?;
                        if !(0..32).contains(&unit) {
                            return Err(self.tok.error(format!("TexUnit {unit} out of range")));
                        }
                        decl.tex_unit = unit as u32;
                        explicit_unit = true;
                    }
                    "Address" => {
                        decl.address = match self.tok.ident()? {
                            "Wrap" => AddressMode::Wrap,
                            "Clamp" => AddressMode::Clamp,
                            "Border" => AddressMode::Border,
                            other => {
                                return Err(self.tok.error(format!("unknown address mode '{other}'")));
                            }
                        };
                    }
                    "Filter" => {
                        decl.filter = match self.tok.ident()? {
                            "None" => FilterMode::None,
                            "Bilinear" => FilterMode::Bilinear,
                            "Trilinear" => FilterMode::Trilinear,
                            other => {
                                return Err(self.tok.error(format!("unknown filter '{other}'")));
                            }
                        };
                    }
                    "MaxAnisotropy" => {
                        let aniso = self.tok.int()?;
                        if !(1..=16).contains(&aniso) {
                            return Err(
                                self.tok.error(format!("MaxAnisotropy {aniso} out of range 1..16"))
                            );
                        }
                        decl.max_anisotropy = aniso as u32;
                    }
                    other => {
                        return Err(self.tok.error(format!("unknown sampler_state key '{other}'")));
                    }
                }
                self.tok.expect(";")?;
            }
        }
        self.tok.expect(";")?;

        self.shader.samplers.push(decl);
        self.explicit_units.push((explicit_unit, line));
        Ok(())
    }

    fn parse_uniform(&mut self, keyword: &str, line: u32) -> Result<(), ParseError> {
        let name = self.tok.ident()?;
        self.declare_name(name, line)?;
        let size: u8 = if keyword == "float4" { 4 } else { 1 };
        let mut default = [0.0; 4];

        if self.tok.check("<") {
            self.tok.skip_past('>')?;
        }
        if self.tok.check("=") {
            if self.tok.check("{") {
                let mut count = 0;
                loop {
                    let value = self.tok.float()?;
                    if count >= usize::from(size) {
                        return Err(self.tok.error(format!(
                            "too many default values for '{name}' (expected {size})"
                        )));
                    }
                    default[count] = value;
                    count += 1;
                    if !self.tok.check(",") {
                        break;
                    }
                }
                self.tok.expect("}")?;
            } else {
                default[0] = self.tok.float()?;
            }
        }
        self.tok.expect(";")?;

        self.shader.uniforms.push(UniformDecl {
            name: name.to_string(),
            size,
            default,
        });
        Ok(())
    }

    fn parse_buffer(&mut self, line: u32) -> Result<(), ParseError> {
        let name = self.tok.ident()?;
        self.declare_name(name, line)?;
        self.tok.expect(";")?;
        self.shader.buffers.push(BufferDecl {
            name: name.to_string(),
        });
        Ok(())
    }

    fn parse_context(&mut self, line: u32) -> Result<(), ParseError> {
        let name = self.tok.ident()?;
        if self.shader.contexts.iter().any(|c| c.name() == name) {
            return Err(self.error_at(line, format!("context '{name}' is defined twice")));
        }
        let mut ctx = ShaderContext::new(name);

        self.tok.expect("{")?;
        while !self.tok.check("}") {
            let key = self.tok.ident()?;
            self.tok.expect("=")?;

            if let Some(stage) = ShaderStage::from_fx_key(key) {
                self.tok.expect("compile")?;
                let _language = self.tok.ident()?;
                let section = self.tok.ident()?;
                let index = self
                    .shader
                    .sections
                    .iter()
                    .position(|s| s.name == section)
                    .ok_or_else(|| {
                        self.tok.error(format!("undefined code section '{section}'"))
                    })?;
                ctx.stages.set(stage, index);
            } else {
                let state = &mut ctx.render_state;
                match key {
                    "ZWriteEnable" => state.depth_write = self.tok.boolean()?,
                    "ZEnable" => state.depth_test = self.tok.boolean()?,
                    "AlphaToCoverage" => state.alpha_to_coverage = self.tok.boolean()?,
                    "ZFunc" => {
                        let value = self.tok.ident()?;
                        state.depth_func = DepthFunc::from_fx_name(value).ok_or_else(|| {
                            self.tok.error(format!("unknown depth function '{value}'"))
                        })?;
                    }
                    "CullMode" => {
                        let value = self.tok.ident()?;
                        state.cull_mode = CullMode::from_fx_name(value).ok_or_else(|| {
                            self.tok.error(format!("unknown cull mode '{value}'"))
                        })?;
                    }
                    "BlendMode" => {
                        if self.tok.check("{") {
                            let src = self.blend_factor()?;
                            self.tok.expect(",")?;
                            let dst = self.blend_factor()?;
                            self.tok.expect("}")?;
                            state.set_blend_factors(src, dst);
                        } else {
                            let value = self.tok.ident()?;
                            let preset = BlendPreset::from_fx_name(value).ok_or_else(|| {
                                self.tok.error(format!("unknown blend mode '{value}'"))
                            })?;
                            state.set_blend_preset(preset);
                        }
                    }
                    "TessPatchVertices" => {
                        let count = self.tok.int()?;
                        if !(1..=i64::from(u16::MAX)).contains(&count) {
                            return Err(self.tok.error(format!(
                                "TessPatchVertices must be at least 1, found {count}"
                            )));
                        }
                        state.tess_patch_vertices = count as u16;
                    }
                    other => {
                        return Err(self.tok.error(format!("unknown context key '{other}'")));
                    }
                }
            }
            self.tok.expect(";")?;
        }
        self.tok.check(";");

        ctx.validate(self.source_name)
            .map_err(|err| self.error_at(line, err.to_string()))?;
        self.shader.contexts.push(ctx);
        Ok(())
    }

    fn blend_factor(&mut self) -> Result<BlendFactor, ParseError> {
        let value = self.tok.ident()?;
        BlendFactor::from_fx_name(value)
            .ok_or_else(|| self.tok.error(format!("unknown blend factor '{value}'")))
    }

    /// Gives samplers without an explicit `TexUnit` the lowest free units,
    /// in declaration order.
    fn assign_tex_units(&mut self) -> Result<(), ParseError> {
        let mut used: u32 = self
            .shader
            .samplers
            .iter()
            .zip(&self.explicit_units)
            .filter(|(_, (explicit, _))| *explicit)
            .fold(0, |acc, (s, _)| acc | (1 << s.tex_unit));

        for (sampler, &(explicit, line)) in self.shader.samplers.iter_mut().zip(&self.explicit_units) {
            if explicit {
                continue;
            }
            if used == u32::MAX {
                return Err(ParseError::new(
                    self.source_name,
                    line,
                    format!("no free texture unit for sampler '{}'", sampler.name),
                ));
            }
            let unit = (!used).trailing_zeros();
            sampler.tex_unit = unit;
            used |= 1 << unit;
        }
        Ok(())
    }
}
