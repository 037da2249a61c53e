//! Shader Library Tests
//!
//! Tests for:
//! - File-backed loading and fragment hot reload from disk
//! - Sharing a library with a background loading thread
//! - Library settings (preambles, JSON round trip, unused-flag masking)
//! - Element queries on loaded shaders

use std::fs;
use std::thread;

use tempfile::TempDir;

use prism::shader::{
    DryRunCompiler, ElementKind, ElementParam, FileSourceLoader, FlagMask, LibrarySettings,
    MemorySourceLoader, ShaderLibrary, ShaderStage, StagePreambles,
};

const TERRAIN: &str = r#"[[FX]]
flag DETAIL;
flag WIREFRAME;

sampler2D heightMap = sampler_state { Texture = "textures/height.png"; Address = Clamp; };
float4 sunColor = { 1.0, 0.9, 0.8, 1.0 };
buffer TileInfo;

context ATTRIBPASS {
    VertexShader = compile GLSL VS;
    PixelShader = compile GLSL FS;
}

[[VS]]
#include "terrain/common.glsl"
void main() {}

[[FS]]
#ifdef DETAIL
float detail();
#endif
void main() {}
"#;

/// Scratch shader root with a `terrain/` include directory.
fn shader_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("terrain")).unwrap();
    dir
}

fn write(dir: &TempDir, name: &str, text: &str) {
    fs::write(dir.path().join(name), text).unwrap();
}

// ============================================================================
// File loading
// ============================================================================

#[test]
fn file_loader_loads_shader_and_includes() {
    let dir = shader_dir();
    write(&dir, "terrain.shader", TERRAIN);
    write(&dir, "terrain/common.glsl", "vec3 terrainNormal();\n");

    let mut library = ShaderLibrary::new(FileSourceLoader::new(dir.path()));
    let mut compiler = DryRunCompiler::new();
    let id = library.load_shader("terrain.shader").unwrap();

    let program = library
        .program(id, "ATTRIBPASS", FlagMask::EMPTY, &mut compiler)
        .unwrap();
    assert!(compiler.sources(program).unwrap()[0]
        .source
        .contains("vec3 terrainNormal();"));
}

#[test]
fn fragment_reload_from_disk_invalidates_shader() {
    let dir = shader_dir();
    write(&dir, "terrain.shader", TERRAIN);
    write(&dir, "terrain/common.glsl", "vec3 terrainNormal();\n");

    let mut library = ShaderLibrary::new(FileSourceLoader::new(dir.path()));
    let mut compiler = DryRunCompiler::new();
    let id = library.load_shader("terrain.shader").unwrap();
    library
        .get_combination(id, "ATTRIBPASS", FlagMask::EMPTY, &mut compiler)
        .unwrap();

    write(&dir, "terrain/common.glsl", "vec3 terrainNormal(vec2 uv);\n");
    let common = library.fragments().find("terrain/common.glsl").unwrap();
    assert_eq!(library.reload_fragment(common).unwrap(), 1);

    let program = library
        .program(id, "ATTRIBPASS", FlagMask::EMPTY, &mut compiler)
        .unwrap();
    assert!(compiler.sources(program).unwrap()[0]
        .source
        .contains("terrainNormal(vec2 uv)"));
    assert_eq!(compiler.compile_count(), 2);
}

#[test]
fn missing_shader_file_is_registered_as_not_loaded() {
    let dir = shader_dir();
    let mut library = ShaderLibrary::new(FileSourceLoader::new(dir.path()));

    assert!(library.load_shader("nowhere.shader").is_err());
    let id = library.find_shader("nowhere.shader").unwrap();
    let shader = library.shader(id).unwrap();
    assert!(!shader.is_loaded());
    assert!(shader.diagnostic().unwrap().contains("nowhere.shader"));
}

#[test]
fn failed_shader_loads_once_its_file_appears() {
    let dir = shader_dir();
    let mut library = ShaderLibrary::new(FileSourceLoader::new(dir.path()));
    let mut compiler = DryRunCompiler::new();

    assert!(library.load_shader("late.shader").is_err());
    let id = library.find_shader("late.shader").unwrap();
    assert!(library.load_shader("late.shader").is_err(), "still missing");
    assert!(!library.shader(id).unwrap().is_loaded());

    write(&dir, "late.shader", TERRAIN);
    write(&dir, "terrain/common.glsl", "vec3 terrainNormal();\n");

    assert_eq!(library.load_shader("late.shader").unwrap(), id);
    let shader = library.shader(id).unwrap();
    assert!(shader.is_loaded());
    assert!(shader.diagnostic().is_none());
    assert!(library
        .program(id, "ATTRIBPASS", FlagMask::EMPTY, &mut compiler)
        .is_some());
}

// ============================================================================
// Threading
// ============================================================================

#[test]
fn background_thread_prepares_combinations() {
    let loader = MemorySourceLoader::new()
        .with("terrain.shader", TERRAIN)
        .with("terrain/common.glsl", "vec3 terrainNormal();\n");
    let shared = ShaderLibrary::new(loader).into_shared();

    let worker = {
        let shared = shared.clone();
        thread::spawn(move || {
            let mut compiler = DryRunCompiler::new();
            let mut library = shared.lock();
            let id = library.load_shader("terrain.shader").unwrap();
            let detail = library.encode_flags(id, &["DETAIL"]).unwrap();
            library.pre_load_combination(id, FlagMask::EMPTY).unwrap();
            library.pre_load_combination(id, detail).unwrap();
            let report = library.compile_contexts(id, &mut compiler).unwrap();
            assert!(report.is_ok());
            (id, compiler)
        })
    };
    let (id, compiler) = worker.join().unwrap();

    let library = shared.lock();
    let shader = library.shader(id).unwrap();
    assert!(shader.is_ready());
    assert_eq!(shader.contexts()[0].combination_count(), 2);
    assert_eq!(compiler.live_programs(), 2);
}

// ============================================================================
// Settings
// ============================================================================

#[test]
fn preambles_prefix_every_stage() {
    let loader = MemorySourceLoader::new()
        .with("terrain.shader", TERRAIN)
        .with("terrain/common.glsl", "vec3 terrainNormal();\n");
    let mut preambles = StagePreambles::uniform("#version 330");
    preambles.set(ShaderStage::Fragment, "#version 330\nprecision highp float;\n");
    let settings = LibrarySettings {
        preambles,
        ..Default::default()
    };
    let mut library = ShaderLibrary::with_settings(loader, settings);
    let id = library.load_shader("terrain.shader").unwrap();

    let stages = library
        .assemble_stage_sources(id, "ATTRIBPASS", FlagMask::bit(0))
        .unwrap();
    assert!(stages[0].source.starts_with("#version 330\n#define DETAIL\n"));
    assert!(stages[1]
        .source
        .starts_with("#version 330\nprecision highp float;\n#define DETAIL\n"));
}

#[test]
fn settings_change_invalidates_compiled_shaders() {
    let loader = MemorySourceLoader::new()
        .with("terrain.shader", TERRAIN)
        .with("terrain/common.glsl", "vec3 terrainNormal();\n");
    let mut library = ShaderLibrary::new(loader);
    let mut compiler = DryRunCompiler::new();
    let id = library.load_shader("terrain.shader").unwrap();
    library
        .get_combination(id, "ATTRIBPASS", FlagMask::EMPTY, &mut compiler)
        .unwrap();

    let settings = LibrarySettings::from_json_str(r#"{ "emit_flag_defines": false }"#).unwrap();
    assert!(!settings.emit_flag_defines);
    library.set_settings(settings);

    library
        .get_combination(id, "ATTRIBPASS", FlagMask::EMPTY, &mut compiler)
        .unwrap();
    assert_eq!(compiler.compile_count(), 2);
}

#[test]
fn unused_flags_share_one_combination() {
    let loader = MemorySourceLoader::new()
        .with("terrain.shader", TERRAIN)
        .with("terrain/common.glsl", "vec3 terrainNormal();\n");
    let settings = LibrarySettings {
        mask_unused_flags: true,
        ..Default::default()
    };
    let mut library = ShaderLibrary::with_settings(loader, settings);
    let mut compiler = DryRunCompiler::new();
    let id = library.load_shader("terrain.shader").unwrap();
    let wireframe = library.encode_flags(id, &["WIREFRAME"]).unwrap();

    let plain = library
        .program(id, "ATTRIBPASS", FlagMask::EMPTY, &mut compiler)
        .unwrap();
    let masked = library
        .program(id, "ATTRIBPASS", wireframe, &mut compiler)
        .unwrap();

    assert_eq!(plain, masked, "WIREFRAME is never tested by the sources");
    assert_eq!(compiler.compile_count(), 1);
}

// ============================================================================
// Element queries
// ============================================================================

#[test]
fn element_queries_on_loaded_shader() {
    let loader = MemorySourceLoader::new()
        .with("terrain.shader", TERRAIN)
        .with("terrain/common.glsl", "vec3 terrainNormal();\n");
    let mut library = ShaderLibrary::new(loader);
    let id = library.load_shader("terrain.shader").unwrap();

    let shader = library.shader_mut(id).unwrap();
    assert_eq!(shader.elem_count(ElementKind::Context), 1);
    assert_eq!(
        shader.elem_param_str(ElementKind::Context, 0, ElementParam::ContextName),
        Some("ATTRIBPASS")
    );
    assert_eq!(
        shader.elem_param_str(ElementKind::Sampler, 0, ElementParam::SamplerDefaultTexture),
        Some("textures/height.png")
    );
    assert_eq!(
        shader.elem_param_i(ElementKind::Sampler, 0, ElementParam::SamplerTexUnit),
        Some(0)
    );
    assert_eq!(
        shader.elem_param_str(ElementKind::Buffer, 0, ElementParam::BufferName),
        Some("TileInfo")
    );

    assert!(shader.set_elem_param_f(ElementKind::Uniform, 0, ElementParam::UniformDefaultValue, 3, 0.5));
    assert_eq!(
        shader.elem_param_f(ElementKind::Uniform, 0, ElementParam::UniformDefaultValue, 3),
        Some(0.5)
    );
    assert_eq!(shader.elem_param_f(ElementKind::Uniform, 0, ElementParam::UniformName, 0), None);
}
