// SPDX-License-Identifier: CEPL-1.0
use std::{env, fs, path::PathBuf};

// (source under shaders/, kind, output name)
const SHADERS: [(&str, shaderc::ShaderKind, &str); 2] = [
    ("tri.vert", shaderc::ShaderKind::Vertex, "tri.vert.spv"),
    ("tri.frag", shaderc::ShaderKind::Fragment, "tri.frag.spv"),
];

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
    let manifest = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let src_dir = manifest.join("../../shaders");

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (name, kind, spv) in SHADERS {
        let path = src_dir.join(name);
        println!("cargo:rerun-if-changed={}", path.display());
        let src = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("read {}: {e}", path.display()));
        let artifact = comp
            .compile_into_spirv(&src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("compile {name}: {e}"));
        fs::write(out.join(spv), artifact.as_binary_u8())
            .unwrap_or_else(|e| panic!("write {spv}: {e}"));
    }

    println!("cargo:rerun-if-changed=build.rs");
}
