fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    #[cfg(feature = "builtin-shaders")]
    compile::shaders();
}

#[cfg(feature = "builtin-shaders")]
mod compile {
    use std::{env, fs, path::PathBuf};

    pub fn shaders() {
        let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));

        let comp = shaderc::Compiler::new().expect("shaderc compiler");
        let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
        opts.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_0 as u32,
        );
        opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

        for (file, kind) in [
            ("cube.vert", shaderc::ShaderKind::Vertex),
            ("cube.frag", shaderc::ShaderKind::Fragment),
        ] {
            let path = format!("shaders/{file}");
            println!("cargo:rerun-if-changed={path}");
            let src = fs::read_to_string(&path).expect("read shader source");
            let spv = comp
                .compile_into_spirv(&src, kind, file, "main", Some(&opts))
                .unwrap_or_else(|e| panic!("{file}: {e}"));
            fs::write(out.join(format!("{file}.spv")), spv.as_binary_u8()).expect("write spv");
        }
    }
}
