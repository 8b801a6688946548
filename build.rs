fn main() {
    #[cfg(feature = "redpitaya")]
    redpitaya::generate_bindings();
}

#[cfg(feature = "redpitaya")]
mod redpitaya {
    use std::{env, path::PathBuf};

    pub fn generate_bindings() {
        let include_dir =
            env::var("REDPITAYA_INCLUDE").unwrap_or_else(|_| "/opt/redpitaya/include".to_string());
        let lib_dir =
            env::var("REDPITAYA_LIB").unwrap_or_else(|_| "/opt/redpitaya/lib".to_string());

        println!("cargo:rustc-link-search=native={lib_dir}");
        println!("cargo:rustc-link-lib=rp");
        println!("cargo:rustc-link-lib=rp-hw-profiles");
        println!("cargo:rerun-if-changed=wrapper.h");
        println!("cargo:rerun-if-env-changed=REDPITAYA_INCLUDE");
        println!("cargo:rerun-if-env-changed=REDPITAYA_LIB");

        let bindings = bindgen::Builder::default()
            .header("wrapper.h")
            .clang_arg(format!("-I{include_dir}"))
            .allowlist_function("rp_.*")
            .allowlist_type("rp_.*")
            .allowlist_var("RP_.*")
            .prepend_enum_name(false)
            .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
            .generate()
            .expect("unable to generate librp bindings");

        let out_path = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
        bindings
            .write_to_file(out_path.join("bindings.rs"))
            .expect("couldn't write bindings");
    }
}
