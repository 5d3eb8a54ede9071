use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    // memory.x carves the LM3S6965 SRAM into program RAM plus the APP and
    // SHADOW blocks behind the __shadowsan_* symbols. cortex-m-rt's link.x
    // resolves `INCLUDE memory.x` through the linker search path, so the
    // script has to be staged somewhere on it; OUT_DIR is the only writable
    // directory cargo gives us for that.
    stage_linker_script("memory.x");
}

fn stage_linker_script(name: &str) {
    let out_dir = PathBuf::from(env::var_os("OUT_DIR").unwrap());
    fs::copy(name, out_dir.join(name)).unwrap();
    println!("cargo:rustc-link-search={}", out_dir.display());
    println!("cargo:rerun-if-changed={name}");
}
