use std::path::Path;

// data/colon.csv is compiled in when present; see dataset::embedded
fn main() {
    println!("cargo::rustc-check-cfg=cfg(embedded_colon)");
    println!("cargo::rerun-if-changed=data");
    println!("cargo::rerun-if-changed=data/colon.csv");
    if Path::new("data/colon.csv").is_file() {
        println!("cargo::rustc-cfg=embedded_colon");
    }
}
