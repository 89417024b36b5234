use std::io::Result;

fn main() -> Result<()> {
    println!("cargo:rerun-if-changed=js_protocol.pdl");
    println!("cargo:rerun-if-changed=browser_protocol.pdl");
    cdpmux_pdl::build::compile_pdls(&["js_protocol.pdl", "browser_protocol.pdl"])
}
