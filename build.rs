use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=NPCAP_SDK_LIB");

    // pnet needs the Npcap SDK import libraries on Windows only
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("windows") {
        return;
    }

    let npcap_sdk_lib =
        env::var("NPCAP_SDK_LIB").unwrap_or_else(|_| r"C:\Npcap-SDK\Lib\x64".to_string());

    // Tell Rust linker where to find the libs
    println!("cargo:rustc-link-search=native={}", npcap_sdk_lib);
    println!("cargo:rustc-link-lib=static=Packet");
    println!("cargo:rustc-link-lib=dylib=wpcap");
}
