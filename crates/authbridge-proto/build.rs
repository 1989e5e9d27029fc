use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let protoc = protoc_bin_vendored::protoc_bin_path()?;
    std::env::set_var("PROTOC", protoc);
    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);
    let descriptor_path = out_dir.join("authbridge_ext_proc_descriptor.bin");

    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .file_descriptor_set_path(descriptor_path)
        .compile_protos(&["proto/ext_proc.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/ext_proc.proto");
    println!("cargo:rerun-if-changed=proto");

    Ok(())
}
