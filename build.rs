use std::io::ErrorKind;
use std::path::Path;
use std::{fs, io};

const PROTO_DIR: &str = "./protos/";
const GENERATED_DIR: &str = "./generated/";

fn main() -> io::Result<()> {
    println!("cargo:rerun-if-changed={}", PROTO_DIR);
    build_proto()?;
    Ok(())
}

fn build_proto() -> io::Result<()> {
    idempotent_create_dir(GENERATED_DIR)?;
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .format(false)
        .out_dir(GENERATED_DIR)
        .compile(&["./protos/raft.proto"], &[PROTO_DIR])
}

fn idempotent_create_dir<P: AsRef<Path>>(path: P) -> io::Result<()> {
    match fs::create_dir(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}
