use std::fs;
use std::io;

const PROTO_DIR: &str = "./protos/";
const OUT_DIR: &str = "./generated/";

fn main() -> io::Result<()> {
    println!("cargo:rerun-if-changed=protos/raft.proto");

    // `lib.rs` includes the generated code from a fixed path, so generate outside OUT_DIR.
    fs::create_dir_all(OUT_DIR)?;
    tonic_build::configure()
        .out_dir(OUT_DIR)
        .compile(&["./protos/raft.proto"], &[PROTO_DIR])
}
