fn main() {
    println!("cargo::rerun-if-changed=../../shardfs.capnp");
    capnpc::CompilerCommand::new()
        .src_prefix("../../")
        .file("../../shardfs.capnp")
        .run()
        .expect("Failed to compile Cap'n Proto schema");
}
