//! Compiles the vendored CRI `runtime.v1` contract into Rust types and a
//! Tonic service definition, mirroring how the teacher's workspace produces
//! `api_proto`/`container_proto` out of band.

fn main() {
    // Avoid depending on a system `protoc` install; vendor one instead.
    unsafe {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().expect("vendored protoc"));
    }
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&["proto/cri.proto"], &["proto"])
        .expect("failed to compile CRI proto");
}
