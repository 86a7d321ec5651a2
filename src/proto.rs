//! Generated CRI `runtime.v1` types and Tonic service code, compiled from
//! `proto/cri.proto` by `build.rs`.

pub mod runtime {
    pub mod v1 {
        tonic::include_proto!("runtime.v1");
    }
}
