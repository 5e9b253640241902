/// Generates the gRPC client and server bindings for `proto/collector.proto`.
///
/// The `payload` fields of the remote dispatch envelope are emitted as
/// `bytes::Bytes` so payloads move between the transport and the worker
/// registry without copies. A file descriptor set is written next to the
/// generated code for the reflection service.
///
/// Generated code is included with:
///
/// ```rust,ignore
/// pub mod collector {
///     tonic::include_proto!("collector");
/// }
/// ```
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("collector_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config
        .bytes([
            ".collector.RemoteMessage.payload",
            ".collector.RemoteReply.payload",
        ])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/collector.proto"], &["proto"])
        .unwrap();
}
