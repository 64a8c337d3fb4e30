//! Build script for regenerating the protobuf and gRPC sources in `src/proto/`.
//!
//! The generated files are checked in so normal builds need no `protoc`.
//! Set `MDT_REGENERATE_PROTOS=1` after editing anything under `proto/`.

use std::fs;
use std::path::Path;

const PROTOS: [&str; 3] = [
    "proto/telemetry.proto",
    "proto/mdt_dialout.proto",
    "proto/ems_grpc.proto",
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-env-changed=MDT_REGENERATE_PROTOS");
    for proto in PROTOS {
        println!("cargo:rerun-if-changed={}", proto);
    }

    if std::env::var_os("MDT_REGENERATE_PROTOS").is_none() {
        return Ok(());
    }

    let out_dir = Path::new("src/proto");
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .out_dir(out_dir)
        .compile_protos(&PROTOS, &["proto"])?;

    // Output is named after the proto package
    fs::rename(
        out_dir.join("IOSXRExtensibleManagabilityService.rs"),
        out_dir.join("ems.rs"),
    )?;

    Ok(())
}
