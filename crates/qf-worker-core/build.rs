/// Builds the gRPC client and server code for the `dispatch` package using
/// `tonic-prost-build`.
///
/// The file descriptor is assembled here with `prost-types` instead of being
/// produced by `protoc`, so building the crate needs no external protobuf
/// toolchain. The schema is kept, byte for byte equivalent, in
/// `proto/dispatch.proto`; both must change together.
///
/// # Byte Field Optimization
///
/// The `body` fields of `WorkItem` and `WorkResult` are marked with
/// `.bytes(...)` so they decode into `bytes::Bytes` instead of `Vec<u8>`.
///
/// # Output
///
/// Generated code will be accessible in Rust via:
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("dispatch");
/// }
/// ```
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MethodDescriptorProto, ServiceDescriptorProto,
    field_descriptor_proto::{Label, Type},
};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=proto/dispatch.proto");

    let mut config = tonic_prost_build::Config::new();

    // Ensure payloads are treated as `Bytes`, not `Vec<u8>`
    config.bytes([".dispatch.WorkItem.body", ".dispatch.WorkResult.body"]);

    tonic_prost_build::configure()
        .compile_fds_with_config(descriptor(), config)
        .unwrap();
}

fn descriptor() -> FileDescriptorSet {
    let work_item = DescriptorProto {
        name: Some("WorkItem".into()),
        field: vec![field("body", 1, Type::Bytes, None)],
        ..Default::default()
    };

    let work_result = DescriptorProto {
        name: Some("WorkResult".into()),
        field: vec![
            field("status", 1, Type::Enum, Some(".dispatch.ResultStatus")),
            field("body", 2, Type::Bytes, None),
        ],
        ..Default::default()
    };

    let result_status = EnumDescriptorProto {
        name: Some("ResultStatus".into()),
        value: vec![
            EnumValueDescriptorProto {
                name: Some("RESULT_STATUS_OK".into()),
                number: Some(0),
                ..Default::default()
            },
            EnumValueDescriptorProto {
                name: Some("RESULT_STATUS_ERROR".into()),
                number: Some(1),
                ..Default::default()
            },
        ],
        ..Default::default()
    };

    let dispatcher = ServiceDescriptorProto {
        name: Some("Dispatcher".into()),
        method: vec![MethodDescriptorProto {
            name: Some("Process".into()),
            input_type: Some(".dispatch.WorkResult".into()),
            output_type: Some(".dispatch.WorkItem".into()),
            client_streaming: Some(true),
            server_streaming: Some(true),
            ..Default::default()
        }],
        ..Default::default()
    };

    FileDescriptorSet {
        file: vec![FileDescriptorProto {
            name: Some("dispatch.proto".into()),
            package: Some("dispatch".into()),
            message_type: vec![work_item, work_result],
            enum_type: vec![result_status],
            service: vec![dispatcher],
            syntax: Some("proto3".into()),
            ..Default::default()
        }],
    }
}

fn field(name: &str, number: i32, ty: Type, type_name: Option<&str>) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        json_name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        type_name: type_name.map(Into::into),
        ..Default::default()
    }
}
