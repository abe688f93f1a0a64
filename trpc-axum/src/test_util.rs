//! Descriptor pool shared by the unit tests.
//!
//! Builds a small `library` package plus the well-known types it uses, in
//! code, so tests need neither protoc nor a build script.

use prost_reflect::{DescriptorPool, MessageDescriptor};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, MessageOptions,
};

fn json_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn field(name: &str, number: i32, label: Label, ty: Type, type_name: Option<&str>) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(label as i32),
        r#type: Some(ty as i32),
        type_name: type_name.map(String::from),
        json_name: Some(json_name(name)),
        ..Default::default()
    }
}

fn scalar(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    field(name, number, Label::Optional, ty, None)
}

fn message(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    field(name, number, Label::Optional, Type::Message, Some(type_name))
}

fn map_entry(name: &str, key: Type, value: Type) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.into()),
        field: vec![scalar("key", 1, key), scalar("value", 2, value)],
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn simple(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.into()),
        field: fields,
        ..Default::default()
    }
}

fn well_known_files() -> Vec<FileDescriptorProto> {
    let wkt = |file: &str, messages: Vec<DescriptorProto>| FileDescriptorProto {
        name: Some(format!("google/protobuf/{file}.proto")),
        package: Some("google.protobuf".into()),
        message_type: messages,
        syntax: Some("proto3".into()),
        ..Default::default()
    };
    let seconds_nanos = || vec![scalar("seconds", 1, Type::Int64), scalar("nanos", 2, Type::Int32)];
    let wrapper = |name: &str, ty: Type| simple(name, vec![scalar("value", 1, ty)]);

    vec![
        wkt("timestamp", vec![simple("Timestamp", seconds_nanos())]),
        wkt("duration", vec![simple("Duration", seconds_nanos())]),
        wkt(
            "wrappers",
            vec![
                wrapper("DoubleValue", Type::Double),
                wrapper("FloatValue", Type::Float),
                wrapper("Int64Value", Type::Int64),
                wrapper("UInt64Value", Type::Uint64),
                wrapper("Int32Value", Type::Int32),
                wrapper("UInt32Value", Type::Uint32),
                wrapper("BoolValue", Type::Bool),
                wrapper("StringValue", Type::String),
                wrapper("BytesValue", Type::Bytes),
            ],
        ),
        wkt(
            "field_mask",
            vec![simple(
                "FieldMask",
                vec![field("paths", 1, Label::Repeated, Type::String, None)],
            )],
        ),
    ]
}

fn library_file() -> FileDescriptorProto {
    let status = EnumDescriptorProto {
        name: Some("Status".into()),
        value: ["STATUS_UNKNOWN", "AVAILABLE", "SOLD_OUT"]
            .iter()
            .enumerate()
            .map(|(i, name)| EnumValueDescriptorProto {
                name: Some((*name).into()),
                number: Some(i as i32),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };

    let author = simple(
        "Author",
        vec![scalar("name", 1, Type::String), scalar("age", 2, Type::Int32)],
    );

    let book = DescriptorProto {
        name: Some("Book".into()),
        field: vec![
            scalar("name", 1, Type::String),
            scalar("id", 2, Type::Int32),
            scalar("page_count", 3, Type::Int64),
            field("tags", 4, Label::Repeated, Type::String, None),
            field("ratings", 5, Label::Repeated, Type::Message, Some(".library.Book.RatingsEntry")),
            field("status", 6, Label::Optional, Type::Enum, Some(".library.Status")),
            message("published", 7, ".google.protobuf.Timestamp"),
            message("read_time", 8, ".google.protobuf.Duration"),
            message("edition", 9, ".google.protobuf.Int32Value"),
            message("mask", 10, ".google.protobuf.FieldMask"),
            scalar("cover", 11, Type::Bytes),
            scalar("available", 12, Type::Bool),
            scalar("price", 13, Type::Double),
            message("author", 14, ".library.Author"),
            scalar("stock", 15, Type::Uint32),
            scalar("weight", 16, Type::Float),
            field("history", 17, Label::Repeated, Type::Enum, Some(".library.Status")),
            field("authors", 18, Label::Repeated, Type::Message, Some(".library.Author")),
        ],
        nested_type: vec![map_entry("RatingsEntry", Type::String, Type::Int32)],
        ..Default::default()
    };

    let get_book = simple(
        "GetBookRequest",
        vec![
            scalar("name", 1, Type::String),
            scalar("view", 2, Type::String),
            scalar("version", 3, Type::Int32),
        ],
    );
    let create_book = simple(
        "CreateBookRequest",
        vec![
            scalar("parent", 1, Type::String),
            message("book", 2, ".library.Book"),
            scalar("request_id", 3, Type::String),
        ],
    );
    let book_reply = simple(
        "BookReply",
        vec![message("book", 1, ".library.Book"), scalar("etag", 2, Type::String)],
    );

    FileDescriptorProto {
        name: Some("library/library.proto".into()),
        package: Some("library".into()),
        dependency: vec![
            "google/protobuf/timestamp.proto".into(),
            "google/protobuf/duration.proto".into(),
            "google/protobuf/wrappers.proto".into(),
            "google/protobuf/field_mask.proto".into(),
        ],
        message_type: vec![author, book, get_book, create_book, book_reply],
        enum_type: vec![status],
        syntax: Some("proto3".into()),
        ..Default::default()
    }
}

/// A pool holding the `library` package and its well-known dependencies.
pub(crate) fn pool() -> DescriptorPool {
    static POOL: std::sync::OnceLock<DescriptorPool> = std::sync::OnceLock::new();
    POOL.get_or_init(|| {
        let mut pool = DescriptorPool::new();
        for file in well_known_files() {
            pool.add_file_descriptor_proto(file).unwrap();
        }
        pool.add_file_descriptor_proto(library_file()).unwrap();
        pool
    })
    .clone()
}

/// Look up `library.<name>`.
pub(crate) fn descriptor(name: &str) -> MessageDescriptor {
    pool().get_message_by_name(&format!("library.{name}")).unwrap()
}
