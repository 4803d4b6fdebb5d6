// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Descriptor fixtures for tests, built in code so no `protoc` is needed.
//!
//! ```proto
//! package helloworld;
//!
//! enum Mood { MOOD_UNSPECIFIED = 0; HAPPY = 1; SAD = 2; }
//!
//! message HelloRequest {
//!   string name = 1; repeated string tags = 2; int64 count = 3;
//!   map<string, string> labels = 4; Mood mood = 5;
//! }
//! message HelloReply { string message = 1; int64 count = 2; repeated string tags = 3; }
//! message Scalars { /* one field per scalar kind, nested, repeated and map fields */ }
//!
//! service Greeter {
//!   rpc SayHello (HelloRequest) returns (HelloReply);
//!   rpc StreamHello (HelloRequest) returns (stream HelloReply);
//!   rpc CollectHello (stream HelloRequest) returns (HelloReply);
//!   rpc Chat (stream HelloRequest) returns (stream HelloReply);
//!   rpc Echo (Scalars) returns (Scalars);
//! }
//! ```

use std::sync::Arc;

use gripmock_runtime::Runtime;
use prost_reflect::DescriptorPool;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MessageOptions, MethodDescriptorProto,
    ServiceDescriptorProto,
};

use crate::descriptors::DescriptorRegistry;
use crate::history::HistoryOptions;
use crate::plugins::FunctionRegistry;
use crate::state::State;

fn json_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn field(name: &str, number: i32, ty: Type, label: Label, type_name: Option<&str>) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(label as i32),
        r#type: Some(ty as i32),
        type_name: type_name.map(String::from),
        json_name: Some(json_name(name)),
        ..Default::default()
    }
}

fn scalar(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    field(name, number, ty, Label::Optional, None)
}

fn map_entry(name: &str, key: Type, value: Type, value_type_name: Option<&str>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: vec![
            scalar("key", 1, key),
            field("value", 2, value, Label::Optional, value_type_name),
        ],
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn method(name: &str, input: &str, output: &str, client: bool, server: bool) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(input.to_string()),
        output_type: Some(output.to_string()),
        client_streaming: Some(client),
        server_streaming: Some(server),
        ..Default::default()
    }
}

pub fn greeter_file() -> FileDescriptorProto {
    let mood = EnumDescriptorProto {
        name: Some("Mood".to_string()),
        value: ["MOOD_UNSPECIFIED", "HAPPY", "SAD"]
            .iter()
            .enumerate()
            .map(|(i, name)| EnumValueDescriptorProto {
                name: Some(name.to_string()),
                number: Some(i as i32),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };

    let hello_request = DescriptorProto {
        name: Some("HelloRequest".to_string()),
        field: vec![
            scalar("name", 1, Type::String),
            field("tags", 2, Type::String, Label::Repeated, None),
            scalar("count", 3, Type::Int64),
            field(
                "labels",
                4,
                Type::Message,
                Label::Repeated,
                Some(".helloworld.HelloRequest.LabelsEntry"),
            ),
            field("mood", 5, Type::Enum, Label::Optional, Some(".helloworld.Mood")),
        ],
        nested_type: vec![map_entry("LabelsEntry", Type::String, Type::String, None)],
        ..Default::default()
    };

    let hello_reply = DescriptorProto {
        name: Some("HelloReply".to_string()),
        field: vec![
            scalar("message", 1, Type::String),
            scalar("count", 2, Type::Int64),
            field("tags", 3, Type::String, Label::Repeated, None),
        ],
        ..Default::default()
    };

    let scalars = DescriptorProto {
        name: Some("Scalars".to_string()),
        field: vec![
            scalar("d", 1, Type::Double),
            scalar("f", 2, Type::Float),
            scalar("i32", 3, Type::Int32),
            scalar("i64", 4, Type::Int64),
            scalar("u32", 5, Type::Uint32),
            scalar("u64", 6, Type::Uint64),
            scalar("s32", 7, Type::Sint32),
            scalar("s64", 8, Type::Sint64),
            scalar("fx32", 9, Type::Fixed32),
            scalar("fx64", 10, Type::Fixed64),
            scalar("sfx32", 11, Type::Sfixed32),
            scalar("sfx64", 12, Type::Sfixed64),
            scalar("flag", 13, Type::Bool),
            scalar("text", 14, Type::String),
            scalar("raw", 15, Type::Bytes),
            field("mood", 16, Type::Enum, Label::Optional, Some(".helloworld.Mood")),
            field(
                "nested",
                17,
                Type::Message,
                Label::Optional,
                Some(".helloworld.HelloReply"),
            ),
            field(
                "replies",
                18,
                Type::Message,
                Label::Repeated,
                Some(".helloworld.HelloReply"),
            ),
            field(
                "by_id",
                19,
                Type::Message,
                Label::Repeated,
                Some(".helloworld.Scalars.ByIdEntry"),
            ),
            field("numbers", 20, Type::Int64, Label::Repeated, None),
        ],
        nested_type: vec![map_entry(
            "ByIdEntry",
            Type::Int32,
            Type::Message,
            Some(".helloworld.HelloReply"),
        )],
        ..Default::default()
    };

    let greeter = ServiceDescriptorProto {
        name: Some("Greeter".to_string()),
        method: vec![
            method("SayHello", ".helloworld.HelloRequest", ".helloworld.HelloReply", false, false),
            method("StreamHello", ".helloworld.HelloRequest", ".helloworld.HelloReply", false, true),
            method("CollectHello", ".helloworld.HelloRequest", ".helloworld.HelloReply", true, false),
            method("Chat", ".helloworld.HelloRequest", ".helloworld.HelloReply", true, true),
            method("Echo", ".helloworld.Scalars", ".helloworld.Scalars", false, false),
        ],
        ..Default::default()
    };

    FileDescriptorProto {
        name: Some("helloworld.proto".to_string()),
        package: Some("helloworld".to_string()),
        message_type: vec![hello_request, hello_reply, scalars],
        enum_type: vec![mood],
        service: vec![greeter],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

/// `package inventory; message Item { string sku = 1; int32 quantity = 2; }
/// service Stock { rpc Get (Item) returns (Item); }`
pub fn inventory_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some("inventory.proto".to_string()),
        package: Some("inventory".to_string()),
        message_type: vec![DescriptorProto {
            name: Some("Item".to_string()),
            field: vec![scalar("sku", 1, Type::String), scalar("quantity", 2, Type::Int32)],
            ..Default::default()
        }],
        service: vec![ServiceDescriptorProto {
            name: Some("Stock".to_string()),
            method: vec![method("Get", ".inventory.Item", ".inventory.Item", false, false)],
            ..Default::default()
        }],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

pub fn greeter_file_descriptor_set() -> FileDescriptorSet {
    FileDescriptorSet {
        file: vec![greeter_file()],
    }
}

pub fn inventory_file_descriptor_set() -> FileDescriptorSet {
    FileDescriptorSet {
        file: vec![inventory_file()],
    }
}

pub fn greeter_pool() -> DescriptorPool {
    let mut pool = DescriptorPool::new();
    pool.add_file_descriptor_set(greeter_file_descriptor_set())
        .expect("greeter fixture is a valid descriptor set");
    pool
}

/// Engine state serving the greeter fixture, with builtins and history enabled.
pub fn greeter_state() -> State {
    let descriptors = Arc::new(DescriptorRegistry::new());
    descriptors
        .add("greeter", greeter_file_descriptor_set())
        .expect("greeter fixture is a valid descriptor set");
    State::new(
        Runtime::default(),
        descriptors,
        Arc::new(FunctionRegistry::with_builtins()),
        HistoryOptions {
            enabled: true,
            ..Default::default()
        },
    )
}
