// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Output renderer: turns a matched stub's [`Output`] into the reply for one call.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::convert::Map;
use crate::plugins::CallContext;
use crate::stubs::Output;
use crate::template::{has_templates, is_template, TemplateData, TemplateEngine, TemplateError};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to process dynamic templates: {0}")]
    Template(#[from] TemplateError),

    #[error("stream element #{0} is not an object")]
    InvalidStreamItem(usize),
}

/// What the call answers with.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Message(Map),
    Stream(Vec<Map>),
    Failure { code: tonic::Code, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    /// Response metadata, sent whether or not the reply is a failure
    pub headers: BTreeMap<String, String>,
    pub delay: Option<Duration>,
    pub reply: Reply,
}

/// What `MessageIndex` means while stream elements are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamIndex {
    /// Position of the element in the output stream (server streaming)
    PerElement,
    /// Index of the inbound message being answered
    Inbound,
}

#[derive(Debug, Clone)]
pub struct OutputRenderer {
    templates: TemplateEngine,
}

impl OutputRenderer {
    pub fn new(templates: TemplateEngine) -> Self {
        Self { templates }
    }

    pub fn templates(&self) -> &TemplateEngine {
        &self.templates
    }

    /// Renders `output` for one call. A configured error wins over data; a configured `OK`
    /// code is no error at all.
    pub fn render(
        &self,
        output: &Output,
        call: CallContext,
        data: &TemplateData,
        indexing: StreamIndex,
    ) -> Result<Rendered, RenderError> {
        let needs_templates = output.data.iter().any(|data| data.values().any(has_templates))
            || output.stream.iter().any(has_templates)
            || is_template(&output.error)
            || output.headers.values().any(|value| is_template(value));

        if !needs_templates {
            return Ok(Rendered {
                headers: output.headers.clone(),
                delay: output.delay.map(|delay| delay.0),
                reply: literal_reply(output)?,
            });
        }

        let mut renderer = self.templates.renderer(call, data);
        let headers = output
            .headers
            .iter()
            .map(|(key, value)| Ok((key.clone(), renderer.render_str(value)?)))
            .collect::<Result<BTreeMap<_, _>, TemplateError>>()?;

        let reply = match failure(output) {
            Some(code) => Reply::Failure {
                code,
                message: renderer.render_str(&output.error)?,
            },
            None if !output.stream.is_empty() => {
                let items = stream_items(&output.stream)?;
                let mut stream = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    if indexing == StreamIndex::PerElement {
                        renderer.set_message_index(index);
                    }
                    stream.push(renderer.render_map(item)?);
                }
                Reply::Stream(stream)
            }
            None => Reply::Message(renderer.render_map(&output.data.clone().unwrap_or_default())?),
        };

        Ok(Rendered {
            headers,
            delay: output.delay.map(|delay| delay.0),
            reply,
        })
    }
}

fn failure(output: &Output) -> Option<tonic::Code> {
    match output.code {
        Some(code) if code.is_ok() => None,
        Some(code) => Some(code.to_grpc()),
        None if !output.error.is_empty() => Some(tonic::Code::Aborted),
        None => None,
    }
}

fn literal_reply(output: &Output) -> Result<Reply, RenderError> {
    Ok(match failure(output) {
        Some(code) => Reply::Failure {
            code,
            message: output.error.clone(),
        },
        None if !output.stream.is_empty() => Reply::Stream(stream_items(&output.stream)?),
        None => Reply::Message(output.data.clone().unwrap_or_default()),
    })
}

/// Stream elements as messages; `null` and empty elements are skipped.
fn stream_items(stream: &[Value]) -> Result<Vec<Map>, RenderError> {
    stream
        .iter()
        .enumerate()
        .filter(|(_, item)| !item.is_null())
        .filter_map(|(index, item)| match item {
            Value::Object(map) if map.is_empty() => None,
            Value::Object(map) => Some(Ok(map.clone())),
            _ => Some(Err(RenderError::InvalidStreamItem(index))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::FunctionRegistry;
    use crate::stubs::Stub;
    use serde_json::json;
    use std::sync::Arc;

    fn renderer() -> OutputRenderer {
        OutputRenderer::new(TemplateEngine::new(Arc::new(FunctionRegistry::with_builtins())))
    }

    fn output(value: Value) -> Output {
        let stub: Stub = serde_json::from_value(json!({
            "service": "Greeter",
            "method": "SayHello",
            "input": {"equals": {}},
            "output": value
        }))
        .unwrap();
        stub.output
    }

    fn data() -> TemplateData {
        TemplateData {
            request: json!({"name": "Alex"}).as_object().unwrap().clone(),
            ..Default::default()
        }
    }

    fn render(value: Value) -> Rendered {
        renderer()
            .render(&output(value), CallContext::default(), &data(), StreamIndex::Inbound)
            .unwrap()
    }

    #[test]
    fn test_literal_data() {
        let rendered = render(json!({"data": {"message": "Hi"}, "headers": {"x-a": "1"}, "delay": "10ms"}));
        assert_eq!(rendered.reply, Reply::Message(json!({"message": "Hi"}).as_object().unwrap().clone()));
        assert_eq!(rendered.headers.get("x-a").map(String::as_str), Some("1"));
        assert_eq!(rendered.delay, Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_templated_data_and_headers() {
        let rendered = render(json!({
            "data": {"message": "Hi {{ upper .Request.name }}"},
            "headers": {"x-name": "{{ Request.name }}"}
        }));
        assert_eq!(rendered.reply, Reply::Message(json!({"message": "Hi ALEX"}).as_object().unwrap().clone()));
        assert_eq!(rendered.headers["x-name"], "Alex");
    }

    #[test]
    fn test_configured_errors() {
        let rendered = render(json!({"error": "boom"}));
        assert_eq!(
            rendered.reply,
            Reply::Failure { code: tonic::Code::Aborted, message: "boom".to_string() }
        );

        let rendered = render(json!({"error": "no {{ Request.name }}", "code": "NOT_FOUND"}));
        assert_eq!(
            rendered.reply,
            Reply::Failure { code: tonic::Code::NotFound, message: "no Alex".to_string() }
        );

        // OK is no error at all
        let rendered = render(json!({"code": 0, "data": {"message": "fine"}}));
        assert!(matches!(rendered.reply, Reply::Message(_)));
    }

    #[test]
    fn test_stream_skips_empty_elements() {
        let rendered = render(json!({"stream": [{"message": "a"}, null, {}, {"message": "{{ Request.name }}"}]}));
        assert_eq!(
            rendered.reply,
            Reply::Stream(vec![
                json!({"message": "a"}).as_object().unwrap().clone(),
                json!({"message": "Alex"}).as_object().unwrap().clone(),
            ])
        );
    }

    #[test]
    fn test_server_stream_binds_element_index() {
        let rendered = renderer()
            .render(
                &output(json!({"stream": [{"message": "{{ MessageIndex }}"}, {"message": "{{ messageIndex }}"}]})),
                CallContext::default(),
                &data(),
                StreamIndex::PerElement,
            )
            .unwrap();
        assert_eq!(
            rendered.reply,
            Reply::Stream(vec![
                json!({"message": "0"}).as_object().unwrap().clone(),
                json!({"message": "1"}).as_object().unwrap().clone(),
            ])
        );
    }

    #[test]
    fn test_template_failure_is_reported() {
        let err = renderer()
            .render(
                &output(json!({"data": {"message": "{{ Request.name | nope }}"}})),
                CallContext::default(),
                &data(),
                StreamIndex::Inbound,
            )
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to process dynamic templates:"));
    }
}
