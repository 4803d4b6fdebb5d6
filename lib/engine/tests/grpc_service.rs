// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod grpc_test {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use gripmock_engine::convert::{map_to_message, message_to_map, Map};
    use gripmock_engine::grpc::handlers::CANCELLED;
    use gripmock_engine::grpc::{DynamicCodec, GrpcService};
    use gripmock_engine::session::SESSION_HEADER;
    use gripmock_engine::stubs::Stub;
    use gripmock_engine::testing::{greeter_pool, greeter_state};
    use gripmock_engine::State;
    use http::uri::PathAndQuery;
    use prost_reflect::{DynamicMessage, MethodDescriptor};
    use rstest::*;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Instant};
    use tokio_util::sync::CancellationToken;
    use tonic::metadata::MetadataValue;
    use tonic::transport::Channel;
    use tonic::{Code, Request};
    use tonic_health::pb::health_check_response::ServingStatus;
    use tonic_health::pb::health_client::HealthClient;
    use tonic_health::pb::HealthCheckRequest;

    const GREETER: &str = "helloworld.Greeter";

    struct Mock {
        state: Arc<State>,
        address: SocketAddr,
        cancel: CancellationToken,
    }

    impl Mock {
        fn stub(&self, stub: Value) -> uuid::Uuid {
            let stub: Stub = serde_json::from_value(stub).unwrap();
            self.state.store().put_many(vec![stub]).unwrap()[0]
        }

        async fn channel(&self) -> Channel {
            Channel::from_shared(format!("http://{}", self.address))
                .unwrap()
                .connect()
                .await
                .unwrap()
        }
    }

    impl Drop for Mock {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    #[fixture]
    async fn mock() -> Mock {
        let state = Arc::new(greeter_state());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let service = GrpcService::builder()
            .state(state.clone())
            .build()
            .unwrap();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move { service.run_with_listener(listener, token).await });

        timeout(Duration::from_secs(5), async {
            while !state.is_ready() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("gRPC mock did not become ready");

        Mock {
            state,
            address,
            cancel,
        }
    }

    fn method(name: &str) -> MethodDescriptor {
        greeter_pool()
            .get_service_by_name(GREETER)
            .unwrap()
            .methods()
            .find(|method| method.name() == name)
            .unwrap()
    }

    fn path(method: &MethodDescriptor) -> PathAndQuery {
        format!("/{}/{}", GREETER, method.name()).parse().unwrap()
    }

    fn hello(value: Value) -> DynamicMessage {
        let map: Map = value.as_object().unwrap().clone();
        map_to_message(&method("SayHello").input(), &map).unwrap()
    }

    fn json_of(message: &DynamicMessage) -> Value {
        Value::Object(message_to_map(message))
    }

    async fn client(mock: &Mock) -> tonic::client::Grpc<Channel> {
        let mut grpc = tonic::client::Grpc::new(mock.channel().await);
        grpc.ready().await.unwrap();
        grpc
    }

    async fn say_hello(
        mock: &Mock,
        request: Request<DynamicMessage>,
    ) -> Result<tonic::Response<DynamicMessage>, tonic::Status> {
        let method = method("SayHello");
        client(mock)
            .await
            .unary(request, path(&method), DynamicCodec::new(method.output()))
            .await
    }

    #[rstest]
    #[tokio::test]
    async fn test_unary_renders_request_into_reply(#[future] mock: Mock) {
        let mock = mock.await;
        let id = mock.stub(json!({
            "service": "Greeter",
            "method": "SayHello",
            "input": {"equals": {"name": "Alex"}},
            "output": {
                "data": {"message": "Hello {{ Request.name }}", "count": 3},
                "headers": {"x-served-by": "mock"}
            }
        }));

        let response = say_hello(&mock, Request::new(hello(json!({"name": "Alex"}))))
            .await
            .unwrap();
        assert_eq!(
            response.metadata().get("x-served-by").and_then(|v| v.to_str().ok()),
            Some("mock")
        );
        assert_eq!(
            json_of(response.get_ref()),
            json!({"message": "Hello Alex", "count": 3})
        );

        let calls = mock.state.history().filter_by_method(GREETER, "SayHello");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].stub_id, Some(id));
        assert_eq!(calls[0].request, json!({"name": "Alex"}));
        assert_eq!(calls[0].response["message"], json!("Hello Alex"));
    }

    #[rstest]
    #[tokio::test]
    async fn test_unmatched_call_is_not_found(#[future] mock: Mock) {
        let mock = mock.await;
        mock.stub(json!({
            "service": "Greeter",
            "method": "SayHello",
            "input": {"equals": {"name": "Alex"}},
            "output": {"data": {"message": "Hello"}}
        }));

        let status = say_hello(&mock, Request::new(hello(json!({"name": "Sam"}))))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);

        let calls = mock.state.history().all();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].error.is_empty());
        assert_eq!(calls[0].stub_id, None);
    }

    #[rstest]
    #[tokio::test]
    async fn test_unknown_method_is_unimplemented(#[future] mock: Mock) {
        let mock = mock.await;
        let method = method("SayHello");
        let status = client(&mock)
            .await
            .unary(
                Request::new(hello(json!({"name": "Alex"}))),
                format!("/{GREETER}/Missing").parse().unwrap(),
                DynamicCodec::new(method.output()),
            )
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unimplemented);
    }

    #[rstest]
    #[case(json!("NOT_FOUND"), Code::NotFound)]
    #[case(json!(7), Code::PermissionDenied)]
    #[case(json!("Unavailable"), Code::Unavailable)]
    #[tokio::test]
    async fn test_configured_error(#[future] mock: Mock, #[case] code: Value, #[case] expected: Code) {
        let mock = mock.await;
        mock.stub(json!({
            "service": "Greeter",
            "method": "SayHello",
            "input": {"equals": {}},
            "output": {"error": "nope", "code": code}
        }));

        let status = say_hello(&mock, Request::new(hello(json!({"name": "Alex"}))))
            .await
            .unwrap_err();
        assert_eq!(status.code(), expected);
        assert_eq!(status.message(), "nope");
    }

    #[rstest]
    #[tokio::test]
    async fn test_headers_select_the_stub(#[future] mock: Mock) {
        let mock = mock.await;
        mock.stub(json!({
            "service": "Greeter",
            "method": "SayHello",
            "headers": {"equals": {"x-tenant": "blue"}},
            "input": {"equals": {}},
            "output": {"data": {"message": "blue"}}
        }));
        mock.stub(json!({
            "service": "Greeter",
            "method": "SayHello",
            "input": {"equals": {}},
            "output": {"data": {"message": "default"}}
        }));

        let mut request = Request::new(hello(json!({"name": "Alex"})));
        request
            .metadata_mut()
            .insert("x-tenant", MetadataValue::from_static("blue"));
        let blue = say_hello(&mock, request).await.unwrap();
        assert_eq!(json_of(blue.get_ref())["message"], json!("blue"));

        let plain = say_hello(&mock, Request::new(hello(json!({"name": "Alex"}))))
            .await
            .unwrap();
        assert_eq!(json_of(plain.get_ref())["message"], json!("default"));
    }

    #[rstest]
    #[tokio::test]
    async fn test_times_limits_matches(#[future] mock: Mock) {
        let mock = mock.await;
        mock.stub(json!({
            "service": "Greeter",
            "method": "SayHello",
            "input": {"equals": {}},
            "output": {"data": {"message": "once"}},
            "options": {"times": 1}
        }));

        say_hello(&mock, Request::new(hello(json!({}))))
            .await
            .unwrap();
        let status = say_hello(&mock, Request::new(hello(json!({}))))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(mock.state.store().used(None).len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_session_stubs_are_isolated(#[future] mock: Mock) {
        let mock = mock.await;
        mock.stub(json!({
            "service": "Greeter",
            "method": "SayHello",
            "session": "A",
            "input": {"equals": {}},
            "output": {"data": {"message": "session A"}}
        }));

        let status = say_hello(&mock, Request::new(hello(json!({}))))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);

        let mut request = Request::new(hello(json!({})));
        request
            .metadata_mut()
            .insert(SESSION_HEADER, MetadataValue::from_static("A"));
        let response = say_hello(&mock, request).await.unwrap();
        assert_eq!(json_of(response.get_ref())["message"], json!("session A"));
        assert_eq!(mock.state.sessions().len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_server_stream_sends_every_element(#[future] mock: Mock) {
        let mock = mock.await;
        mock.stub(json!({
            "service": "Greeter",
            "method": "StreamHello",
            "input": {"equals": {"name": "Alex"}},
            "output": {"stream": [
                {"message": "one"},
                {"message": "{{ Request.name }} #{{ MessageIndex }}"}
            ]}
        }));

        let method = method("StreamHello");
        let response = client(&mock)
            .await
            .server_streaming(
                Request::new(hello(json!({"name": "Alex"}))),
                path(&method),
                DynamicCodec::new(method.output()),
            )
            .await
            .unwrap();

        let mut stream = response.into_inner();
        let mut replies = Vec::new();
        while let Some(message) = stream.message().await.unwrap() {
            replies.push(json_of(&message)["message"].clone());
        }
        assert_eq!(replies, vec![json!("one"), json!("Alex #1")]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_client_stream_matches_inputs_in_order(#[future] mock: Mock) {
        let mock = mock.await;
        mock.stub(json!({
            "service": "Greeter",
            "method": "CollectHello",
            "inputs": [
                {"equals": {"name": "a"}},
                {"equals": {"name": "b"}}
            ],
            "output": {"data": {"message": "got {{ Requests | length }}"}}
        }));

        let method = method("CollectHello");
        let messages = tokio_stream::iter(vec![hello(json!({"name": "a"})), hello(json!({"name": "b"}))]);
        let response = client(&mock)
            .await
            .client_streaming(
                Request::new(messages),
                path(&method),
                DynamicCodec::new(method.output()),
            )
            .await
            .unwrap();
        assert_eq!(json_of(response.get_ref())["message"], json!("got 2"));

        let calls = mock.state.history().filter_by_method(GREETER, "CollectHello");
        assert_eq!(calls[0].request, json!([{"name": "a"}, {"name": "b"}]));
    }

    #[rstest]
    #[tokio::test]
    async fn test_bidi_answers_each_message(#[future] mock: Mock) {
        let mock = mock.await;
        mock.stub(json!({
            "service": "Greeter",
            "method": "Chat",
            "input": {"contains": {"name": "ping"}},
            "output": {"data": {"message": "pong {{ Request.count }}"}}
        }));

        let method = method("Chat");
        let messages = tokio_stream::iter(vec![
            hello(json!({"name": "ping", "count": 1})),
            hello(json!({"name": "ping", "count": 2})),
        ]);
        let response = client(&mock)
            .await
            .streaming(
                Request::new(messages),
                path(&method),
                DynamicCodec::new(method.output()),
            )
            .await
            .unwrap();

        let mut stream = response.into_inner();
        let mut replies = Vec::new();
        while let Some(message) = stream.message().await.unwrap() {
            replies.push(json_of(&message)["message"].clone());
        }
        assert_eq!(replies, vec![json!("pong 1"), json!("pong 2")]);
        assert_eq!(mock.state.history().filter_by_method(GREETER, "Chat").len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_delay_holds_back_unary_reply(#[future] mock: Mock) {
        let mock = mock.await;
        mock.stub(json!({
            "service": "Greeter",
            "method": "SayHello",
            "input": {"equals": {}},
            "output": {"data": {"message": "late"}, "delay": "200ms"}
        }));

        let started = Instant::now();
        let response = say_hello(&mock, Request::new(hello(json!({}))))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(json_of(response.get_ref())["message"], json!("late"));
    }

    #[rstest]
    #[tokio::test]
    async fn test_delay_holds_back_each_stream_element(#[future] mock: Mock) {
        let mock = mock.await;
        mock.stub(json!({
            "service": "Greeter",
            "method": "StreamHello",
            "input": {"equals": {}},
            "output": {"stream": [{"message": "one"}, {"message": "two"}], "delay": 100}
        }));

        let method = method("StreamHello");
        let started = Instant::now();
        let response = client(&mock)
            .await
            .server_streaming(
                Request::new(hello(json!({}))),
                path(&method),
                DynamicCodec::new(method.output()),
            )
            .await
            .unwrap();

        let mut stream = response.into_inner();
        let mut arrivals = Vec::new();
        while stream.message().await.unwrap().is_some() {
            arrivals.push(started.elapsed());
        }
        assert_eq!(arrivals.len(), 2);
        assert!(arrivals[0] >= Duration::from_millis(100));
        assert!(arrivals[1] >= Duration::from_millis(200));
    }

    #[rstest]
    #[tokio::test]
    async fn test_cancelled_call_is_still_recorded(#[future] mock: Mock) {
        let mock = mock.await;
        let id = mock.stub(json!({
            "service": "Greeter",
            "method": "SayHello",
            "input": {"equals": {}},
            "output": {"data": {"message": "too late"}, "delay": "300ms"},
            "options": {"times": 2}
        }));

        let mut request = Request::new(hello(json!({"name": "Alex"})));
        request.set_timeout(Duration::from_millis(50));
        assert!(say_hello(&mock, request).await.is_err());

        timeout(Duration::from_secs(5), async {
            while mock.state.history().count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("cancelled call was never recorded");

        let calls = mock.state.history().filter_by_method(GREETER, "SayHello");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].stub_id, Some(id));
        assert_eq!(calls[0].error, CANCELLED);
        assert_eq!(calls[0].request, json!({"name": "Alex"}));
        assert_eq!(mock.state.store().used(None).len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_health_reports_registered_services(#[future] mock: Mock) {
        let mock = mock.await;
        let mut health = HealthClient::new(mock.channel().await);

        for service in ["", GREETER] {
            let response = health
                .check(HealthCheckRequest {
                    service: service.to_string(),
                })
                .await
                .unwrap();
            assert_eq!(response.get_ref().status(), ServingStatus::Serving);
        }

        let status = health
            .check(HealthCheckRequest {
                service: "unknown.Service".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }
}
