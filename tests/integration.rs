//! End-to-end tests driving a real `Runtime` over a loopback TCP socket
//! against a hand-rolled fake host, covering the literal S1-S6 scenarios
//! and the quantified properties they're drawn from.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tether::codec::{read_frame, write_frame, PostcardCodec};
use tether::context::{RequestContext, SignalContext, ToolContext};
use tether::envelope::{
    CustomRequest, CustomResponse, Envelope, InternalToolInfo, Method, NormalRequestInfo,
    OperationType, RequestEnvelope, RequestInfo, ResponseEnvelope, Signal, SignalEnvelope,
    StreamCtrlOp, StreamCtrlRequest, StreamCtrlResponsePayload, StreamData, StreamEventVariant,
    ToolInvocationRequest, ToolInvocationResponse,
};
use tether::error::RuntimeError;
use tether::{Runtime, RuntimeConfig};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

/// Polls rather than using `Notify`, so a release fired before the
/// handler starts waiting is never silently dropped.
async fn await_release(flag: &AtomicBool) {
    while !flag.load(Ordering::Acquire) {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

const SECRET: u64 = 0xA11CE;
const MAX_PAYLOAD: usize = 1 << 20;

async fn accept_with_handshake(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut buf = [0u8; 8];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(u64::from_le_bytes(buf), SECRET);
    stream
}

async fn send_env(stream: &mut TcpStream, env: &Envelope) {
    let body = PostcardCodec::encode_envelope(env).unwrap();
    write_frame(stream, &body).await.unwrap();
}

async fn recv_env(stream: &mut TcpStream) -> Option<Envelope> {
    read_frame(stream, MAX_PAYLOAD)
        .await
        .unwrap()
        .map(|body| PostcardCodec::decode_envelope(&body).unwrap())
}

async fn listener_and_config() -> (TcpListener, RuntimeConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, RuntimeConfig::new(addr.to_string(), SECRET))
}

#[tokio::test]
async fn s1_custom_echo() {
    let (listener, config) = listener_and_config().await;

    let host = tokio::spawn(async move {
        let mut stream = accept_with_handshake(&listener).await;
        let payload = tether::codec::encode_payload(&CustomRequest {
            method: "echo".to_string(),
            request_info: RequestInfo::Normal(NormalRequestInfo {
                params_str: "hello".to_string(),
            }),
        })
        .unwrap();
        send_env(
            &mut stream,
            &Envelope::Request(RequestEnvelope {
                id: 7,
                method: Method::Custom,
                payload,
            }),
        )
        .await;

        let resp = match recv_env(&mut stream).await.unwrap() {
            Envelope::Response(r) => r,
            other => panic!("expected a response, got {other:?}"),
        };
        assert_eq!(resp.id, 7);
        assert_eq!(resp.code, 0);
        let data: CustomResponse = tether::codec::decode_payload(&resp.payload).unwrap();
        assert_eq!(data.data, "hello");
    });

    let runtime = Runtime::connect(config).await.unwrap();
    runtime
        .registry()
        .register_method("echo", false, |ctx: RequestContext| async move {
            Ok::<_, RuntimeError>(ctx.params)
        })
        .unwrap();
    let run = tokio::spawn(async move { runtime.run().await });

    host.await.unwrap();
    // the fake host never sends Terminate in this test; drop the connection instead.
    run.abort();
}

#[tokio::test]
async fn s2_unknown_method() {
    let (listener, config) = listener_and_config().await;

    let host = tokio::spawn(async move {
        let mut stream = accept_with_handshake(&listener).await;
        let payload = tether::codec::encode_payload(&CustomRequest {
            method: "nope".to_string(),
            request_info: RequestInfo::Normal(NormalRequestInfo {
                params_str: "hello".to_string(),
            }),
        })
        .unwrap();
        send_env(
            &mut stream,
            &Envelope::Request(RequestEnvelope {
                id: 7,
                method: Method::Custom,
                payload,
            }),
        )
        .await;

        let resp = match recv_env(&mut stream).await.unwrap() {
            Envelope::Response(r) => r,
            other => panic!("expected a response, got {other:?}"),
        };
        assert_eq!(resp.id, 7);
        assert_eq!(resp.code, -32601);
        assert_eq!(resp.message.as_deref(), Some("Method not found"));
    });

    let runtime = Runtime::connect(config).await.unwrap();
    let run = tokio::spawn(async move { runtime.run().await });

    host.await.unwrap();
    run.abort();
}

#[tokio::test]
async fn s3_tool_invocation() {
    let (listener, config) = listener_and_config().await;

    let host = tokio::spawn(async move {
        let mut stream = accept_with_handshake(&listener).await;
        let payload = tether::codec::encode_payload(&ToolInvocationRequest {
            tool_info: InternalToolInfo { tool_id: 42 },
            params: vec![("a".to_string(), "123".to_string()), ("b".to_string(), "456".to_string())],
        })
        .unwrap();
        send_env(
            &mut stream,
            &Envelope::Request(RequestEnvelope {
                id: 9,
                method: Method::ToolInvoke,
                payload,
            }),
        )
        .await;

        let resp = match recv_env(&mut stream).await.unwrap() {
            Envelope::Response(r) => r,
            other => panic!("expected a response, got {other:?}"),
        };
        assert_eq!(resp.id, 9);
        assert_eq!(resp.code, 0);
        let data: ToolInvocationResponse = tether::codec::decode_payload(&resp.payload).unwrap();
        assert_eq!(data.result, "579");
    });

    let runtime = Runtime::connect(config).await.unwrap();
    runtime
        .registry()
        .register_tool(42, |ctx: ToolContext| async move {
            let mut a = 0i64;
            let mut b = 0i64;
            for (k, v) in &ctx.params {
                match k.as_str() {
                    "a" => a = v.parse().unwrap(),
                    "b" => b = v.parse().unwrap(),
                    _ => {}
                }
            }
            Ok::<_, RuntimeError>((a + b).to_string())
        })
        .unwrap();
    let run = tokio::spawn(async move { runtime.run().await });

    host.await.unwrap();
    run.abort();
}

#[tokio::test]
async fn s4_stream_lifecycle() {
    let (listener, config) = listener_and_config().await;

    let host = tokio::spawn(async move {
        let mut stream = accept_with_handshake(&listener).await;

        // New
        let new_req = match recv_env(&mut stream).await.unwrap() {
            Envelope::Request(r) if r.method == Method::StreamCtrl => r,
            other => panic!("expected a StreamCtrl request, got {other:?}"),
        };
        let ctrl: StreamCtrlRequest = tether::codec::decode_payload(&new_req.payload).unwrap();
        assert_eq!(ctrl.op, StreamCtrlOp::New);
        assert_eq!(ctrl.class_name.as_deref(), Some("rt-asr"));
        let assigned_stream_id = 5u32;
        let reply_payload = tether::codec::encode_payload(&StreamCtrlResponsePayload {
            request_id: ctrl.request_id,
            stream_id: assigned_stream_id,
        })
        .unwrap();
        send_env(
            &mut stream,
            &Envelope::Response(ResponseEnvelope {
                id: new_req.id,
                code: 0,
                message: None,
                payload: reply_payload,
            }),
        )
        .await;

        // three operation events
        for expected_seq in 0..3u32 {
            let sig = match recv_env(&mut stream).await.unwrap() {
                Envelope::Signal(s) if s.signal == Signal::StreamData => s,
                other => panic!("expected a StreamData signal, got {other:?}"),
            };
            let data: StreamData = tether::codec::decode_payload(&sig.payload).unwrap();
            assert_eq!(data.stream_id, assigned_stream_id);
            assert_eq!(data.sequence_id, expected_seq);
            assert!(!data.is_final);
            match data.variant {
                StreamEventVariant::OperationEvent { name, op, .. } => {
                    assert_eq!(name, "rt-asr");
                    assert_eq!(op, OperationType::Append);
                }
                other => panic!("expected an operation event, got {other:?}"),
            }
        }

        // Close
        let close_req = match recv_env(&mut stream).await.unwrap() {
            Envelope::Request(r) if r.method == Method::StreamCtrl => r,
            other => panic!("expected a StreamCtrl close request, got {other:?}"),
        };
        let ctrl: StreamCtrlRequest = tether::codec::decode_payload(&close_req.payload).unwrap();
        assert_eq!(ctrl.op, StreamCtrlOp::Close);
        assert_eq!(ctrl.stream_id, Some(assigned_stream_id));
        let reply_payload = tether::codec::encode_payload(&StreamCtrlResponsePayload {
            request_id: ctrl.request_id,
            stream_id: assigned_stream_id,
        })
        .unwrap();
        send_env(
            &mut stream,
            &Envelope::Response(ResponseEnvelope {
                id: close_req.id,
                code: 0,
                message: None,
                payload: reply_payload,
            }),
        )
        .await;
    });

    let runtime = Arc::new(Runtime::connect(config).await.unwrap());
    let run = tokio::spawn({
        let runtime = runtime.clone();
        let runtime_for_run = runtime.clone();
        async move {
            let streams = runtime.streams().clone();
            let run_task = tokio::spawn(async move { runtime_for_run.run().await });

            let sid = streams
                .create_stream("rt-asr", |_ctx: SignalContext| async move {})
                .await
                .unwrap();
            assert_eq!(sid, 5);

            for _ in 0..3 {
                streams
                    .send_operation(sid, "rt-asr", OperationType::Append, vec![1, 2, 3], false)
                    .await
                    .unwrap();
            }

            streams.close_stream(sid).await.unwrap();
            run_task.abort();
        }
    });

    host.await.unwrap();
    run.abort();
}

#[tokio::test]
async fn s5_too_many_requests() {
    let (listener, mut config) = listener_and_config().await;
    config.max_inflight_requests = 2;

    let release = Arc::new(AtomicBool::new(false));
    let release_for_host = release.clone();
    let started = Arc::new(AtomicUsize::new(0));
    let started_for_handler = started.clone();

    let host = tokio::spawn(async move {
        let mut stream = accept_with_handshake(&listener).await;

        for id in [1u32, 2u32] {
            let payload = tether::codec::encode_payload(&CustomRequest {
                method: "slow".to_string(),
                request_info: RequestInfo::Normal(NormalRequestInfo {
                    params_str: String::new(),
                }),
            })
            .unwrap();
            send_env(
                &mut stream,
                &Envelope::Request(RequestEnvelope { id, method: Method::Custom, payload }),
            )
            .await;
        }

        // wait until both slow handlers have actually started before sending the 3rd
        while started.load(Ordering::Acquire) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let payload = tether::codec::encode_payload(&CustomRequest {
            method: "slow".to_string(),
            request_info: RequestInfo::Normal(NormalRequestInfo { params_str: String::new() }),
        })
        .unwrap();
        send_env(
            &mut stream,
            &Envelope::Request(RequestEnvelope { id: 3, method: Method::Custom, payload }),
        )
        .await;

        let resp = match recv_env(&mut stream).await.unwrap() {
            Envelope::Response(r) => r,
            other => panic!("expected a response, got {other:?}"),
        };
        assert_eq!(resp.id, 3);
        assert_eq!(resp.code, -32000);

        // release the two blocked handlers, then confirm a 4th request succeeds
        release_for_host.store(true, Ordering::Release);

        let mut remaining = vec![1u32, 2u32];
        while !remaining.is_empty() {
            let resp = match recv_env(&mut stream).await.unwrap() {
                Envelope::Response(r) => r,
                other => panic!("expected a response, got {other:?}"),
            };
            assert_eq!(resp.code, 0);
            remaining.retain(|id| *id != resp.id);
        }

        let payload = tether::codec::encode_payload(&CustomRequest {
            method: "slow".to_string(),
            request_info: RequestInfo::Normal(NormalRequestInfo { params_str: String::new() }),
        })
        .unwrap();
        send_env(
            &mut stream,
            &Envelope::Request(RequestEnvelope { id: 4, method: Method::Custom, payload }),
        )
        .await;
        let resp = match recv_env(&mut stream).await.unwrap() {
            Envelope::Response(r) => r,
            other => panic!("expected a response, got {other:?}"),
        };
        assert_eq!(resp.id, 4);
        assert_eq!(resp.code, 0);
    });

    let runtime = Runtime::connect(config).await.unwrap();
    runtime
        .registry()
        .register_method("slow", false, move |_ctx: RequestContext| {
            let release = release.clone();
            started_for_handler.fetch_add(1, Ordering::AcqRel);
            async move {
                await_release(&release).await;
                Ok::<_, RuntimeError>(String::new())
            }
        })
        .unwrap();
    let run = tokio::spawn(async move { runtime.run().await });

    host.await.unwrap();
    run.abort();
}

#[tokio::test]
async fn s6_terminate_drains_inflight_then_closes() {
    let (listener, config) = listener_and_config().await;

    let release = Arc::new(AtomicBool::new(false));
    let release_for_host = release.clone();

    let host = tokio::spawn(async move {
        let mut stream = accept_with_handshake(&listener).await;

        for id in [1u32, 2u32, 3u32] {
            let payload = tether::codec::encode_payload(&CustomRequest {
                method: "slow".to_string(),
                request_info: RequestInfo::Normal(NormalRequestInfo { params_str: String::new() }),
            })
            .unwrap();
            send_env(
                &mut stream,
                &Envelope::Request(RequestEnvelope { id, method: Method::Custom, payload }),
            )
            .await;
        }

        send_env(
            &mut stream,
            &Envelope::Signal(SignalEnvelope { signal: Signal::Terminate, payload: Vec::new() }),
        )
        .await;

        // give the runtime a moment to observe Terminate before releasing the handlers
        tokio::time::sleep(Duration::from_millis(20)).await;
        release_for_host.store(true, Ordering::Release);

        let mut remaining = vec![1u32, 2u32, 3u32];
        while !remaining.is_empty() {
            let resp = match recv_env(&mut stream).await.unwrap() {
                Envelope::Response(r) => r,
                other => panic!("expected a response, got {other:?}"),
            };
            assert_eq!(resp.code, 0);
            remaining.retain(|id| *id != resp.id);
        }

        let terminator = read_frame(&mut stream, MAX_PAYLOAD).await.unwrap();
        assert!(terminator.is_none(), "expected a zero-length terminator frame");
    });

    let runtime = Runtime::connect(config).await.unwrap();
    runtime
        .registry()
        .register_method("slow", false, move |_ctx: RequestContext| {
            let release = release.clone();
            async move {
                await_release(&release).await;
                Ok::<_, RuntimeError>(String::new())
            }
        })
        .unwrap();
    runtime.run().await.unwrap();

    host.await.unwrap();
}
