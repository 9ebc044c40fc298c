//! Performance benchmarks for the call bridge gateway
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use callbridge_gateway::core::audio::{AudioCodecAdapter, AudioFormat};
use callbridge_gateway::core::bridge::AudioFrameBuffer;
use callbridge_gateway::core::dispatch::{
    ActionHandler, FunctionCallDispatcher, FunctionCallRequest,
};
use callbridge_gateway::core::realtime::{ClientEvent, ToolDefinition, decode_ai_event};
use callbridge_gateway::core::telephony::{TelephonyOutbound, decode_telephony_event};

/// Benchmark mu-law to PCM16 conversion across frame sizes
///
/// 160 bytes is one 20ms telephony frame; the larger sizes model batched
/// reprocessing after a network stall.
fn bench_codec_telephony_to_ai(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_telephony_to_ai");
    group.measurement_time(Duration::from_secs(5));

    for &size in &[160usize, 800, 8000] {
        let frame = vec![0x7Fu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("mulaw_to_pcm24k", size), &frame, |b, f| {
            b.iter(|| {
                AudioCodecAdapter::convert(
                    black_box(f),
                    AudioFormat::MulawPcm8k,
                    AudioFormat::LinearPcm24k,
                )
            });
        });
    }

    group.finish();
}

/// Benchmark PCM16 to mu-law conversion across delta sizes
fn bench_codec_ai_to_telephony(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_ai_to_telephony");
    group.measurement_time(Duration::from_secs(5));

    // 960 bytes is the delta matching one telephony frame; 9600 is a typical
    // burst from the AI service.
    for &size in &[960usize, 9600, 48000] {
        let delta = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("pcm24k_to_mulaw", size), &delta, |b, d| {
            b.iter(|| {
                AudioCodecAdapter::convert(
                    black_box(d),
                    AudioFormat::LinearPcm24k,
                    AudioFormat::MulawPcm8k,
                )
            });
        });
    }

    group.finish();
}

/// Benchmark telephony frame decoding and outbound serialization
fn bench_telephony_protocol(c: &mut Criterion) {
    let mut group = c.benchmark_group("telephony_protocol");
    group.measurement_time(Duration::from_secs(5));

    let media = json!({
        "event": "media",
        "track": "inbound",
        "chunk": 42,
        "timestamp": 840,
        "payload": BASE64.encode(vec![0x7Fu8; 160]),
    })
    .to_string();
    let start = r#"{"event":"start","streamSid":"MZ0123456789abcdef","callSid":"CA0123456789abcdef","customParameters":{"customer_id":"cust_42","direction":"inbound"}}"#;
    let stop = r#"{"event":"stop","callSid":"CA0123456789abcdef"}"#;

    group.throughput(Throughput::Bytes(media.len() as u64));
    group.bench_with_input(BenchmarkId::new("decode_media", media.len()), &media, |b, m| {
        b.iter(|| decode_telephony_event(black_box(m)));
    });

    group.bench_function("decode_start", |b| {
        b.iter(|| decode_telephony_event(black_box(start)));
    });

    group.bench_function("decode_stop", |b| {
        b.iter(|| decode_telephony_event(black_box(stop)));
    });

    let payload = vec![0x7Fu8; 160];
    let outbound = TelephonyOutbound::media("MZ0123456789abcdef", &payload);
    group.bench_function("serialize_outbound_media", |b| {
        b.iter(|| black_box(&outbound).to_json());
    });

    group.finish();
}

/// Benchmark AI realtime event decoding and client event serialization
fn bench_ai_protocol(c: &mut Criterion) {
    let mut group = c.benchmark_group("ai_protocol");
    group.measurement_time(Duration::from_secs(5));

    let audio_delta = json!({
        "type": "response.audio.delta",
        "response_id": "resp_0123456789",
        "item_id": "item_0123456789",
        "output_index": 0,
        "content_index": 0,
        "delta": BASE64.encode(vec![0u8; 960]),
    })
    .to_string();
    let transcript_delta = r#"{"type":"response.audio_transcript.delta","response_id":"resp_0123456789","item_id":"item_0123456789","output_index":0,"content_index":0,"delta":"and your order ships tomorrow"}"#;
    let function_done = r#"{"type":"response.function_call_arguments.done","response_id":"resp_0123456789","item_id":"item_0123456789","output_index":0,"call_id":"call_abc123","name":"lookup_order","arguments":"{\"order_id\":\"A-1001\"}"}"#;

    group.throughput(Throughput::Bytes(audio_delta.len() as u64));
    group.bench_with_input(
        BenchmarkId::new("decode_audio_delta", audio_delta.len()),
        &audio_delta,
        |b, m| {
            b.iter(|| decode_ai_event(black_box(m)));
        },
    );

    group.bench_function("decode_transcript_delta", |b| {
        b.iter(|| decode_ai_event(black_box(transcript_delta)));
    });

    group.bench_function("decode_function_call_done", |b| {
        b.iter(|| decode_ai_event(black_box(function_done)));
    });

    let pcm = vec![0u8; 960];
    group.bench_function("serialize_audio_append", |b| {
        b.iter(|| serde_json::to_string(&ClientEvent::audio_append(black_box(&pcm))));
    });

    group.finish();
}

/// Benchmark the bounded staging buffer under steady flow and under eviction
fn bench_frame_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_buffer");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("push_pop_steady", |b| {
        let mut buffer = AudioFrameBuffer::new(50);
        let frame = vec![0u8; 960];
        b.iter(|| {
            buffer.push(black_box(frame.clone()));
            buffer.pop()
        });
    });

    group.bench_function("push_at_capacity", |b| {
        let mut buffer = AudioFrameBuffer::new(50);
        let frame = vec![0u8; 960];
        for _ in 0..50 {
            buffer.push(frame.clone());
        }
        b.iter(|| buffer.push(black_box(frame.clone())));
    });

    group.finish();
}

struct LookupOrderHandler;

#[async_trait]
impl ActionHandler for LookupOrderHandler {
    fn name(&self) -> &str {
        "lookup_order"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "lookup_order",
            "Look up an order by id",
            json!({"type": "object", "properties": {"order_id": {"type": "string"}}}),
        )
    }

    async fn execute(&self, arguments: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        Ok(json!({"order_id": arguments["order_id"], "status": "shipped"}))
    }
}

/// Benchmark function call dispatch: the registered path and the unknown-name
/// rejection path
fn bench_function_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("function_dispatch");
    group.measurement_time(Duration::from_secs(5));

    let mut dispatcher = FunctionCallDispatcher::new(Duration::from_secs(10));
    dispatcher.register(Arc::new(LookupOrderHandler));

    group.bench_function("dispatch_registered", |b| {
        b.to_async(&rt).iter(|| async {
            dispatcher
                .dispatch(black_box(FunctionCallRequest {
                    name: "lookup_order".to_string(),
                    arguments: r#"{"order_id":"A-1001"}"#.to_string(),
                    correlation_id: "call_bench".to_string(),
                }))
                .await
        });
    });

    group.bench_function("dispatch_unknown_function", |b| {
        b.to_async(&rt).iter(|| async {
            dispatcher
                .dispatch(black_box(FunctionCallRequest {
                    name: "no_such_function".to_string(),
                    arguments: "{}".to_string(),
                    correlation_id: "call_bench".to_string(),
                }))
                .await
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_codec_telephony_to_ai,
    bench_codec_ai_to_telephony,
    bench_telephony_protocol,
    bench_ai_protocol,
    bench_frame_buffer,
    bench_function_dispatch,
);
criterion_main!(benches);
