use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

use framegate::media::{IceCandidate, MediaEvent};
use framegate::signaling::{ClientMessage, ServerMessage};

const START: &str = r#"{"id":"start","sdpOffer":"v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:0\r\na=rtpmap:96 VP8/90000\r\n"}"#;
const CANDIDATE: &str = r#"{"id":"onIceCandidate","candidate":{"candidate":"candidate:1 1 UDP 2122260223 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;

/// inbound parsing benchmark
fn bench_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Parsing");
    group.throughput(Throughput::Elements(1));

    group.bench_function("start", |b| {
        b.iter(|| {
            let msg = ClientMessage::parse(black_box(START)).unwrap();
            black_box(msg)
        })
    });

    group.bench_function("onIceCandidate", |b| {
        b.iter(|| {
            let msg = ClientMessage::parse(black_box(CANDIDATE)).unwrap();
            black_box(msg)
        })
    });

    group.bench_function("unknown id", |b| {
        b.iter(|| black_box(ClientMessage::parse(black_box(r#"{"id":"nope"}"#)).is_err()))
    });

    group.finish();
}

/// outbound event serialization benchmark
fn bench_relay_encoding(c: &mut Criterion) {
    let candidate = IceCandidate {
        candidate: "candidate:1 1 UDP 2122260223 127.0.0.1 40000 typ host".to_string(),
        sdp_mid: "0".to_string(),
        sdp_m_line_index: 0,
    };

    let mut group = c.benchmark_group("Relay");
    group.throughput(Throughput::Elements(1));

    group.bench_function("iceCandidate", |b| {
        b.iter(|| {
            let msg = ServerMessage::from(MediaEvent::CandidateFound(black_box(candidate.clone())));
            black_box(serde_json::to_string(&msg).unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_parsing, bench_relay_encoding);
criterion_main!(benches);
