//! Round-trip tests for negotiated response compression: whatever body the
//! client sends up must come back byte-identical after decoding the
//! server's compressed response.

use std::io::Read;
use std::sync::Once;
use std::time::Duration;

use braid_async::{Barrier, WaitOutcome};
use braid_http::client::{Client, ClientOptions};
use braid_http::endpoint::{Endpoint, EndpointOptions};
use braid_http::handler::make_handler;
use braid_http::protocol::{Request, Response};
use http::{HeaderValue, StatusCode};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).try_init();
    });
}

/// Deterministic pseudo-random payload; poorly compressible on purpose.
fn random_body(len: usize) -> Vec<u8> {
    let mut state: u64 = 0x243f_6a88_85a3_08d3;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

/// Server that echoes the request body back under the client's best
/// accepted encoding.
fn start_echo_server() -> Endpoint {
    init_logging();
    let mut server = Endpoint::new("127.0.0.1:0".parse().unwrap());
    server
        .init(EndpointOptions::new().max_request_size(20 * 1024 * 1024).max_response_size(20 * 1024 * 1024))
        .unwrap();
    server.set_handler(make_handler(|request: &Request, mut writer| {
        let encoding = request.best_accept_encoding();
        writer.set_compression(encoding);
        let _ = writer.send(StatusCode::OK, request.body().clone());
    }));
    server.serve().unwrap();
    server
}

fn fetch_compressed(server: &Endpoint, accept_encoding: &str, body: &[u8]) -> Response {
    let mut client = Client::new();
    client.init(ClientOptions::default()).unwrap();

    let response = client
        .post(&format!("localhost:{}", server.port().unwrap()))
        .header(http::header::ACCEPT_ENCODING, HeaderValue::from_str(accept_encoding).unwrap())
        .body(body.to_vec())
        .timeout(Duration::from_secs(10))
        .send();

    let outcome = Barrier::new(response).wait_for(Duration::from_secs(10));
    client.shutdown();

    match outcome {
        WaitOutcome::Resolved(resp) => resp,
        other => panic!("expected response, got {other:?}"),
    }
}

fn content_encoding_of(resp: &Response) -> Option<String> {
    resp.headers()
        .get(http::header::CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

#[test]
fn gzip_round_trip() {
    let mut server = start_echo_server();
    let original = random_body(1024);

    let resp = fetch_compressed(&server, "gzip", &original);
    server.shutdown();

    assert_eq!(resp.code(), StatusCode::OK);
    assert_eq!(content_encoding_of(&resp).as_deref(), Some("gzip"));
    assert_ne!(&resp.body()[..], &original[..]);

    let mut decoder = flate2::read::GzDecoder::new(&resp.body()[..]);
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).unwrap();
    assert_eq!(decoded, original);
}

#[test]
fn deflate_round_trip() {
    let mut server = start_echo_server();
    let original = random_body(1024);

    let resp = fetch_compressed(&server, "deflate", &original);
    server.shutdown();

    assert_eq!(resp.code(), StatusCode::OK);
    assert_eq!(content_encoding_of(&resp).as_deref(), Some("deflate"));
    assert_ne!(&resp.body()[..], &original[..]);

    let mut decoder = flate2::read::ZlibDecoder::new(&resp.body()[..]);
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).unwrap();
    assert_eq!(decoded, original);
}

#[test]
fn zstd_round_trip() {
    let mut server = start_echo_server();
    let original = random_body(64 * 1024);

    let resp = fetch_compressed(&server, "zstd", &original);
    server.shutdown();

    assert_eq!(content_encoding_of(&resp).as_deref(), Some("zstd"));
    let decoded = zstd::stream::decode_all(&resp.body()[..]).unwrap();
    assert_eq!(decoded, original);
}

#[test]
fn brotli_round_trip() {
    let mut server = start_echo_server();
    let original = random_body(8 * 1024);

    let resp = fetch_compressed(&server, "br", &original);
    server.shutdown();

    assert_eq!(content_encoding_of(&resp).as_deref(), Some("br"));

    let mut decoder = brotli::Decompressor::new(&resp.body()[..], 4096);
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).unwrap();
    assert_eq!(decoded, original);
}

#[test]
fn no_accept_encoding_means_identity() {
    let mut server = start_echo_server();
    let original = random_body(1024);

    let mut client = Client::new();
    client.init(ClientOptions::default()).unwrap();
    let response = client
        .post(&format!("localhost:{}", server.port().unwrap()))
        .body(original.clone())
        .timeout(Duration::from_secs(10))
        .send();

    let outcome = Barrier::new(response).wait_for(Duration::from_secs(10));
    client.shutdown();
    server.shutdown();

    let resp = match outcome {
        WaitOutcome::Resolved(resp) => resp,
        other => panic!("expected response, got {other:?}"),
    };
    assert_eq!(content_encoding_of(&resp), None);
    assert_eq!(&resp.body()[..], &original[..]);
}

#[test]
fn equally_weighted_encodings_break_ties_deterministically() {
    let mut server = start_echo_server();
    let original = random_body(1024);

    // gzip beats deflate; zstd beats everything it is listed with
    let resp = fetch_compressed(&server, "deflate, gzip", &original);
    assert_eq!(content_encoding_of(&resp).as_deref(), Some("gzip"));

    let resp = fetch_compressed(&server, "gzip, deflate, zstd", &original);
    assert_eq!(content_encoding_of(&resp).as_deref(), Some("zstd"));

    server.shutdown();
}
