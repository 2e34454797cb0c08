//! Integration tests for in-order range streaming.
//!
//! Run with: `cargo test --test streaming_integration`

use std::sync::Arc;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cloudraid::encode::StripeEncoder;
use cloudraid::transport::{Fault, ScriptedTransport};
use cloudraid::{start_streaming, StripeLayout, TransferConfig, TransferTicket};

fn striped(size: usize, sector: u64, seed: u64) -> (Vec<u8>, TransferTicket, Arc<ScriptedTransport>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; size];
    rng.fill(&mut data[..]);

    let layout = StripeLayout::new(6, sector, size as u64).unwrap();
    let parts = StripeEncoder::new(layout)
        .split(&data)
        .unwrap()
        .into_iter()
        .map(Bytes::from)
        .collect();
    let transport = Arc::new(ScriptedTransport::new(parts));
    let ticket = TransferTicket::new("streamed", size as u64, transport.urls()).with_sector_size(sector);
    (data, ticket, transport)
}

#[tokio::test]
async fn test_stream_returns_exact_slices() {
    let cases: [(u64, u64); 6] = [
        (17, 100),
        (0, 10_000),
        (9_990, 10),
        (319, 1),
        (320, 320),
        (4_321, 5_679),
    ];
    for (offset, length) in cases {
        let (data, ticket, transport) = striped(10_000, 64, offset);
        let stream =
            start_streaming(ticket, transport, offset, length, TransferConfig::new()).unwrap();
        let bytes = stream.read_to_end().await.unwrap();
        let (start, end) = (offset as usize, (offset + length) as usize);
        assert_eq!(bytes, &data[start..end], "{}+{}", offset, length);
    }
}

#[tokio::test]
async fn test_empty_stream_completes() {
    let (_, ticket, transport) = striped(10_000, 64, 1);
    let stream = start_streaming(ticket, Arc::clone(&transport), 500, 0, TransferConfig::new())
        .unwrap();
    let report = stream.finish().await.unwrap();
    assert!(report.is_complete());
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_stream_survives_lost_source() {
    let (data, ticket, transport) = striped(300_000, 16, 2);
    transport.fail_always(2, Fault::Status(404));
    let stream =
        start_streaming(ticket, transport, 12_345, 250_000, TransferConfig::new()).unwrap();
    let bytes = stream.read_to_end().await.unwrap();
    assert_eq!(bytes, &data[12_345..262_345]);
}

#[tokio::test]
async fn test_stream_requests_stay_near_the_range() {
    let (_, ticket, transport) = striped(400_000, 16, 3);
    let stream = start_streaming(
        ticket,
        Arc::clone(&transport),
        200_000,
        1_000,
        TransferConfig::new(),
    )
    .unwrap();
    stream.read_to_end().await.unwrap();

    // 200_000 bytes of file sit on lines below 2_500, i.e. part offset 40_000.
    for request in transport.requests() {
        assert!(request.range.start >= 40_000, "{:?}", request);
        assert!(request.range.end <= 40_000 + 1_000, "{:?}", request);
    }
}

#[tokio::test]
async fn test_cancelled_stream_stops() {
    let (data, ticket, transport) = striped(300_000, 16, 4);
    let mut stream =
        start_streaming(ticket, transport, 0, 300_000, TransferConfig::new()).unwrap();
    let first = stream.next_chunk().await.unwrap();
    assert_eq!(&first[..], &data[..first.len()]);
    stream.cancel();

    // Whatever was already produced still arrives, in order.
    let mut delivered = first.to_vec();
    while let Some(chunk) = stream.next_chunk().await {
        delivered.extend_from_slice(&chunk);
    }
    assert_eq!(delivered, &data[..delivered.len()]);
    let report = stream.finish().await.unwrap();
    assert_eq!(report.contiguous_bytes, delivered.len() as u64);
}
