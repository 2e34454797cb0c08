//! Integration tests for whole-file striped transfers.
//!
//! These tests drive complete sessions against in-memory parts and verify:
//! - Byte-exact output in every fetch strategy
//! - Tolerance of any single lost source, and failure on two
//! - Backoff on throttling and exclusion of hanging sources
//! - In-order delivery when chunks complete in random order
//!
//! Run with: `cargo test --test transfer_integration`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cloudraid::encode::StripeEncoder;
use cloudraid::transport::{Fault, ScriptedTransport};
use cloudraid::{
    ErrorKind, FetchStrategy, FileSink, MemorySink, StripeLayout, TransferConfig,
    TransferSession, TransferState, TransferTicket,
};

// ============================================================================
// Helper Functions
// ============================================================================

/// Random file content, striped over six in-memory parts.
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
    let ticket = TransferTicket::new(format!("file-{}", seed), size as u64, transport.urls())
        .with_sector_size(sector);
    (data, ticket, transport)
}

/// Small requests so every transfer is split into many chunks.
fn chunked_config() -> TransferConfig {
    TransferConfig::new()
        .with_initial_request_bytes(1024)
        .with_max_request_bytes(4096)
        .with_rotation_block_bytes(4096)
}

async fn download(
    ticket: TransferTicket,
    transport: Arc<ScriptedTransport>,
    config: TransferConfig,
) -> (cloudraid::TransferReport, Vec<u8>) {
    let session = TransferSession::new(ticket, transport, config).unwrap();
    let mut sink = MemorySink::new();
    let report = session.run(&mut sink).await.unwrap();
    (report, sink.into_inner())
}

// ============================================================================
// Healthy Transfers
// ============================================================================

#[tokio::test]
async fn test_download_in_every_strategy() {
    for strategy in [
        FetchStrategy::Auto,
        FetchStrategy::AllSources,
        FetchStrategy::Rotating,
    ] {
        let (data, ticket, transport) = striped(200_000, 16, 1);
        let config = chunked_config().with_fetch_strategy(strategy);
        let (report, output) = download(ticket, transport, config).await;
        assert!(report.is_complete(), "{:?}", strategy);
        assert_eq!(report.contiguous_bytes, 200_000);
        assert!(report.failed_sources.is_empty());
        assert_eq!(output, data, "{:?}", strategy);
    }
}

#[tokio::test]
async fn test_small_file_leaves_parity_untouched() {
    let (data, ticket, transport) = striped(3_000, 16, 2);
    let (report, output) = download(ticket, Arc::clone(&transport), chunked_config()).await;
    assert!(report.is_complete());
    assert_eq!(output, data);
    assert!(transport.requests_for(0).is_empty());
}

#[tokio::test]
async fn test_file_shorter_than_one_line() {
    let (data, ticket, transport) = striped(37, 16, 3);
    let (report, output) = download(ticket, transport, TransferConfig::new()).await;
    assert!(report.is_complete());
    assert_eq!(output, data);
}

#[tokio::test]
async fn test_download_to_file() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let path = temp_dir.path().join("download.bin");
    let (data, ticket, transport) = striped(120_000, 64, 4);

    let session = TransferSession::new(ticket, transport, chunked_config()).unwrap();
    let mut sink = FileSink::create(&path).await.unwrap();
    let report = session.run(&mut sink).await.unwrap();
    drop(sink);

    assert!(report.is_complete());
    assert_eq!(std::fs::read(&path).unwrap(), data);
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let (_, ticket, transport) = striped(150_000, 16, 5);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_callback = Arc::clone(&seen);

    let session = TransferSession::new(ticket, transport, chunked_config())
        .unwrap()
        .with_progress(Box::new(move |completed, contiguous| {
            seen_in_callback.lock().unwrap().push((completed, contiguous));
        }));
    let mut sink = MemorySink::new();
    session.run(&mut sink).await.unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    for pair in seen.windows(2) {
        assert!(pair[1].1 >= pair[0].1);
    }
    assert!(seen.iter().all(|&(completed, contiguous)| completed >= contiguous));
    assert_eq!(seen.last().unwrap().1, 150_000);
}

// ============================================================================
// Source Failures
// ============================================================================

#[tokio::test]
async fn test_any_single_source_can_be_missing() {
    for missing in 0..6 {
        let (data, ticket, transport) = striped(200_000, 16, 10 + missing as u64);
        transport.fail_always(missing, Fault::Status(404));
        let config = chunked_config().with_fetch_strategy(FetchStrategy::Rotating);
        let (report, output) = download(ticket, transport, config).await;
        assert!(report.is_complete(), "source {} missing", missing);
        assert_eq!(report.failed_sources, vec![missing]);
        assert_eq!(output, data, "source {} missing", missing);
    }
}

#[tokio::test]
async fn test_two_missing_sources_are_fatal() {
    let (_, ticket, transport) = striped(200_000, 16, 20);
    transport.fail_always(2, Fault::Status(404));
    transport.fail_always(4, Fault::Status(410));
    let config = chunked_config().with_fetch_strategy(FetchStrategy::Rotating);

    let session = TransferSession::new(ticket, transport, config).unwrap();
    let mut sink = MemorySink::new();
    let failure = session.run(&mut sink).await.unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::ReconstructionImpossible);
    assert!(failure.contiguous_bytes < 200_000);
    assert_eq!(failure.contiguous_bytes, sink.data().len() as u64);
    let token = failure.resume_token.expect("failed transfers keep a token");
    assert_eq!(token.contiguous_bytes, failure.contiguous_bytes);

    let causes: Vec<String> = failure.source_errors.iter().map(|e| e.to_string()).collect();
    assert_eq!(
        causes,
        vec![
            "source 2 returned HTTP 404 (terminal)".to_string(),
            "source 4 returned HTTP 410 (terminal)".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_source_is_parked_as_spare() {
    let (data, ticket, transport) = striped(300_000, 16, 35);
    for source in 0..6 {
        let pause = if source == 3 {
            Duration::from_secs(5)
        } else {
            Duration::from_millis(10)
        };
        transport.fail_always(source, Fault::Delay(pause));
    }

    // Rotating mode needs source 3 for most blocks, so without parking the
    // output would wait on its five-second answers.
    let config = chunked_config()
        .with_fetch_strategy(FetchStrategy::Rotating)
        .with_max_connections(12)
        .with_request_timeout(Duration::from_secs(60))
        .with_hang_timeout(Duration::from_secs(60))
        .with_slow_source_ratio(Some(4.0))
        .with_slow_source_min_bytes(2048);
    let session = TransferSession::new(ticket, Arc::clone(&transport), config).unwrap();
    let mut sink = MemorySink::new();
    let report = session.run(&mut sink).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(sink.into_inner(), data);
    assert!(report.failed_sources.is_empty());
    assert!(report.elapsed < Duration::from_secs(5));
    assert!(transport.requests_for(3).len() <= 2);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_sources_recover() {
    let (data, ticket, transport) = striped(200_000, 16, 30);
    for _ in 0..3 {
        transport.push_fault(1, Fault::Status(503));
    }
    transport.push_fault(3, Fault::Status(429));
    transport.push_fault(3, Fault::Disconnect);
    transport.push_fault(5, Fault::Timeout);

    let config = chunked_config().with_fetch_strategy(FetchStrategy::AllSources);
    let (report, output) = download(ticket, Arc::clone(&transport), config).await;
    assert!(report.is_complete());
    assert!(report.failed_sources.is_empty());
    assert_eq!(output, data);
    assert!(transport.requests_for(1).len() > 3);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_source_is_excluded() {
    let (data, ticket, transport) = striped(200_000, 16, 40);
    transport.fail_always(2, Fault::Hang);
    let config = chunked_config()
        .with_fetch_strategy(FetchStrategy::Rotating)
        .with_hang_timeout(Duration::from_secs(2))
        .with_request_timeout(Duration::from_secs(60));

    let (report, output) = download(ticket, transport, config).await;
    assert!(report.is_complete());
    assert_eq!(report.failed_sources, vec![2]);
    assert_eq!(output, data);
}

#[tokio::test(start_paused = true)]
async fn test_source_exhausting_retries_is_absorbed() {
    let (data, ticket, transport) = striped(200_000, 16, 50);
    transport.fail_always(3, Fault::Status(503));
    let config = chunked_config()
        .with_fetch_strategy(FetchStrategy::Rotating)
        .with_retry_policy(cloudraid::health::RetryPolicy::exponential(3));

    let (report, output) = download(ticket, transport, config).await;
    assert!(report.is_complete());
    assert_eq!(report.failed_sources, vec![3]);
    assert_eq!(output, data);
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_randomly_ordered_chunks_are_delivered_in_order() {
    // 64-byte chunks over ~10.7k bytes per part: about a thousand requests.
    let (data, ticket, transport) = striped(53_000, 16, 60);
    let mut rng = StdRng::seed_from_u64(61);
    for source in 0..6 {
        for _ in 0..200 {
            let pause = Duration::from_millis(rng.random_range(0..50));
            transport.push_fault(source, Fault::Delay(pause));
        }
    }
    let config = TransferConfig::new()
        .with_fetch_strategy(FetchStrategy::AllSources)
        .with_initial_request_bytes(64)
        .with_max_request_bytes(64)
        .with_max_outstanding_per_source(4)
        .with_max_connections(24);

    let (report, output) = download(ticket, Arc::clone(&transport), config).await;
    assert_eq!(report.state, TransferState::Completed);
    assert_eq!(output, data);
    assert!(transport.requests().len() >= 900);
}
