//! Integration tests for cancelling and resuming transfers.
//!
//! A first session is cancelled part-way through; a second session started
//! from its resume token must complete the output byte-for-byte without
//! requesting anything below the line the first session stopped in.
//!
//! Run with: `cargo test --test resume_integration`

use std::sync::Arc;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cloudraid::encode::StripeEncoder;
use cloudraid::transport::ScriptedTransport;
use cloudraid::{
    FileResumeStore, FileSink, MemoryResumeStore, MemorySink, RaidError, ResumeStore,
    ResumeToken, StripeLayout, TransferConfig, TransferSession, TransferState, TransferTicket,
};

const FILE_SIZE: usize = 200_000;

// ============================================================================
// Helper Functions
// ============================================================================

struct Fixture {
    data: Vec<u8>,
    parts: Vec<Bytes>,
    ticket: TransferTicket,
    layout: StripeLayout,
}

fn fixture(sector: u64, seed: u64) -> Fixture {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; FILE_SIZE];
    rng.fill(&mut data[..]);

    let layout = StripeLayout::new(6, sector, FILE_SIZE as u64).unwrap();
    let parts: Vec<Bytes> = StripeEncoder::new(layout)
        .split(&data)
        .unwrap()
        .into_iter()
        .map(Bytes::from)
        .collect();
    let urls = ScriptedTransport::new(parts.clone()).urls();
    let ticket = TransferTicket::new("resumable", FILE_SIZE as u64, urls).with_sector_size(sector);
    Fixture {
        data,
        parts,
        ticket,
        layout,
    }
}

/// A short read-ahead keeps each advance small, so cancellation lands well
/// before the end of the file.
fn config() -> TransferConfig {
    TransferConfig::new()
        .with_initial_request_bytes(512)
        .with_max_request_bytes(1024)
        .with_read_ahead_bytes(4096)
}

/// Runs a session over `range` that cancels itself once `cut` bytes are
/// contiguous.
async fn run_until(
    fx: &Fixture,
    range: std::ops::Range<u64>,
    cut: u64,
    store: Arc<dyn ResumeStore>,
) -> (ResumeToken, Vec<u8>) {
    let transport = Arc::new(ScriptedTransport::new(fx.parts.clone()));
    let session = TransferSession::new(fx.ticket.clone(), transport, config())
        .unwrap()
        .with_range(range.clone())
        .unwrap()
        .with_resume_store(store);
    let cancel = session.cancellation_token();
    let session = session.with_progress(Box::new(move |_, contiguous| {
        if contiguous >= cut {
            cancel.cancel();
        }
    }));

    let mut sink = MemorySink::with_origin(range.start);
    let report = session.run(&mut sink).await.unwrap();
    assert_eq!(report.state, TransferState::Cancelled);
    let token = report.resume_token.expect("cancelled transfers keep a token");
    assert_eq!(token.contiguous_bytes, range.start + sink.data().len() as u64);
    (token, sink.into_inner())
}

/// Resumes from `token` with a fresh transport; returns the new output and
/// the transport for request inspection.
async fn resume(fx: &Fixture, token: ResumeToken) -> (Vec<u8>, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::new(fx.parts.clone()));
    let ticket = fx.ticket.clone().with_urls(transport.urls());
    let origin = token.contiguous_bytes;
    let session =
        TransferSession::resume(ticket, token, Arc::clone(&transport), config()).unwrap();
    let mut sink = MemorySink::with_origin(origin);
    let report = session.run(&mut sink).await.unwrap();
    assert!(report.is_complete());
    (sink.into_inner(), transport)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_resume_is_byte_identical_at_any_cut() {
    for (i, cut) in [1u64, 20_000, 74_001, 160_000].into_iter().enumerate() {
        let fx = fixture(16, 100 + i as u64);
        let store = Arc::new(MemoryResumeStore::new());
        let (token, mut output) = run_until(&fx, 0..FILE_SIZE as u64, cut, store.clone()).await;
        assert!(token.contiguous_bytes >= cut);
        assert!(token.contiguous_bytes < FILE_SIZE as u64);
        assert_eq!(store.token(), Some(token.clone()));

        let stopped_at = token.contiguous_bytes;
        let (rest, transport) = resume(&fx, token).await;
        output.extend_from_slice(&rest);
        assert_eq!(output, fx.data, "cut at {}", cut);

        let floor = fx.layout.line_containing(stopped_at).unwrap() * fx.layout.sector_size();
        for request in transport.requests() {
            assert!(
                request.range.start >= floor,
                "source {} asked for {:?} below part offset {}",
                request.source,
                request.range,
                floor
            );
        }
    }
}

#[tokio::test]
async fn test_resume_of_sub_range() {
    let fx = fixture(64, 200);
    let range = 1_000..150_000;
    let store = Arc::new(MemoryResumeStore::new());
    let (token, mut output) = run_until(&fx, range.clone(), 60_000, store).await;
    assert_eq!(token.range(), range);

    let (rest, _) = resume(&fx, token).await;
    output.extend_from_slice(&rest);
    assert_eq!(output, &fx.data[1_000..150_000]);
}

#[tokio::test]
async fn test_resume_through_files() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let output_path = temp_dir.path().join("file.bin");
    let token_path = temp_dir.path().join("file.bin.resume");
    let fx = fixture(16, 300);

    // First pass writes straight to disk.
    let store = Arc::new(FileResumeStore::new(&token_path));
    let transport = Arc::new(ScriptedTransport::new(fx.parts.clone()));
    let session = TransferSession::new(fx.ticket.clone(), transport, config())
        .unwrap()
        .with_resume_store(store.clone());
    let cancel = session.cancellation_token();
    let session = session.with_progress(Box::new(move |_, contiguous| {
        if contiguous >= 100_000 {
            cancel.cancel();
        }
    }));
    let mut sink = FileSink::create(&output_path).await.unwrap();
    let report = session.run(&mut sink).await.unwrap();
    drop(sink);
    assert_eq!(report.state, TransferState::Cancelled);

    // Second pass picks the token up from disk.
    let token = store.load().unwrap().expect("token persisted");
    assert_eq!(Some(&token), report.resume_token.as_ref());
    let transport = Arc::new(ScriptedTransport::new(fx.parts.clone()));
    let session = TransferSession::resume(fx.ticket.clone(), token, transport, config())
        .unwrap()
        .with_resume_store(store.clone());
    let mut sink = FileSink::open_existing(&output_path).await.unwrap();
    let report = session.run(&mut sink).await.unwrap();
    drop(sink);

    assert!(report.is_complete());
    assert_eq!(std::fs::read(&output_path).unwrap(), fx.data);
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn test_token_for_other_geometry_is_rejected() {
    let fx = fixture(16, 400);
    let store = Arc::new(MemoryResumeStore::new());
    let (token, _) = run_until(&fx, 0..FILE_SIZE as u64, 50_000, store).await;

    let other = fixture(64, 400);
    let transport = Arc::new(ScriptedTransport::new(other.parts.clone()));
    let err = TransferSession::resume(other.ticket.clone(), token, transport, config())
        .err()
        .expect("sector size differs");
    assert!(matches!(err, RaidError::ResumeMismatch(_)));
}
