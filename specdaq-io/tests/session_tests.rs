use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use specdaq_io::{ListModeFile, PipelineConfig, Session};
use specdaq_pixie::builder::{words_to_bytes, RecordBuilder};
use specdaq_pixie::{ChannelBlock, DecoderConfig, EventHeader, ListFormat};
use specdaq_sink::{create_sink, Metadata, Sink};
use tempfile::NamedTempFile;

const EVENTS_PER_RECORD: u16 = 4;
const RECORDS: u16 = 6;

fn block(trigger_time: u16, energy: u16) -> ChannelBlock {
    ChannelBlock {
        trigger_time,
        energy,
        ..ChannelBlock::default()
    }
}

/// Every event carries channel 0 at 0x0A00 and channel 1 at 0x1400; every
/// record ends with a channel-0-only event.
fn write_dump() -> NamedTempFile {
    let mut words = Vec::new();
    for r in 0..RECORDS {
        let mut builder = RecordBuilder::new(ListFormat::Compressed, 0).time(0, r, 0);
        for e in 0..EVENTS_PER_RECORD {
            builder = builder.event(
                EventHeader {
                    pattern: 0x0F00,
                    time_hi: r,
                    time_lo: e * 0x1000,
                },
                &[(0, block(e * 0x1000, 0x0A00)), (1, block(e * 0x1000, 0x1400))],
            );
        }
        builder = builder.event(
            EventHeader {
                pattern: 0x0F00,
                time_hi: r,
                time_lo: 0xF000,
            },
            &[(0, block(0xF000, 0x0A00))],
        );
        words.extend(builder.words());
    }
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&words_to_bytes(&words)).unwrap();
    file.flush().unwrap();
    file
}

fn coinc_sink(buffered: bool) -> Arc<dyn Sink> {
    create_sink(
        Metadata::new("coinc", 2)
            .with_channels(&[0, 1])
            .with_bits(8)
            .with_buffered(buffered),
    )
    .unwrap()
}

#[test]
fn test_file_session_fills_histograms() {
    let dump = write_dump();
    let file = ListModeFile::open(dump.path()).unwrap();
    let decoder = DecoderConfig::pixie4_defaults();
    // Small spills so the queues cycle several times.
    let config = PipelineConfig::default()
        .with_queue_depth(1)
        .with_spill_words(64);

    let coinc = coinc_sink(false);
    let single = create_sink(Metadata::new("ch0", 1).with_channels(&[0]).with_bits(8)).unwrap();

    let source = file.spills(&decoder, &config);
    let summary = Session::run(
        source,
        decoder,
        vec![Arc::clone(&coinc), Arc::clone(&single)],
        &config,
    )
    .unwrap();

    let pairs = u64::from(RECORDS * EVENTS_PER_RECORD);
    let singles = u64::from(RECORDS);
    assert!(!summary.stopped);
    assert_eq!(summary.discarded, 0);
    assert_eq!(summary.produced, summary.delivered);
    assert!(summary.produced > 3);
    assert_eq!(summary.hits as u64, pairs * 2 + singles);

    assert_eq!(coinc.data_at(&[10, 20]), pairs);
    assert_eq!(coinc.data_at(&[10, 0]), singles);
    assert_eq!(coinc.metadata().total_count, pairs + singles);
    assert_eq!(single.data_at(&[10]), pairs + singles);
}

#[test]
fn test_reads_during_session() {
    let dump = write_dump();
    let file = ListModeFile::open(dump.path()).unwrap();
    let decoder = DecoderConfig::pixie4_defaults();
    let config = PipelineConfig::default().with_spill_words(32);
    let coinc = coinc_sink(true);

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let coinc = Arc::clone(&coinc);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut last = 0;
            while !done.load(Ordering::Acquire) {
                for entry in coinc.data_range(&[]) {
                    if entry.coords == [10, 20] {
                        assert!(entry.count >= last);
                        last = entry.count;
                    }
                }
                thread::yield_now();
            }
            last
        })
    };

    let session = Session::start(
        file.spills(&decoder, &config),
        decoder,
        vec![Arc::clone(&coinc)],
        &config,
    )
    .unwrap();
    let summary = session.join().unwrap();
    done.store(true, Ordering::Release);
    let seen = reader.join().unwrap();

    let pairs = u64::from(RECORDS * EVENTS_PER_RECORD);
    assert!(seen <= pairs);
    assert_eq!(coinc.data_at(&[10, 20]), pairs);
    assert!(summary.delivered > 0);
}

#[test]
fn test_stop_before_data_discards() {
    let dump = write_dump();
    let file = ListModeFile::open(dump.path()).unwrap();
    let decoder = DecoderConfig::pixie4_defaults();
    let config = PipelineConfig::default();
    let coinc = coinc_sink(false);

    let session = Session::start(
        file.spills(&decoder, &config),
        decoder,
        vec![Arc::clone(&coinc)],
        &config,
    )
    .unwrap();
    session.stop();
    let summary = session.join().unwrap();

    assert!(summary.stopped);
    assert_eq!(summary.produced, summary.delivered + summary.discarded);
    // Whatever got through was flushed.
    let total = coinc.metadata().total_count;
    assert_eq!(
        coinc.data_at(&[10, 20]) + coinc.data_at(&[10, 0]),
        total
    );
}
