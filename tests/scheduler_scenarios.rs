//! Scenario tests for the batching scheduler: trigger timing, packing
//! geometry, miss handling, and the aperiodic producer, all driven through
//! a mock clock and a frame-capturing mock radio.

use std::sync::Arc;

use linkbatch::clock::{Clock, MockClock};
use linkbatch::radio::{MockRadio, Radio};
use linkbatch::scheduler::batcher::{Batcher, TickOutcome, SCHEDULER_TICK_MS};
use linkbatch::scheduler::context::{
    ClassConfig, RandomConfig, SchedulerConfig, SchedulerContext,
};
use linkbatch::scheduler::producer::{synth_payload, PeriodicProducer, PRODUCER_TICK_MS};
use linkbatch::scheduler::random::RandomProducer;
use linkbatch::util::trace::EventRecorder;
use linkbatch::wire::frame::{parse_frame, EndpointRole, LinkAddresses, ParsedFrame};
use linkbatch::wire::{ClassId, DataType, MAX_TX_SIZE};

const STA_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x01];
const AP_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x02];

struct Harness {
    clock: Arc<MockClock>,
    ctx: Arc<SchedulerContext>,
    radio: MockRadio,
    batcher: Batcher,
    producer: PeriodicProducer,
}

fn harness(config: SchedulerConfig) -> Harness {
    let clock = Arc::new(MockClock::new(0));
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let radio = MockRadio::new();
    let radio_dyn: Arc<dyn Radio> = Arc::new(radio.clone());
    let ctx = SchedulerContext::new(&config, EventRecorder::new());
    let link = LinkAddresses {
        own_mac: STA_MAC,
        bssid: Some(AP_MAC),
    };
    let batcher = Batcher::new(
        ctx.clone(),
        clock_dyn.clone(),
        radio_dyn,
        EndpointRole::Station,
        link,
    );
    let producer = PeriodicProducer::new(ctx.clone(), clock_dyn);
    Harness {
        clock,
        ctx,
        radio,
        batcher,
        producer,
    }
}

/// Step the simulated world to `until_ms`, running the producer every 100 ms
/// and the batcher every 50 ms, the way the task loops would.
fn run_until(h: &mut Harness, until_ms: u64) {
    loop {
        let now = h.clock.now_ms();
        if now >= until_ms {
            break;
        }
        if now % PRODUCER_TICK_MS == 0 {
            h.producer.poll();
        }
        h.batcher.run_tick();
        h.clock.advance(SCHEDULER_TICK_MS);
    }
}

fn parse(frame: &[u8]) -> ParsedFrame<'_> {
    parse_frame(EndpointRole::AccessPoint, AP_MAC, frame).expect("emitted frame must parse")
}

/// Frame invariants: declared size matches the counts, stays within the TX
/// bound, and every declared byte is present.
fn check_frame(parsed: &ParsedFrame<'_>) {
    let header = &parsed.header;
    assert_eq!(
        header.total_size as usize,
        header.expected_payload_len(),
        "total_size must equal sum of class runs"
    );
    assert!(header.total_size as usize <= MAX_TX_SIZE);
    assert_eq!(parsed.payload.len(), header.total_size as usize);
    assert!(!parsed.truncated);
}

fn smoke_config() -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    config.classes[0] = ClassConfig {
        data_type: DataType::Int32,
        period_ms: 3_000,
        deadline_ms: 3_000,
        count: 10,
    };
    config.classes[1] = ClassConfig {
        data_type: DataType::Float,
        period_ms: 5_000,
        deadline_ms: 5_000,
        count: 8,
    };
    config.classes[2] = ClassConfig {
        data_type: DataType::Int16,
        period_ms: 6_000,
        deadline_ms: 6_000,
        count: 6,
    };
    config.threshold_ms = 1_000;
    config
}

#[test]
fn smoke_run_emits_expected_frames() {
    let mut h = harness(smoke_config());
    run_until(&mut h, 7_000);

    let frames = h.radio.sent_frames();
    assert_eq!(frames.len(), 2, "expected two frames in 7 s");

    // First frame: the initial packets of all three classes, triggered when
    // class 1's deadline entered the threshold.
    let first = parse(&frames[0]);
    check_frame(&first);
    assert!((2_000..=3_000).contains(&(first.header.timestamp as u64)));
    assert_eq!(first.header.counts, [10, 8, 6, 0]);

    // Payload is the three class runs in ordinal order, bit-for-bit.
    let mut expected = synth_payload(DataType::Int32, 10);
    expected.extend(synth_payload(DataType::Float, 8));
    expected.extend(synth_payload(DataType::Int16, 6));
    assert_eq!(first.payload, expected.as_slice());

    // Second frame: the 3 s class again plus the 5 s class.
    let second = parse(&frames[1]);
    check_frame(&second);
    assert!((4_000..=5_000).contains(&(second.header.timestamp as u64)));
    assert_eq!(second.header.counts, [10, 8, 0, 0]);

    // processed == emitted source packets + misses (3 + 2 packets, 0 missed)
    let counters = h.ctx.counters();
    assert_eq!(counters.packets_processed, 5);
    assert_eq!(counters.deadline_misses, 0);
    // One "transmission" per non-zero class column per frame.
    assert_eq!(counters.packets_transmitted, 3 + 2);
}

#[test]
fn class_runs_are_ordered_regardless_of_arrival() {
    let mut config = smoke_config();
    config.threshold_ms = 15_000;
    let h = harness(config);

    // Class 2 arrives before class 1.
    let b = synth_payload(DataType::Float, 8);
    h.ctx
        .submit_packet(ClassId::Class2, DataType::Float, 8, b.clone(), 0)
        .unwrap();
    let a = synth_payload(DataType::Int32, 10);
    h.ctx
        .submit_packet(ClassId::Class1, DataType::Int32, 10, a.clone(), 0)
        .unwrap();

    h.clock.set(1);
    assert!(matches!(
        h.batcher.run_tick(),
        TickOutcome::Emitted { sent: true, .. }
    ));

    let frames = h.radio.sent_frames();
    let parsed = parse(&frames[0]);
    check_frame(&parsed);
    assert_eq!(parsed.header.counts, [10, 8, 0, 0]);
    // Class 1's run precedes class 2's even though it arrived later.
    assert_eq!(&parsed.payload[..a.len()], a.as_slice());
    assert_eq!(&parsed.payload[a.len()..], b.as_slice());
}

#[test]
fn expired_packet_is_counted_and_never_emitted() {
    let mut config = smoke_config();
    config.classes[0].deadline_ms = 100;
    let h = harness(config);

    let payload = synth_payload(DataType::Int32, 10);
    h.ctx
        .submit_packet(ClassId::Class1, DataType::Int32, 10, payload, 0)
        .unwrap();

    // No tick happens before t=250.
    h.clock.set(250);
    assert_eq!(h.batcher.run_tick(), TickOutcome::AllMissed);

    let counters = h.ctx.counters();
    assert_eq!(counters.deadline_misses, 1);
    assert_eq!(counters.packets_processed, 1);
    assert!(h.radio.sent_frames().is_empty());
    assert_eq!(h.ctx.queue_lens(), [0, 0, 0, 0]);
}

#[test]
fn low_space_stops_the_whole_pack() {
    let mut config = smoke_config();
    config.classes[0].data_type = DataType::Int8;
    config.threshold_ms = 15_000;
    let h = harness(config);

    // 1340 bytes leave 60 < 100 remaining after packing.
    let big = synth_payload(DataType::Int8, 1_340);
    h.ctx
        .submit_packet(ClassId::Class1, DataType::Int8, 1_340, big, 0)
        .unwrap();
    let small = synth_payload(DataType::Int8, 10);
    h.ctx
        .submit_packet(ClassId::Class1, DataType::Int8, 10, small, 0)
        .unwrap();
    let b = synth_payload(DataType::Float, 8);
    h.ctx
        .submit_packet(ClassId::Class2, DataType::Float, 8, b, 0)
        .unwrap();

    h.clock.set(1);
    h.batcher.run_tick();

    let frames = h.radio.sent_frames();
    assert_eq!(frames.len(), 1);
    let parsed = parse(&frames[0]);
    assert_eq!(parsed.header.counts, [1_340, 0, 0, 0]);
    // The second class-1 packet and the class-2 packet stay queued.
    assert_eq!(h.ctx.queue_lens(), [1, 1, 0, 0]);
}

#[test]
fn exact_fit_fills_one_frame() {
    let mut config = smoke_config();
    config.classes[0].data_type = DataType::Int8;
    config.threshold_ms = 15_000;
    let h = harness(config);

    // 700 + 400 + 300 = 1400 = MAX_TX_SIZE.
    h.ctx
        .submit_packet(
            ClassId::Class1,
            DataType::Int8,
            700,
            synth_payload(DataType::Int8, 700),
            0,
        )
        .unwrap();
    h.ctx
        .submit_packet(
            ClassId::Class2,
            DataType::Float,
            100,
            synth_payload(DataType::Float, 100),
            0,
        )
        .unwrap();
    h.ctx
        .submit_packet(
            ClassId::Class3,
            DataType::Int16,
            150,
            synth_payload(DataType::Int16, 150),
            0,
        )
        .unwrap();

    h.clock.set(1);
    let outcome = h.batcher.run_tick();
    assert_eq!(
        outcome,
        TickOutcome::Emitted {
            sent: true,
            total_size: MAX_TX_SIZE as u16
        }
    );
    assert_eq!(h.ctx.queue_lens(), [0, 0, 0, 0]);
    check_frame(&parse(&h.radio.sent_frames()[0]));
}

#[test]
fn item_that_does_not_fit_stays_queued() {
    let mut config = smoke_config();
    config.classes[0].data_type = DataType::Int8;
    config.threshold_ms = 15_000;
    let h = harness(config);

    h.ctx
        .submit_packet(
            ClassId::Class1,
            DataType::Int8,
            700,
            synth_payload(DataType::Int8, 700),
            0,
        )
        .unwrap();
    h.ctx
        .submit_packet(
            ClassId::Class1,
            DataType::Int8,
            12,
            synth_payload(DataType::Int8, 12),
            0,
        )
        .unwrap();
    h.ctx
        .submit_packet(
            ClassId::Class2,
            DataType::Float,
            100,
            synth_payload(DataType::Float, 100),
            0,
        )
        .unwrap();
    h.ctx
        .submit_packet(
            ClassId::Class3,
            DataType::Int16,
            150,
            synth_payload(DataType::Int16, 150),
            0,
        )
        .unwrap();

    h.clock.set(1);
    h.batcher.run_tick();

    // 700 + 12 + 400 packed; the 300-byte class-3 run no longer fits and is
    // put back at its queue head.
    let parsed_frames = h.radio.sent_frames();
    let parsed = parse(&parsed_frames[0]);
    assert_eq!(parsed.header.counts, [712, 100, 0, 0]);
    assert_eq!(h.ctx.queue_lens(), [0, 0, 1, 0]);

    // It goes out intact on the next triggered tick.
    h.clock.set(100);
    h.batcher.run_tick();
    let parsed_frames = h.radio.sent_frames();
    let parsed = parse(&parsed_frames[1]);
    assert_eq!(parsed.header.counts, [0, 0, 150, 0]);
}

#[test]
fn expired_head_that_does_not_fit_stays_queued() {
    let mut config = smoke_config();
    config.classes[0].data_type = DataType::Int8;
    config.classes[1].deadline_ms = 100;
    config.threshold_ms = 15_000;
    let h = harness(config);

    // 1200 bytes of class 1 leave 200 bytes of room.
    h.ctx
        .submit_packet(
            ClassId::Class1,
            DataType::Int8,
            1_200,
            synth_payload(DataType::Int8, 1_200),
            0,
        )
        .unwrap();
    // 400 bytes of class 2, already expired by the time the batcher runs.
    h.ctx
        .submit_packet(
            ClassId::Class2,
            DataType::Float,
            100,
            synth_payload(DataType::Float, 100),
            0,
        )
        .unwrap();

    h.clock.set(300);
    h.batcher.run_tick();

    // The oversized expired head is never dequeued this tick: no miss is
    // charged and it stays at its queue head.
    let frames = h.radio.sent_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(parse(&frames[0]).header.counts, [1_200, 0, 0, 0]);
    assert_eq!(h.ctx.counters().deadline_misses, 0);
    assert_eq!(h.ctx.queue_lens(), [0, 1, 0, 0]);

    // Next tick the buffer resets, the head fits, and only then is it
    // examined and counted as a miss.
    h.clock.set(350);
    assert_eq!(h.batcher.run_tick(), TickOutcome::AllMissed);
    assert_eq!(h.ctx.counters().deadline_misses, 1);
    assert_eq!(h.ctx.queue_lens(), [0, 0, 0, 0]);
    assert_eq!(h.radio.sent_frames().len(), 1);
}

#[test]
fn zero_threshold_with_future_deadline_emits_nothing() {
    let mut config = smoke_config();
    config.threshold_ms = 0;
    let h = harness(config);

    h.ctx
        .submit_packet(
            ClassId::Class1,
            DataType::Int32,
            10,
            synth_payload(DataType::Int32, 10),
            0,
        )
        .unwrap();

    // Deadline is 3000; with no horizon nothing is urgent yet.
    h.clock.set(100);
    assert_eq!(h.batcher.run_tick(), TickOutcome::NotUrgent);
    assert!(h.radio.sent_frames().is_empty());
}

#[test]
fn transmit_failure_leaves_transmitted_count_unchanged() {
    let mut config = smoke_config();
    config.threshold_ms = 15_000;
    let h = harness(config);
    h.radio.set_send_failure(true);

    h.ctx
        .submit_packet(
            ClassId::Class1,
            DataType::Int32,
            10,
            synth_payload(DataType::Int32, 10),
            0,
        )
        .unwrap();
    h.clock.set(1);
    assert!(matches!(
        h.batcher.run_tick(),
        TickOutcome::Emitted { sent: false, .. }
    ));
    assert_eq!(h.ctx.counters().packets_transmitted, 0);
    // The frame is lost, not retried.
    assert_eq!(h.ctx.queue_lens(), [0, 0, 0, 0]);
}

#[test]
fn idle_queues_do_nothing() {
    let h = harness(smoke_config());
    h.clock.set(1_000);
    assert_eq!(h.batcher.run_tick(), TickOutcome::Idle);
}

#[test]
fn burst_mode_shapes_the_interarrival_distribution() {
    let clock = Arc::new(MockClock::new(0));
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let config = SchedulerConfig::default();
    let ctx = SchedulerContext::new(&config, EventRecorder::new());
    let random = RandomConfig {
        enabled: true,
        min_interval_ms: 500,
        max_interval_ms: 1_500,
        burst_period_ms: 5_000,
        burst_interval_ms: 50,
        burst_enabled: true,
        count: 10,
        data_type: DataType::Int32,
    };
    let mut producer = RandomProducer::new(ctx, clock_dyn, random);

    let mut fires = Vec::new();
    while clock.now_ms() < 15_000 {
        clock.advance(10);
        if producer.poll() {
            fires.push(clock.now_ms());
        }
    }

    // Burst window: [5000, 10000). Fires fully inside are 50 ms apart (plus
    // poll granularity); fires fully outside keep the uniform spacing.
    let in_window = |t: u64| (5_000..10_000).contains(&t);
    let mut burst_gaps = 0;
    for pair in fires.windows(2) {
        let gap = pair[1] - pair[0];
        if in_window(pair[0]) && in_window(pair[1]) {
            assert!(gap <= 60, "burst gap {} too large", gap);
            burst_gaps += 1;
        } else if !in_window(pair[0]) && !in_window(pair[1]) && pair[1] < 15_000 {
            assert!(gap >= 500, "normal gap {} too small", gap);
        }
    }
    assert!(
        burst_gaps > 50,
        "expected a dense burst window, saw {} burst gaps",
        burst_gaps
    );
}
