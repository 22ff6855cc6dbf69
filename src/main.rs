//! Station/AP simulation entry point.
//!
//! Runs the configuration console on stdin, then brings up the full
//! station-side scheduler (periodic producer, aperiodic producer, batcher,
//! TX-power controller) against a loopback radio whose frames are consumed
//! by an AP-side receive pipeline in the same process. Statistics are
//! printed on shutdown; the event trace lands in `data/trace.csv`.

use std::fs::create_dir_all;
use std::io::{stdin, stdout, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use linkbatch::clock::{Clock, SystemClock};
use linkbatch::console::process_command;
use linkbatch::radio::txpower::TxPowerController;
use linkbatch::radio::{LoopbackRadio, PowerLevel, Radio};
use linkbatch::receiver::Receiver;
use linkbatch::scheduler::batcher::Batcher;
use linkbatch::scheduler::context::{SchedulerConfig, SchedulerContext};
use linkbatch::scheduler::producer::PeriodicProducer;
use linkbatch::scheduler::random::RandomProducer;
use linkbatch::util::trace::{calculate_stats, EventRecorder};
use linkbatch::wire::frame::{EndpointRole, LinkAddresses};

const DEFAULT_RUN_SECS: u64 = 30;
const STA_MAC: [u8; 6] = [0x02, 0x4C, 0x42, 0x00, 0x00, 0x01];
const AP_MAC: [u8; 6] = [0x02, 0x4C, 0x42, 0x00, 0x00, 0xFE];

fn main() {
    env_logger::init();

    let run_secs = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RUN_SECS);

    println!("==================================================");
    println!("    linkbatch - packet batching scheduler");
    println!("==================================================");
    println!("Configure the scheduler, then enter 'start'.");
    println!("Type 'help' to view available commands.\n");

    let mut config = SchedulerConfig::default();
    let stdin = stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("config> ");
        let _ = stdout().flush();
        match lines.next() {
            Some(Ok(line)) => {
                if process_command(&line, &mut config) {
                    break;
                }
            }
            Some(Err(e)) => {
                error!("stdin error: {}", e);
                break;
            }
            None => {
                // EOF (piped input): run with whatever was configured.
                println!("\nEOF on stdin, starting.");
                break;
            }
        }
    }

    run_simulation(config, run_secs);
}

fn run_simulation(config: SchedulerConfig, run_secs: u64) {
    info!("=== linkbatch simulation start ({} s) ===", run_secs);

    let recorder = EventRecorder::new();
    create_dir_all("data").ok();
    let exporter = recorder.start_exporter("data/trace.csv".into());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let running = Arc::new(AtomicBool::new(true));

    let (radio, frames_rx) = LoopbackRadio::channel(64);
    radio.set_power(PowerLevel::from_raw(config.radio.tx_power));
    let radio_dyn: Arc<dyn Radio> = radio.clone();

    let ctx = SchedulerContext::new(&config, recorder.clone());
    let link = LinkAddresses {
        own_mac: STA_MAC,
        bssid: Some(AP_MAC),
    };

    // AP-side receive pipeline draining the loopback channel.
    let receiver = Arc::new(Receiver::new(
        EndpointRole::AccessPoint,
        AP_MAC,
        clock.clone(),
        recorder.clone(),
    ));
    let receiver_handle = {
        let receiver = receiver.clone();
        let running = running.clone();
        thread::spawn(move || receiver.run(frames_rx, &running))
    };

    // Batcher gets the highest scheduler priority.
    let batcher_handle = {
        let batcher = Batcher::new(
            ctx.clone(),
            clock.clone(),
            radio_dyn.clone(),
            EndpointRole::Station,
            link,
        );
        let running = running.clone();
        thread::Builder::new()
            .name("batcher".into())
            .spawn_with_priority(ThreadPriority::Max, move |_| batcher.run(&running))
            .expect("failed to spawn batcher thread")
    };

    let producer_handle = {
        let mut producer = PeriodicProducer::new(ctx.clone(), clock.clone());
        let running = running.clone();
        thread::Builder::new()
            .name("producer".into())
            .spawn(move || producer.run(&running))
            .expect("failed to spawn producer thread")
    };

    let random_handle = if config.random.enabled {
        let mut producer = RandomProducer::new(ctx.clone(), clock.clone(), config.random);
        let running = running.clone();
        Some(
            thread::Builder::new()
                .name("random-producer".into())
                .spawn(move || producer.run(&running))
                .expect("failed to spawn random producer thread"),
        )
    } else {
        None
    };

    let txpower_handle = {
        let mut controller = TxPowerController::new(
            radio_dyn.clone(),
            config.radio.auto_tx_interval_ms,
            config.radio.auto_tx,
            recorder.clone(),
        );
        let running = running.clone();
        thread::Builder::new()
            .name("txpower".into())
            .spawn(move || controller.run(&running))
            .expect("failed to spawn txpower thread")
    };

    thread::sleep(Duration::from_secs(run_secs));

    info!("time's up, shutting down");
    running.store(false, Ordering::Release);

    let _ = batcher_handle.join();
    let _ = producer_handle.join();
    if let Some(handle) = random_handle {
        let _ = handle.join();
    }
    let _ = txpower_handle.join();
    let _ = receiver_handle.join();

    recorder.stop_exporter();
    let _ = exporter.join();

    print_summary(&ctx, &receiver);
    info!("=== linkbatch simulation finished ===");
}

fn print_summary(ctx: &SchedulerContext, receiver: &Receiver) {
    let counters = ctx.counters();
    let lens = ctx.queue_lens();
    println!("\nScheduler statistics:");
    println!("  Packets processed:   {}", counters.packets_processed);
    println!("  Packets transmitted: {}", counters.packets_transmitted);
    println!("  Deadline misses:     {}", counters.deadline_misses);
    println!("  Queue drops:         {}", counters.queue_drops);
    println!(
        "  Queue lengths:       class1={} class2={} class3={} random={}",
        lens[0], lens[1], lens[2], lens[3]
    );

    let stats = receiver.stats();
    println!("\nReceiver statistics:");
    println!("  Packets received: {}", stats.packets_received);
    println!("  Data packets:     {}", stats.data_packets);
    println!("  Error packets:    {}", stats.error_packets);
    if let Some(latency) = calculate_stats(&stats.latency_ms) {
        println!(
            "  Latency ms:       min={} max={} avg={:.2} ({} samples)",
            latency.min, latency.max, latency.mean, latency.count
        );
    }
    println!("\nEvent trace written to data/trace.csv");
}
