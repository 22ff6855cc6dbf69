//! Interactive configuration console.
//!
//! Commands mutate a `SchedulerConfig` before the scheduler starts. Every
//! numeric argument accepts `-a` for a value drawn from the legal range.
//! Invalid input prints usage and leaves the previous configuration intact.

use rand::random_range;

use crate::radio::{Protocol, PsMode};
use crate::scheduler::context::{
    SchedulerConfig, MAX_DEADLINE_FACTOR, MAX_PACKET_COUNT, MAX_PERIOD_MS, MAX_THRESHOLD_MS,
    MIN_DEADLINE_FACTOR, MIN_PACKET_COUNT, MIN_PERIOD_MS, MIN_THRESHOLD_MS,
};
use crate::wire::{ClassId, DataType};

const TX_POWER_MIN_RAW: i8 = 8;
const TX_POWER_MAX_RAW: i8 = 84;

/// Process one command line. Returns true when the configuration phase is
/// finished and the scheduler should start.
pub fn process_command(line: &str, config: &mut SchedulerConfig) -> bool {
    let args: Vec<&str> = line.split_whitespace().collect();
    let Some(&command) = args.first() else {
        return false;
    };

    match command {
        "help" => cmd_help(),
        "status" => cmd_status(config),
        "set" => cmd_set_class(&args, config),
        "type" => cmd_type(&args, config),
        "count" => cmd_count(&args, config),
        "threshold" => cmd_threshold(&args, config),
        "reset" => cmd_reset(config),
        "random" => cmd_randomize(config),
        "rpacket" => cmd_rpacket(&args, config),
        "rtype" => cmd_rtype(&args, config),
        "rsize" => cmd_rsize(&args, config),
        "rdeadline" => cmd_rdeadline(&args, config),
        "rburst" => cmd_rburst(&args, config),
        "txpower" => cmd_txpower(&args, config),
        "psmode" => cmd_psmode(&args, config),
        "protocol" => cmd_protocol(&args, config),
        "autotx" => cmd_autotx(&args, config),
        "autotx_interval" => cmd_autotx_interval(&args, config),
        "start" => {
            println!("\nStarting with configuration:");
            cmd_status(config);
            return true;
        }
        other => {
            println!("Unknown command: {}", other);
            cmd_help();
        }
    }
    false
}

fn cmd_help() {
    println!("\nAvailable commands:");
    println!("  help                              - this message");
    println!("  status                            - show current configuration");
    println!("  set <class> <period> <deadline>   - per-class timing, ms or -a");
    println!("  type <class> <datatype>           - int8|int16|int32|float|double");
    println!("  count <class> <n>                 - elements per production event");
    println!("  threshold <ms>                    - deadline processing horizon");
    println!("  reset                             - restore defaults");
    println!("  random                            - randomize all class settings");
    println!("  rpacket on|off [min] [max]        - aperiodic producer + intervals");
    println!("  rtype <datatype>                  - aperiodic packet type");
    println!("  rsize <n>                         - aperiodic element count");
    println!("  rdeadline <ms>                    - aperiodic relative deadline");
    println!("  rburst [on|off] [period] [interval] - burst mode parameters");
    println!("  txpower <v>                       - raw TX power (8..84)");
    println!("  psmode none|min|max               - power-save mode");
    println!("  protocol b|bg|g|bgn|gn            - protocol bitmap");
    println!("  autotx on|off                     - adaptive TX power");
    println!("  autotx_interval <ms>              - adaptation interval");
    println!("  start                             - run with current configuration");
}

fn cmd_status(config: &SchedulerConfig) {
    println!("\nClass configuration:");
    for (i, class) in config.classes.iter().enumerate().take(3) {
        println!(
            "  Class {}: Type={}, Period={} ms, Deadline={} ms, Count={}",
            i + 1,
            class.data_type.name(),
            class.period_ms,
            class.deadline_ms,
            class.count
        );
    }
    println!("\nProcessing threshold: {} ms", config.threshold_ms);

    let random = &config.random;
    println!(
        "\nRandom packets: {}",
        if random.enabled { "ENABLED" } else { "DISABLED" }
    );
    println!(
        "  Interval: {}-{} ms, burst: {} (after {} ms, {} ms cadence)",
        random.min_interval_ms,
        random.max_interval_ms,
        if random.burst_enabled { "on" } else { "off" },
        random.burst_period_ms,
        random.burst_interval_ms
    );
    println!(
        "  Packet: Type={}, Count={}, Deadline={} ms",
        random.data_type.name(),
        random.count,
        config.classes[ClassId::Random.index()].deadline_ms
    );

    let radio = &config.radio;
    println!(
        "\nRadio: txpower={}, psmode={}, protocol={}, autotx={} every {} ms",
        radio.tx_power,
        radio.ps_mode.name(),
        radio.protocol.name(),
        if radio.auto_tx { "on" } else { "off" },
        radio.auto_tx_interval_ms
    );
}

fn parse_class(arg: &str) -> Option<ClassId> {
    match arg.parse::<usize>() {
        Ok(n @ 1..=3) => ClassId::from_index(n - 1),
        _ => {
            println!("Error: class must be between 1 and 3");
            None
        }
    }
}

/// Numeric argument or `-a` for a uniform draw from the range.
fn parse_or_auto(arg: &str, min: u64, max: u64, what: &str) -> Option<u64> {
    if arg == "-a" {
        let value = random_range(min..=max);
        println!("Auto-generated {}: {}", what, value);
        return Some(value);
    }
    match arg.parse::<u64>() {
        Ok(v) if (min..=max).contains(&v) => Some(v),
        Ok(v) => {
            let clamped = v.clamp(min, max);
            println!(
                "Warning: {} {} outside [{}-{}], clamping to {}",
                what, v, min, max, clamped
            );
            Some(clamped)
        }
        Err(_) => {
            println!("Error: invalid {} '{}'", what, arg);
            None
        }
    }
}

fn cmd_set_class(args: &[&str], config: &mut SchedulerConfig) {
    if args.len() < 3 {
        println!("Usage: set <class> <period> <deadline>  (use -a for auto)");
        return;
    }
    let Some(class) = parse_class(args[1]) else {
        return;
    };
    let idx = class.index();

    let Some(period) = parse_or_auto(args[2], MIN_PERIOD_MS, MAX_PERIOD_MS, "period") else {
        return;
    };

    let deadline = if args.len() >= 4 {
        if args[3] == "-a" {
            let factor = MIN_DEADLINE_FACTOR
                + (MAX_DEADLINE_FACTOR - MIN_DEADLINE_FACTOR) * random_range(0.0..1.0);
            let deadline = (period as f64 * factor) as u64;
            println!(
                "Auto-generated deadline: {} ms ({:.1}% of period)",
                deadline,
                factor * 100.0
            );
            deadline
        } else {
            match args[3].parse::<u64>() {
                Ok(deadline) => {
                    let factor = deadline as f64 / period as f64;
                    if !(MIN_DEADLINE_FACTOR..=MAX_DEADLINE_FACTOR).contains(&factor) {
                        println!(
                            "Warning: deadline factor {:.2} outside [{:.1}-{:.1}]",
                            factor, MIN_DEADLINE_FACTOR, MAX_DEADLINE_FACTOR
                        );
                    }
                    deadline
                }
                Err(_) => {
                    println!("Error: invalid deadline '{}'", args[3]);
                    return;
                }
            }
        }
    } else {
        // Period changed without a deadline: scale the old deadline.
        let old = &config.classes[idx];
        (period as f64 * (old.deadline_ms as f64 / old.period_ms.max(1) as f64)) as u64
    };

    let class_cfg = &mut config.classes[idx];
    class_cfg.period_ms = period;
    class_cfg.deadline_ms = deadline;
    println!(
        "Updated Class {}: Period={} ms, Deadline={} ms",
        idx + 1,
        period,
        deadline
    );
}

fn cmd_type(args: &[&str], config: &mut SchedulerConfig) {
    if args.len() < 3 {
        println!("Usage: type <class> <datatype>");
        println!("Available datatypes: int8, int16, int32, float, double");
        return;
    }
    let Some(class) = parse_class(args[1]) else {
        return;
    };
    let Some(data_type) = DataType::parse_name(args[2]) else {
        println!("Error: invalid data type '{}'", args[2]);
        return;
    };
    config.classes[class.index()].data_type = data_type;
    println!("Updated Class {}: Type={}", class.index() + 1, data_type.name());
}

fn cmd_count(args: &[&str], config: &mut SchedulerConfig) {
    if args.len() < 3 {
        println!("Usage: count <class> <value>  (use -a for auto)");
        return;
    }
    let Some(class) = parse_class(args[1]) else {
        return;
    };
    let Some(count) = parse_or_auto(
        args[2],
        MIN_PACKET_COUNT as u64,
        MAX_PACKET_COUNT as u64,
        "count",
    ) else {
        return;
    };
    config.classes[class.index()].count = count as u16;
    println!("Updated Class {} count to {}", class.index() + 1, count);
}

fn cmd_threshold(args: &[&str], config: &mut SchedulerConfig) {
    if args.len() < 2 {
        println!("Usage: threshold <ms>  (use -a for auto)");
        println!("Current threshold: {} ms", config.threshold_ms);
        return;
    }
    let Some(threshold) = parse_or_auto(args[1], MIN_THRESHOLD_MS, MAX_THRESHOLD_MS, "threshold")
    else {
        return;
    };
    config.threshold_ms = threshold;
    println!("Processing threshold set to {} ms", threshold);
}

fn cmd_reset(config: &mut SchedulerConfig) {
    *config = SchedulerConfig::default();
    println!("All settings reset to defaults.");
}

fn cmd_randomize(config: &mut SchedulerConfig) {
    println!("Randomizing class settings:");
    let types = [
        DataType::Int8,
        DataType::Int16,
        DataType::Int32,
        DataType::Float,
        DataType::Double,
    ];
    for idx in 0..3 {
        let period = random_range(MIN_PERIOD_MS..=MAX_PERIOD_MS);
        let factor = MIN_DEADLINE_FACTOR
            + (MAX_DEADLINE_FACTOR - MIN_DEADLINE_FACTOR) * random_range(0.0..1.0);
        let deadline = (period as f64 * factor) as u64;
        let data_type = types[random_range(0..types.len())];
        let count = random_range(MIN_PACKET_COUNT..=MAX_PACKET_COUNT);

        let class = &mut config.classes[idx];
        class.period_ms = period;
        class.deadline_ms = deadline;
        class.data_type = data_type;
        class.count = count;
        println!(
            "  Class {}: Type={}, Period={} ms, Deadline={} ms ({:.1}% of period), Count={}",
            idx + 1,
            data_type.name(),
            period,
            deadline,
            factor * 100.0,
            count
        );
    }
    config.threshold_ms = random_range(MIN_THRESHOLD_MS..=MAX_THRESHOLD_MS);
    println!("  Processing threshold: {} ms", config.threshold_ms);
}

fn cmd_rpacket(args: &[&str], config: &mut SchedulerConfig) {
    if args.len() < 2 {
        println!("Usage: rpacket on|off [min_interval] [max_interval]");
        println!(
            "Current: {} ({}-{} ms)",
            if config.random.enabled { "on" } else { "off" },
            config.random.min_interval_ms,
            config.random.max_interval_ms
        );
        return;
    }
    match args[1] {
        "on" => {
            config.random.enabled = true;
            println!("Random packet generation enabled");
        }
        "off" => {
            config.random.enabled = false;
            println!("Random packet generation disabled");
            return;
        }
        other => {
            println!("Error: expected on|off, got '{}'", other);
            return;
        }
    }

    if args.len() >= 3 {
        if let Some(min) = parse_or_auto(args[2], 100, 10_000, "min interval") {
            config.random.min_interval_ms = min;
        }
    }
    if args.len() >= 4 {
        if let Some(max) = parse_or_auto(args[3], 100, 60_000, "max interval") {
            config.random.max_interval_ms = max;
        }
    }
    if config.random.min_interval_ms >= config.random.max_interval_ms {
        config.random = config.random.validated();
        println!(
            "Warning: min >= max, set max = {} ms",
            config.random.max_interval_ms
        );
    }
}

fn cmd_rtype(args: &[&str], config: &mut SchedulerConfig) {
    if args.len() < 2 {
        println!("Usage: rtype <datatype>");
        println!("Current type: {}", config.random.data_type.name());
        return;
    }
    let Some(data_type) = DataType::parse_name(args[1]) else {
        println!("Error: invalid data type '{}'", args[1]);
        return;
    };
    config.random.data_type = data_type;
    config.classes[ClassId::Random.index()].data_type = data_type;
    println!("Random packet type set to {}", data_type.name());
}

fn cmd_rsize(args: &[&str], config: &mut SchedulerConfig) {
    if args.len() < 2 {
        println!("Usage: rsize <value>  (use -a for auto)");
        println!("Current size: {} elements", config.random.count);
        return;
    }
    let Some(count) = parse_or_auto(
        args[1],
        MIN_PACKET_COUNT as u64,
        MAX_PACKET_COUNT as u64,
        "size",
    ) else {
        return;
    };
    config.random.count = count as u16;
    println!("Random packet size set to {} elements", count);
}

fn cmd_rdeadline(args: &[&str], config: &mut SchedulerConfig) {
    let idx = ClassId::Random.index();
    if args.len() < 2 {
        println!("Usage: rdeadline <ms>  (use -a for auto)");
        println!("Current deadline: {} ms", config.classes[idx].deadline_ms);
        return;
    }
    let Some(deadline) = parse_or_auto(args[1], 500, 3_000, "deadline") else {
        return;
    };
    config.classes[idx].deadline_ms = deadline;
    println!("Random packet deadline set to {} ms", deadline);
}

fn cmd_rburst(args: &[&str], config: &mut SchedulerConfig) {
    if args.len() < 2 {
        println!("Usage: rburst [on|off] <period> <interval>");
        println!(
            "Current: {} (after {} ms, {} ms cadence)",
            if config.random.burst_enabled { "on" } else { "off" },
            config.random.burst_period_ms,
            config.random.burst_interval_ms
        );
        return;
    }

    let mut rest = &args[1..];
    match rest[0] {
        "on" => {
            config.random.burst_enabled = true;
            println!("Burst mode enabled");
            rest = &rest[1..];
        }
        "off" => {
            config.random.burst_enabled = false;
            println!("Burst mode disabled");
            rest = &rest[1..];
        }
        _ => {}
    }

    if !rest.is_empty() {
        if let Some(period) = parse_or_auto(rest[0], 5_000, 20_000, "burst period") {
            config.random.burst_period_ms = period;
        }
    }
    if rest.len() >= 2 {
        if let Some(interval) = parse_or_auto(rest[1], 20, 200, "burst interval") {
            config.random.burst_interval_ms = interval;
        }
    }
}

fn cmd_txpower(args: &[&str], config: &mut SchedulerConfig) {
    if args.len() < 2 {
        println!("Usage: txpower <value>  ({}..{})", TX_POWER_MIN_RAW, TX_POWER_MAX_RAW);
        println!("Current: {}", config.radio.tx_power);
        return;
    }
    match args[1].parse::<i8>() {
        Ok(v) => {
            let clamped = v.clamp(TX_POWER_MIN_RAW, TX_POWER_MAX_RAW);
            if clamped != v {
                println!("Warning: clamping tx power to {}", clamped);
            }
            config.radio.tx_power = clamped;
            println!("TX power set to {}", clamped);
        }
        Err(_) => println!("Error: invalid tx power '{}'", args[1]),
    }
}

fn cmd_psmode(args: &[&str], config: &mut SchedulerConfig) {
    if args.len() < 2 {
        println!("Usage: psmode none|min|max");
        return;
    }
    match PsMode::parse(args[1]) {
        Some(mode) => {
            config.radio.ps_mode = mode;
            println!("Power-save mode set to {}", mode.name());
        }
        None => println!("Error: invalid psmode '{}'", args[1]),
    }
}

fn cmd_protocol(args: &[&str], config: &mut SchedulerConfig) {
    if args.len() < 2 {
        println!("Usage: protocol b|bg|g|bgn|gn");
        return;
    }
    match Protocol::parse(args[1]) {
        Some(protocol) => {
            config.radio.protocol = protocol;
            println!("Protocol set to {}", protocol.name());
        }
        None => println!("Error: invalid protocol '{}'", args[1]),
    }
}

fn cmd_autotx(args: &[&str], config: &mut SchedulerConfig) {
    if args.len() < 2 {
        println!("Usage: autotx on|off");
        return;
    }
    match args[1] {
        "on" => {
            config.radio.auto_tx = true;
            println!("Adaptive TX power enabled");
        }
        "off" => {
            config.radio.auto_tx = false;
            println!("Adaptive TX power disabled");
        }
        other => println!("Error: expected on|off, got '{}'", other),
    }
}

fn cmd_autotx_interval(args: &[&str], config: &mut SchedulerConfig) {
    if args.len() < 2 {
        println!("Usage: autotx_interval <ms>");
        println!("Current: {} ms", config.radio.auto_tx_interval_ms);
        return;
    }
    match args[1].parse::<u64>() {
        Ok(ms) if ms >= 100 => {
            config.radio.auto_tx_interval_ms = ms;
            println!("Adaptation interval set to {} ms", ms);
        }
        _ => println!("Error: interval must be a number >= 100"),
    }
}
