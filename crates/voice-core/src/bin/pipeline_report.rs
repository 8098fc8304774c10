//! Pipeline report - builds both voice chains on simulated hardware
//!
//! Loads the pipeline config, stacks the uplink and downlink chains on a
//! simulated 48 kHz stereo sound card, starts a call and prints what each
//! layer reports.
//!
//! ## Usage
//!
//! ```text
//! pipeline-report [CONFIG.yaml]
//! ```
//!
//! Without an argument the default config location is used. Set
//! `RUST_LOG=debug` to see the dispatcher and rewind traffic.

use std::path::PathBuf;

use anyhow::{Context, Result};

use voice_core::config::{default_config_path, load_config, PipelineConfig};
use voice_core::device::{DeviceConfig, DeviceFlags, DeviceState};
use voice_core::events::PipelineEvent;
use voice_core::hardware::SimulatedHardware;
use voice_core::queue::SideInfoQueue;
use voice_core::{Direction, Pipeline, PipelineServices, SampleSpec};

/// Latency the simulated sound card reports (usec)
const HW_LATENCY_USEC: u64 = 20_000;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let config: PipelineConfig = load_config(&config_path);
    config.validate().context("Invalid pipeline config")?;

    let mut pipeline = Pipeline::start(&config, PipelineServices::from_config(&config))?;
    let events = pipeline.subscribe();

    let hw_flags = DeviceFlags {
        latency: true,
        dynamic_latency: true,
        share_volume_with_master: false,
    };
    let speaker = SimulatedHardware::new(Some(HW_LATENCY_USEC));
    let mic = SimulatedHardware::new(Some(HW_LATENCY_USEC / 2));

    let hw_sink = pipeline.register_hardware(
        Direction::Sink,
        DeviceConfig::new("sink.hw", SampleSpec::hw_default()).with_flags(hw_flags),
        speaker.backend(),
        speaker.io(),
    )?;
    let hw_source = pipeline.register_hardware(
        Direction::Source,
        DeviceConfig::new("source.hw", SampleSpec::hw_default()).with_flags(hw_flags),
        mic.backend(),
        mic.io(),
    )?;

    let sink = pipeline.create_sink_chain(hw_sink, &config.sink)?;
    let source = pipeline.create_source_chain(hw_source, &config.source)?;

    pipeline.set_side_info_queue(sink.voip, Some(SideInfoQueue::create(64)))?;
    pipeline.drive(sink.voip, DeviceState::Running)?;
    pipeline.drive(source.voip, DeviceState::Running)?;

    // 20 ms of audio in each VoIP layer
    let frame = |spec: SampleSpec| vec![0u8; spec.usec_to_bytes(20_000)];
    pipeline.push(sink.voip, &frame(config.sink.voip_spec))?;
    pipeline.push(source.voip, &frame(config.source.voip_spec))?;

    println!();
    println!("{:<20} {:<12} {:<22} {:>12}", "device", "role", "format", "latency");
    println!("{}", "-".repeat(70));
    for info in pipeline.devices() {
        let latency = pipeline.latency(info.id);
        println!(
            "{:<20} {:<12} {:<22} {:>9} us",
            info.name,
            info.role.name(),
            info.spec.to_string(),
            latency
        );
    }
    println!();

    let accepted = pipeline.request_rewind_sync(sink.voip, config.sink.voip_spec.usec_to_bytes(10_000))?;
    let probe = speaker.probe();
    println!(
        "Rewind: {} bytes accepted by {}, hardware rewound {} bytes",
        accepted,
        config.sink.voip_name,
        probe.last_rewind()
    );

    match pipeline.add_input(sink.voip, sink.hw_input, SampleSpec::hw_default()) {
        Ok(()) => println!("Loopback check: {} was admitted (unexpected)", sink.hw_input),
        Err(e) => println!("Loopback check: {}", e),
    }

    let gain = pipeline.output_gain(sink.voip)?;
    println!("Output gain during call: {:.2}", gain);
    println!("Side-info queue set: {}", pipeline.side_info_queue(sink.voip).is_some());

    pipeline.shutdown();

    let calls = events
        .try_iter()
        .filter(|e| matches!(e, PipelineEvent::Lifecycle(_)))
        .count();
    println!("Call lifecycle events: {}", calls);
    Ok(())
}
