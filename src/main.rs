use anyhow::{Context, Result};
use clap::Parser;
use kerntrace::cli::{Cli, OutputFormat};
use kerntrace::command::{GroupCount, GroupSize};
use kerntrace::driver::{CommandListHandle, DeviceHandle, DriverApi, EventHandle};
use kerntrace::sim::{ManualClock, SimDriver};
use kerntrace::summary::KernelSummary;
use kerntrace::{AppendOp, FinishCallback, KernelCollector, KernelFinish, TracerConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Device timer frequency of the simulated GPU (1 tick = 1 ns)
const SIM_TIMER_FREQUENCY: u64 = 1_000_000_000;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<TracerConfig> {
    let mut config = match &cli.config {
        Some(path) => TracerConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TracerConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("Invalid KERNTRACE_* environment override")?;
    if cli.verbose {
        config.verbose = true;
    }
    Ok(config)
}

/// Append one operation the way a driver backend would: enter hook, driver
/// call, exit hook
fn append(
    collector: &KernelCollector,
    list: CommandListHandle,
    op: AppendOp,
) -> Option<EventHandle> {
    let mut signal_event = None;
    let token = collector.on_enter_append(list, &op, &mut signal_event)?;
    collector.on_exit_append(token, Ok(()));
    signal_event
}

fn print_call(finish: &KernelFinish) {
    println!(
        "<{}> {} [{}] appended={} submitted={} started={} ended={}",
        finish.queue,
        finish.name,
        finish.id,
        finish.appended,
        finish.submitted,
        finish.started,
        finish.ended
    );
}

/// Run a small workload: kernels and a copy on a deferred list executed
/// twice, plus a fill on an immediate list
fn run_workload(
    collector: &KernelCollector,
    sim: &SimDriver,
    clock: &ManualClock,
    device: DeviceHandle,
    kernels: u32,
) {
    let context = sim.create_context();
    let queue = sim.create_queue();
    sim.set_device_time(device, 1_000);

    let gemm = sim.add_kernel("gemm", 32);
    let reduce = sim.add_kernel("reduce", 16);
    collector.on_exit_kernel_set_group_size(gemm, GroupSize::new(64, 1, 1), Ok(()));
    collector.on_exit_kernel_set_group_size(reduce, GroupSize::new(256, 1, 1), Ok(()));

    let deferred = sim.create_command_list();
    collector.on_exit_command_list_create(deferred, context, device, false, Ok(()));

    let mut events = Vec::new();
    for i in 0..kernels {
        let kernel = if i % 2 == 0 { gemm } else { reduce };
        let op = AppendOp::LaunchKernel {
            kernel,
            group_count: Some(GroupCount::new(2 + i, 1, 1)),
        };
        clock.advance(10);
        events.extend(append(collector, deferred, op));
    }
    clock.advance(10);
    events.extend(append(collector, deferred, AppendOp::MemoryCopy { size: 1 << 20 }));
    events.extend(append(collector, deferred, AppendOp::Barrier));

    for submission in 0..2u64 {
        clock.advance(1_000);
        if let Some(token) = collector.on_enter_execute(queue, &[deferred]) {
            collector.on_exit_execute(token, Ok(()));
        }

        let mut ticks = sim.device_timestamp(device);
        for (i, &event) in events.iter().enumerate() {
            let start = ticks + 20;
            let end = start + 100 + 37 * i as u64 + 11 * submission;
            sim.signal(event, start, end);
            ticks = end;
        }
        sim.set_device_time(device, ticks + 500);
        collector.on_exit_queue_synchronize(Ok(()));

        for &event in &events {
            sim.host_reset(event);
        }
    }

    let immediate = sim.create_command_list();
    collector.on_exit_command_list_create(immediate, context, device, true, Ok(()));
    clock.advance(100);
    if let Some(event) = append(collector, immediate, AppendOp::MemoryFill { size: 4096 }) {
        let ticks = sim.device_timestamp(device);
        sim.signal(event, ticks + 5, ticks + 45);
        collector.on_exit_event_host_synchronize(event, Ok(()));
    }

    collector.on_exit_command_list_destroy(immediate, Ok(()));
    collector.on_exit_command_list_destroy(deferred, Ok(()));
    collector.on_exit_queue_destroy(queue, Ok(()));
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = load_config(&cli)?;
    let sim = Arc::new(SimDriver::new());
    let device = sim.add_device(SIM_TIMER_FREQUENCY, 0);
    let clock = Arc::new(ManualClock::new(10_000));

    let callback: Option<FinishCallback> = if cli.print_calls {
        Some(Arc::new(print_call))
    } else {
        None
    };

    let collector = KernelCollector::try_create(
        sim.clone(),
        sim.clone(),
        clock.clone(),
        config,
        callback,
    )
    .context("Failed to create kernel collector")?;

    run_workload(&collector, &sim, &clock, device, cli.kernels);

    let summary = KernelSummary::new(collector.sorted_kernel_info());
    match cli.format {
        OutputFormat::Text => print!("{}", summary.render_text()),
        OutputFormat::Json => println!("{}", summary.to_json()?),
    }

    Ok(())
}
