use std::{error::Error, path::PathBuf, process::exit};

use clap::{Arg, Command, value_parser};
use sensor_shell::{
    acquisition::{CancelToken, Interrupt, Period, Progress, acquire},
    device::DeviceId,
    output,
    registry::Registry,
    sampler::{Plan, Selector},
    sim::SimTransport,
};
use status_line::StatusLine;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let matches = Command::new("sensor-record")
        .about("Record every measurement of the given devices until Ctrl-C")
        .arg(
            Arg::new("period")
                .short('p')
                .long("period")
                .value_parser(Period::parse)
                .required(true)
                .help("Seconds between samples"),
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_parser(value_parser!(PathBuf))
                .default_value(".")
                .help("Output directory"),
        )
        .arg(
            Arg::new("ids")
                .required(true)
                .num_args(1..)
                .value_parser(DeviceId::parse)
                .help("Device ids, e.g. 344-124"),
        )
        .get_matches();

    let period = *matches.get_one::<Period>("period").ok_or("missing period")?;
    let output_dir = matches
        .get_one::<PathBuf>("output-dir")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."));

    let mut transport = SimTransport::default();
    let mut registry = Registry::new();
    for id in matches.get_many::<DeviceId>("ids").into_iter().flatten() {
        let device = registry.connect(&mut transport, id.clone())?;
        eprintln!("Connected to {} ({})", device.id(), device.handle().name());
    }

    let plan = Plan::new(&mut registry, &Selector::All)?;
    eprintln!("Recording {}", plan.labels().join(", "));

    let cancel = CancelToken::new();
    let handler = cancel.clone();
    ctrlc::set_handler(move || {
        if handler.interrupt() != Interrupt::Cancelled {
            eprintln!("Killing...");
            exit(-1);
        }
    })?;

    let progress = Progress::new("Recording data. Press Ctrl-C to stop...");
    let status = StatusLine::new(progress.clone());
    let run = acquire(&mut registry, plan, period, &cancel, &mut |_, _| progress.tick());
    drop(status);
    registry.disconnect_all();

    if let Some(e) = &run.error {
        eprintln!("Run stopped early: {}", e);
    }
    if run.samples.is_empty() {
        eprintln!("No data recorded");
        return Ok(());
    }
    let path = output::write_table(&run.samples, &output_dir)?;
    eprintln!("Saved {} samples to {}", run.samples.len(), path.display());
    eprintln!("Done!");

    Ok(())
}
