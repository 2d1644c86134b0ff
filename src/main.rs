use std::{error::Error, io, path::PathBuf, process::exit};

use clap::{Arg, ArgAction, Command, value_parser};
use sensor_shell::{
    acquisition::{CancelToken, Interrupt},
    device::DeviceId,
    plot::GnuplotBackend,
    shell::{Settings, Shell},
    sim::SimTransport,
};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let matches = Command::new("sensor-shell")
        .about("Interactive shell for wireless sensors")
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_parser(value_parser!(PathBuf))
                .default_value(".")
                .help("Directory for data files and figures"),
        )
        .arg(
            Arg::new("no-live-plot")
                .long("no-live-plot")
                .action(ArgAction::SetTrue)
                .help("Only save watch figures, don't display them"),
        )
        .arg(
            Arg::new("connect")
                .short('c')
                .long("connect")
                .action(ArgAction::Append)
                .value_parser(DeviceId::parse)
                .help("Connect this device id at startup"),
        )
        .get_matches();

    let output_dir = matches
        .get_one::<PathBuf>("output-dir")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."));
    let live = !matches.get_flag("no-live-plot");

    let cancel = CancelToken::new();
    let handler = cancel.clone();
    ctrlc::set_handler(move || match handler.interrupt() {
        Interrupt::Ignored => eprintln!("\nType quit to exit"),
        Interrupt::Cancelled => {}
        Interrupt::Repeated => {
            eprintln!("Killing...");
            exit(-1);
        }
    })?;

    let settings = Settings {
        output_dir,
        status_line: true,
    };
    let mut shell = Shell::new(
        SimTransport::default(),
        Box::new(GnuplotBackend::new(live)),
        cancel,
        settings,
    );

    let mut stdout = io::stdout();
    if let Some(ids) = matches.get_many::<DeviceId>("connect") {
        for id in ids {
            shell.execute(&format!("connect {id}"), &mut stdout)?;
        }
    }
    shell.run(io::stdin().lock(), &mut stdout)?;

    Ok(())
}
