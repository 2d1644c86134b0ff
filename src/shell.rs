//! The interactive command shell.
//!
//! Each input line is parsed as one clap command before anything touches a
//! device, so malformed input never changes the session.

use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
};

use clap::{Arg, ArgMatches, Command};
use log::{debug, info};
use status_line::StatusLine;

use crate::{
    acquisition::{CancelToken, Period, Progress, Run, acquire},
    device::{DeviceId, Transport},
    output::{self, Chart},
    plot::{self, ChartBackend},
    registry::Registry,
    sampler::{Plan, Selector},
};

pub const INTRO: &str = "Welcome to the sensor shell. Type help to list commands.";

#[derive(Debug, Clone)]
pub struct Settings {
    /// Where data files and figures are written.
    pub output_dir: PathBuf,
    /// Show a status line while a run is active.
    pub status_line: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            output_dir: PathBuf::from("."),
            status_line: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

fn commands() -> Command {
    Command::new("shell")
        .multicall(true)
        .subcommand_required(true)
        .subcommand_value_name("COMMAND")
        .subcommand_help_heading("Commands")
        .subcommand(
            Command::new("connect")
                .about("Connect by the id written on the device")
                .arg(
                    Arg::new("id")
                        .required(true)
                        .value_parser(DeviceId::parse)
                        .help("Device id, e.g. 344-124"),
                ),
        )
        .subcommand(Command::new("disconnect").about("Disconnect all devices"))
        .subcommand(Command::new("info").about("Summarize available sensors and measurements"))
        .subcommand(Command::new("scan").about("Scan for devices in range"))
        .subcommand(
            Command::new("record")
                .about("Record all measurements to a file until Ctrl-C")
                .arg(
                    Arg::new("period")
                        .required(true)
                        .value_parser(Period::parse)
                        .help("Seconds between samples"),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Plot one measurement live until Ctrl-C")
                .arg(
                    Arg::new("period")
                        .required(true)
                        .value_parser(Period::parse)
                        .help("Seconds between samples"),
                )
                .arg(
                    Arg::new("measurement")
                        .required(true)
                        .num_args(1..)
                        .help("Measurement to watch"),
                ),
        )
        .subcommand(
            Command::new("quit")
                .alias("exit")
                .about("Disconnect all devices and leave"),
        )
}

fn status_line(enabled: bool, progress: &Progress) -> Option<StatusLine<Progress>> {
    enabled.then(|| StatusLine::new(progress.clone()))
}

/// One interactive session: a transport, the devices connected through it
/// and where results go.
pub struct Shell<T: Transport> {
    transport: T,
    registry: Registry,
    backend: Box<dyn ChartBackend>,
    cancel: CancelToken,
    settings: Settings,
}

impl<T: Transport> Shell<T> {
    pub fn new(
        transport: T,
        backend: Box<dyn ChartBackend>,
        cancel: CancelToken,
        settings: Settings,
    ) -> Shell<T> {
        Shell {
            transport,
            registry: Registry::new(),
            backend,
            cancel,
            settings,
        }
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn prompt(&mut self) -> String {
        let ids = self.registry.ids();
        if ids.is_empty() {
            return "(disconnected) ".to_string();
        }
        let ids: Vec<&str> = ids.iter().map(DeviceId::as_str).collect();
        format!("({}) ", ids.join(", "))
    }

    /// Read commands from `input` until `quit` or end of input.
    pub fn run(&mut self, input: impl BufRead, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "{INTRO}")?;
        let mut lines = input.lines();
        loop {
            write!(out, "{}", self.prompt())?;
            out.flush()?;

            let Some(line) = lines.next() else {
                writeln!(out)?;
                self.quit(out)?;
                return Ok(());
            };
            if self.execute(&line?, out)? == Flow::Quit {
                return Ok(());
            }
        }
    }

    /// Run one command line.
    pub fn execute(&mut self, line: &str, out: &mut dyn Write) -> io::Result<Flow> {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return Ok(Flow::Continue);
        }

        let matches = match commands().try_get_matches_from(words) {
            Ok(matches) => matches,
            Err(e) => {
                writeln!(out, "{}", e.to_string().trim_end())?;
                return Ok(Flow::Continue);
            }
        };

        let Some((name, args)) = matches.subcommand() else {
            return Ok(Flow::Continue);
        };
        debug!("command {}", name);
        match name {
            "connect" => self.connect(args, out)?,
            "disconnect" => self.disconnect(out)?,
            "info" => self.info(out)?,
            "scan" => self.scan(out)?,
            "record" => self.record(args, out)?,
            "watch" => self.watch(args, out)?,
            "quit" => {
                self.quit(out)?;
                return Ok(Flow::Quit);
            }
            _ => writeln!(out, "Error: unknown command {name}")?,
        }
        Ok(Flow::Continue)
    }

    fn require_connection(&mut self, out: &mut dyn Write) -> io::Result<bool> {
        if self.registry.is_empty() {
            writeln!(out, "No connected devices")?;
            return Ok(false);
        }
        Ok(true)
    }

    fn connect(&mut self, args: &ArgMatches, out: &mut dyn Write) -> io::Result<()> {
        let Some(id) = args.get_one::<DeviceId>("id").cloned() else {
            return Ok(());
        };
        match self.registry.connect(&mut self.transport, id) {
            Ok(device) => writeln!(out, "Connected to {} ({})", device.id(), device.handle().name()),
            Err(e) => writeln!(out, "Connection failed: {e}"),
        }
    }

    fn disconnect(&mut self, out: &mut dyn Write) -> io::Result<()> {
        let ids = self.registry.ids();
        self.registry.disconnect_all();
        for id in ids {
            writeln!(out, "Disconnected {id}")?;
        }
        Ok(())
    }

    fn quit(&mut self, out: &mut dyn Write) -> io::Result<()> {
        self.registry.disconnect_all();
        writeln!(out, "Bye")
    }

    fn info(&mut self, out: &mut dyn Write) -> io::Result<()> {
        if !self.require_connection(out)? {
            return Ok(());
        }
        for device in self.registry.active_devices().iter() {
            writeln!(out, "{}", device.id())?;
            let handle = device.handle();
            for sensor in handle.sensor_list() {
                writeln!(out, "  {sensor}")?;
                for measurement in handle.measurement_list(Some(sensor.as_str())) {
                    match handle.measurement_unit(&measurement) {
                        Ok(unit) => writeln!(out, "    {measurement} ({unit})")?,
                        Err(_) => writeln!(out, "    {measurement}")?,
                    }
                }
            }
        }
        Ok(())
    }

    fn scan(&mut self, out: &mut dyn Write) -> io::Result<()> {
        let names = match self.transport.scan() {
            Ok(names) => names,
            Err(e) => return writeln!(out, "Scan failed: {e}"),
        };
        if names.is_empty() {
            return writeln!(out, "No devices found");
        }
        for name in names {
            writeln!(out, "{name}: {}", DeviceId::from_advertised_name(&name))?;
        }
        Ok(())
    }

    fn report_run_error(run: &Run, out: &mut dyn Write) -> io::Result<()> {
        if let Some(e) = &run.error {
            writeln!(out, "Run stopped early: {e}")?;
        }
        Ok(())
    }

    fn record(&mut self, args: &ArgMatches, out: &mut dyn Write) -> io::Result<()> {
        let Some(period) = args.get_one::<Period>("period").copied() else {
            return Ok(());
        };
        if !self.require_connection(out)? {
            return Ok(());
        }
        let plan = match Plan::new(&mut self.registry, &Selector::All) {
            Ok(plan) => plan,
            Err(e) => return writeln!(out, "Error: {e}"),
        };

        let progress = Progress::new("Recording data. Press Ctrl-C to stop...");
        let status = status_line(self.settings.status_line, &progress);
        let run = acquire(&mut self.registry, plan, period, &self.cancel, &mut |_, _| {
            progress.tick()
        });
        drop(status);

        Self::report_run_error(&run, out)?;
        if run.samples.is_empty() {
            return writeln!(out, "No data recorded");
        }
        match output::write_table(&run.samples, &self.settings.output_dir) {
            Ok(path) => writeln!(out, "Saved data to {}", path.display()),
            Err(e) => writeln!(out, "Error: {e}"),
        }
    }

    fn watch(&mut self, args: &ArgMatches, out: &mut dyn Write) -> io::Result<()> {
        let Some(period) = args.get_one::<Period>("period").copied() else {
            return Ok(());
        };
        let measurement = args
            .get_many::<String>("measurement")
            .map(|words| words.map(String::as_str).collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        if !self.require_connection(out)? {
            return Ok(());
        }
        let selector = Selector::Measurement(measurement.clone());
        let plan = match Plan::new(&mut self.registry, &selector) {
            Ok(plan) => plan,
            Err(e) => return writeln!(out, "{}", capitalize(&e.to_string())),
        };

        let mut chart = Chart::for_measurement(&measurement, &plan);
        let progress = Progress::new("Watching data stream. Press Ctrl-C to stop...");
        let status = status_line(self.settings.status_line, &progress);
        let backend = &mut self.backend;
        let run = acquire(&mut self.registry, plan, period, &self.cancel, &mut |t, values| {
            chart.push(t, values);
            plot::redraw(backend.as_mut(), &chart);
            progress.tick();
        });
        drop(status);

        Self::report_run_error(&run, out)?;
        if run.samples.is_empty() {
            return writeln!(out, "No data recorded");
        }
        match output::render_snapshot(&chart, self.backend.as_mut(), &self.settings.output_dir) {
            Ok(path) => {
                info!("watch run saved to {}", path.display());
                writeln!(out, "Saved figure to {}", path.display())
            }
            Err(e) => writeln!(out, "Error: {e}"),
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
