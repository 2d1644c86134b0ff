use std::{
    fs,
    io::Cursor,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use sensor_shell::{
    acquisition::CancelToken,
    device::DeviceId,
    output::{self, Chart},
    plot::ChartBackend,
    shell::{Flow, Settings, Shell},
    sim::SimTransport,
};

/// Keeps the last chart in memory and writes a one-line summary on save.
#[derive(Clone, Default)]
struct MemoryChart {
    updates: Arc<AtomicUsize>,
    saved: Arc<std::sync::Mutex<Option<Chart>>>,
}

impl ChartBackend for MemoryChart {
    fn update(&mut self, _chart: &Chart) -> Result<(), output::Error> {
        self.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn save(&mut self, chart: &Chart, path: &Path) -> Result<(), output::Error> {
        fs::write(path, format!("{} points\n", chart.times.len()))?;
        *self.saved.lock().unwrap() = Some(chart.clone());
        Ok(())
    }

    fn extension(&self) -> &'static str {
        "txt"
    }
}

struct Session {
    radio: SimTransport,
    cancel: CancelToken,
    chart: MemoryChart,
    dir: tempfile::TempDir,
    shell: Shell<SimTransport>,
}

impl Session {
    fn new() -> Session {
        let radio = SimTransport::default();
        let cancel = CancelToken::new();
        let chart = MemoryChart::default();
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            output_dir: dir.path().to_path_buf(),
            status_line: false,
        };
        let shell = Shell::new(radio.clone(), Box::new(chart.clone()), cancel.clone(), settings);
        Session {
            radio,
            cancel,
            chart,
            dir,
            shell,
        }
    }

    fn exec(&mut self, line: &str) -> String {
        let mut out = Vec::new();
        assert_eq!(self.shell.execute(line, &mut out).unwrap(), Flow::Continue);
        String::from_utf8(out).unwrap()
    }

    /// Cancel the next run once `id` has been read `reads` times.
    fn cancel_after(&self, id: &str, reads: u64) -> thread::JoinHandle<()> {
        self.on_reads(id, reads, |_, cancel| cancel.cancel())
    }

    fn on_reads(
        &self,
        id: &str,
        reads: u64,
        action: impl FnOnce(&SimTransport, &CancelToken) + Send + 'static,
    ) -> thread::JoinHandle<()> {
        let radio = self.radio.clone();
        let cancel = self.cancel.clone();
        let id = DeviceId::parse(id).unwrap();
        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(30);
            while radio.reads(&id) < reads && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            action(&radio, &cancel);
        })
    }

    fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(self.dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        files.sort();
        files
    }
}

fn data_rows(text: &str) -> Vec<Vec<f64>> {
    text.lines()
        .skip(1)
        .map(|line| line.split(',').map(|v| v.parse().unwrap()).collect())
        .collect()
}

#[test]
fn record_two_force_sensors() {
    let mut session = Session::new();
    session.exec("connect 344-124");
    session.exec("connect 125-500");

    let canceller = session.cancel_after("125-500", 3);
    let text = session.exec("record 1.0");
    canceller.join().unwrap();

    assert!(text.starts_with("Saved data to "), "{text}");
    let files = session.files();
    assert_eq!(files.len(), 1);
    let name = files[0].file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("sensorshell_data_") && name.ends_with(".txt"), "{name}");

    let table = fs::read_to_string(&files[0]).unwrap();
    assert_eq!(
        table.lines().next().unwrap(),
        "# timestamp, 344-124 Force (N), 125-500 Force (N)"
    );
    let rows = data_rows(&table);
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.len() == 3));
    assert!(rows[0][0].abs() < 0.1, "first timestamp {}", rows[0][0]);
    assert!((rows[1][0] - 1.0).abs() < 0.2, "second timestamp {}", rows[1][0]);
}

#[test]
fn record_without_devices_writes_nothing() {
    let mut session = Session::new();
    assert_eq!(session.exec("record 1.0"), "No connected devices\n");
    assert!(session.files().is_empty());
}

#[test]
fn cancelled_before_first_sample_writes_nothing() {
    let mut session = Session::new();
    session.exec("connect 344-124");
    session.cancel.cancel();

    assert_eq!(session.exec("record 0.1"), "No data recorded\n");
    assert!(session.files().is_empty());
    assert!(!session.cancel.is_cancelled());
}

#[test]
fn malformed_id_never_reaches_the_radio() {
    let mut session = Session::new();
    let text = session.exec("connect 12-3");
    assert!(text.contains("error"), "{text}");
    assert_eq!(session.shell.prompt(), "(disconnected) ");
    assert!(session.shell.registry_mut().is_empty());
    assert_eq!(session.radio.connect_attempts(), 0);
}

#[test]
fn out_of_range_period_is_an_argument_error() {
    let mut session = Session::new();
    session.exec("connect 344-124");

    for line in ["record 1e30", "watch 1e30 Force", "record 1e-12"] {
        let text = session.exec(line);
        assert!(text.contains("error"), "{line}: {text}");
    }
    assert_eq!(session.radio.reads(&DeviceId::parse("344-124").unwrap()), 0);
    assert!(session.files().is_empty());
    assert_eq!(session.shell.prompt(), "(344-124) ");
}

#[test]
fn watch_plots_only_supporting_devices() {
    let mut session = Session::new();
    session.exec("connect 344-124");
    session.exec("connect 402-881");

    let canceller = session.cancel_after("344-124", 2);
    let text = session.exec("watch 0.5 Force");
    canceller.join().unwrap();

    assert!(text.starts_with("Saved figure to "), "{text}");
    assert_eq!(session.radio.reads(&DeviceId::parse("402-881").unwrap()), 0);
    assert_eq!(session.chart.updates.load(Ordering::Relaxed), 2);

    let chart = session.chart.saved.lock().unwrap().clone().unwrap();
    assert_eq!(chart.x_label, "Time (s)");
    assert_eq!(chart.y_label, "Force (N)");
    assert_eq!(chart.series.len(), 1);
    assert_eq!(chart.series[0].name, "344-124");
    assert_eq!(chart.series[0].values.len(), 2);
    assert_eq!(session.files().len(), 1);
}

#[test]
fn watch_unsupported_measurement() {
    let mut session = Session::new();
    session.exec("connect 344-124");
    assert_eq!(
        session.exec("watch 0.5 Mass"),
        "No devices support measurement Mass\n"
    );
    assert!(session.files().is_empty());
}

#[test]
fn device_lost_mid_run_keeps_collected_rows() {
    let mut session = Session::new();
    session.exec("connect 344-124");
    session.exec("connect 125-500");

    let unplug = session.on_reads("125-500", 2, |radio, _| {
        radio.unplug(&DeviceId::parse("125-500").unwrap());
    });
    let text = session.exec("record 0.2");
    unplug.join().unwrap();

    assert!(text.contains("Run stopped early: device 125-500 disconnected"), "{text}");
    assert!(text.contains("Saved data to "), "{text}");
    let table = fs::read_to_string(&session.files()[0]).unwrap();
    assert_eq!(data_rows(&table).len(), 2);
    assert_eq!(session.shell.prompt(), "(344-124) ");
}

#[test]
fn scripted_session() {
    let mut session = Session::new();
    let script = "scan\nconnect 344-124\nconnect 402-881\ninfo\ndisconnect\nconnect 125-500\nquit\nconnect 344-124\n";
    let mut out = Vec::new();
    session.shell.run(Cursor::new(script), &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.contains("Wireless Temperature Sensor 402-881: 402-881"));
    assert!(text.contains("(344-124, 402-881) "));
    assert!(text.contains("    Temperature (°C)"));
    assert!(text.contains("Disconnected 344-124\nDisconnected 402-881"));
    assert!(text.trim_end().ends_with("Bye"));

    // quit disconnects, and nothing after it runs
    for id in ["344-124", "402-881", "125-500"] {
        assert!(!session.radio.is_connected(&DeviceId::parse(id).unwrap()));
    }
}

#[test]
fn end_of_input_disconnects() {
    let mut session = Session::new();
    let mut out = Vec::new();
    session
        .shell
        .run(Cursor::new("connect 344-124\n"), &mut out)
        .unwrap();

    assert!(String::from_utf8(out).unwrap().ends_with("Bye\n"));
    assert!(!session.radio.is_connected(&DeviceId::parse("344-124").unwrap()));
}
