//! Chart backends for watch mode.

use std::path::Path;

use gnuplot::{AxesCommon, Caption, Figure, LineWidth};
use log::warn;

use crate::output::{Chart, Error};

/// Displays a growing chart and saves it when the run ends.
pub trait ChartBackend {
    /// Redraw after a new point was appended.
    fn update(&mut self, chart: &Chart) -> Result<(), Error>;

    fn save(&mut self, chart: &Chart, path: &Path) -> Result<(), Error>;

    /// File extension of saved figures.
    fn extension(&self) -> &'static str;
}

/// Draws through a gnuplot process.
pub struct GnuplotBackend {
    figure: Figure,
    live: bool,
}

impl GnuplotBackend {
    /// With `live` unset nothing is shown until the figure is saved.
    pub fn new(live: bool) -> GnuplotBackend {
        GnuplotBackend {
            figure: Figure::new(),
            live,
        }
    }

    fn draw(&mut self, chart: &Chart) {
        self.figure.clear_axes();
        let axes = self.figure.axes2d();
        axes.set_x_label(&chart.x_label, &[]);
        axes.set_y_label(&chart.y_label, &[]);
        for series in &chart.series {
            axes.lines(
                chart.times.iter().copied(),
                series.values.iter().copied(),
                &[Caption(series.name.as_str()), LineWidth(1.5)],
            );
        }
    }
}

impl ChartBackend for GnuplotBackend {
    fn update(&mut self, chart: &Chart) -> Result<(), Error> {
        if !self.live {
            return Ok(());
        }
        self.draw(chart);
        self.figure
            .show_and_keep_running()
            .map_err(|e| Error::PlotError(e.to_string()))?;
        Ok(())
    }

    fn save(&mut self, chart: &Chart, path: &Path) -> Result<(), Error> {
        self.draw(chart);
        self.figure
            .save_to_pdf(path, 6.0, 4.0)
            .map_err(|e| Error::PlotError(e.to_string()))?;
        // gnuplot only finishes writing the file once its process exits
        self.figure.close();
        Ok(())
    }

    fn extension(&self) -> &'static str {
        "pdf"
    }
}

/// Update the live chart, logging instead of failing the run.
pub fn redraw(backend: &mut dyn ChartBackend, chart: &Chart) {
    if let Err(e) = backend.update(chart) {
        warn!("live chart update failed: {}", e);
    }
}
