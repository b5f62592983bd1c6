//! Result presenter: label text and probability chart.
//!
use std::fmt::Write;

use common::{
    labels::{LABELS, NUM_CLASSES},
    protocol::ResultView,
};

use crate::{error::AppError, pipeline::Prediction};

const CHART_WIDTH: f64 = 640.0;
const CHART_HEIGHT: f64 = 360.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_BOTTOM: f64 = 50.0;
const MARGIN_LEFT: f64 = 60.0;

const COLOR_BAR_FILL: &str = "rgba(75, 192, 192, 0.2)";
const COLOR_BAR_BORDER: &str = "rgba(75, 192, 192, 1)";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

const SERIES_NAME: &str = "Prediction Probability";

/// What the page currently shows as result.
///
/// Every prediction replaces label and chart completely. Errors only replace
/// the label.
pub struct ResultPresenter {
    label: String,
    probabilities: [f32; NUM_CLASSES],
}

impl Default for ResultPresenter {
    fn default() -> Self {
        Self {
            label: "No prediction yet.".into(),
            probabilities: [0.0; NUM_CLASSES],
        }
    }
}

impl ResultPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show_prediction(&mut self, prediction: &Prediction) {
        self.label = format!("Plant Condition: {}", prediction.label());
        self.probabilities = prediction.probabilities;
    }

    pub fn show_error(&mut self, err: &AppError) {
        self.label = err.user_message();
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn probabilities(&self) -> &[f32; NUM_CLASSES] {
        &self.probabilities
    }

    pub fn view(&self) -> ResultView {
        ResultView::new(self.label.clone(), self.probabilities)
    }

    /// Render the probabilities as SVG bar chart, one bar per label.
    pub fn render_chart(&self) -> String {
        let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
        let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

        // Y axis starts at zero and covers at least the full probability range
        let y_max = self
            .probabilities
            .iter()
            .map(|p| *p as f64)
            .fold(1.0f64, f64::max);

        let slot = plot_width / NUM_CLASSES as f64;
        let bar_width = slot * 0.7;
        let bar_gap = slot * 0.3;

        let mut svg = String::new();

        write!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}">"#,
            w = CHART_WIDTH,
            h = CHART_HEIGHT
        )
        .ok();
        write!(
            svg,
            r#"<rect width="{}" height="{}" fill="white"/>"#,
            CHART_WIDTH, CHART_HEIGHT
        )
        .ok();

        // Legend
        write!(
            svg,
            r#"<rect x="{}" y="12" width="30" height="12" fill="{}" stroke="{}"/><text x="{}" y="22" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            CHART_WIDTH / 2.0 - 80.0,
            COLOR_BAR_FILL,
            COLOR_BAR_BORDER,
            CHART_WIDTH / 2.0 - 44.0,
            COLOR_TEXT,
            SERIES_NAME
        )
        .ok();

        // Grid lines
        for i in 0..=5 {
            let y = MARGIN_TOP + plot_height - (i as f64 / 5.0) * plot_height;
            let value = (i as f64 / 5.0) * y_max;

            write!(
                svg,
                r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
                MARGIN_LEFT,
                y,
                MARGIN_LEFT + plot_width,
                y,
                COLOR_GRID
            )
            .ok();
            write!(
                svg,
                r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{:.1}</text>"#,
                MARGIN_LEFT - 10.0,
                y + 4.0,
                COLOR_TEXT,
                value
            )
            .ok();
        }

        // Axes
        write!(
            svg,
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
            MARGIN_LEFT,
            MARGIN_TOP + plot_height,
            MARGIN_LEFT + plot_width,
            MARGIN_TOP + plot_height,
            COLOR_AXIS
        )
        .ok();
        write!(
            svg,
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
            MARGIN_LEFT,
            MARGIN_TOP,
            MARGIN_LEFT,
            MARGIN_TOP + plot_height,
            COLOR_AXIS
        )
        .ok();

        for (i, (label, probability)) in LABELS.iter().zip(self.probabilities.iter()).enumerate() {
            let x = MARGIN_LEFT + i as f64 * slot + bar_gap / 2.0;
            let bar_height = (*probability as f64 / y_max) * plot_height;
            let y = MARGIN_TOP + plot_height - bar_height;

            write!(
                svg,
                r#"<rect class="bar" x="{}" y="{}" width="{}" height="{}" fill="{}" stroke="{}" stroke-width="1"><title>{}: {:.4}</title></rect>"#,
                x,
                y,
                bar_width,
                bar_height,
                COLOR_BAR_FILL,
                COLOR_BAR_BORDER,
                escape_xml(label),
                probability
            )
            .ok();
            write!(
                svg,
                r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
                x + bar_width / 2.0,
                MARGIN_TOP + plot_height + 20.0,
                COLOR_TEXT,
                escape_xml(label)
            )
            .ok();
        }

        svg.push_str("</svg>");
        svg
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
