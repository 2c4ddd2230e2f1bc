//! Attentiveness line chart.
//!
//! The chart does not exist until the first point arrives. After that, each update
//! replaces its data in place and bumps the revision. Rendering goes through
//! plotters' SVG backend with the y-axis pinned to [0, 100].

use std::ops::Range;

use anyhow::Result;
use plotters::prelude::*;

use crate::history::AttentivenessSeries;

pub const CHART_WIDTH: u32 = 640;
pub const CHART_HEIGHT: u32 = 240;
const LINE_COLOR: RGBColor = RGBColor(75, 192, 192);
pub const Y_MIN: u32 = 0;
pub const Y_MAX: u32 = 100;

#[derive(Clone, Debug, PartialEq)]
struct ChartData {
    labels: Vec<u64>,
    values: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct AttentivenessChart {
    data: Option<ChartData>,
    revision: u64,
}

impl AttentivenessChart {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the first update created the chart.
    pub fn is_created(&self) -> bool {
        self.data.is_some()
    }

    /// Number of updates applied so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.data.as_ref().map(|d| d.values.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn update(&mut self, series: &AttentivenessSeries) {
        let (labels, values) = series.labeled().into_iter().unzip();
        match self.data.as_mut() {
            Some(data) => {
                data.labels = labels;
                data.values = values;
            }
            None => self.data = Some(ChartData { labels, values }),
        }
        self.revision += 1;
    }

    /// Frame-number span of the x-axis. Labels stay absolute after eviction.
    pub fn x_range(&self) -> Range<u64> {
        let labels = self.data.as_ref().map(|d| d.labels.as_slice()).unwrap_or(&[]);
        match (labels.first(), labels.last()) {
            (Some(&first), Some(&last)) if last > first => first..last,
            (Some(&first), _) => first..first + 1,
            _ => 0..1,
        }
    }

    /// Render the chart as a standalone SVG document.
    pub fn render_svg(&self) -> Result<String> {
        let mut svg = String::new();
        {
            let root = SVGBackend::with_string(&mut svg, (CHART_WIDTH, CHART_HEIGHT))
                .into_drawing_area();
            root.fill(&WHITE)?;

            let mut chart = ChartBuilder::on(&root)
                .caption("Attentiveness Percentage", ("sans-serif", 14))
                .margin(10)
                .x_label_area_size(24)
                .y_label_area_size(36)
                .build_cartesian_2d(self.x_range(), Y_MIN..Y_MAX)?;
            chart.configure_mesh().x_labels(8).y_labels(5).draw()?;

            if let Some(data) = &self.data {
                let points = data
                    .labels
                    .iter()
                    .zip(&data.values)
                    .map(|(label, value)| (*label, u32::from(*value).min(Y_MAX)));
                chart.draw_series(LineSeries::new(points, LINE_COLOR.stroke_width(2)))?;
            }
            root.present()?;
        }
        Ok(svg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_color_hex() -> String {
        format!("#{:02x}{:02x}{:02x}", LINE_COLOR.0, LINE_COLOR.1, LINE_COLOR.2)
    }

    #[test]
    fn created_on_first_update_then_mutated() {
        let mut chart = AttentivenessChart::new();
        assert!(!chart.is_created());

        let mut series = AttentivenessSeries::with_capacity(10);
        series.push(40);
        chart.update(&series);
        assert!(chart.is_created());
        assert_eq!(chart.len(), 1);

        series.push(60);
        chart.update(&series);
        assert_eq!(chart.len(), 2);
        assert_eq!(chart.revision(), 2);
    }

    #[test]
    fn x_axis_follows_absolute_frame_labels() {
        let mut series = AttentivenessSeries::with_capacity(2);
        for v in [10, 50, 90] {
            series.push(v);
        }
        let mut chart = AttentivenessChart::new();
        assert_eq!(chart.x_range(), 0..1);

        chart.update(&series);
        assert_eq!(chart.x_range(), 2..3);

        let mut single = AttentivenessSeries::with_capacity(4);
        single.push(70);
        chart.update(&single);
        assert_eq!(chart.x_range(), 1..2);
    }

    #[test]
    fn svg_draws_the_series_line() -> Result<()> {
        let mut series = AttentivenessSeries::with_capacity(4);
        for v in [10, 50, 90] {
            series.push(v);
        }
        let mut chart = AttentivenessChart::new();
        chart.update(&series);

        let svg = chart.render_svg()?;
        assert!(svg.contains("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert!(svg.contains("Attentiveness Percentage"));
        assert!(svg.to_ascii_lowercase().contains(&line_color_hex()));
        Ok(())
    }

    #[test]
    fn empty_chart_renders_axes_only() -> Result<()> {
        let svg = AttentivenessChart::new().render_svg()?;
        assert!(svg.contains("<svg"));
        assert!(svg.contains("Attentiveness Percentage"));
        assert!(!svg.to_ascii_lowercase().contains(&line_color_hex()));
        Ok(())
    }
}
