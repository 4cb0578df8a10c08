use std::io::Cursor;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::LineSeries;
use plotters::prelude::*;
use crate::classify::CalmState;
use crate::dsp::PipelineError;
#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub foreground: RGBColor,
    /// Captions, axis labels and legends; needs a system font.
    pub text: bool,
}
impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 900,
            height: 400,
            background: RGBColor(10, 10, 10),
            foreground: WHITE,
            text: true,
        }
    }
}
fn state_color(state: CalmState) -> RGBColor {
    match state {
        CalmState::Calm => GREEN,
        CalmState::Neutral => YELLOW,
        CalmState::NotCalm => RED,
    }
}
fn state_level(state: CalmState) -> f64 {
    match state {
        CalmState::Calm => 1.0,
        CalmState::Neutral => 0.5,
        CalmState::NotCalm => 0.0,
    }
}
/// Ratio over time, with optional `(calm, lower)` threshold lines.
pub fn render_ratio_png(
    points: &[(f64, f64)],
    thresholds: Option<(f64, f64)>,
    style: &PlotStyle,
) -> Result<Vec<u8>, PipelineError> {
    if points.is_empty() {
        return Err(PipelineError::Plot("no ratio samples to plot".into()));
    }
    let x_max = points.iter().map(|p| p.0).fold(0.0f64, f64::max).max(1e-3);
    let mut y_max = points.iter().map(|p| p.1).fold(0.0f64, f64::max);
    if let Some((calm, _)) = thresholds {
        y_max = y_max.max(calm);
    }
    let y_max = if y_max > 0.0 { y_max * 1.1 } else { 1.0 };
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let mut builder = ChartBuilder::on(&root);
        builder.margin(10);
        if style.text {
            builder
                .caption(
                    "Alpha/Beta Ratio",
                    ("sans-serif", 20).into_font().color(&style.foreground),
                )
                .set_label_area_size(LabelAreaPosition::Left, 45)
                .set_label_area_size(LabelAreaPosition::Bottom, 40);
        }
        let mut chart = builder.build_cartesian_2d(0f64..x_max, 0f64..y_max)?;
        let mut mesh = chart.configure_mesh();
        mesh.light_line_style(&style.foreground.mix(0.1));
        if style.text {
            mesh.x_desc("Time (s)").y_desc("Alpha/Beta");
        } else {
            mesh.x_labels(0).y_labels(0);
        }
        mesh.draw()?;
        chart
            .draw_series(LineSeries::new(points.iter().copied(), &CYAN))?
            .label("ratio")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &CYAN));
        if let Some((calm, lower)) = thresholds {
            for (level, color, name) in [(calm, GREEN, "calm"), (lower, RED, "not calm")] {
                chart
                    .draw_series(LineSeries::new(vec![(0.0, level), (x_max, level)], &color))?
                    .label(name)
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
            }
        }
        if style.text {
            chart
                .configure_series_labels()
                .border_style(&style.foreground.mix(0.2))
                .background_style(&style.background)
                .draw()?;
        }
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}
/// Step plot of predicted states (calm high, not calm low).
pub fn render_state_timeline_png(
    states: &[(f64, CalmState)],
    style: &PlotStyle,
) -> Result<Vec<u8>, PipelineError> {
    if states.is_empty() {
        return Err(PipelineError::Plot("no predictions to plot".into()));
    }
    let x_max = states.iter().map(|p| p.0).fold(0.0f64, f64::max).max(1e-3);
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let mut builder = ChartBuilder::on(&root);
        builder.margin(10);
        if style.text {
            builder
                .caption(
                    "Mental State Timeline",
                    ("sans-serif", 20).into_font().color(&style.foreground),
                )
                .set_label_area_size(LabelAreaPosition::Left, 45)
                .set_label_area_size(LabelAreaPosition::Bottom, 40);
        }
        let mut chart = builder.build_cartesian_2d(0f64..x_max, -0.1f64..1.1f64)?;
        let level_name = |v: &f64| {
            if *v > 0.75 {
                "Calm".to_string()
            } else if *v > 0.25 {
                "Neutral".to_string()
            } else {
                "Not Calm".to_string()
            }
        };
        let mut mesh = chart.configure_mesh();
        mesh.light_line_style(&style.foreground.mix(0.1));
        if style.text {
            mesh.x_desc("Time (s)")
                .y_labels(3)
                .y_label_formatter(&level_name);
        } else {
            mesh.x_labels(0).y_labels(0);
        }
        mesh.draw()?;
        let mut steps = Vec::with_capacity(states.len() * 2);
        for pair in states.windows(2) {
            let (t0, s0) = pair[0];
            let t1 = pair[1].0;
            steps.push((t0, state_level(s0)));
            steps.push((t1, state_level(s0)));
        }
        if let Some(&(t, s)) = states.last() {
            steps.push((t, state_level(s)));
        }
        chart.draw_series(LineSeries::new(steps, &style.foreground.mix(0.6)))?;
        chart.draw_series(states.iter().map(|&(t, s)| {
            Circle::new((t, state_level(s)), 3, state_color(s).filled())
        }))?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}
pub fn write_png(path: &std::path::Path, png: &[u8]) -> Result<(), PipelineError> {
    std::fs::write(path, png).map_err(|e| PipelineError::persistence(path, e))
}
fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, PipelineError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| PipelineError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
#[cfg(test)]
mod tests {
    use super::*;
    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
    fn quiet() -> PlotStyle {
        PlotStyle {
            width: 200,
            height: 100,
            text: false,
            ..PlotStyle::default()
        }
    }
    #[test]
    fn ratio_plot_is_png() {
        let points: Vec<(f64, f64)> = (0..20).map(|i| (i as f64 * 0.5, 1.0 + (i % 3) as f64)).collect();
        let png = render_ratio_png(&points, Some((2.0, 1.5)), &quiet()).unwrap();
        assert_eq!(&png[..8], &PNG_MAGIC);
    }
    #[test]
    fn state_timeline_is_png() {
        let states = vec![
            (2.0, CalmState::Calm),
            (2.5, CalmState::Neutral),
            (3.0, CalmState::NotCalm),
        ];
        let png = render_state_timeline_png(&states, &quiet()).unwrap();
        assert_eq!(&png[..8], &PNG_MAGIC);
    }
    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            render_ratio_png(&[], None, &quiet()),
            Err(PipelineError::Plot(_))
        ));
        assert!(render_state_timeline_png(&[], &quiet()).is_err());
    }
}
