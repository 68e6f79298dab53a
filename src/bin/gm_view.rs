//! GM View - interactive viewer for analysis figures
//!
//! Opens the `figures/` directory of a report (or a directory of figure
//! JSON files) and draws one figure at a time.

use clap::Parser;
use composable_gm::plot::{read_figures, Figure, Layer, Rgb};
use eframe::egui::{self, Color32, Stroke};
use egui_plot::{Legend, Line, LineStyle, Plot, PlotPoint, PlotPoints, PlotUi, Points, Polygon, Text};
use std::path::{Path, PathBuf};

/// Interactive viewer for gm figures
#[derive(Parser)]
#[command(name = "gm-view")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Report directory (containing figures/) or a directory of figure JSON files
    #[arg(default_value = "gm_output")]
    dir: PathBuf,
}

fn main() -> eframe::Result {
    env_logger::init();
    let cli = Cli::parse();
    let app = ViewerApp::load(&cli.dir);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_min_inner_size([600.0, 400.0]),
        ..Default::default()
    };

    eframe::run_native(
        "GM View - Shape Analysis Figures",
        options,
        Box::new(|_cc| Ok(Box::new(app))),
    )
}

struct ViewerApp {
    source: PathBuf,
    figures: Vec<Figure>,
    selected: usize,
    error: Option<String>,
}

impl ViewerApp {
    fn load(dir: &Path) -> Self {
        let figures_dir = if dir.join("figures").is_dir() {
            dir.join("figures")
        } else {
            dir.to_path_buf()
        };
        let (figures, error) = match read_figures(&figures_dir) {
            Ok(figures) => {
                log::info!("Loaded {} figures from {}", figures.len(), figures_dir.display());
                (figures, None)
            }
            Err(e) => {
                log::warn!("Could not read figures from {}: {}", figures_dir.display(), e);
                (Vec::new(), Some(e.to_string()))
            }
        };
        Self {
            source: figures_dir,
            figures,
            selected: 0,
            error,
        }
    }
}

impl eframe::App for ViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // ---- Top panel: source and reload ----
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(format!("{}", self.source.display()));
                if ui.button("Reload").clicked() {
                    let selected = self.selected;
                    *self = ViewerApp::load(&self.source);
                    self.selected = selected.min(self.figures.len().saturating_sub(1));
                }
            });
        });

        // ---- Left side panel: figure list ----
        egui::SidePanel::left("figure_list")
            .default_width(240.0)
            .resizable(true)
            .show(ctx, |ui| {
                ui.heading("Figures");
                ui.separator();
                egui::ScrollArea::vertical().show(ui, |ui| {
                    for (i, figure) in self.figures.iter().enumerate() {
                        ui.selectable_value(&mut self.selected, i, &figure.title)
                            .on_hover_text(&figure.id);
                    }
                });
            });

        // ---- Central panel: plot ----
        egui::CentralPanel::default().show(ctx, |ui| {
            if let Some(error) = &self.error {
                ui.colored_label(Color32::RED, error);
                return;
            }
            match self.figures.get(self.selected) {
                Some(figure) => figure_plot(ui, figure),
                None => {
                    ui.centered_and_justified(|ui| {
                        ui.heading("No figures found");
                    });
                }
            }
        });
    }
}

fn color32(c: Rgb) -> Color32 {
    Color32::from_rgb(c.r, c.g, c.b)
}

fn figure_plot(ui: &mut egui::Ui, figure: &Figure) {
    ui.heading(&figure.title);

    let mut plot = Plot::new(format!("plot_{}", figure.id))
        .legend(Legend::default())
        .x_axis_label(figure.x_label.clone())
        .y_axis_label(figure.y_label.clone())
        .allow_boxed_zoom(true)
        .allow_drag(true)
        .allow_scroll(true)
        .allow_zoom(true);
    if figure.equal_aspect {
        plot = plot.data_aspect(1.0);
    }
    if let Some([x0, x1]) = figure.x_limits {
        plot = plot.include_x(x0).include_x(x1);
    }
    if let Some([y0, y1]) = figure.y_limits {
        plot = plot.include_y(y0).include_y(y1);
    }

    plot.show(ui, |plot_ui| {
        for layer in &figure.layers {
            draw_layer(plot_ui, layer);
        }
    });
}

fn draw_layer(plot_ui: &mut PlotUi, layer: &Layer) {
    match layer {
        Layer::Points {
            name,
            points,
            color,
            radius,
        } => {
            let mut item = Points::new(PlotPoints::from(points.clone()))
                .color(color32(*color))
                .radius(*radius)
                .filled(true);
            if let Some(name) = name {
                item = item.name(name);
            }
            plot_ui.points(item);
        }
        Layer::Line {
            name,
            points,
            color,
            width,
            dashed,
        } => {
            let mut line = Line::new(PlotPoints::from(points.clone()))
                .color(color32(*color))
                .width(*width);
            if *dashed {
                line = line.style(LineStyle::dashed_loose());
            }
            if let Some(name) = name {
                line = line.name(name);
            }
            plot_ui.line(line);
        }
        Layer::Segments {
            name,
            segments,
            color,
            width,
        } => {
            // Same-named items share one legend entry.
            for segment in segments {
                let mut line = Line::new(PlotPoints::from(segment.to_vec()))
                    .color(color32(*color))
                    .width(*width);
                if let Some(name) = name {
                    line = line.name(name);
                }
                plot_ui.line(line);
            }
        }
        Layer::Polygon {
            name,
            points,
            color,
            fill_alpha,
        } => {
            let c = color32(*color);
            let mut polygon = Polygon::new(PlotPoints::from(points.clone()))
                .stroke(Stroke::new(1.0, c))
                .fill_color(Color32::from_rgba_unmultiplied(c.r(), c.g(), c.b(), *fill_alpha));
            if let Some(name) = name {
                polygon = polygon.name(name);
            }
            plot_ui.polygon(polygon);
        }
        Layer::Text {
            position,
            text,
            color,
        } => {
            plot_ui.text(
                Text::new(PlotPoint::new(position[0], position[1]), text.clone())
                    .color(color32(*color)),
            );
        }
    }
}
