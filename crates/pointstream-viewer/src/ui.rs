//! Heads-up display: streaming statistics and render controls.

use pointstream::RenderQuality;

/// Entries shown for per-batch lists before eliding the rest.
const MAX_LISTED: usize = 48;

/// Snapshot of one frame's statistics.
pub struct HudStats<'a> {
    pub total_points: u64,
    pub drawn_points: u64,
    pub resident_points: u64,
    pub points_per_batch: u32,
    pub batch_count: usize,
    pub shown: &'a [u32],
    pub render_levels: &'a [i32],
    pub threads_per_workgroup: u32,
    /// Workgroups of the last drawn batch.
    pub workgroups: Option<[u32; 3]>,
    pub pending_uploads: usize,
    /// Name, points so far and expected total of the source being loaded.
    pub loading: Option<(&'a str, u64, Option<u64>)>,
}

#[derive(Default)]
pub struct HudActions {
    pub view_to_model: bool,
}

/// `12345678` -> `12 345 678`.
pub fn group_digits(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

fn join_list<T: ToString>(items: &[T]) -> String {
    let mut out: Vec<String> = items.iter().take(MAX_LISTED).map(ToString::to_string).collect();
    if items.len() > MAX_LISTED {
        out.push(format!("… (+{})", items.len() - MAX_LISTED));
    }
    out.join(" ")
}

pub fn draw_hud(ctx: &egui::Context, stats: &HudStats, quality: &mut RenderQuality) -> HudActions {
    let mut actions = HudActions::default();

    egui::Window::new("Point Stream")
        .default_pos([12.0, 12.0])
        .resizable(false)
        .show(ctx, |ui| {
            egui::Grid::new("hud_stats").num_columns(2).show(ui, |ui| {
                ui.label("Number of points");
                ui.label(format!(
                    "{} / {}",
                    group_digits(stats.drawn_points),
                    group_digits(stats.total_points)
                ));
                ui.end_row();

                ui.label("Resident points");
                ui.label(group_digits(stats.resident_points));
                ui.end_row();

                ui.label("Points per batch");
                ui.label(group_digits(stats.points_per_batch as u64));
                ui.end_row();

                ui.label("Batches");
                ui.label(format!("{} ({} shown)", stats.batch_count, stats.shown.len()));
                ui.end_row();

                ui.label("Pending uploads");
                ui.label(stats.pending_uploads.to_string());
                ui.end_row();

                ui.label("TpW");
                ui.label(stats.threads_per_workgroup.to_string());
                ui.end_row();

                ui.label("Workgroups");
                ui.label(match stats.workgroups {
                    Some([x, y, z]) => format!("{x} × {y} × {z}"),
                    None => "-".to_string(),
                });
                ui.end_row();
            });

            ui.separator();
            ui.label(format!("Batches shown: {}", join_list(stats.shown)));
            ui.label(format!("Render types: {}", join_list(stats.render_levels)));

            if let Some((name, loaded, total)) = stats.loading {
                ui.separator();
                match total {
                    Some(total) if total > 0 => {
                        ui.add(
                            egui::ProgressBar::new(loaded as f32 / total as f32)
                                .text(format!("{name}: {}", group_digits(loaded))),
                        );
                    }
                    _ => {
                        ui.label(format!("Loading {name}: {}", group_digits(loaded)));
                    }
                }
            }

            ui.separator();
            ui.horizontal(|ui| {
                egui::ComboBox::from_label("Quality")
                    .selected_text(quality.as_str())
                    .show_ui(ui, |ui| {
                        for option in RenderQuality::ALL {
                            ui.selectable_value(quality, option, option.as_str());
                        }
                    });

                if ui.button("View to model").clicked() {
                    actions.view_to_model = true;
                }
            });
        });

    actions
}
