use gtrack::engine::progress::{Progress, ProgressCallback};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const SPINNER_TICK_MS: u64 = 100;
const PHASE_TEMPLATE: &str = "{spinner:.green} {prefix:<9} {msg}";
const ANNEALING_TEMPLATE: &str =
    "{spinner:.green} {prefix:<9} [{bar:32.cyan/blue}] {pos}/{len} updates  {msg}";

/// Terminal view of a tracking run.
///
/// Setup and export show a spinner. During sampling the bar advances once per temperature
/// update and its message carries the current temperature, particle count and acceptance.
#[derive(Clone)]
pub struct CliProgressHandler {
    bar: ProgressBar,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        let bar = ProgressBar::with_draw_target(None, target).with_style(style(PHASE_TEMPLATE));
        Self { bar }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let bar = self.bar.clone();
        Box::new(move |event| render(&bar, event))
    }
}

impl Default for CliProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn render(bar: &ProgressBar, event: Progress) {
    match event {
        Progress::PhaseStart { name } => {
            bar.reset();
            bar.set_style(style(PHASE_TEMPLATE));
            bar.set_prefix(name);
            bar.set_message("");
            bar.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
        }
        Progress::PhaseFinish => {
            bar.disable_steady_tick();
            bar.finish_with_message("done");
        }
        Progress::SamplingStart { total_updates } => {
            bar.set_style(style(ANNEALING_TEMPLATE).progress_chars("=> "));
            bar.set_length(total_updates);
            bar.set_position(0);
            bar.set_message("warming up");
        }
        Progress::Annealed {
            temperature,
            particles,
            acceptance,
        } => {
            bar.set_message(annealing_message(temperature, particles, acceptance));
            bar.inc(1);
        }
        Progress::SamplingFinish => {
            if let Some(length) = bar.length() {
                bar.set_position(length);
            }
        }
        Progress::Message(msg) => bar.println(format!("  {}", msg)),
    }
}

fn annealing_message(temperature: f64, particles: usize, acceptance: f64) -> String {
    format!(
        "T = {:.2e} | {} particles | {:.1}% accepted",
        temperature,
        particles,
        100.0 * acceptance
    )
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}
