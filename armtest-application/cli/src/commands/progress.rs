//! 部署进度渲染 (indicatif spinner)

use armtest_executor::{ProgressEvent, ProgressRenderer};
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

use super::common::format_elapsed;

/// 每个部署一个 spinner
pub struct SpinnerRenderer {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    style: ProgressStyle,
}

impl SpinnerRenderer {
    pub fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            style,
        }
    }

    fn bar(&mut self, deployment_id: &str) -> &ProgressBar {
        let multi = &self.multi;
        let style = &self.style;
        self.bars.entry(deployment_id.to_string()).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new_spinner());
            bar.set_style(style.clone());
            bar.set_prefix(deployment_id.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        })
    }
}

impl ProgressRenderer for SpinnerRenderer {
    fn render(&mut self, event: &ProgressEvent) {
        let elapsed = format_elapsed(event.elapsed);
        let terminal = event.state.is_terminal();
        let bar = self.bar(&event.deployment_id);

        if terminal {
            let phase = if event.phase == "Succeeded" {
                event.phase.green()
            } else {
                event.phase.red()
            };
            bar.finish_with_message(format!("{} ({})", phase, elapsed));
        } else {
            bar.set_message(format!("{} ({})", event.phase.yellow(), elapsed));
        }
    }

    fn finish(&mut self) {
        for bar in self.bars.values() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }
}
