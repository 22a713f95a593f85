use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const BAR_TEMPLATE: &str =
    "{prefix:.bold} {msg} [{elapsed_precise}] {bar:40.green/black} {pos:>6}/{len:6} ETA {eta}";
const SPINNER_TEMPLATE: &str = "{prefix:.bold} {spinner:.yellow} {msg} [{elapsed_precise}]";

fn style(template: &str, spinner: bool) -> ProgressStyle {
    let fallback = if spinner {
        ProgressStyle::default_spinner()
    } else {
        ProgressStyle::default_bar()
    };
    ProgressStyle::with_template(template).unwrap_or(fallback)
}

/// Bar over `len` sequences; hidden when `enabled` is false.
pub fn sequences(len: u64, prefix: &str, msg: &str, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::with_draw_target(Some(len), ProgressDrawTarget::stderr_with_hz(10));
    pb.set_style(style(BAR_TEMPLATE, false).progress_chars("=> "));
    pb.set_prefix(prefix.to_string());
    pb.set_message(msg.to_string());
    pb
}

/// Spinner for a single long training call.
pub fn training(prefix: &str, msg: &str, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr_with_hz(10));
    pb.set_style(style(SPINNER_TEMPLATE, true));
    pb.set_prefix(prefix.to_string());
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
