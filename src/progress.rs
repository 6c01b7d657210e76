use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

/// A progress bar for one pipeline stage, or a hidden one when progress
/// output is disabled.
pub fn stage_bar(len: usize, label: &str, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    match ProgressStyle::with_template("{prefix:>12.cyan.bold} [{bar:40.green}] {pos}/{len} {wide_msg}")
    {
        Ok(style) => bar.set_style(style.progress_chars("=> ")),
        Err(e) => log::debug!("Falling back to default progress style: {}", e),
    }
    bar.set_prefix(label.to_string());
    bar
}

/// Run `f()`, log how long it took (with `label`), and return its result.
pub fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    log::info!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
