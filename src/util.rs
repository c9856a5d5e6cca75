use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

/// Convert a byte count into a human readable string using IEC units (KiB/MiB/GiB).
pub fn human_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GiB", b / GB)
    } else if b >= MB {
        format!("{:.2} MiB", b / MB)
    } else if b >= KB {
        format!("{:.2} KiB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Linear backoff: the wait after failed attempt `i` (0-based) is `backoff_step * i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: usize,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 10, backoff_step: Duration::from_secs(5) }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.backoff_step.saturating_mul(attempt as u32)
    }

    pub fn total_attempts(&self) -> usize {
        self.max_retries + 1
    }
}

/// Generic retry helper. `op` receives the 0-based attempt index; after a failure
/// the helper sleeps `policy.delay_for(attempt)` through `sleep` and tries again,
/// returning the last error once `policy.max_retries` retries are spent.
pub fn retry_operation<F, T, E>(
    policy: &RetryPolicy,
    sleep: &mut dyn FnMut(Duration),
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(usize) -> Result<T, E>,
    E: std::fmt::Display,
{
    let mut attempt = 0usize;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= policy.max_retries => return Err(e),
            Err(e) => {
                let wait = policy.delay_for(attempt);
                tracing::info!(
                    attempt = attempt + 1,
                    wait_secs = wait.as_secs(),
                    error = %e,
                    "attempt failed, retrying"
                );
                sleep(wait);
                attempt += 1;
            }
        }
    }
}

/// Progress bar over the files selected for download; hidden unless requested.
pub fn init_progress(visible: bool, total_files: u64) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total_files);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}",
    )
    .map(|s| s.progress_chars("=> "))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Print a concise summary line for a completed run.
pub fn print_summary(files: u64, total_bytes: u64, elapsed_secs: f64, failures: usize) {
    let rate = if elapsed_secs > 0.0 {
        total_bytes as f64 / 1024.0 / 1024.0 / elapsed_secs
    } else {
        0.0
    };
    let head = format!("{} files, {}", files, human_bytes(total_bytes));
    let tail = format!("{:.2} MB/s in {:.2}s", rate, elapsed_secs);
    if failures == 0 {
        println!("{} | {}", head.green(), tail.cyan());
    } else {
        println!("{} | {} | {}", head.yellow(), tail.cyan(), format!("{} failed", failures).red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(10), "10 B");
        assert_eq!(human_bytes(2048), "2.00 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.00 MiB");
    }

    #[test]
    fn linear_delays() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(0), Duration::ZERO);
        assert_eq!(p.delay_for(1), Duration::from_secs(5));
        assert_eq!(p.delay_for(3), Duration::from_secs(15));
        assert_eq!(p.total_attempts(), 11);
    }

    #[test]
    fn retries_until_success_with_growing_waits() {
        let waits = RefCell::new(Vec::new());
        let mut sleep = |d: Duration| waits.borrow_mut().push(d);
        let res: Result<&str, String> =
            retry_operation(&RetryPolicy::default(), &mut sleep, |attempt| {
                if attempt < 2 { Err(format!("transient {}", attempt)) } else { Ok("ok") }
            });
        assert_eq!(res.unwrap(), "ok");
        assert_eq!(*waits.borrow(), vec![Duration::ZERO, Duration::from_secs(5)]);
    }

    #[test]
    fn gives_up_after_ceiling_with_last_error() {
        let policy = RetryPolicy { max_retries: 3, backoff_step: Duration::from_millis(1) };
        let mut calls = 0;
        let mut sleeps = 0;
        let mut sleep = |_d: Duration| sleeps += 1;
        let res: Result<(), String> = retry_operation(&policy, &mut sleep, |attempt| {
            calls += 1;
            Err(format!("fail {}", attempt))
        });
        assert_eq!(res.unwrap_err(), "fail 3");
        assert_eq!(calls, 4);
        assert_eq!(sleeps, 3);
    }
}
