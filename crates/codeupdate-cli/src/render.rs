use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use codeupdate_core::Phase;
use codeupdate_installer::{DownloadProgress, TeardownReport};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

use crate::orchestrator::RunReporter;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    if console::Term::stdout().is_term() {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

/// Plain output carries the message only; rich output prefixes an ASCII badge.
pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let badge = match status {
                "ok" => "[OK]",
                "warn" => "[WARN]",
                "err" => "[ERR]",
                _ => "[..]",
            };
            format!("{badge} {message}")
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    pub(crate) fn eprint_status(self, status: &str, message: &str) {
        eprintln!("{}", render_status_line(self.style, status, message));
    }

    pub(crate) fn print_section(self, title: &str) {
        if self.style == OutputStyle::Rich {
            println!();
            println!("{}", colorize(section_style(), &format!("== {title} ==")));
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }

    fn start_progress(self, label: &str, total: u64, offset: u64) -> TerminalProgress {
        let progress_bar = if self.style == OutputStyle::Rich {
            let progress_bar = ProgressBar::new(total.max(1));
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} {msg:<10} [{bar:24.cyan/blue}] {bytes:>10}/{total_bytes:10} {bytes_per_sec:>12} {eta}",
            ) {
                progress_bar.set_style(style.tick_chars("<^>v ").progress_chars("=>-"));
            }
            progress_bar.set_message(label.to_string());
            progress_bar.set_position(offset.min(total.max(1)));
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };

        TerminalProgress {
            style: self.style,
            label: label.to_string(),
            total,
            offset,
            current: offset,
            progress_bar,
            started_at: Instant::now(),
        }
    }
}

struct TerminalProgress {
    style: OutputStyle,
    label: String,
    total: u64,
    offset: u64,
    current: u64,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

impl TerminalProgress {
    fn set(&mut self, current: u64) {
        self.current = current.min(self.total);

        let Some(progress_bar) = &self.progress_bar else {
            return;
        };

        let safe_total = self.total.max(1);
        progress_bar.set_length(safe_total);
        progress_bar.set_position(self.current.min(safe_total));
    }

    fn suspend<F: FnOnce()>(&self, print: F) {
        match &self.progress_bar {
            Some(progress_bar) => progress_bar.suspend(print),
            None => print(),
        }
    }

    fn finish_success(mut self) -> Option<String> {
        let progress_bar = self.progress_bar.take()?;
        progress_bar.finish_and_clear();
        render_progress_line(
            self.style,
            &self.label,
            self.current,
            self.total,
            self.offset,
            Some(self.started_at.elapsed()),
        )
    }

    fn finish_abandon(mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

/// Console side of a run: phase lines on stdout, warnings and errors on stderr.
pub(crate) struct ConsoleReporter {
    renderer: TerminalRenderer,
    progress: Option<TerminalProgress>,
}

impl ConsoleReporter {
    pub(crate) fn new(style: OutputStyle) -> Self {
        Self {
            renderer: TerminalRenderer::from_style(style),
            progress: None,
        }
    }

    pub(crate) fn renderer(&self) -> TerminalRenderer {
        self.renderer
    }

    fn abandon_progress(&mut self) {
        if let Some(progress) = self.progress.take() {
            progress.finish_abandon();
        }
    }
}

impl DownloadProgress for ConsoleReporter {
    fn begin(&mut self, total: u64, offset: u64) {
        self.abandon_progress();
        if offset > 0 {
            self.renderer.print_status(
                "step",
                &format!(
                    "resuming download at {} of {}",
                    HumanBytes(offset),
                    HumanBytes(total)
                ),
            );
        }
        self.progress = Some(self.renderer.start_progress("download", total, offset));
    }

    fn advance(&mut self, bytes_on_disk: u64) {
        if let Some(progress) = self.progress.as_mut() {
            progress.set(bytes_on_disk);
        }
    }

    fn retry(&mut self, attempt: u32, max_attempts: u32, error: &str) {
        let line = render_status_line(
            self.renderer.style(),
            "warn",
            &format!("download attempt {attempt}/{max_attempts} failed: {error}"),
        );
        match self.progress.take() {
            Some(progress) => {
                progress.suspend(|| eprintln!("{line}"));
                progress.finish_abandon();
            }
            None => eprintln!("{line}"),
        }
    }

    fn finish(&mut self) {
        if let Some(progress) = self.progress.take() {
            if let Some(line) = progress.finish_success() {
                println!("{line}");
            }
        }
    }
}

impl RunReporter for ConsoleReporter {
    fn phase_started(&mut self, phase: Phase) {
        self.abandon_progress();
        self.renderer.print_section(phase_title(phase));
    }

    fn phase_note(&mut self, message: &str) {
        self.renderer.print_status("step", message);
    }

    fn phase_warning(&mut self, message: &str) {
        self.abandon_progress();
        self.renderer.eprint_status("warn", message);
    }

    fn teardown_finished(&mut self, report: &TeardownReport) {
        self.abandon_progress();
        for (handle, reason) in &report.failed {
            self.renderer
                .eprint_status("warn", &format!("cleanup left {handle} behind: {reason}"));
        }
    }

    fn download_progress(&mut self) -> &mut dyn DownloadProgress {
        self
    }
}

fn phase_title(phase: Phase) -> &'static str {
    match phase {
        Phase::DetectSystem => "Detecting system",
        Phase::AcquireLock => "Acquiring update lock",
        Phase::CheckVersion => "Checking installed version",
        Phase::CheckTargetProcess => "Checking running application",
        Phase::Backup => "Running backup",
        Phase::Download => "Downloading package",
        Phase::VerifyArtifact => "Verifying package",
        Phase::Install => "Installing package",
        Phase::ReportSuccess => "Finishing",
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn progress_bar_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::BrightBlue.into()))
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub(crate) fn render_progress_line(
    style: OutputStyle,
    label: &str,
    current: u64,
    total: u64,
    resumed_from: u64,
    elapsed: Option<Duration>,
) -> Option<String> {
    if style == OutputStyle::Plain {
        return None;
    }

    let width = 18_usize;
    let safe_total = total.max(1);
    let bounded_current = current.min(safe_total);
    let filled = ((bounded_current as u128 * width as u128) / safe_total as u128) as usize;
    let bar = format!(
        "{}{}",
        "=".repeat(filled),
        "-".repeat(width.saturating_sub(filled))
    );
    let percent = (bounded_current as u128 * 100) / safe_total as u128;
    let counts = format!("{}/{}", HumanBytes(current), HumanBytes(total));
    let resumed = if resumed_from > 0 {
        format!(" (resumed at {})", HumanBytes(resumed_from))
    } else {
        String::new()
    };
    let suffix = elapsed
        .map(|value| format!(" complete in {}", format_elapsed(value)))
        .unwrap_or_default();

    Some(format!(
        "{} [{}] {:>3}% {}{}{}",
        colorize(progress_label_style(), label),
        colorize(progress_bar_style(), &bar),
        percent,
        counts,
        resumed,
        suffix
    ))
}
