use std::io::IsTerminal;

use anstyle::{AnsiColor, Effects, Style};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputStyle {
    Plain,
    Rich,
}

#[derive(Copy, Clone, Debug)]
pub struct TerminalRenderer {
    style: OutputStyle,
}

impl TerminalRenderer {
    pub fn current() -> Self {
        Self {
            style: resolve_output_style(std::io::stdout().is_terminal()),
        }
    }

    pub fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }
}

pub fn resolve_output_style(stdout_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    let badge = status_badge(status);
    match style {
        OutputStyle::Plain => format!("{badge} {message}"),
        OutputStyle::Rich => format!("{} {message}", colorize(status_style(status), &badge)),
    }
}

fn status_badge(status: &str) -> String {
    format!("[{}]", status.to_ascii_uppercase())
}

fn status_style(status: &str) -> Style {
    let color = match status {
        "ok" => AnsiColor::Green,
        "warn" => AnsiColor::Yellow,
        "fail" => AnsiColor::Red,
        _ => AnsiColor::BrightBlue,
    };
    Style::new()
        .fg_color(Some(color.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}
