//! User-facing progress reporting
//!
//! Components receive a `&dyn Reporter` instead of printing directly, so a
//! run can be silenced or captured independently of any other run.

use std::sync::Mutex;

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, Color, Table};

use crate::package::SourceArtifact;

pub trait Reporter {
    /// Open a named group of related output
    fn group_start(&self, title: &str);

    /// Close the most recently opened group
    fn group_end(&self);

    fn info(&self, msg: &str);

    fn success(&self, msg: &str);

    fn warning(&self, msg: &str);

    /// Show the packages found by a scan
    fn summary(&self, artifacts: &[&SourceArtifact]);
}

/// Run `f` inside a reporter group, closing it whatever `f` returns
pub fn in_group<T>(reporter: &dyn Reporter, title: &str, f: impl FnOnce() -> T) -> T {
    reporter.group_start(title);
    let result = f();
    reporter.group_end();
    result
}

/// Prints to stdout, optionally with GitHub Actions log groups
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter {
    github_groups: bool,
}

impl ConsoleReporter {
    pub fn new(github_groups: bool) -> Self {
        Self { github_groups }
    }
}

impl Reporter for ConsoleReporter {
    fn group_start(&self, title: &str) {
        if self.github_groups {
            println!("::group::{}", title);
        } else {
            println!("{}", title.cyan().bold());
        }
    }

    fn group_end(&self) {
        if self.github_groups {
            println!("::endgroup::");
        }
    }

    fn info(&self, msg: &str) {
        println!("  {}", msg);
    }

    fn success(&self, msg: &str) {
        println!("{} {}", "✓".green(), msg);
    }

    fn warning(&self, msg: &str) {
        println!("{} {}", "!".yellow().bold(), msg);
    }

    fn summary(&self, artifacts: &[&SourceArtifact]) {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL).set_header(vec![
            Cell::new("Filename"),
            Cell::new("Package Name"),
            Cell::new("Version"),
            Cell::new("Arch"),
        ]);

        for artifact in artifacts {
            let desc = &artifact.descriptor;
            table.add_row(vec![
                Cell::new(artifact.source_name()).fg(Color::Cyan),
                Cell::new(&desc.name).fg(Color::Magenta),
                Cell::new(&desc.version)
                    .fg(Color::Green)
                    .set_alignment(CellAlignment::Right),
                Cell::new(&desc.architecture)
                    .fg(Color::Yellow)
                    .set_alignment(CellAlignment::Right),
            ]);
        }

        println!("{}", "APK Summary".bold());
        println!("{table}");
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn group_start(&self, _: &str) {}
    fn group_end(&self) {}
    fn info(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: &[&SourceArtifact]) {}
}

/// Records output as plain lines
#[derive(Debug, Default)]
pub struct MemoryReporter {
    lines: Mutex<Vec<String>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }
}

impl Reporter for MemoryReporter {
    fn group_start(&self, title: &str) {
        self.push(format!("[group] {}", title));
    }

    fn group_end(&self) {
        self.push("[endgroup]".to_string());
    }

    fn info(&self, msg: &str) {
        self.push(msg.to_string());
    }

    fn success(&self, msg: &str) {
        self.push(format!("[ok] {}", msg));
    }

    fn warning(&self, msg: &str) {
        self.push(format!("[warn] {}", msg));
    }

    fn summary(&self, artifacts: &[&SourceArtifact]) {
        for artifact in artifacts {
            let desc = &artifact.descriptor;
            self.push(format!(
                "{} {} {} {}",
                artifact.source_name(),
                desc.name,
                desc.version,
                desc.architecture
            ));
        }
    }
}
