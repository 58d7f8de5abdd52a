use scorecard_common::types::{Labels, RunReport, TestSpec, TestState};
use scorecard_common::{Result, ScorecardError};
use serde::Serialize;
use std::fmt::{self, Write as _};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = ScorecardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(ScorecardError::Config(format!(
                "invalid output format '{}', expected text or json",
                other
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

const RULE: &str = "--------------------------------------------------------------------------------";

/// Render a report. Pure: the same report always renders to the same bytes.
pub fn render(report: &RunReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(report),
        OutputFormat::Text => Ok(render_text(report)),
    }
}

/// Render the tests a run would launch, without running them.
pub fn render_list(tests: &[&TestSpec], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct Listing<'a> {
                tests: &'a [&'a TestSpec],
            }
            to_json(&Listing { tests })
        }
        OutputFormat::Text => {
            let mut out = String::new();
            for test in tests {
                let _ = writeln!(out, "{}", RULE);
                let _ = writeln!(out, "Name:        {}", test.name);
                let _ = writeln!(out, "Image:       {}", test.image);
                if let Some(entrypoint) = &test.entrypoint {
                    let _ = writeln!(out, "Entrypoint:  {}", entrypoint);
                }
                if !test.description.is_empty() {
                    let _ = writeln!(out, "Description: {}", test.description);
                }
                write_labels(&mut out, &test.labels);
            }
            let _ = writeln!(out, "{}", RULE);
            let _ = writeln!(out, "{} test(s) selected", tests.len());
            Ok(out)
        }
    }
}

fn render_text(report: &RunReport) -> String {
    let mut out = String::new();
    for result in &report.results {
        let _ = writeln!(out, "{}", RULE);
        let _ = writeln!(out, "Name:        {}", result.name);
        if !result.description.is_empty() {
            let _ = writeln!(out, "Description: {}", result.description);
        }
        write_labels(&mut out, &result.labels);
        let _ = writeln!(out, "State:       {}", result.state);
        write_list(&mut out, "Errors", &result.errors);
        write_list(&mut out, "Suggestions", &result.suggestions);
        if !result.log.is_empty() {
            let _ = writeln!(out, "Log:");
            for line in result.log.lines() {
                let _ = writeln!(out, "    {}", line);
            }
        }
    }
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(
        out,
        "Total: {}, pass: {}, fail: {}, error: {}",
        report.results.len(),
        report.count(TestState::Pass),
        report.count(TestState::Fail),
        report.count(TestState::Error)
    );
    out
}

fn write_labels(out: &mut String, labels: &Labels) {
    if labels.is_empty() {
        return;
    }
    let _ = writeln!(out, "Labels:");
    for (key, value) in labels {
        let _ = writeln!(out, "    {}={}", key, value);
    }
}

fn write_list(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "{}:", title);
    for item in items {
        let _ = writeln!(out, "    - {}", item);
    }
}

/// Rendered documents end with a newline, like the text format.
fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut document =
        serde_json::to_string_pretty(value).map_err(|e| ScorecardError::Serialization(e.to_string()))?;
    document.push('\n');
    Ok(document)
}
