//! Build artifact accumulated from the compile stream

use cloud_api::Diagnostic;
use serde::Serialize;

use crate::compile::diagnostics::{parse_errors, ParsedError};
use crate::compile::stream::StreamFrame;
use crate::utils::line_count;

/// Console text produced before compilation started (IoT readiness message).
///
/// It is prepended to the compile output once the compilation settles, and
/// every line number derived from the compile output is shifted past it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreCompileOutput {
    pub output: String,
    pub stdout: String,
    pub stderr: String,
}

impl PreCompileOutput {
    pub fn stdout(message: &str) -> Self {
        Self {
            output: message.to_string(),
            stdout: message.to_string(),
            stderr: String::new(),
        }
    }
}

/// Output of a compilation.
///
/// `stdout` and `stderr` grow while the stream is open; `output` and the line
/// bookkeeping are only meaningful once `settled` is true.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildArtifact {
    pub stdout: String,
    pub stderr: String,
    pub output: String,
    pub diagnostics: Vec<Diagnostic>,
    pub builder_error: Option<String>,
    pub result_messages: Option<String>,
    pub error_files: Vec<String>,
    pub errors: Vec<ParsedError>,
    pub warn_line_start: Option<usize>,
    pub warn_line_end: Option<usize>,
    pub output_line_end: Option<usize>,
    pub status: Option<String>,
    pub progress: u8,
    pub failed: bool,
    pub settled: bool,
    pub pre_compile: Option<PreCompileOutput>,
    /// Parsed error rows are one past the user's source
    #[serde(skip)]
    pub secrets_include_injected: bool,
}

impl BuildArtifact {
    pub fn new(pre_compile: Option<PreCompileOutput>) -> Self {
        Self {
            pre_compile,
            ..Default::default()
        }
    }

    pub fn with_secrets_include(mut self, injected: bool) -> Self {
        self.secrets_include_injected = injected;
        self
    }

    /// Fold one stream frame into the artifact
    pub fn apply(&mut self, frame: &StreamFrame, sketch_name: &str) {
        match frame {
            StreamFrame::Stdout(lines) => self.stdout.push_str(lines),
            StreamFrame::Stderr(lines) => self.stderr.push_str(lines),
            StreamFrame::Status(status) => self.status = Some(status.clone()),
            StreamFrame::Progress(progress) => self.progress = *progress,
            StreamFrame::Result {
                diagnostics,
                builder_error,
            } => self.finalize(diagnostics.clone(), builder_error.clone(), sketch_name),
            StreamFrame::Error(_) => {}
        }
    }

    /// Finalize from the stream's result.
    ///
    /// `failed` follows the presence of `diagnostics`, not its length: a
    /// result carrying an empty list is still a failure.
    pub fn finalize(
        &mut self,
        diagnostics: Option<Vec<Diagnostic>>,
        builder_error: Option<String>,
        sketch_name: &str,
    ) {
        self.failed = diagnostics.is_some();
        let diagnostics = diagnostics.unwrap_or_default();

        let mut messages: Vec<String> = diagnostics.iter().map(|d| d.message.clone()).collect();
        if let Some(err) = &builder_error {
            if !messages.contains(err) {
                messages.push(err.clone());
            }
        }

        let mut error_files: Vec<String> = Vec::new();
        for diagnostic in &diagnostics {
            if !diagnostic.file.is_empty() && !error_files.contains(&diagnostic.file) {
                error_files.push(diagnostic.file.clone());
            }
        }

        self.result_messages = (!messages.is_empty()).then(|| messages.join("\n"));
        self.error_files = error_files;
        self.diagnostics = diagnostics;

        let layout = layout_output(&self.stdout, &self.stderr, sketch_name, builder_error.as_deref());
        self.builder_error = builder_error;
        self.errors = layout.errors;
        if self.secrets_include_injected {
            for error in &mut self.errors {
                error.row = error.row.saturating_sub(1);
            }
        }
        self.apply_layout(layout.output, layout.warn_line_start, layout.warn_line_end, layout.output_line_end);
        self.settled = true;
    }

    fn apply_layout(
        &mut self,
        output: String,
        warn_line_start: Option<usize>,
        warn_line_end: Option<usize>,
        output_line_end: usize,
    ) {
        let Some(pre) = self.pre_compile.as_ref() else {
            self.output = output;
            self.warn_line_start = warn_line_start;
            self.warn_line_end = warn_line_end;
            self.output_line_end = Some(output_line_end);
            return;
        };

        let offset = if pre.output.is_empty() { 0 } else { line_count(&pre.output) };

        if !self.stdout.is_empty() && !pre.stdout.is_empty() {
            self.stdout = format!("{}\n{}", pre.stdout, self.stdout);
        }
        if !self.stderr.is_empty() && !pre.stderr.is_empty() {
            self.stderr = format!("{}\n{}", pre.stderr, self.stderr);
        }
        self.output = if pre.output.is_empty() {
            output
        } else {
            format!("{}\n{}", pre.output, output)
        };
        self.warn_line_start = warn_line_start.map(|l| l + offset);
        self.warn_line_end = warn_line_end.map(|l| l + offset);
        self.output_line_end = Some(output_line_end + offset);
    }
}

/// Console layout of a finished compilation
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLayout {
    pub output: String,
    pub errors: Vec<ParsedError>,
    pub warn_line_start: Option<usize>,
    pub warn_line_end: Option<usize>,
    pub output_line_end: usize,
    /// An error keyword appears in the raw output
    pub error_keyword: bool,
}

/// Join stdout and stderr into one console text and locate the range to highlight.
///
/// A builder error with no stderr replaces the whole output. Otherwise the
/// highlighted range covers stderr, and starts at the top when stdout carries
/// an `[error]` or `#error` marker.
pub fn layout_output(
    stdout: &str,
    stderr: &str,
    sketch_name: &str,
    builder_error: Option<&str>,
) -> OutputLayout {
    if let Some(err) = builder_error.filter(|_| stderr.is_empty()) {
        return OutputLayout {
            output: err.to_string(),
            errors: Vec::new(),
            warn_line_start: Some(1),
            warn_line_end: Some(line_count(err)),
            output_line_end: 1,
            error_keyword: true,
        };
    }

    let errors = if !stderr.is_empty() && !sketch_name.is_empty() {
        parse_errors(stderr, sketch_name)
    } else {
        Vec::new()
    };

    let keyword_in_stderr = stderr.contains("error");
    let keyword_in_stdout = stdout.contains("[error]") || stdout.contains("#error");

    let stdout_line_count = (!stdout.is_empty()).then(|| line_count(stdout));
    let stdout_line_start = (!stdout.is_empty()).then_some(1);

    let stderr_line_start = match (stdout_line_count, stderr.is_empty()) {
        (_, true) => None,
        (Some(count), false) => Some(count + 1),
        (None, false) => Some(1),
    };
    let stderr_line_end = stderr_line_start.map(|start| start + line_count(stderr));

    let warn_line_start = if keyword_in_stdout {
        stdout_line_start
    } else {
        stderr_line_start
    };
    let warn_line_end = if stderr_line_end.is_some() {
        stderr_line_end
    } else if keyword_in_stdout {
        stdout_line_count
    } else {
        None
    };

    let output = [stdout, stderr]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    let output_line_end = line_count(&output);

    OutputLayout {
        output,
        errors,
        warn_line_start,
        warn_line_end,
        output_line_end,
        error_keyword: keyword_in_stderr || keyword_in_stdout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::stream::parse_frame;

    fn diagnostic(file: &str, message: &str) -> Diagnostic {
        Diagnostic {
            file: file.to_string(),
            message: message.to_string(),
            line: None,
            column: None,
            severity: None,
        }
    }

    #[test]
    fn test_layout_stdout_only() {
        let layout = layout_output("Sketch uses 924 bytes\nGlobal variables use 9 bytes", "", "Blink", None);
        assert_eq!(layout.output_line_end, 2);
        assert_eq!(layout.warn_line_start, None);
        assert_eq!(layout.warn_line_end, None);
        assert!(!layout.error_keyword);
    }

    #[test]
    fn test_layout_with_stderr() {
        let layout = layout_output("a\nb", "Blink/Blink.ino:3:1: error: x", "Blink", None);
        assert_eq!(layout.output, "a\nb\n\nBlink/Blink.ino:3:1: error: x");
        assert_eq!(layout.warn_line_start, Some(3));
        assert_eq!(layout.warn_line_end, Some(4));
        assert_eq!(layout.output_line_end, 4);
        assert_eq!(layout.errors.len(), 1);
    }

    #[test]
    fn test_layout_error_marker_in_stdout() {
        let layout = layout_output("[error] missing core\nmore", "", "Blink", None);
        assert_eq!(layout.warn_line_start, Some(1));
        assert_eq!(layout.warn_line_end, Some(2));
    }

    #[test]
    fn test_layout_builder_error_without_stderr() {
        let layout = layout_output("ignored", "", "Blink", Some("platform not installed\nretry later"));
        assert_eq!(layout.output, "platform not installed\nretry later");
        assert_eq!(layout.warn_line_start, Some(1));
        assert_eq!(layout.warn_line_end, Some(2));
        assert_eq!(layout.output_line_end, 1);
    }

    #[test]
    fn test_apply_frames_and_settle() {
        let mut artifact = BuildArtifact::new(None);
        artifact.apply(&StreamFrame::Stdout("Compiling...\n".to_string()), "Blink");
        artifact.apply(&StreamFrame::Progress(40), "Blink");
        artifact.apply(&StreamFrame::Stdout("Linking".to_string()), "Blink");
        assert!(!artifact.settled);
        assert_eq!(artifact.stdout, "Compiling...\nLinking");

        artifact.apply(
            &StreamFrame::Result {
                diagnostics: None,
                builder_error: None,
            },
            "Blink",
        );
        assert!(artifact.settled);
        assert!(!artifact.failed);
        assert_eq!(artifact.result_messages, None);
        assert_eq!(artifact.progress, 40);
    }

    #[test]
    fn test_failed_result_collects_messages() {
        let mut artifact = BuildArtifact::new(None);
        artifact.stderr = "Blink/Blink.ino:2:3: error: boom".to_string();
        artifact.finalize(
            Some(vec![diagnostic("Blink.ino", "boom"), diagnostic("Blink.ino", "bang")]),
            Some("exit status 1".to_string()),
            "Blink",
        );
        assert!(artifact.failed);
        assert!(artifact.settled);
        assert_eq!(artifact.error_files, vec!["Blink.ino".to_string()]);
        assert_eq!(artifact.result_messages.as_deref(), Some("boom\nbang\nexit status 1"));
        assert_eq!(artifact.errors.len(), 1);
    }

    #[test]
    fn test_injected_include_shifts_error_rows() {
        let stderr = "/tmp/Blink/Blink.ino:7:3: error: 'led' was not declared\n\
                      /tmp/Blink/helpers.ino:2:1: error: expected ';'\n";
        let mut artifact = BuildArtifact::new(None).with_secrets_include(true);
        artifact.stderr = stderr.to_string();
        artifact.finalize(Some(Vec::new()), None, "Blink");

        let rows: Vec<u32> = artifact.errors.iter().map(|e| e.row).collect();
        assert_eq!(rows, vec![6, 1]);

        let mut plain = BuildArtifact::new(None);
        plain.stderr = stderr.to_string();
        plain.finalize(Some(Vec::new()), None, "Blink");
        assert_eq!(plain.errors[0].row, 7);
    }

    #[test]
    fn test_empty_diagnostics_list_fails() {
        let frame = parse_frame("result", r#"{"status":"completed","diagnostics":[]}"#).unwrap();
        let mut artifact = BuildArtifact::new(None);
        artifact.apply(&frame, "Blink");

        assert!(artifact.settled);
        assert!(artifact.failed);
        assert!(artifact.diagnostics.is_empty());
        assert_eq!(artifact.result_messages, None);
    }

    #[test]
    fn test_pre_compile_output_shifts_lines() {
        let mut artifact = BuildArtifact::new(Some(PreCompileOutput::stdout("Device ready\nfor OTA")));
        artifact.stdout = "one".to_string();
        artifact.stderr = "two error".to_string();
        artifact.finalize(None, None, "Blink");

        assert_eq!(artifact.output, "Device ready\nfor OTA\none\n\ntwo error");
        assert_eq!(artifact.stdout, "Device ready\nfor OTA\none");
        assert_eq!(artifact.warn_line_start, Some(4));
        assert_eq!(artifact.warn_line_end, Some(5));
        assert_eq!(artifact.output_line_end, Some(5));
    }
}
