/// Result classification
///
/// Pure function from a finished run to an [`ExecutionReport`]. Judge
/// actions (the runner's timeout kill) take precedence over anything the
/// child printed.
use crate::config::types::{ErrorClass, SandboxCapability};
use crate::exec::runner::RunOutcome;
use crate::verdict::report::{ErrorContext, ExecutionReport};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;

/// One row of the stderr signature table.
#[derive(Debug, Clone, Copy)]
pub struct ErrorSignature {
    pub pattern: &'static str,
    pub class: ErrorClass,
}

/// Ordered; the first matching row wins.
pub const ERROR_SIGNATURES: &[ErrorSignature] = &[
    ErrorSignature {
        pattern: r"\bSyntaxError\b|\bIndentationError\b|\bTabError\b",
        class: ErrorClass::Syntax,
    },
    ErrorSignature {
        pattern: r"\bMemoryError\b",
        class: ErrorClass::ResourceExceeded,
    },
    ErrorSignature {
        pattern: r"BlockingIOError: \[Errno 11\]|Resource temporarily unavailable|can't start new thread",
        class: ErrorClass::ResourceExceeded,
    },
    ErrorSignature {
        pattern: r"\bModuleNotFoundError\b|\bImportError\b",
        class: ErrorClass::MissingModule,
    },
    ErrorSignature {
        pattern: r"\bKeyError\b",
        class: ErrorClass::KeyError,
    },
    ErrorSignature {
        pattern: r"\bAttributeError\b",
        class: ErrorClass::AttributeError,
    },
    ErrorSignature {
        pattern: r"\bValueError\b",
        class: ErrorClass::ValueError,
    },
    ErrorSignature {
        pattern: r"\bTypeError\b",
        class: ErrorClass::TypeError,
    },
    ErrorSignature {
        pattern: r"\bNameError\b|\bUnboundLocalError\b",
        class: ErrorClass::NameError,
    },
    ErrorSignature {
        pattern: r"\bZeroDivisionError\b",
        class: ErrorClass::ZeroDivision,
    },
    ErrorSignature {
        pattern: r"\bIndexError\b",
        class: ErrorClass::IndexError,
    },
];

static COMPILED_SIGNATURES: Lazy<Vec<(Regex, ErrorClass)>> = Lazy::new(|| {
    ERROR_SIGNATURES
        .iter()
        .filter_map(|sig| match Regex::new(sig.pattern) {
            Ok(re) => Some((re, sig.class)),
            Err(e) => {
                log::error!("Invalid error signature {:?}: {}", sig.pattern, e);
                None
            }
        })
        .collect()
});

static SOURCE_LINE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"File "[^"]*main\.py", line (\d+)"#).ok());
static ANY_LINE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"line (\d+)").ok());
static UNDEFINED_NAME: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"name '([^']+)' is not defined").ok());

/// First matching class in table order.
pub fn match_signature(stderr: &str) -> Option<ErrorClass> {
    COMPILED_SIGNATURES
        .iter()
        .find(|(re, _)| re.is_match(stderr))
        .map(|(_, class)| *class)
}

/// Structured payload search over stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadScan {
    Found(Value),
    /// The last JSON-looking line did not decode
    Undecodable { line: String, error: String },
    Absent,
}

/// Scan stdout from the last line backward for the first line starting
/// with `{` or `[` and decode it.
pub fn extract_payload(stdout: &str) -> PayloadScan {
    let candidate = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with('{') || line.starts_with('['));

    match candidate {
        None => PayloadScan::Absent,
        Some(line) => match serde_json::from_str::<Value>(line) {
            Ok(value) => PayloadScan::Found(value),
            Err(e) => PayloadScan::Undecodable {
                line: line.to_string(),
                error: e.to_string(),
            },
        },
    }
}

/// Line number, undefined name and traceback from stderr.
///
/// Lines past the prelude are shifted back by its length, so they name the
/// submitted source.
pub fn extract_error_context(
    stderr: &str,
    class: ErrorClass,
    prelude_start: usize,
    prelude_lines: usize,
) -> ErrorContext {
    let line_number = last_line_capture(&SOURCE_LINE, stderr)
        .or_else(|| last_line_capture(&ANY_LINE, stderr))
        .map(|line| {
            if line > prelude_start + prelude_lines {
                line - prelude_lines
            } else {
                line
            }
        });

    let variable_name = if class == ErrorClass::NameError {
        UNDEFINED_NAME
            .as_ref()
            .and_then(|re| re.captures(stderr))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    } else {
        None
    };

    let traceback = stderr
        .find("Traceback")
        .map(|start| stderr[start..].to_string());

    ErrorContext {
        line_number,
        variable_name,
        traceback,
    }
}

fn last_line_capture(re: &Option<Regex>, text: &str) -> Option<usize> {
    re.as_ref()?
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .last()
}

#[cfg(unix)]
fn resource_signal(signal: i32) -> bool {
    use nix::sys::signal::Signal;
    signal == Signal::SIGXCPU as i32
        || signal == Signal::SIGXFSZ as i32
        || signal == Signal::SIGKILL as i32
}

#[cfg(not(unix))]
fn resource_signal(_signal: i32) -> bool {
    false
}

/// Facts about the run that the outcome itself does not carry.
#[derive(Debug, Clone)]
pub struct ClassifyContext {
    pub timeout: Duration,
    pub prelude_start: usize,
    pub prelude_lines: usize,
    pub isolation: SandboxCapability,
    pub code_hash: String,
}

pub struct ResultClassifier;

impl ResultClassifier {
    pub fn classify(outcome: &RunOutcome, ctx: &ClassifyContext) -> ExecutionReport {
        let mut report = ExecutionReport {
            success: false,
            output: Value::String(outcome.stdout.text.clone()),
            error: None,
            stdout: outcome.stdout.text.clone(),
            stderr: outcome.stderr.text.clone(),
            error_class: None,
            preflight_failed: false,
            exit_code: outcome.exit_code,
            duration_ms: outcome.duration.as_millis().min(u128::from(u64::MAX)) as u64,
            stdout_truncated: outcome.stdout.truncated(),
            stderr_truncated: outcome.stderr.truncated(),
            isolation: ctx.isolation,
            reduced_isolation: ctx.isolation.is_reduced(),
            error_context: None,
            code_hash: ctx.code_hash.clone(),
        };

        if outcome.timed_out {
            report.error_class = Some(ErrorClass::Timeout);
            report.error = Some(format!(
                "TIMEOUT_ERROR: Execution exceeded {} seconds",
                ctx.timeout.as_secs_f64()
            ));
            return report;
        }

        if outcome.exit_code == Some(0) {
            Self::classify_success(outcome, &mut report);
            return report;
        }

        Self::classify_failure(outcome, ctx, &mut report);
        report
    }

    fn classify_success(outcome: &RunOutcome, report: &mut ExecutionReport) {
        report.success = true;
        match extract_payload(&outcome.stdout.text) {
            PayloadScan::Found(value) => {
                report.output = value;
            }
            PayloadScan::Undecodable { error, .. } => {
                report.error_class = Some(ErrorClass::MalformedOutput);
                report.error = Some(format!("Could not parse JSON output: {}", error));
            }
            PayloadScan::Absent => {
                report.error_class = Some(ErrorClass::MalformedOutput);
                report.error = Some("No JSON payload found in stdout".to_string());
            }
        }
    }

    fn classify_failure(outcome: &RunOutcome, ctx: &ClassifyContext, report: &mut ExecutionReport) {
        let stderr = &outcome.stderr.text;
        let diagnostics = outcome.stderr.diagnostic_text();

        let class = match match_signature(diagnostics) {
            Some(class) => class,
            None if outcome.signal.is_some_and(resource_signal) => ErrorClass::ResourceExceeded,
            None => ErrorClass::Unknown,
        };

        report.error_class = Some(class);
        report.error = Some(if !stderr.trim().is_empty() {
            stderr.clone()
        } else if let Some(signal) = outcome.signal {
            format!("Process terminated by signal {}", signal)
        } else {
            format!(
                "Process exited with code {}",
                outcome.exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
            )
        });
        report.error_context = Some(extract_error_context(diagnostics, class, ctx.prelude_start, ctx.prelude_lines));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::output::{CapturedStream, OutputIntegrity};

    fn stream(text: &str) -> CapturedStream {
        CapturedStream {
            text: text.to_string(),
            total_bytes: text.len(),
            integrity: OutputIntegrity::Complete,
            tail: None,
        }
    }

    fn outcome(exit_code: Option<i32>, stdout: &str, stderr: &str) -> RunOutcome {
        RunOutcome {
            exit_code,
            signal: None,
            timed_out: false,
            stdout: stream(stdout),
            stderr: stream(stderr),
            duration: Duration::from_millis(42),
            root_pid: 1234,
            skipped_limits: Vec::new(),
        }
    }

    fn ctx() -> ClassifyContext {
        ClassifyContext {
            timeout: Duration::from_secs(5),
            prelude_start: 0,
            prelude_lines: 0,
            isolation: SandboxCapability::LinuxNamespaces,
            code_hash: "hash".to_string(),
        }
    }

    #[test]
    fn trailing_json_is_the_payload() {
        let report = ResultClassifier::classify(
            &outcome(Some(0), "computing...\n{\"x\": 1}\n", ""),
            &ctx(),
        );
        assert!(report.success);
        assert_eq!(report.output, serde_json::json!({"x": 1}));
        assert_eq!(report.error_class, None);
        assert_eq!(report.payload(), Some(&serde_json::json!({"x": 1})));
        assert_eq!(report.duration_ms, 42);
    }

    #[test]
    fn payload_scan_takes_last_json_line() {
        assert_eq!(
            extract_payload("[1]\nnoise\n{\"a\": 2}\ntrailer\n"),
            PayloadScan::Found(serde_json::json!({"a": 2}))
        );
        assert_eq!(extract_payload("just text\n"), PayloadScan::Absent);
        assert!(matches!(extract_payload("{broken\n"), PayloadScan::Undecodable { .. }));
    }

    #[test]
    fn missing_payload_is_malformed_success() {
        let report = ResultClassifier::classify(&outcome(Some(0), "hello\n", ""), &ctx());
        assert!(report.success);
        assert_eq!(report.error_class, Some(ErrorClass::MalformedOutput));
        assert_eq!(report.output, Value::String("hello\n".to_string()));
        assert!(report.payload().is_none());
    }

    #[test]
    fn signature_table_order() {
        let stderr = "Traceback (most recent call last):\n  File \"/w/main.py\", line 3, in <module>\nKeyError: 'a'\n\nDuring handling of the above exception, another exception occurred:\n\nZeroDivisionError: division by zero\n";
        assert_eq!(match_signature(stderr), Some(ErrorClass::KeyError));
        assert_eq!(
            match_signature("ModuleNotFoundError: No module named 'pvlib'"),
            Some(ErrorClass::MissingModule)
        );
        assert_eq!(match_signature("MemoryError"), Some(ErrorClass::ResourceExceeded));
        assert_eq!(match_signature("Segmentation fault"), None);
    }

    #[test]
    fn zero_division_with_context() {
        let stderr = "Traceback (most recent call last):\n  File \"/tmp/r/main.py\", line 24, in <module>\n    print(json.dumps({'x': 1 / 0}))\nZeroDivisionError: division by zero\n";
        let mut context = ctx();
        context.prelude_lines = 22;
        let report = ResultClassifier::classify(&outcome(Some(1), "", stderr), &context);
        assert!(!report.success);
        assert_eq!(report.error_class, Some(ErrorClass::ZeroDivision));
        assert_eq!(report.error.as_deref(), Some(stderr));
        let context = report.error_context.unwrap();
        assert_eq!(context.line_number, Some(2));
        assert!(context.traceback.unwrap().starts_with("Traceback"));
    }

    #[test]
    fn lines_above_a_hoisted_prelude_are_not_shifted() {
        let head = "  File \"/w/main.py\", line 2, in <module>\nValueError: bad\n";
        assert_eq!(extract_error_context(head, ErrorClass::ValueError, 3, 22).line_number, Some(2));
        let body = "  File \"/w/main.py\", line 30, in <module>\nValueError: bad\n";
        assert_eq!(extract_error_context(body, ErrorClass::ValueError, 3, 22).line_number, Some(8));
    }

    #[test]
    fn name_error_variable() {
        let stderr = "Traceback (most recent call last):\n  File \"main.py\", line 1, in <module>\nNameError: name 'irradiance' is not defined\n";
        let report = ResultClassifier::classify(&outcome(Some(1), "", stderr), &ctx());
        assert_eq!(report.error_class, Some(ErrorClass::NameError));
        assert_eq!(
            report.error_context.unwrap().variable_name.as_deref(),
            Some("irradiance")
        );
    }

    #[test]
    fn timeout_wins_over_stderr() {
        let mut run = outcome(None, "", "KeyError: 'x'");
        run.timed_out = true;
        run.signal = Some(9);
        let report = ResultClassifier::classify(&run, &ctx());
        assert_eq!(report.error_class, Some(ErrorClass::Timeout));
        assert!(report.error.unwrap().starts_with("TIMEOUT_ERROR"));
    }

    #[cfg(unix)]
    #[test]
    fn kernel_kill_is_resource_exceeded() {
        let mut run = outcome(None, "", "");
        let sigxcpu = nix::sys::signal::Signal::SIGXCPU as i32;
        run.signal = Some(sigxcpu);
        let report = ResultClassifier::classify(&run, &ctx());
        assert_eq!(report.error_class, Some(ErrorClass::ResourceExceeded));
        assert_eq!(
            report.error,
            Some(format!("Process terminated by signal {}", sigxcpu))
        );
    }

    #[test]
    fn interpreter_syntax_errors_are_syntax() {
        for stderr in [
            "  File \"/w/main.py\", line 1\n    f(a=1, b)\n             ^\nSyntaxError: positional argument follows keyword argument\n",
            "  File \"/w/main.py\", line 3\n    y=2\nTabError: inconsistent use of tabs and spaces in indentation\n",
            "  File \"/w/main.py\", line 2\n    x\nIndentationError: unexpected indent\n",
        ] {
            let report = ResultClassifier::classify(&outcome(Some(1), "", stderr), &ctx());
            assert_eq!(report.error_class, Some(ErrorClass::Syntax), "{}", stderr);
            assert!(!report.preflight_failed);
        }
    }

    #[test]
    fn truncated_stderr_is_classified_from_its_end() {
        let mut noisy = "warning: noisy\n".repeat(100);
        noisy.push_str("Traceback (most recent call last):\n  File \"/w/main.py\", line 7, in <module>\nIndexError: list index out of range\n");
        let mut run = outcome(Some(1), "", "");
        run.stderr = crate::utils::output::drain_stream(std::io::Cursor::new(noisy.into_bytes()), 200);
        assert!(run.stderr.truncated());
        assert!(!run.stderr.text.contains("IndexError"));

        let report = ResultClassifier::classify(&run, &ctx());
        assert_eq!(report.error_class, Some(ErrorClass::IndexError));
        assert_eq!(report.error_context.unwrap().line_number, Some(7));
        assert!(report.stderr_truncated);
    }

    #[test]
    fn unmatched_failure_is_unknown() {
        let report = ResultClassifier::classify(&outcome(Some(2), "", ""), &ctx());
        assert_eq!(report.error_class, Some(ErrorClass::Unknown));
        assert_eq!(report.error.as_deref(), Some("Process exited with code 2"));
    }
}
