//! Forwards one child output stream into a logger, line by line.

use std::io::{BufRead, BufReader, Read};

use crate::log::{ChildLogger, Severity};

/// Reads `stream` until end-of-stream and logs each line at `severity`.
///
/// Lines are passed to the logger as a single formatting argument, so braces
/// or percent signs emitted by the child are never interpreted. Invalid UTF-8
/// is replaced rather than rejected. A read error ends the relay quietly.
pub fn relay<R: Read>(stream: R, logger: &dyn ChildLogger, severity: Severity) {
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) | Err(_) => return,
            Ok(_) => {
                let line = String::from_utf8_lossy(trim_line_ending(&buffer));
                logger.log(severity, format_args!("{line}"));
            }
        }
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
