//! Job progress arithmetic.
//!
//! A job's overall progress is an integer in `0..=100`. The runner owns two
//! fixed checkpoints (work accepted, tool spawned); everything in between is
//! driven by the external tool's own normalized progress reports, linearly
//! mapped into the band the runner reserves for delegated work. Progress 100
//! is written only together with the `completed` status.

/// Progress written when a job transitions `queued -> running`.
pub const PROGRESS_STARTED: u8 = 5;

/// Progress written once the external tool process has been spawned.
pub const PROGRESS_SPAWNED: u8 = 10;

/// Upper bound for tool-reported progress. The gap to 100 is closed only by
/// the terminal `completed` write.
pub const PROGRESS_PRE_TERMINAL: u8 = 95;

/// Prefix the external tools use to report progress on stdout.
const PROGRESS_LINE_PREFIX: &str = "progress=";

/// Map a tool-reported progress value (`0..=100`, clamped) into the overall
/// job range `[PROGRESS_SPAWNED, PROGRESS_PRE_TERMINAL]`.
pub fn map_tool_progress(raw: i64) -> u8 {
    let raw = raw.clamp(0, 100) as u32;
    let span = (PROGRESS_PRE_TERMINAL - PROGRESS_SPAWNED) as u32;
    PROGRESS_SPAWNED + (raw * span / 100) as u8
}

/// Parse a single stdout line from an external tool.
///
/// Lines of the form `progress=<integer>` are progress reports; anything
/// else is ordinary output. Returns the *mapped* overall progress.
pub fn parse_progress_line(line: &str) -> Option<u8> {
    let rest = line.trim().strip_prefix(PROGRESS_LINE_PREFIX)?;
    let raw: i64 = rest.trim().parse().ok()?;
    Some(map_tool_progress(raw))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
