//! Writing session reports and event logs to disk.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::events::Event;

/// Pretty JSON, written atomically (temp file + rename).
pub fn write_report<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(report).context("serialize report")?;
    buf.push('\n');
    ensure_parent(path)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write temp report {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace report {}", path.display()))?;
    Ok(())
}

/// One JSON object per line, in sequence order.
pub fn write_events(path: &Path, events: &[Event]) -> Result<()> {
    ensure_parent(path)?;
    let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for event in events {
        serde_json::to_writer(&mut writer, event)
            .with_context(|| format!("serialize event {}", event.seq))?;
        writer.write_all(b"\n").context("write event line")?;
    }
    writer
        .flush()
        .with_context(|| format!("flush {}", path.display()))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, EventLog};

    #[test]
    fn events_are_written_as_json_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("out/events.jsonl");
        let mut log = EventLog::default();
        log.append("planner", EventKind::Produce, "plan");
        log.append("plan_reviewer", EventKind::Critique, "ok");

        write_events(&path, log.view()).expect("write");
        let contents = fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["author"], "planner");
        assert_eq!(first["seq"], 1);
    }

    #[test]
    fn report_is_pretty_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("report.json");
        write_report(&path, &serde_json::json!({"status": "finished"})).expect("write");
        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.contains("\"status\": \"finished\""));
        assert!(!temp.path().join("report.json.tmp").exists());
    }
}
