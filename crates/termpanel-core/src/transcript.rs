//! JSON-lines session transcripts.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use termpanel_pty::CaptureEvent;

use crate::error::Result;

/// Appends one [`CaptureEvent`] per line to a file.
pub struct TranscriptWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl TranscriptWriter {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one event and flush, so a crash loses at most the current line.
    pub fn record(&mut self, event: &CaptureEvent) -> Result<()> {
        serde_json::to_writer(&mut self.out, event)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }

    /// Read a transcript back. Blank lines are skipped.
    pub fn read_all(path: &Path) -> Result<Vec<CaptureEvent>> {
        let reader = BufReader::new(File::open(path)?);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_record_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("session.jsonl");
        let id = Uuid::new_v4();

        let mut writer = TranscriptWriter::create(&path).unwrap();
        writer
            .record(&CaptureEvent::session_start(id, "/bin/sh", "/tmp"))
            .unwrap();
        writer.record(&CaptureEvent::output(id, "$ ")).unwrap();
        writer.record(&CaptureEvent::session_end(id, 0)).unwrap();

        let events = TranscriptWriter::read_all(&path).unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.session_id() == id));
        assert!(matches!(events[2], CaptureEvent::SessionEnd { exit_code: 0, .. }));
    }

    #[test]
    fn test_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        let id = Uuid::new_v4();

        TranscriptWriter::create(&path)
            .unwrap()
            .record(&CaptureEvent::input(id, "ls\r"))
            .unwrap();
        TranscriptWriter::create(&path)
            .unwrap()
            .record(&CaptureEvent::resize(id, 80, 24))
            .unwrap();

        assert_eq!(TranscriptWriter::read_all(&path).unwrap().len(), 2);
    }
}
