use crate::PtyError;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize)]
struct CastHeader<'a> {
    version: u32,
    width: u16,
    height: u16,
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    env: Option<&'a HashMap<String, String>>,
}

/// Session recorder in Asciinema v2 format: a header line followed by one
/// JSON array per event, `[seconds_since_start, "o"|"i", data]`.
///
/// Writes are serialized by the internal mutex so output and input events
/// interleave in real time. `close` is idempotent.
pub struct CastRecorder {
    writer: Mutex<Option<BufWriter<File>>>,
    start: Instant,
    start_unix: i64,
}

impl CastRecorder {
    pub fn create(path: &Path) -> Result<Self, PtyError> {
        let file = File::create(path)
            .map_err(|e| PtyError::Recorder(format!("create {}: {}", path.display(), e)))?;
        let start_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok(Self {
            writer: Mutex::new(Some(BufWriter::new(file))),
            start: Instant::now(),
            start_unix,
        })
    }

    pub fn write_header(
        &self,
        cols: u16,
        rows: u16,
        env: Option<&HashMap<String, String>>,
    ) -> Result<(), PtyError> {
        let header = CastHeader {
            version: 2,
            width: cols,
            height: rows,
            timestamp: self.start_unix,
            env,
        };
        let line = serde_json::to_string(&header)
            .map_err(|e| PtyError::Recorder(format!("encode header: {e}")))?;
        self.write_line(&line)
    }

    pub fn write_output(&self, data: &[u8]) -> Result<(), PtyError> {
        self.write_event("o", data)
    }

    pub fn write_input(&self, data: &[u8]) -> Result<(), PtyError> {
        self.write_event("i", data)
    }

    fn write_event(&self, kind: &str, data: &[u8]) -> Result<(), PtyError> {
        let offset = self.start.elapsed().as_secs_f64();
        let text = String::from_utf8_lossy(data);
        let event = (offset, kind, text.as_ref());
        let line = serde_json::to_string(&event)
            .map_err(|e| PtyError::Recorder(format!("encode event: {e}")))?;
        self.write_line(&line)
    }

    fn write_line(&self, line: &str) -> Result<(), PtyError> {
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let Some(writer) = guard.as_mut() else {
            return Err(PtyError::Recorder("recorder is closed".to_string()));
        };
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.write_all(b"\n"))
            .and_then(|_| writer.flush())
            .map_err(|e| PtyError::Recorder(format!("write: {e}")))
    }

    /// Flushes and drops the underlying file. Safe to call more than once.
    pub fn close(&self) -> Result<(), PtyError> {
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut writer) = guard.take() {
            writer
                .flush()
                .map_err(|e| PtyError::Recorder(format!("flush: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn header_is_valid_v2() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.cast");
        let rec = CastRecorder::create(&path).unwrap();
        rec.write_header(80, 24, None).unwrap();
        rec.close().unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 1);
        let header: Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(header["version"], 2);
        assert_eq!(header["width"], 80);
        assert_eq!(header["height"], 24);
        assert!(header["timestamp"].as_i64().unwrap() > 0);
        assert!(header.get("env").is_none());
    }

    #[test]
    fn header_carries_env_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.cast");
        let rec = CastRecorder::create(&path).unwrap();
        let mut env = HashMap::new();
        env.insert("TERM".to_string(), "xterm-256color".to_string());
        rec.write_header(120, 40, Some(&env)).unwrap();
        rec.close().unwrap();

        let header: Value = serde_json::from_str(&read_lines(&path)[0]).unwrap();
        assert_eq!(header["env"]["TERM"], "xterm-256color");
    }

    #[test]
    fn events_are_three_element_arrays_with_monotonic_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.cast");
        let rec = CastRecorder::create(&path).unwrap();
        rec.write_header(80, 24, None).unwrap();
        rec.write_output(b"hello\r\n").unwrap();
        rec.write_input(b"ls\r").unwrap();
        rec.write_output(b"\x1b[31mred\x1b[0m").unwrap();
        rec.close().unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 4);

        let mut last_offset = 0.0_f64;
        for (line, (kind, data)) in lines[1..]
            .iter()
            .zip([("o", "hello\r\n"), ("i", "ls\r"), ("o", "\x1b[31mred\x1b[0m")])
        {
            let event: Value = serde_json::from_str(line).unwrap();
            let arr = event.as_array().unwrap();
            assert_eq!(arr.len(), 3);
            let offset = arr[0].as_f64().unwrap();
            assert!(offset >= last_offset);
            last_offset = offset;
            assert_eq!(arr[1], kind);
            assert_eq!(arr[2], data);
        }
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.cast");
        let rec = CastRecorder::create(&path).unwrap();
        rec.write_header(80, 24, None).unwrap();
        rec.close().unwrap();
        rec.close().unwrap();
        assert!(rec.write_output(b"late").is_err());
    }

    #[test]
    fn create_fails_on_missing_directory() {
        let result = CastRecorder::create(Path::new("/nonexistent/dir/rec.cast"));
        assert!(result.is_err());
    }
}
