use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::time::Duration;

use anyhow::{Context, Result};
use serialport::SerialPort;

use crate::config::SerialSettings;
use crate::dsp::{PipelineError, Reading, SampleSource};

/// Names of the serial ports the OS reports.
pub fn available_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports().context("failed to enumerate serial ports")?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Longest line kept; a sample is a handful of digits.
pub const MAX_LINE_BYTES: usize = 64;

/// Newline-delimited reader over any buffered byte stream.
///
/// A read timeout yields [`Reading::Idle`]; partial lines are kept until
/// their terminator arrives. A line longer than [`MAX_LINE_BYTES`] (a wrong
/// baud rate produces those) is reported once as [`Reading::Overrun`] and
/// the rest of it is skipped up to the next newline.
pub struct LineSource<R> {
    reader: R,
    pending: Vec<u8>,
    discarding: bool,
    name: String,
}
impl<R: BufRead + Send> LineSource<R> {
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            reader,
            pending: Vec::with_capacity(MAX_LINE_BYTES),
            discarding: false,
            name: name.into(),
        }
    }
    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending)
            .trim_end_matches(&['\r', '\n'][..])
            .to_string();
        self.pending.clear();
        line
    }
}
impl<R: BufRead + Send> SampleSource for LineSource<R> {
    fn next_reading(&mut self) -> Result<Option<Reading>, PipelineError> {
        let room = (MAX_LINE_BYTES - self.pending.len()) as u64;
        let read = (&mut self.reader).take(room).read_until(b'\n', &mut self.pending);
        match read {
            Ok(0) if self.pending.is_empty() => Ok(None),
            Ok(_) => {
                let complete = self.pending.last() == Some(&b'\n');
                if self.discarding {
                    self.discarding = !complete;
                    self.pending.clear();
                    return Ok(Some(Reading::Idle));
                }
                if !complete && self.pending.len() >= MAX_LINE_BYTES {
                    log::warn!("{}: line exceeds {MAX_LINE_BYTES} bytes, discarding", self.name);
                    self.pending.clear();
                    self.discarding = true;
                    return Ok(Some(Reading::Overrun));
                }
                // Complete, or cut short by EOF.
                Ok(Some(Reading::Line(self.take_line())))
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(Some(Reading::Idle))
            }
            Err(e) => Err(PipelineError::Ingestion(format!("{}: {e}", self.name))),
        }
    }
    fn describe(&self) -> String {
        self.name.clone()
    }
}

pub type SerialSource = LineSource<BufReader<Box<dyn SerialPort>>>;

/// Opens `port` at the configured baud rate; failure is fatal to the connect only.
pub fn open(port: &str, settings: &SerialSettings) -> Result<SerialSource, PipelineError> {
    let handle = serialport::new(port, settings.baud_rate)
        .timeout(Duration::from_millis(settings.read_timeout_ms.max(1)))
        .open()
        .map_err(|e| PipelineError::Ingestion(format!("{port}: {e}")))?;
    if let Err(e) = handle.clear(serialport::ClearBuffer::Input) {
        log::warn!("could not flush stale input on {port}: {e}");
    }
    log::info!("opened {port} at {} baud", settings.baud_rate);
    Ok(LineSource::new(BufReader::new(handle), port))
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    /// Yields its chunks one read at a time, with a timeout between them.
    struct Stuttering {
        chunks: Vec<Option<&'static [u8]>>,
    }
    impl Read for Stuttering {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.chunks.is_empty() {
                return Ok(0);
            }
            match self.chunks.remove(0) {
                Some(bytes) => {
                    buf[..bytes.len()].copy_from_slice(bytes);
                    Ok(bytes.len())
                }
                None => Err(std::io::Error::new(ErrorKind::TimedOut, "timeout")),
            }
        }
    }
    #[test]
    fn splits_lines_and_strips_terminators() {
        let mut src = LineSource::new(Cursor::new(b"2048\r\n2050\n\xff12\n7".to_vec()), "mem");
        assert_eq!(src.next_reading().unwrap(), Some(Reading::Line("2048".into())));
        assert_eq!(src.next_reading().unwrap(), Some(Reading::Line("2050".into())));
        let garbled = src.next_reading().unwrap();
        assert!(matches!(garbled, Some(Reading::Line(ref l)) if l.ends_with("12") && l != "12"));
        assert_eq!(src.next_reading().unwrap(), Some(Reading::Line("7".into())));
        assert_eq!(src.next_reading().unwrap(), None);
    }
    #[test]
    fn timeout_keeps_partial_line() {
        let reader = BufReader::new(Stuttering {
            chunks: vec![Some(&b"20"[..]), None, Some(&b"48\n"[..])],
        });
        let mut src = LineSource::new(reader, "stutter");
        assert_eq!(src.next_reading().unwrap(), Some(Reading::Idle));
        assert_eq!(src.next_reading().unwrap(), Some(Reading::Line("2048".into())));
        assert_eq!(src.next_reading().unwrap(), None);
    }
    #[test]
    fn runaway_line_is_reported_once_and_skipped() {
        let mut bytes = vec![b'7'; 200];
        bytes.extend_from_slice(b"\n2048\n");
        let mut src = LineSource::new(Cursor::new(bytes), "noisy");
        assert_eq!(src.next_reading().unwrap(), Some(Reading::Overrun));
        // The remaining 136 bytes of the runaway line go unreported.
        for _ in 0..3 {
            assert_eq!(src.next_reading().unwrap(), Some(Reading::Idle));
        }
        assert_eq!(src.next_reading().unwrap(), Some(Reading::Line("2048".into())));
        assert_eq!(src.next_reading().unwrap(), None);
        assert!(src.pending.capacity() <= 2 * MAX_LINE_BYTES);
    }
    #[test]
    fn line_at_the_limit_is_kept() {
        let mut bytes = vec![b'1'; MAX_LINE_BYTES - 1];
        bytes.push(b'\n');
        let mut src = LineSource::new(Cursor::new(bytes), "mem");
        assert!(matches!(src.next_reading().unwrap(), Some(Reading::Line(l)) if l.len() == MAX_LINE_BYTES - 1));
    }
    #[test]
    fn missing_port_is_an_ingestion_error() {
        let err = open("/dev/calmwave-does-not-exist", &SerialSettings::default()).err();
        assert!(matches!(err, Some(PipelineError::Ingestion(_))));
    }
}
