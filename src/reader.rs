// Card reader event sources. Both the serial bridge and keyboard-wedge readers
// emit one card serial per line.

use crate::dispatcher::{ReaderEvent, ScanEvent};
use crate::error::ReaderError;
use std::io::{BufRead, BufReader, ErrorKind};
use std::time::Duration;

/// Decimal or `0x` hex serials become scans, anything else is passed on as an
/// unknown event. Blank lines are dropped.
pub fn parse_reader_line(line: &str) -> Option<ReaderEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let serial_number = match line
        .strip_prefix("0x")
        .or_else(|| line.strip_prefix("0X"))
    {
        Some(hex_digits) => u64::from_str_radix(hex_digits, 16).ok(),
        None => line.parse::<u64>().ok(),
    };

    Some(match serial_number {
        Some(serial_number) => ReaderEvent::TagScanned(ScanEvent { serial_number }),
        None => ReaderEvent::Other(line.to_owned()),
    })
}

pub struct LineReader<R> {
    source: R,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(source: R) -> Self {
        LineReader { source }
    }

    /// Feeds every event to `on_event` until the source runs dry.
    ///
    /// Read timeouts just mean nobody has tapped a card yet, so they are
    /// retried. Any other read error ends the loop.
    pub fn run<F: FnMut(ReaderEvent)>(mut self, mut on_event: F) -> Result<(), ReaderError> {
        let mut line = String::new();
        loop {
            match self.source.read_line(&mut line) {
                Ok(0) => {
                    if let Some(event) = parse_reader_line(&line) {
                        on_event(event);
                    }
                    return Ok(());
                }
                Ok(_) => {
                    if let Some(event) = parse_reader_line(&line) {
                        on_event(event);
                    }
                    line.clear();
                }
                // Keep whatever part of the line already arrived
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                    continue
                }
                // Scanners in the wrong mode send garbage bytes
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    tracing::warn!(error = %e, "discarding unreadable reader line");
                    line.clear();
                }
                Err(e) => return Err(ReaderError::Read(e)),
            }
        }
    }
}

pub fn open_serial(
    path: &str,
    baud_rate: u32,
) -> Result<LineReader<BufReader<Box<dyn serialport::SerialPort>>>, ReaderError> {
    let port = serialport::new(path, baud_rate)
        .timeout(Duration::from_millis(500))
        .open()
        .map_err(|source| ReaderError::Open {
            path: path.to_owned(),
            source,
        })?;
    tracing::info!(path, baud_rate, "opened card reader serial port");
    Ok(LineReader::new(BufReader::new(port)))
}

#[cfg(test)]
mod reader_tests {
    use super::*;
    use std::io::{Cursor, Read};

    #[test]
    fn parses_scans_and_unknown_events() {
        assert_eq!(
            parse_reader_line("42\r\n"),
            Some(ReaderEvent::TagScanned(ScanEvent { serial_number: 42 }))
        );
        assert_eq!(
            parse_reader_line("0x1F"),
            Some(ReaderEvent::TagScanned(ScanEvent { serial_number: 31 }))
        );
        assert_eq!(
            parse_reader_line("18446744073709551615"),
            Some(ReaderEvent::TagScanned(ScanEvent {
                serial_number: u64::MAX
            }))
        );
        assert_eq!(
            parse_reader_line("18446744073709551616"),
            Some(ReaderEvent::Other("18446744073709551616".to_owned()))
        );
        assert_eq!(
            parse_reader_line("card removed"),
            Some(ReaderEvent::Other("card removed".to_owned()))
        );
        assert_eq!(parse_reader_line("   \n"), None);
    }

    #[test]
    fn line_reader_delivers_events_in_order() {
        let input = Cursor::new("100\n\nhello\n0xff\n");
        let mut events = Vec::new();
        LineReader::new(input)
            .run(|event| events.push(event))
            .expect("reader failed");

        assert_eq!(
            events,
            vec![
                ReaderEvent::TagScanned(ScanEvent { serial_number: 100 }),
                ReaderEvent::Other("hello".to_owned()),
                ReaderEvent::TagScanned(ScanEvent { serial_number: 255 }),
            ]
        );
    }

    // Times out once, then yields a line, like an idle serial port
    struct FlakyPort {
        timed_out: bool,
        data: Cursor<&'static [u8]>,
    }

    impl Read for FlakyPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.timed_out {
                self.timed_out = true;
                return Err(std::io::Error::new(ErrorKind::TimedOut, "no card yet"));
            }
            self.data.read(buf)
        }
    }

    #[test]
    fn timeouts_are_retried() {
        let port = FlakyPort {
            timed_out: false,
            data: Cursor::new(&b"7\n"[..]),
        };
        let mut events = Vec::new();
        LineReader::new(BufReader::new(port))
            .run(|event| events.push(event))
            .expect("reader failed");

        assert_eq!(
            events,
            vec![ReaderEvent::TagScanned(ScanEvent { serial_number: 7 })]
        );
    }

    struct BrokenPort;

    impl Read for BrokenPort {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "unplugged"))
        }
    }

    #[test]
    fn other_errors_end_the_loop() {
        let result = LineReader::new(BufReader::new(BrokenPort)).run(|_| {});
        assert!(matches!(result, Err(ReaderError::Read(_))));
    }

    #[test]
    fn missing_serial_port_reported() {
        assert!(matches!(
            open_serial("/dev/does-not-exist-rfid", 9600),
            Err(ReaderError::Open { .. })
        ));
    }
}
