//! Consumer-side pump from the [`ReadBuffer`] to the display.
//!
//! The scheduler runs on the consumer's thread. Each tick takes whatever the
//! reader collected since the last tick and renders it as one block, so a
//! burst of small reads becomes a single display update.

use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

use crate::serial::buffer::ReadBuffer;
use crate::serial::display::DisplaySink;
use crate::serial::encoding::{DisplayMode, Utf8Stream, render_lossy};

pub const DEFAULT_FLUSH_PERIOD: Duration = Duration::from_millis(50);

pub struct FlushScheduler {
    buffer: ReadBuffer,
    period: Duration,
    stream: Utf8Stream,
    timestamps: bool,
}

impl FlushScheduler {
    pub fn new(buffer: ReadBuffer, period: Duration) -> Self {
        FlushScheduler {
            buffer,
            period,
            stream: Utf8Stream::new(),
            timestamps: false,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn timestamps(&self) -> bool {
        self.timestamps
    }

    /// Prefix every flushed block with the local time.
    pub fn set_timestamps(&mut self, enabled: bool) {
        self.timestamps = enabled;
    }

    /// A tokio interval ticking at the flush period.
    ///
    /// Late ticks are delayed rather than bunched up.
    pub fn interval(&self) -> Interval {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    /// Drain the buffer into `sink`, returning the number of bytes taken.
    ///
    /// In Text mode an incomplete trailing character is held back until the
    /// next flush. In the other modes held-back bytes are rendered first.
    pub fn flush(&mut self, mode: DisplayMode, sink: &mut dyn DisplaySink) -> usize {
        let bytes = self.buffer.take();
        let taken = bytes.len();

        let text = match mode {
            DisplayMode::Text => {
                if bytes.is_empty() {
                    return 0;
                }
                self.stream.decode(&bytes)
            }
            mode => {
                let mut pending = self.stream.take_pending();
                if pending.is_empty() && bytes.is_empty() {
                    return 0;
                }
                pending.extend_from_slice(&bytes);
                render_lossy(&pending, mode)
            }
        };

        self.emit(&text, sink);
        taken
    }

    /// Drain the buffer and release any held-back bytes.
    ///
    /// Called when a link goes away, so an incomplete character from one
    /// session is rendered as a replacement marker instead of being joined
    /// to the next session's bytes.
    pub fn finish(&mut self, mode: DisplayMode, sink: &mut dyn DisplaySink) -> usize {
        let taken = self.flush(mode, sink);
        let pending = self.stream.take_pending();
        if !pending.is_empty() {
            self.emit(&render_lossy(&pending, mode), sink);
        }
        taken
    }

    fn emit(&self, text: &str, sink: &mut dyn DisplaySink) {
        if text.is_empty() {
            return;
        }
        if self.timestamps {
            let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
            sink.append(&format!("[{stamp}] {text}"));
        } else {
            sink.append(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::display::MemoryDisplay;
    use crate::serial::encoding::REPLACEMENT_MARKER;

    #[test]
    fn test_flush_coalesces_reads() {
        let buffer = ReadBuffer::new();
        let mut scheduler = FlushScheduler::new(buffer.clone(), DEFAULT_FLUSH_PERIOD);
        let mut display = MemoryDisplay::new();

        buffer.append(b"AB");
        buffer.append(b"CD");
        assert_eq!(scheduler.flush(DisplayMode::Text, &mut display), 4);
        assert_eq!(display.as_str(), "ABCD");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_empty_flush_leaves_display_alone() {
        let buffer = ReadBuffer::new();
        let mut scheduler = FlushScheduler::new(buffer, DEFAULT_FLUSH_PERIOD);
        let mut display = MemoryDisplay::new();
        assert_eq!(scheduler.flush(DisplayMode::Hex, &mut display), 0);
        assert!(display.as_str().is_empty());
    }

    #[test]
    fn test_hex_flush() {
        let buffer = ReadBuffer::new();
        let mut scheduler = FlushScheduler::new(buffer.clone(), DEFAULT_FLUSH_PERIOD);
        let mut display = MemoryDisplay::new();
        buffer.append(&[0x41, 0x0a]);
        scheduler.flush(DisplayMode::Hex, &mut display);
        assert_eq!(display.as_str(), "0x41 0x0a ");
    }

    #[test]
    fn test_split_character_across_flushes() {
        let buffer = ReadBuffer::new();
        let mut scheduler = FlushScheduler::new(buffer.clone(), DEFAULT_FLUSH_PERIOD);
        let mut display = MemoryDisplay::new();
        let bytes = "温度".as_bytes();

        buffer.append(&bytes[..4]);
        scheduler.flush(DisplayMode::Text, &mut display);
        assert_eq!(display.as_str(), "温");
        buffer.append(&bytes[4..]);
        scheduler.flush(DisplayMode::Text, &mut display);
        assert_eq!(display.as_str(), "温度");
    }

    #[test]
    fn test_mode_switch_releases_pending_bytes() {
        let buffer = ReadBuffer::new();
        let mut scheduler = FlushScheduler::new(buffer.clone(), DEFAULT_FLUSH_PERIOD);
        let mut display = MemoryDisplay::new();

        buffer.append(&[b'a', 0xC3]);
        scheduler.flush(DisplayMode::Text, &mut display);
        assert_eq!(display.as_str(), "a");
        scheduler.flush(DisplayMode::Hex, &mut display);
        assert_eq!(display.as_str(), "a0xc3 ");
    }

    #[test]
    fn test_finish_releases_split_character() {
        let buffer = ReadBuffer::new();
        let mut scheduler = FlushScheduler::new(buffer.clone(), DEFAULT_FLUSH_PERIOD);
        let mut display = MemoryDisplay::new();

        buffer.append(&[b'a', 0xE5, 0xBA]);
        assert_eq!(scheduler.finish(DisplayMode::Text, &mut display), 3);
        assert_eq!(display.as_str(), format!("a{REPLACEMENT_MARKER}"));

        buffer.append(&[0xA6]);
        scheduler.flush(DisplayMode::Text, &mut display);
        assert_eq!(
            display.as_str(),
            format!("a{REPLACEMENT_MARKER}{REPLACEMENT_MARKER}")
        );
    }

    #[test]
    fn test_finish_without_pending_bytes() {
        let buffer = ReadBuffer::new();
        let mut scheduler = FlushScheduler::new(buffer.clone(), DEFAULT_FLUSH_PERIOD);
        let mut display = MemoryDisplay::new();
        buffer.append(b"ok");
        scheduler.finish(DisplayMode::Hex, &mut display);
        assert_eq!(display.as_str(), "0x6f 0x6b ");
    }

    #[test]
    fn test_timestamped_block() {
        let buffer = ReadBuffer::new();
        let mut scheduler = FlushScheduler::new(buffer.clone(), DEFAULT_FLUSH_PERIOD);
        scheduler.set_timestamps(true);
        let mut display = MemoryDisplay::new();
        buffer.append(b"ok");
        scheduler.flush(DisplayMode::Text, &mut display);
        let log = display.as_str();
        assert!(log.starts_with('['));
        assert!(log.ends_with("] ok"));
    }
}
