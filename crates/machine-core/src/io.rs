//! In-memory I/O channel.

use std::collections::VecDeque;

use crate::api::{IoKind, IoPort};
use crate::convert::{fits_in_bits, parse_long, to_16bit_word_string, to_ascii_string};
use crate::{SimError, SimResult};

/// Channel fed from a queue of input lines, collecting output text.
///
/// Reading from an empty queue behaves like a host that aborts the read:
/// queued input and unflushed output are dropped and
/// [`SimError::ExecutionCancelled`] is returned. Flushed output is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferChannel {
    input: VecDeque<String>,
    pending: String,
    output: String,
    prompts: Vec<String>,
}

impl BufferChannel {
    /// Empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel preloaded with input lines.
    #[must_use]
    pub fn with_input<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            input: lines.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Queues one input line.
    pub fn push_input(&mut self, line: impl Into<String>) {
        self.input.push_back(line.into());
    }

    /// Input lines not yet consumed.
    #[must_use]
    pub fn remaining_input(&self) -> usize {
        self.input.len()
    }

    /// Output flushed so far.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Output written since the last flush.
    #[must_use]
    pub fn pending_output(&self) -> &str {
        &self.pending
    }

    /// Prompts shown by [`IoPort::read_string`].
    #[must_use]
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    fn next_line(&mut self) -> SimResult<String> {
        if let Some(line) = self.input.pop_front() {
            return Ok(line);
        }
        log::debug!("input exhausted; cancelling read");
        self.input.clear();
        self.pending.clear();
        Err(SimError::ExecutionCancelled)
    }
}

fn first_char(line: &str) -> SimResult<char> {
    line.chars().next().ok_or_else(|| SimError::Format {
        text: line.to_owned(),
    })
}

impl IoPort for BufferChannel {
    fn read_fixed_width(&mut self, kind: IoKind, width: u32) -> SimResult<i64> {
        let line = self.next_line()?;
        let value = match kind {
            IoKind::Long => parse_long(&line)?,
            IoKind::Ascii => {
                let c = first_char(&line)?;
                if u32::from(c) > 0xFF {
                    return Err(SimError::range(u32::from(c), 8));
                }
                i64::from(u32::from(c))
            }
            IoKind::Unicode => {
                let c = first_char(&line)?;
                let mut units = [0_u16; 2];
                let encoded = c.encode_utf16(&mut units);
                if encoded.len() != 1 {
                    return Err(SimError::range(u32::from(c), 16));
                }
                i64::from(encoded[0])
            }
        };
        if !fits_in_bits(value.into(), width) {
            return Err(SimError::range(value, width));
        }
        Ok(value)
    }

    fn write_fixed_width(&mut self, kind: IoKind, value: i64, width: u32) -> SimResult<()> {
        match kind {
            IoKind::Long => {
                self.pending.push_str(&value.to_string());
                self.pending.push('\n');
            }
            IoKind::Ascii => self.pending.push_str(&to_ascii_string(value, width.min(8))),
            IoKind::Unicode => self
                .pending
                .push_str(&to_16bit_word_string(value, width.min(16))),
        }
        Ok(())
    }

    fn read_string(&mut self, prompt: &str) -> SimResult<String> {
        self.prompts.push(prompt.to_owned());
        self.next_line()
    }

    fn write_string(&mut self, text: &str) -> SimResult<()> {
        self.pending.push_str(text);
        Ok(())
    }

    fn flush(&mut self, save_input_buffers: bool) {
        self.output.push_str(&self.pending);
        self.pending.clear();
        if !save_input_buffers {
            self.input.clear();
        }
    }

    fn reset(&mut self) {
        self.input.clear();
        self.pending.clear();
        self.output.clear();
        self.prompts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::BufferChannel;
    use crate::api::{IoKind, IoPort};
    use crate::{ErrorKind, SimError};

    #[test]
    fn long_input_accepts_every_literal_form() {
        let mut channel = BufferChannel::with_input(["0x1F", "-3", "'A"]);
        assert_eq!(channel.read_fixed_width(IoKind::Long, 8).unwrap(), 31);
        assert_eq!(channel.read_fixed_width(IoKind::Long, 8).unwrap(), -3);
        assert_eq!(channel.read_fixed_width(IoKind::Long, 8).unwrap(), 65);
    }

    #[test]
    fn input_that_does_not_fit_is_a_range_error() {
        let mut channel = BufferChannel::with_input(["300"]);
        let err = channel.read_fixed_width(IoKind::Long, 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
    }

    #[test]
    fn character_input_reads_code_units() {
        let mut channel = BufferChannel::with_input(["A", "\u{3A9}", "\u{1F600}"]);
        assert_eq!(channel.read_fixed_width(IoKind::Ascii, 8).unwrap(), 65);
        assert_eq!(channel.read_fixed_width(IoKind::Unicode, 16).unwrap(), 0x3A9);
        assert!(channel.read_fixed_width(IoKind::Unicode, 16).is_err());
    }

    #[test]
    fn empty_queue_cancels_and_clears_buffers() {
        let mut channel = BufferChannel::new();
        channel.write_string("partial").unwrap();
        let err = channel.read_fixed_width(IoKind::Long, 8).unwrap_err();
        assert_eq!(err, SimError::ExecutionCancelled);
        assert!(channel.pending_output().is_empty());
    }

    #[test]
    fn cancelled_read_keeps_flushed_output_and_prompts() {
        let mut channel = BufferChannel::with_input(["1"]);
        channel.write_string("done\n").unwrap();
        channel.flush(true);
        channel.write_string("partial").unwrap();
        assert_eq!(channel.read_string("first?").unwrap(), "1");
        let err = channel.read_string("second?").unwrap_err();
        assert_eq!(err, SimError::ExecutionCancelled);
        assert_eq!(channel.output(), "done\n");
        assert!(channel.pending_output().is_empty());
        assert_eq!(channel.prompts(), ["first?".to_owned(), "second?".to_owned()]);
    }

    #[test]
    fn flush_moves_pending_output_and_optionally_keeps_input() {
        let mut channel = BufferChannel::with_input(["1", "2"]);
        channel.write_fixed_width(IoKind::Long, -7, 8).unwrap();
        channel.write_fixed_width(IoKind::Ascii, 72, 8).unwrap();
        channel.flush(true);
        assert_eq!(channel.output(), "-7\nH");
        assert_eq!(channel.remaining_input(), 2);
        channel.flush(false);
        assert_eq!(channel.remaining_input(), 0);
    }

    #[test]
    fn string_reads_record_prompts() {
        let mut channel = BufferChannel::with_input(["hello"]);
        assert_eq!(channel.read_string("name?").unwrap(), "hello");
        assert_eq!(channel.prompts(), ["name?".to_owned()]);
    }
}
