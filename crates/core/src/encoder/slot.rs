//! Handoff between the serial reader thread and the control tick.
//!
//! The reader is the only producer. It overwrites a single slot with the
//! newest line; the control tick takes whatever is there and never waits.

use std::{
    io::BufRead,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
};

use crate::{Result, StageError};

/// One undecoded serial line plus its arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSample {
    pub line: String,
    pub sequence: u64,
}

/// Single-slot, last-write-wins register shared between threads.
#[derive(Debug, Clone, Default)]
pub struct SampleSlot {
    shared: Arc<Mutex<Option<RawSample>>>,
}

impl SampleSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `sample`, dropping any sample that was not taken yet.
    pub fn publish(&self, sample: RawSample) -> Result<()> {
        let mut slot = self.lock()?;
        *slot = Some(sample);
        Ok(())
    }

    /// Removes and returns the latest sample, if one arrived since the last
    /// call.
    pub fn take(&self) -> Result<Option<RawSample>> {
        let mut slot = self.lock()?;
        Ok(slot.take())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<RawSample>>> {
        self.shared
            .lock()
            .map_err(|_| StageError::msg("sample slot has been poisoned"))
    }
}

/// Background thread that reads serial lines into a [`SampleSlot`].
#[derive(Debug)]
pub struct SerialReader {
    handle: Option<JoinHandle<u64>>,
    stop: Arc<AtomicBool>,
}

impl SerialReader {
    /// Starts reading `source` line by line until it ends, fails, or
    /// [`SerialReader::stop`] is called.
    pub fn spawn<R>(source: R, slot: SampleSlot) -> Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("serial-reader".to_string())
            .spawn(move || read_lines(source, &slot, &stop_flag))?;

        Ok(Self {
            handle: Some(handle),
            stop,
        })
    }

    /// Asks the reader to exit after the line it is currently waiting on.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }

    /// Waits for the reader to exit and returns how many lines it published.
    pub fn join(mut self) -> Result<u64> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| StageError::msg("serial reader panicked")),
            None => Ok(0),
        }
    }
}

impl Drop for SerialReader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_lines<R: BufRead>(source: R, slot: &SampleSlot, stop: &AtomicBool) -> u64 {
    let mut sequence = 0;
    for line in source.lines() {
        if stop.load(Ordering::Acquire) {
            break;
        }

        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(%err, "serial read failed, reader exiting");
                break;
            }
        };

        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        sequence += 1;
        let sample = RawSample {
            line: line.to_string(),
            sequence,
        };
        if let Err(err) = slot.publish(sample) {
            tracing::warn!(%err, "serial reader exiting");
            break;
        }
    }

    tracing::debug!(lines = sequence, "serial reader finished");
    sequence
}
