//! In-memory doubles for the device session and persistence sink
//!
//! Both are cheap to clone; clones share state so a test can keep a handle
//! after moving the double into a scheduler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use tokio::time::Instant;

use crate::registers::VariableTable;
use crate::session::DeviceSession;
use crate::sink::{Reading, ReadingSink};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct SessionState {
    registers: HashMap<(u8, u16), u16>,
    unit: u8,
    open: bool,
    fail_open: bool,
    fail_at: Option<(u8, u16)>,
    read_delay: Duration,
    opened_at: Vec<Instant>,
    opens: usize,
    closes: usize,
    reads: usize,
}

/// Register map served from memory
#[derive(Debug, Clone, Default)]
pub struct MemorySession {
    state: Arc<Mutex<SessionState>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session answering every register of `table` with `word`
    pub fn filled(table: &VariableTable, word: u16) -> Self {
        let session = Self::new();
        for spec in table {
            let words = vec![word; usize::from(spec.register_count())];
            session.set_words(spec.unit_id, spec.register, &words);
        }
        session
    }

    pub fn set_register(&self, unit_id: u8, address: u16, word: u16) {
        lock(&self.state).registers.insert((unit_id, address), word);
    }

    /// Store consecutive words starting at `address`
    pub fn set_words(&self, unit_id: u8, address: u16, words: &[u16]) {
        let mut state = lock(&self.state);
        for (offset, word) in (0u16..).zip(words) {
            state
                .registers
                .insert((unit_id, address.wrapping_add(offset)), *word);
        }
    }

    pub fn fail_open(&self, fail: bool) {
        lock(&self.state).fail_open = fail;
    }

    /// Make any read starting at `address` on `unit_id` fail
    pub fn fail_read_at(&self, unit_id: u8, address: u16) {
        lock(&self.state).fail_at = Some((unit_id, address));
    }

    /// Stall every read by `delay`, on the tokio clock
    pub fn set_read_delay(&self, delay: Duration) {
        lock(&self.state).read_delay = delay;
    }

    pub fn clear_failures(&self) {
        let mut state = lock(&self.state);
        state.fail_open = false;
        state.fail_at = None;
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state).opens
    }

    /// When each successful `open` happened, i.e. when each cycle started
    pub fn open_times(&self) -> Vec<Instant> {
        lock(&self.state).opened_at.clone()
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).closes
    }

    pub fn read_count(&self) -> usize {
        lock(&self.state).reads
    }
}

#[async_trait]
impl DeviceSession for MemorySession {
    async fn open(&mut self) -> anyhow::Result<()> {
        let mut state = lock(&self.state);
        if state.fail_open {
            bail!("connection refused");
        }
        state.open = true;
        state.opens += 1;
        state.opened_at.push(Instant::now());
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = lock(&self.state);
        if state.open {
            state.open = false;
            state.closes += 1;
        }
    }

    fn select_unit(&mut self, unit_id: u8) {
        lock(&self.state).unit = unit_id;
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> anyhow::Result<Vec<u16>> {
        let delay = lock(&self.state).read_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        if !state.open {
            bail!("session is not open");
        }
        state.reads += 1;

        let unit = state.unit;
        if state.fail_at == Some((unit, address)) {
            bail!("timed out");
        }

        (0..count)
            .map(|offset| {
                let register = address.wrapping_add(offset);
                match state.registers.get(&(unit, register)) {
                    Some(word) => Ok(*word),
                    None => bail!("modbus exception: Illegal data address ({unit}/{register})"),
                }
            })
            .collect()
    }

    fn describe(&self) -> String {
        "memory://device".to_string()
    }
}

#[derive(Debug, Default)]
struct SinkState {
    readings: Vec<Reading>,
    attempts: usize,
    fail_on: Option<String>,
}

/// Sink collecting readings in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<SinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject inserts for `sensor`
    pub fn fail_on(&self, sensor: impl Into<String>) {
        lock(&self.state).fail_on = Some(sensor.into());
    }

    pub fn readings(&self) -> Vec<Reading> {
        lock(&self.state).readings.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `insert_reading` calls, including failed ones
    pub fn attempts(&self) -> usize {
        lock(&self.state).attempts
    }
}

#[async_trait]
impl ReadingSink for MemorySink {
    async fn insert_reading(&self, reading: &Reading) -> anyhow::Result<()> {
        let mut state = lock(&self.state);
        state.attempts += 1;
        if state.fail_on.as_deref() == Some(reading.sensor.as_str()) {
            bail!("database is locked");
        }
        state.readings.push(reading.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
