//! Poll cycle
//!
//! One pass over the variable table: open the session, read and decode
//! every variable, close the session, then persist status words followed
//! by measurements. Any read or decode error discards the whole pass.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::decoder::{decode_measurement, decode_status_word};
use crate::error::{PollError, Result};
use crate::registers::{ValueKind, VariableSpec, VariableTable};
use crate::session::DeviceSession;
use crate::sink::{Reading, ReadingSink, ReadingValue};

/// Per-process cycle settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOptions {
    /// Value written to the `device` column
    pub device_id: String,
    /// Read and decode, but never touch the sink
    pub dry_run: bool,
}

impl CycleOptions {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Outcome of a successful cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Status words read
    pub statuses: usize,
    /// Measurements read
    pub values: usize,
    /// Rows handed to the sink (0 in dry-run)
    pub persisted: usize,
}

/// Values sampled in one pass, in table order
#[derive(Debug, Default)]
struct Sample<'a> {
    statuses: Vec<(&'a str, u64)>,
    values: Vec<(&'a str, f64)>,
}

/// Run a single poll cycle stamped with `now`
pub async fn run_cycle<S, K>(
    session: &mut S,
    sink: &K,
    table: &VariableTable,
    options: &CycleOptions,
    now: DateTime<Utc>,
) -> Result<CycleReport>
where
    S: DeviceSession + ?Sized,
    K: ReadingSink + ?Sized,
{
    session
        .open()
        .await
        .map_err(|e| PollError::connection(format!("{}: {:#}", session.describe(), e)))?;

    let sample = read_all(session, table).await;
    session.close().await;
    let sample = sample?;

    let mut report = CycleReport {
        statuses: sample.statuses.len(),
        values: sample.values.len(),
        persisted: 0,
    };

    if options.dry_run {
        return Ok(report);
    }

    for (name, value) in &sample.statuses {
        persist(sink, options, now, name, ReadingValue::Int(*value)).await?;
        report.persisted += 1;
    }
    debug!("wrote {} status readings", sample.statuses.len());

    for (name, value) in &sample.values {
        persist(sink, options, now, name, ReadingValue::Float(*value)).await?;
        report.persisted += 1;
    }
    debug!("wrote {} value readings", sample.values.len());

    Ok(report)
}

async fn read_all<'a, S>(session: &mut S, table: &'a VariableTable) -> Result<Sample<'a>>
where
    S: DeviceSession + ?Sized,
{
    let mut sample = Sample::default();

    for spec in table {
        let words = read_variable(session, spec).await?;
        match spec.kind {
            ValueKind::Measurement => {
                let raw = decode_measurement(&words, spec.register_type)
                    .map_err(|e| PollError::read_failure(spec.name, spec.register, e))?;
                let value = spec.scale_value(raw);
                debug!("{}: {:.3} {}", spec.name, value, spec.unit);
                sample.values.push((spec.name, value));
            },
            ValueKind::StatusWord => {
                let value = decode_status_word(&words, spec.register_type)
                    .map_err(|e| PollError::read_failure(spec.name, spec.register, e))?;
                debug!("{}: 0x{:04x}", spec.name, value);
                sample.statuses.push((spec.name, value));
            },
        }
    }

    Ok(sample)
}

async fn read_variable<S>(session: &mut S, spec: &VariableSpec) -> Result<Vec<u16>>
where
    S: DeviceSession + ?Sized,
{
    session.select_unit(spec.unit_id);
    session
        .read_holding_registers(spec.register, spec.register_count())
        .await
        .map_err(|e| PollError::read_failure(spec.name, spec.register, format!("{e:#}")))
}

async fn persist<K>(
    sink: &K,
    options: &CycleOptions,
    now: DateTime<Utc>,
    sensor: &str,
    value: ReadingValue,
) -> Result<()>
where
    K: ReadingSink + ?Sized,
{
    let reading = Reading {
        timestamp: now,
        device: options.device_id.clone(),
        sensor: sensor.to_string(),
        value,
    };
    sink.insert_reading(&reading)
        .await
        .map_err(|e| PollError::persist_failure(sensor, format!("{e:#}")))
}
