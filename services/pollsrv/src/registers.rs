//! Variable table
//!
//! Static catalog of the registers polled from the inverter/ESS plant
//! controller (unit 247) and the inverter itself (unit 1).

use std::collections::HashSet;
use std::fmt;

use crate::error::{PollError, Result};

/// Register width and signedness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterType {
    U16,
    S16,
    U32,
    S32,
    U64,
}

impl RegisterType {
    /// Number of consecutive 16-bit registers holding one value
    pub const fn register_count(self) -> u16 {
        match self {
            RegisterType::U16 | RegisterType::S16 => 1,
            RegisterType::U32 | RegisterType::S32 => 2,
            RegisterType::U64 => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RegisterType::U16 => "u16",
            RegisterType::S16 => "s16",
            RegisterType::U32 => "u32",
            RegisterType::S32 => "s32",
            RegisterType::U64 => "u64",
        }
    }
}

impl fmt::Display for RegisterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// How a decoded register value is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Continuous quantity, scaled into engineering units
    Measurement,
    /// Bit-encoded device/alarm state, reported unscaled
    StatusWord,
}

impl ValueKind {
    /// Whether the decoder can produce this kind from `register_type`
    pub const fn supports(self, register_type: RegisterType) -> bool {
        match self {
            ValueKind::Measurement => true,
            ValueKind::StatusWord => {
                matches!(register_type, RegisterType::U16 | RegisterType::U32)
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Measurement => "measurement",
            ValueKind::StatusWord => "status word",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One readable quantity on the device
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSpec {
    /// Series key in the readings table
    pub name: &'static str,
    /// Modbus unit (slave) id
    pub unit_id: u8,
    /// First holding register
    pub register: u16,
    pub register_type: RegisterType,
    pub kind: ValueKind,
    /// Multiplier applied to the raw value (measurements only)
    pub scale: f64,
    /// Display unit (measurements only)
    pub unit: &'static str,
}

impl VariableSpec {
    pub const fn measurement(
        name: &'static str,
        unit_id: u8,
        register: u16,
        register_type: RegisterType,
        scale: f64,
        unit: &'static str,
    ) -> Self {
        Self {
            name,
            unit_id,
            register,
            register_type,
            kind: ValueKind::Measurement,
            scale,
            unit,
        }
    }

    pub const fn status(
        name: &'static str,
        unit_id: u8,
        register: u16,
        register_type: RegisterType,
    ) -> Self {
        Self {
            name,
            unit_id,
            register,
            register_type,
            kind: ValueKind::StatusWord,
            scale: 0.0,
            unit: "",
        }
    }

    /// Number of registers spanned by this variable
    pub const fn register_count(&self) -> u16 {
        self.register_type.register_count()
    }

    /// Apply the scale factor to an already decoded raw value
    pub fn scale_value(&self, raw: f64) -> f64 {
        raw * self.scale
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PollError::config(format!(
                "variable at register {} has an empty name",
                self.register
            )));
        }

        if !self.kind.supports(self.register_type) {
            let cause = PollError::UnsupportedEncoding {
                register_type: self.register_type,
                kind: self.kind,
            };
            return Err(PollError::config(format!("{}: {}", self.name, cause)));
        }

        if self.kind == ValueKind::Measurement && !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(PollError::config(format!(
                "{}: scale must be a positive number, got {}",
                self.name, self.scale
            )));
        }

        let last = u32::from(self.register) + u32::from(self.register_count()) - 1;
        if last > u32::from(u16::MAX) {
            return Err(PollError::config(format!(
                "{}: register span {}..={} exceeds the address space",
                self.name, self.register, last
            )));
        }

        Ok(())
    }
}

/// Validated, ordered set of variables polled every cycle
#[derive(Debug, Clone)]
pub struct VariableTable {
    variables: Vec<VariableSpec>,
}

impl VariableTable {
    /// Build a table, rejecting duplicate names and unsupported encodings
    pub fn new(variables: Vec<VariableSpec>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(variables.len());
        for spec in &variables {
            spec.validate()?;
            if !seen.insert(spec.name) {
                return Err(PollError::config(format!(
                    "duplicate variable name '{}'",
                    spec.name
                )));
            }
        }
        Ok(Self { variables })
    }

    /// The device map compiled into the daemon
    pub fn builtin() -> Result<Self> {
        Self::new(BUILTIN_VARIABLES.to_vec())
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableSpec> {
        self.variables.iter()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&VariableSpec> {
        self.variables.iter().find(|spec| spec.name == name)
    }

    /// Count of (measurements, status words)
    pub fn kind_counts(&self) -> (usize, usize) {
        let statuses = self
            .variables
            .iter()
            .filter(|spec| spec.kind == ValueKind::StatusWord)
            .count();
        (self.variables.len() - statuses, statuses)
    }
}

impl<'a> IntoIterator for &'a VariableTable {
    type Item = &'a VariableSpec;
    type IntoIter = std::slice::Iter<'a, VariableSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.variables.iter()
    }
}

use RegisterType::{S16, S32, U16, U32, U64};

const PLANT: u8 = 247;
const INVERTER: u8 = 1;

/// Registers polled each cycle, in read order
pub static BUILTIN_VARIABLES: &[VariableSpec] = &[
    // Plant status
    VariableSpec::status("status_on_grid", PLANT, 30009, U16),
    VariableSpec::status("status_alarm1_pcs", PLANT, 30027, U16),
    VariableSpec::status("status_alarm2_pcs", PLANT, 30028, U16),
    VariableSpec::status("status_alarm3_ess", PLANT, 30029, U16),
    VariableSpec::status("status_alarm4_gateway", PLANT, 30030, U16),
    VariableSpec::status("status_alarm5_dc_charger", PLANT, 30030, U16),
    VariableSpec::status("status_running_state", INVERTER, 30578, U16),
    // Plant power flows
    VariableSpec::measurement("power_grid_active", PLANT, 30005, S32, 0.001, "kW"),
    VariableSpec::measurement("power_grid_reactive", PLANT, 30007, S32, 0.001, "Kvar"),
    VariableSpec::measurement("ess_battery_charge_percent", PLANT, 30014, U16, 0.1, "%"),
    VariableSpec::measurement("power_plant_active", PLANT, 30031, S32, 0.001, "kW"),
    VariableSpec::measurement("power_plant_reactive", PLANT, 30033, S32, 0.001, "Kvar"),
    VariableSpec::measurement("power_pv", PLANT, 30035, S32, 0.001, "kW"),
    VariableSpec::measurement("power_ess", PLANT, 30037, S32, 0.001, "kW"),
    VariableSpec::measurement("energy_ess_capacity_charge", PLANT, 30064, U32, 0.01, "kWh"),
    VariableSpec::measurement("energy_ess_capacity_discharge", PLANT, 30066, U32, 0.01, "kWh"),
    VariableSpec::measurement("capacity_ess_health", PLANT, 30083, U32, 0.01, "kWh"),
    VariableSpec::measurement("ess_battery_health_percent", PLANT, 30087, U16, 0.1, "%"),
    // Battery (inverter side)
    VariableSpec::measurement("temperature_ess_cell_avg", INVERTER, 30603, S16, 0.1, "C"),
    VariableSpec::measurement("energy_daily_ess_charge", INVERTER, 30566, U32, 0.01, "kWh"),
    VariableSpec::measurement("energy_accum_ess_charge", INVERTER, 30568, U64, 0.01, "kWh"),
    VariableSpec::measurement("energy_daily_ess_discharge", INVERTER, 30572, U32, 0.01, "kWh"),
    VariableSpec::measurement("energy_accum_ess_discharge", INVERTER, 30574, U64, 0.01, "kWh"),
    VariableSpec::measurement("voltage_ess_battery_avg", INVERTER, 30604, S16, 0.001, "V"),
    VariableSpec::measurement("temperature_ess_cluster_max", INVERTER, 30620, S16, 0.1, "C"),
    VariableSpec::measurement("temperature_ess_cluster_min", INVERTER, 30621, S16, 0.1, "C"),
    // Inverter AC side
    VariableSpec::measurement("frequency_grid", INVERTER, 31002, U16, 0.01, "Hz"),
    VariableSpec::measurement("temperature_pcs", INVERTER, 31003, S16, 0.1, "C"),
    VariableSpec::measurement("voltage_line_ab", INVERTER, 31005, U32, 0.01, "V"),
    VariableSpec::measurement("voltage_line_bc", INVERTER, 31007, U32, 0.01, "V"),
    VariableSpec::measurement("voltage_line_ca", INVERTER, 31009, U32, 0.01, "V"),
    VariableSpec::measurement("voltage_phase_a", INVERTER, 31011, U32, 0.01, "V"),
    VariableSpec::measurement("voltage_phase_b", INVERTER, 31013, U32, 0.01, "V"),
    VariableSpec::measurement("voltage_phase_c", INVERTER, 31015, U32, 0.01, "V"),
    VariableSpec::measurement("current_phase_a", INVERTER, 31017, S32, 0.01, "A"),
    VariableSpec::measurement("current_phase_b", INVERTER, 31019, S32, 0.01, "A"),
    VariableSpec::measurement("current_phase_c", INVERTER, 31021, S32, 0.01, "A"),
    VariableSpec::measurement("power_factor", INVERTER, 31023, U16, 0.001, ""),
    // Inverter PV strings
    VariableSpec::measurement("voltage_pv1", INVERTER, 31027, S16, 0.1, "V"),
    VariableSpec::measurement("current_pv1", INVERTER, 31028, S16, 0.01, "A"),
    VariableSpec::measurement("voltage_pv2", INVERTER, 31029, S16, 0.1, "V"),
    VariableSpec::measurement("current_pv2", INVERTER, 31030, S16, 0.01, "A"),
    VariableSpec::measurement("voltage_pv3", INVERTER, 31031, S16, 0.1, "V"),
    VariableSpec::measurement("current_pv3", INVERTER, 31032, S16, 0.01, "A"),
    VariableSpec::measurement("voltage_pv4", INVERTER, 31033, S16, 0.1, "V"),
    VariableSpec::measurement("current_pv4", INVERTER, 31034, S16, 0.01, "A"),
    VariableSpec::measurement("power_pv_inverter", INVERTER, 31035, S32, 0.001, "kW"),
    VariableSpec::measurement("resistance_insulation", INVERTER, 31037, U16, 0.001, "MΩ"),
    // Plant energy counters
    VariableSpec::measurement("energy_accum_pv", PLANT, 30088, U64, 0.01, "kWh"),
    VariableSpec::measurement("energy_daily_consumed", PLANT, 30092, U32, 0.01, "kWh"),
    VariableSpec::measurement("energy_accum_consumed", PLANT, 30094, U64, 0.01, "kWh"),
    VariableSpec::measurement("energy_accum_battery_discharge", PLANT, 30204, U64, 0.01, "kWh"),
    VariableSpec::measurement("energy_accum_grid_import", PLANT, 30216, U64, 0.01, "kWh"),
    VariableSpec::measurement("energy_accum_grid_export", PLANT, 30220, U64, 0.01, "kWh"),
    VariableSpec::measurement("energy_total_load_consumed", PLANT, 30228, U64, 0.01, "kWh"),
    VariableSpec::measurement("energy_total_pv_generated", PLANT, 30236, U64, 0.01, "kWh"),
];
