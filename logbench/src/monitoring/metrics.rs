use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Column order of a pidstat `-h -r -u -w` data line.
pub const FIELD_ORDER: [&str; 15] = [
    "time",
    "pid",
    "user_cpu",
    "system_cpu",
    "guest_cpu",
    "total_cpu_percent",
    "cpu_number",
    "minor_page_faults",
    "major_page_faults",
    "virtual_size",
    "resident_set_size",
    "memory_percent",
    "voluntary_context_switches_per_second",
    "involuntary_context_switches_per_second",
    "command",
];

/// Lines printed by the sampler before the first header.
pub const PREAMBLE_LINES: usize = 2;

/// One resource-usage sample. Values stay in the textual form the sampler
/// printed them in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub time: String,
    pub pid: String,
    pub user_cpu: String,
    pub system_cpu: String,
    pub guest_cpu: String,
    pub total_cpu_percent: String,
    pub cpu_number: String,
    pub minor_page_faults: String,
    pub major_page_faults: String,
    pub virtual_size: String,
    pub resident_set_size: String,
    pub memory_percent: String,
    pub voluntary_context_switches_per_second: String,
    pub involuntary_context_switches_per_second: String,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseAnomaly {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("field {field} is not numeric: '{value}'")]
    NotNumeric { field: &'static str, value: String },
}

impl MetricRecord {
    /// Strict parse of a single data line: exactly fifteen whitespace
    /// separated tokens, the first fourteen numeric.
    pub fn parse(line: &str) -> Result<Self, ParseAnomaly> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != FIELD_ORDER.len() {
            return Err(ParseAnomaly::FieldCount {
                expected: FIELD_ORDER.len(),
                found: tokens.len(),
            });
        }

        for (field, value) in FIELD_ORDER.iter().zip(&tokens).take(FIELD_ORDER.len() - 1) {
            if !is_decimal(value) {
                return Err(ParseAnomaly::NotNumeric {
                    field: *field,
                    value: value.to_string(),
                });
            }
        }

        let mut values = tokens.into_iter().map(str::to_string);
        let mut next = || values.next().unwrap_or_default();

        Ok(Self {
            time: next(),
            pid: next(),
            user_cpu: next(),
            system_cpu: next(),
            guest_cpu: next(),
            total_cpu_percent: next(),
            cpu_number: next(),
            minor_page_faults: next(),
            major_page_faults: next(),
            virtual_size: next(),
            resident_set_size: next(),
            memory_percent: next(),
            voluntary_context_switches_per_second: next(),
            involuntary_context_switches_per_second: next(),
            command: next(),
        })
    }

    /// Field name/value pairs in column order.
    pub fn fields(&self) -> [(&'static str, &str); 15] {
        [
            (FIELD_ORDER[0], self.time.as_str()),
            (FIELD_ORDER[1], self.pid.as_str()),
            (FIELD_ORDER[2], self.user_cpu.as_str()),
            (FIELD_ORDER[3], self.system_cpu.as_str()),
            (FIELD_ORDER[4], self.guest_cpu.as_str()),
            (FIELD_ORDER[5], self.total_cpu_percent.as_str()),
            (FIELD_ORDER[6], self.cpu_number.as_str()),
            (FIELD_ORDER[7], self.minor_page_faults.as_str()),
            (FIELD_ORDER[8], self.major_page_faults.as_str()),
            (FIELD_ORDER[9], self.virtual_size.as_str()),
            (FIELD_ORDER[10], self.resident_set_size.as_str()),
            (FIELD_ORDER[11], self.memory_percent.as_str()),
            (FIELD_ORDER[12], self.voluntary_context_switches_per_second.as_str()),
            (FIELD_ORDER[13], self.involuntary_context_switches_per_second.as_str()),
            (FIELD_ORDER[14], self.command.as_str()),
        ]
    }

    pub fn total_cpu(&self) -> f64 {
        self.total_cpu_percent.parse().unwrap_or(0.0)
    }

    /// Resident set size in kilobytes.
    pub fn rss_kb(&self) -> u64 {
        self.resident_set_size.parse().unwrap_or(0)
    }

    pub fn memory(&self) -> f64 {
        self.memory_percent.parse().unwrap_or(0.0)
    }
}

/// Plain decimal notation: optional minus sign, digits, optional fraction.
/// Exponents, `inf` and `NaN` are rejected.
fn is_decimal(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (digits, None),
    };

    !whole.is_empty()
        && whole.bytes().all(|b| b.is_ascii_digit())
        && fraction.map_or(true, |f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()))
}

/// Wire shape: `{"name": <source>, "stats": {<field>: <value>, ...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricEvent {
    pub name: String,
    pub stats: MetricRecord,
}

impl MetricEvent {
    pub fn new(name: impl Into<String>, stats: MetricRecord) -> Self {
        Self {
            name: name.into(),
            stats,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Preamble(usize),
    Header,
    Data,
    Separator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Skipped,
    Record(MetricRecord),
    Anomaly(ParseAnomaly),
}

/// Line-at-a-time state machine over sampler output: a fixed preamble,
/// then repeating header / data / blank cycles.
#[derive(Debug)]
pub struct CycleParser {
    phase: Phase,
}

impl Default for CycleParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleParser {
    pub fn new() -> Self {
        let phase = if PREAMBLE_LINES == 0 {
            Phase::Header
        } else {
            Phase::Preamble(PREAMBLE_LINES)
        };
        Self { phase }
    }

    pub fn feed(&mut self, line: &str) -> Parsed {
        match self.phase {
            Phase::Preamble(remaining) => {
                self.phase = if remaining > 1 {
                    Phase::Preamble(remaining - 1)
                } else {
                    Phase::Header
                };
                Parsed::Skipped
            }
            Phase::Header => {
                self.phase = Phase::Data;
                Parsed::Skipped
            }
            Phase::Data => {
                self.phase = Phase::Separator;
                match MetricRecord::parse(line) {
                    Ok(record) => Parsed::Record(record),
                    Err(anomaly) => Parsed::Anomaly(anomaly),
                }
            }
            Phase::Separator => {
                self.phase = Phase::Header;
                Parsed::Skipped
            }
        }
    }
}
