use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::iwrf::MISSING_DOUBLE;
use crate::prelude::{IwrfError, IwrfResult};

pub const METERS_PER_FOOT: f64 = 0.3048;

/// Root tag of the XML status record.
pub const STATUS_XML_TAG: &str = "TsPrintMaxPower";

const XML_INDENT: &str = "  ";

/// The interlock reads channel 0 and 1 tags from every record.
const XML_MIN_CHANNELS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnits {
    #[default]
    Meters,
    Feet,
}

impl DistanceUnits {
    pub fn from_meters(self, meters: f64) -> f64 {
        match self {
            DistanceUnits::Meters => meters,
            DistanceUnits::Feet => meters / METERS_PER_FOOT,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DistanceUnits::Meters => "m",
            DistanceUnits::Feet => "ft",
        }
    }
}

/// Max-power summary for one receiver channel over a dwell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub mean_max_dbm: f64,
    pub peak_max_dbm: f64,
    /// Range to the mean max-power gate, in the record's distance units.
    pub range_to_max: f64,
    /// Radial velocity at the max-power gate, m/s.
    pub vel: Option<f64>,
}

/// One dwell's worth of max-power monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub time_secs: i64,
    pub msecs: i32,
    pub dwell_secs: f64,
    pub prf: f64,
    pub n_samples: usize,
    pub start_gate: usize,
    pub n_gates: usize,
    pub el: f64,
    pub az: f64,
    pub units: DistanceUnits,
    pub channels: Vec<ChannelStatus>,
}

impl StatusRecord {
    /// Split a mid-dwell time into whole seconds and rounded milliseconds.
    pub fn split_time(mid_time: f64) -> (i64, i32) {
        let secs = mid_time.floor() as i64;
        let msecs = ((mid_time - secs as f64) * 1000.0 + 0.5) as i32;
        (secs, msecs)
    }

    pub fn mid_time(&self) -> f64 {
        self.time_secs as f64 + self.msecs as f64 / 1000.0
    }

    /// Tagged-text record consumed by the transmitter interlock. Field
    /// names and order are fixed.
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        let _ = writeln!(xml, "<{}>", STATUS_XML_TAG);
        push_tag(&mut xml, "time", &format_utc(self.time_secs, 'T'));
        push_tag(&mut xml, "msecs", &format_g(self.msecs as f64));
        push_tag(&mut xml, "dwellSecs", &format_g(self.dwell_secs));
        push_tag(&mut xml, "prf", &format_g(self.prf));
        push_tag(&mut xml, "nSamples", &self.n_samples.to_string());
        push_tag(&mut xml, "startGate", &self.start_gate.to_string());
        push_tag(&mut xml, "nGates", &self.n_gates.to_string());
        push_tag(&mut xml, "el", &format_g(self.el));
        push_tag(&mut xml, "az", &format_g(self.az));
        self.push_channel_tags(&mut xml, "meanMaxDbm", |c| c.mean_max_dbm);
        self.push_channel_tags(&mut xml, "peakMaxDbm", |c| c.peak_max_dbm);
        self.push_channel_tags(&mut xml, "rangeToMax", |c| c.range_to_max);
        self.push_channel_tags(&mut xml, "vel", |c| c.vel.unwrap_or(MISSING_DOUBLE));
        let _ = write!(xml, "</{}>\n\r\n", STATUS_XML_TAG);
        xml
    }

    /// One `<name><ch>` tag per channel. Channels below
    /// `XML_MIN_CHANNELS` are always written, missing when absent.
    fn push_channel_tags(
        &self,
        xml: &mut String,
        name: &str,
        value: impl Fn(&ChannelStatus) -> f64,
    ) {
        for ch in 0..self.channels.len().max(XML_MIN_CHANNELS) {
            let v = self.channels.get(ch).map_or(MISSING_DOUBLE, &value);
            push_tag(xml, &format!("{}{}", name, ch), &format_g(v));
        }
    }

    pub fn to_json(&self) -> IwrfResult<String> {
        serde_json::to_string(self)
            .map_err(|e| IwrfError::Format(format!("serializing status record: {}", e)))
    }

    /// Column labels matching [`StatusRecord::to_text_line`].
    pub fn text_labels(n_channels: usize, units: DistanceUnits) -> String {
        let mut labels = format!("#{:>22} {:>7} {:>7} {:>8}", "time", "prf", "el", "az");
        let range_label = format!("({})", units.label());
        for ch in 0..n_channels {
            let _ = write!(
                labels,
                " {:>7} {:>10}",
                format!("maxDbm{}", ch),
                format!("range{}{}", ch, range_label)
            );
        }
        for ch in 0..n_channels {
            let _ = write!(labels, " {:>8}", format!("vel{}", ch));
        }
        labels
    }

    /// Fixed-column summary line.
    pub fn to_text_line(&self) -> String {
        let mut line = format!(
            "{}.{:03} {:7.1} {:7.2} {:8.2}",
            format_utc(self.time_secs, ' '),
            self.msecs,
            self.prf,
            self.el,
            self.az
        );
        for status in &self.channels {
            let _ = write!(line, " {:7.2} {:10.0}", status.mean_max_dbm, status.range_to_max);
        }
        for status in &self.channels {
            let _ = write!(line, " {:8.2}", status.vel.unwrap_or(MISSING_DOUBLE));
        }
        line
    }
}

fn push_tag(xml: &mut String, tag: &str, value: &str) {
    let _ = writeln!(xml, "{}<{}>{}</{}>", XML_INDENT, tag, value, tag);
}

/// `printf("%g")` style: six significant digits, trailing zeros trimmed,
/// exponent form outside 1e-4..1e6.
pub fn format_g(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    let sci = format!("{:.5e}", value);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => return sci,
    };

    if !(-4..6).contains(&exp) {
        let mantissa = trim_zeros(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    } else {
        let decimals = (5 - exp).max(0) as usize;
        trim_zeros(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

/// Seconds since the epoch as `yyyy-mm-dd<sep>hh:mm:ss`, UTC. Seconds
/// outside chrono's calendar range are written as a plain number.
pub fn format_utc(epoch_secs: i64, separator: char) -> String {
    match DateTime::<Utc>::from_timestamp(epoch_secs, 0) {
        Some(time) => time
            .format(&format!("%Y-%m-%d{}%H:%M:%S", separator))
            .to_string(),
        None => epoch_secs.to_string(),
    }
}
