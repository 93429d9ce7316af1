use std::io::{Cursor, Write};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::iwrf::{
    packet_id_order, IqEncoding, ScanMode, MAX_CHAN, PULSE_HEADER_ID, RVP8_PULSE_HEADER_ID,
};
use crate::prelude::{IwrfError, IwrfResult};

/// Size of the pulse header record on the wire.
pub const PULSE_HEADER_LEN: usize = 256;

/// Header structure version written by this crate.
pub const PULSE_HEADER_VERSION: i32 = 1;

/// Byte order of a received packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireOrder {
    Little,
    Big,
}

/// In-memory form of the fixed-size IWRF pulse header.
///
/// Field order follows the wire layout; the record is serialised field by
/// field so no struct layout assumptions are made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseHeader {
    pub len_bytes: i32,
    pub packet_seq_num: i64,
    pub version_num: i32,
    pub radar_id: i32,
    pub time_secs: i64,
    pub time_nanos: i32,
    pub reserved: [i32; 5],

    pub pulse_seq_num: i64,
    pub scan_mode: ScanMode,
    pub follow_mode: i32,
    pub volume_num: i32,
    pub sweep_num: i32,
    pub fixed_el_deg: f32,
    pub fixed_az_deg: f32,
    pub elevation_deg: f32,
    pub azimuth_deg: f32,
    pub prt: f32,
    pub prt_next: f32,
    pub pulse_width_us: f32,
    pub n_gates: usize,
    pub n_channels: usize,
    pub iq_encoding: IqEncoding,
    pub hv_flag: i32,
    pub antenna_transition: bool,
    pub phase_cohered: bool,
    pub status: i32,
    pub n_data: usize,
    pub iq_offset: [i32; MAX_CHAN],
    pub burst_mag: [f32; MAX_CHAN],
    pub burst_arg: [f32; MAX_CHAN],
    pub burst_arg_diff: [f32; MAX_CHAN],
    pub scale: f32,
    pub offset: f32,
    pub n_gates_burst: usize,
    pub start_range_m: f32,
    pub gate_spacing_m: f32,
    pub event_flags: i32,
    pub txrx_state: i32,
    pub unused: [i32; 6],
}

impl Default for PulseHeader {
    fn default() -> Self {
        Self {
            len_bytes: PULSE_HEADER_LEN as i32,
            packet_seq_num: 0,
            version_num: PULSE_HEADER_VERSION,
            radar_id: 0,
            time_secs: 0,
            time_nanos: 0,
            reserved: [0; 5],
            pulse_seq_num: 0,
            scan_mode: ScanMode::NotSet,
            follow_mode: 0,
            volume_num: -1,
            sweep_num: -1,
            fixed_el_deg: 0.0,
            fixed_az_deg: 0.0,
            elevation_deg: 0.0,
            azimuth_deg: 0.0,
            prt: 0.001,
            prt_next: 0.001,
            pulse_width_us: 1.0,
            n_gates: 0,
            n_channels: 1,
            iq_encoding: IqEncoding::Fl32,
            hv_flag: 1,
            antenna_transition: false,
            phase_cohered: false,
            status: 0,
            n_data: 0,
            iq_offset: [0; MAX_CHAN],
            burst_mag: [0.0; MAX_CHAN],
            burst_arg: [0.0; MAX_CHAN],
            burst_arg_diff: [0.0; MAX_CHAN],
            scale: 1.0,
            offset: 0.0,
            n_gates_burst: 0,
            start_range_m: 0.0,
            gate_spacing_m: 0.0,
            event_flags: 0,
            txrx_state: 0,
            unused: [0; 6],
        }
    }
}

impl PulseHeader {
    /// Decode a header from the start of `buf`, swapping as required.
    pub fn decode(buf: &[u8]) -> IwrfResult<Self> {
        Self::decode_with_order(buf).map(|(header, _)| header)
    }

    /// Decode a header and report the byte order the packet was written in.
    pub fn decode_with_order(buf: &[u8]) -> IwrfResult<(Self, WireOrder)> {
        if buf.len() < PULSE_HEADER_LEN {
            return Err(IwrfError::Format(format!(
                "pulse header needs {} bytes, buffer has {}",
                PULSE_HEADER_LEN,
                buf.len()
            )));
        }

        let order = match packet_id_order([buf[0], buf[1], buf[2], buf[3]]) {
            Some(false) => WireOrder::Little,
            Some(true) => WireOrder::Big,
            None => {
                return Err(IwrfError::Format(format!(
                    "unrecognized packet id bytes {:02x?}",
                    &buf[..4]
                )))
            }
        };

        let header = match order {
            WireOrder::Little => read_header::<LittleEndian>(buf)?,
            WireOrder::Big => read_header::<BigEndian>(buf)?,
        };
        Ok((header, order))
    }

    /// Encode the header as little-endian wire bytes.
    pub fn encode(&self) -> IwrfResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(PULSE_HEADER_LEN);
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> IwrfResult<()> {
        type E = LittleEndian;

        out.write_i32::<E>(PULSE_HEADER_ID)?;
        out.write_i32::<E>(self.len_bytes)?;
        out.write_i64::<E>(self.packet_seq_num)?;
        out.write_i32::<E>(self.version_num)?;
        out.write_i32::<E>(self.radar_id)?;
        out.write_i64::<E>(self.time_secs)?;
        out.write_i32::<E>(self.time_nanos)?;
        for value in self.reserved {
            out.write_i32::<E>(value)?;
        }

        out.write_i64::<E>(self.pulse_seq_num)?;
        out.write_i32::<E>(self.scan_mode.to_wire())?;
        out.write_i32::<E>(self.follow_mode)?;
        out.write_i32::<E>(self.volume_num)?;
        out.write_i32::<E>(self.sweep_num)?;
        out.write_f32::<E>(self.fixed_el_deg)?;
        out.write_f32::<E>(self.fixed_az_deg)?;
        out.write_f32::<E>(self.elevation_deg)?;
        out.write_f32::<E>(self.azimuth_deg)?;
        out.write_f32::<E>(self.prt)?;
        out.write_f32::<E>(self.prt_next)?;
        out.write_f32::<E>(self.pulse_width_us)?;
        out.write_i32::<E>(to_wire_count(self.n_gates, "n_gates")?)?;
        out.write_i32::<E>(to_wire_count(self.n_channels, "n_channels")?)?;
        out.write_i32::<E>(self.iq_encoding.to_wire())?;
        out.write_i32::<E>(self.hv_flag)?;
        out.write_i32::<E>(self.antenna_transition as i32)?;
        out.write_i32::<E>(self.phase_cohered as i32)?;
        out.write_i32::<E>(self.status)?;
        out.write_i32::<E>(to_wire_count(self.n_data, "n_data")?)?;
        for value in self.iq_offset {
            out.write_i32::<E>(value)?;
        }
        for values in [
            &self.burst_mag,
            &self.burst_arg,
            &self.burst_arg_diff,
        ] {
            for value in values.iter() {
                out.write_f32::<E>(*value)?;
            }
        }
        out.write_f32::<E>(self.scale)?;
        out.write_f32::<E>(self.offset)?;
        out.write_i32::<E>(to_wire_count(self.n_gates_burst, "n_gates_burst")?)?;
        out.write_f32::<E>(self.start_range_m)?;
        out.write_f32::<E>(self.gate_spacing_m)?;
        out.write_i32::<E>(self.event_flags)?;
        out.write_i32::<E>(self.txrx_state)?;
        for value in self.unused {
            out.write_i32::<E>(value)?;
        }
        Ok(())
    }

    /// Gates per channel in the payload, burst gates included.
    pub fn n_gates_total(&self) -> usize {
        self.n_gates + self.n_gates_burst
    }

    /// Minimum `n_data` implied by the gate and channel geometry.
    pub fn n_data_min(&self) -> usize {
        self.n_channels * self.n_gates_total() * 2
    }

    /// Payload bytes implied by `n_data` and the encoding.
    pub fn payload_len(&self) -> usize {
        self.n_data * self.iq_encoding.bytes_per_value()
    }

    /// Recompute `iq_offset` from geometry: each channel starts after the
    /// previous channel's burst and data gates.
    pub fn set_iq_offsets(&mut self) -> IwrfResult<()> {
        let per_chan = self.n_gates_total() * 2;
        let burst = self.n_gates_burst * 2;
        let mut offsets = [0; MAX_CHAN];
        for (chan, offset) in offsets.iter_mut().enumerate().take(self.n_channels) {
            *offset = to_wire_count(burst + chan * per_chan, "iq_offset")?;
        }
        self.iq_offset = offsets;
        Ok(())
    }

    /// Set `len_bytes` to the header plus the payload implied by `n_data`.
    pub fn set_len_bytes(&mut self) -> IwrfResult<()> {
        self.len_bytes = to_wire_count(PULSE_HEADER_LEN + self.payload_len(), "len_bytes")?;
        Ok(())
    }

    /// Pulse time as floating seconds since the epoch.
    pub fn ftime(&self) -> f64 {
        self.time_secs as f64 + self.time_nanos as f64 / 1.0e9
    }
}

fn to_wire_count(value: usize, name: &str) -> IwrfResult<i32> {
    i32::try_from(value)
        .map_err(|_| IwrfError::Range(format!("{} {} does not fit the wire format", name, value)))
}

fn from_wire_count(value: i32, name: &str) -> IwrfResult<usize> {
    usize::try_from(value)
        .map_err(|_| IwrfError::Format(format!("negative {} in pulse header: {}", name, value)))
}

fn read_i32_array<B: ByteOrder, const N: usize>(cursor: &mut Cursor<&[u8]>) -> IwrfResult<[i32; N]> {
    let mut values = [0i32; N];
    cursor.read_i32_into::<B>(&mut values)?;
    Ok(values)
}

fn read_f32_array<B: ByteOrder, const N: usize>(cursor: &mut Cursor<&[u8]>) -> IwrfResult<[f32; N]> {
    let mut values = [0f32; N];
    cursor.read_f32_into::<B>(&mut values)?;
    Ok(values)
}

fn read_header<B: ByteOrder>(buf: &[u8]) -> IwrfResult<PulseHeader> {
    let mut cursor = Cursor::new(&buf[..PULSE_HEADER_LEN]);

    let id = cursor.read_i32::<B>()?;
    if id == RVP8_PULSE_HEADER_ID {
        return Err(IwrfError::Format(
            "RVP8 pulse headers are not supported".to_string(),
        ));
    }
    if id != PULSE_HEADER_ID {
        return Err(IwrfError::Format(format!(
            "incorrect packet id 0x{:x}, expected pulse header",
            id
        )));
    }

    let len_bytes = cursor.read_i32::<B>()?;
    let packet_seq_num = cursor.read_i64::<B>()?;
    let version_num = cursor.read_i32::<B>()?;
    let radar_id = cursor.read_i32::<B>()?;
    let time_secs = cursor.read_i64::<B>()?;
    let time_nanos = cursor.read_i32::<B>()?;
    let reserved = read_i32_array::<B, 5>(&mut cursor)?;

    let pulse_seq_num = cursor.read_i64::<B>()?;
    let scan_mode = ScanMode::from_wire(cursor.read_i32::<B>()?);
    let follow_mode = cursor.read_i32::<B>()?;
    let volume_num = cursor.read_i32::<B>()?;
    let sweep_num = cursor.read_i32::<B>()?;
    let fixed_el_deg = cursor.read_f32::<B>()?;
    let fixed_az_deg = cursor.read_f32::<B>()?;
    let elevation_deg = cursor.read_f32::<B>()?;
    let azimuth_deg = cursor.read_f32::<B>()?;
    let prt = cursor.read_f32::<B>()?;
    let prt_next = cursor.read_f32::<B>()?;
    let pulse_width_us = cursor.read_f32::<B>()?;
    let n_gates = from_wire_count(cursor.read_i32::<B>()?, "n_gates")?;
    let n_channels = from_wire_count(cursor.read_i32::<B>()?, "n_channels")?;
    let encoding_code = cursor.read_i32::<B>()?;
    let iq_encoding = IqEncoding::from_wire(encoding_code).ok_or_else(|| {
        IwrfError::Format(format!("unrecognized iq_encoding {}", encoding_code))
    })?;
    let hv_flag = cursor.read_i32::<B>()?;
    let antenna_transition = cursor.read_i32::<B>()? != 0;
    let phase_cohered = cursor.read_i32::<B>()? != 0;
    let status = cursor.read_i32::<B>()?;
    let n_data = from_wire_count(cursor.read_i32::<B>()?, "n_data")?;
    let iq_offset = read_i32_array::<B, MAX_CHAN>(&mut cursor)?;
    let burst_mag = read_f32_array::<B, MAX_CHAN>(&mut cursor)?;
    let burst_arg = read_f32_array::<B, MAX_CHAN>(&mut cursor)?;
    let burst_arg_diff = read_f32_array::<B, MAX_CHAN>(&mut cursor)?;
    let scale = cursor.read_f32::<B>()?;
    let offset = cursor.read_f32::<B>()?;
    let n_gates_burst = from_wire_count(cursor.read_i32::<B>()?, "n_gates_burst")?;
    let start_range_m = cursor.read_f32::<B>()?;
    let gate_spacing_m = cursor.read_f32::<B>()?;
    let event_flags = cursor.read_i32::<B>()?;
    let txrx_state = cursor.read_i32::<B>()?;
    let unused = read_i32_array::<B, 6>(&mut cursor)?;

    if n_channels == 0 || n_channels > MAX_CHAN {
        return Err(IwrfError::Format(format!(
            "n_channels {} outside 1..={}",
            n_channels, MAX_CHAN
        )));
    }

    debug_assert_eq!(cursor.position() as usize, PULSE_HEADER_LEN);

    Ok(PulseHeader {
        len_bytes,
        packet_seq_num,
        version_num,
        radar_id,
        time_secs,
        time_nanos,
        reserved,
        pulse_seq_num,
        scan_mode,
        follow_mode,
        volume_num,
        sweep_num,
        fixed_el_deg,
        fixed_az_deg,
        elevation_deg,
        azimuth_deg,
        prt,
        prt_next,
        pulse_width_us,
        n_gates,
        n_channels,
        iq_encoding,
        hv_flag,
        antenna_transition,
        phase_cohered,
        status,
        n_data,
        iq_offset,
        burst_mag,
        burst_arg,
        burst_arg_diff,
        scale,
        offset,
        n_gates_burst,
        start_range_m,
        gate_spacing_m,
        event_flags,
        txrx_state,
        unused,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> PulseHeader {
        let mut header = PulseHeader {
            pulse_seq_num: 123_456_789_012,
            time_secs: 1_700_000_000,
            time_nanos: 250_000_000,
            scan_mode: ScanMode::AzSur360,
            volume_num: 7,
            sweep_num: 2,
            elevation_deg: 0.5,
            azimuth_deg: 271.25,
            prt: 0.001,
            prt_next: 0.0015,
            n_gates: 100,
            n_channels: 2,
            n_gates_burst: 2,
            iq_encoding: IqEncoding::ScaledSi16,
            scale: 0.01,
            offset: 0.5,
            burst_mag: [1.0, 0.9, 0.0, 0.0],
            burst_arg: [45.0, -30.0, 0.0, 0.0],
            burst_arg_diff: [12.5, 0.0, 0.0, 0.0],
            start_range_m: 150.0,
            gate_spacing_m: 75.0,
            reserved: [1, 2, 3, 4, 5],
            unused: [6, 5, 4, 3, 2, 1],
            ..Default::default()
        };
        header.n_data = header.n_data_min();
        header.set_iq_offsets().unwrap();
        header
    }

    #[test]
    fn header_round_trips_through_wire_bytes() {
        let header = sample_header();
        let bytes = header.encode().unwrap();
        assert_eq!(bytes.len(), PULSE_HEADER_LEN);
        let decoded = PulseHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_decodes_big_endian_packets() {
        let header = sample_header();
        let le = header.encode().unwrap();

        // Swap every 4-byte word, and the three 8-byte fields as whole units.
        let mut be = le.clone();
        let wide = [8usize, 24, 56];
        let mut pos = 0;
        while pos < PULSE_HEADER_LEN {
            let width = if wide.contains(&pos) { 8 } else { 4 };
            be[pos..pos + width].reverse();
            pos += width;
        }

        let (decoded, order) = PulseHeader::decode_with_order(&be).unwrap();
        assert_eq!(order, WireOrder::Big);
        assert_eq!(decoded, header);
    }

    #[test]
    fn short_buffer_is_format_error() {
        let bytes = sample_header().encode().unwrap();
        let err = PulseHeader::decode(&bytes[..100]).unwrap_err();
        assert!(matches!(err, IwrfError::Format(_)));
    }

    #[test]
    fn unknown_encoding_is_format_error() {
        let mut bytes = sample_header().encode().unwrap();
        // iq_encoding lives after n_gates and n_channels
        bytes[116..120].copy_from_slice(&99i32.to_le_bytes());
        let err = PulseHeader::decode(&bytes).unwrap_err();
        assert!(matches!(err, IwrfError::Format(_)));
    }

    #[test]
    fn too_many_channels_is_format_error() {
        let mut bytes = sample_header().encode().unwrap();
        bytes[112..116].copy_from_slice(&5i32.to_le_bytes());
        assert!(PulseHeader::decode(&bytes).is_err());
    }

    #[test]
    fn iq_offsets_increase_by_channel() {
        let header = sample_header();
        assert_eq!(header.iq_offset, [4, 208, 0, 0]);
        assert_eq!(header.n_data, 2 * 102 * 2);
        assert_eq!(header.payload_len(), header.n_data * 2);
    }

    #[test]
    fn oversized_geometry_is_range_error() {
        let mut header = sample_header();
        let before = header.iq_offset;
        header.n_gates = i32::MAX as usize;
        assert!(matches!(header.set_iq_offsets(), Err(IwrfError::Range(_))));
        assert_eq!(header.iq_offset, before);

        let mut header = sample_header();
        header.n_data = i32::MAX as usize;
        assert!(matches!(header.set_len_bytes(), Err(IwrfError::Range(_))));

        let mut header = sample_header();
        header.set_len_bytes().unwrap();
        assert_eq!(header.len_bytes as usize, PULSE_HEADER_LEN + header.payload_len());
    }
}
