use std::io::{Cursor, Write};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::iwrf::{packet_id_order, PLATFORM_GEOREF_ID};
use crate::prelude::{IwrfError, IwrfResult};

pub const PLATFORM_GEOREF_LEN: usize = 256;

/// Spare floats reserved at the end of the georef packet.
const GEOREF_UNUSED_LEN: usize = 24;

/// Values at or below this are "not available" in georef packets.
const GEOREF_MISSING_THRESHOLD: f32 = -9990.0;

/// Platform position and motion for a moving radar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformGeoref {
    pub packet_seq_num: i64,
    pub time_secs: i64,
    pub time_nanos: i32,
    pub unit_num: i32,
    pub unit_id: i32,
    pub altitude_msl_km: f32,
    pub altitude_agl_km: f32,
    pub ew_velocity_mps: f32,
    pub ns_velocity_mps: f32,
    pub vert_velocity_mps: f32,
    pub heading_deg: f32,
    pub roll_deg: f32,
    pub pitch_deg: f32,
    pub drift_angle_deg: f32,
    pub rotation_angle_deg: f32,
    pub tilt_deg: f32,
    pub ew_horiz_wind_mps: f32,
    pub ns_horiz_wind_mps: f32,
    pub vert_wind_mps: f32,
    pub heading_rate_dps: f32,
    pub pitch_rate_dps: f32,
    pub drive_angle_1_deg: f32,
    pub drive_angle_2_deg: f32,
    pub longitude: f64,
    pub latitude: f64,
    /// Track over the ground, degrees.
    pub track_deg: f32,
    pub roll_rate_dps: f32,
}

impl Default for PlatformGeoref {
    fn default() -> Self {
        Self {
            packet_seq_num: 0,
            time_secs: 0,
            time_nanos: 0,
            unit_num: 0,
            unit_id: 0,
            altitude_msl_km: 0.0,
            altitude_agl_km: 0.0,
            ew_velocity_mps: 0.0,
            ns_velocity_mps: 0.0,
            vert_velocity_mps: -9999.0,
            heading_deg: 0.0,
            roll_deg: 0.0,
            pitch_deg: 0.0,
            drift_angle_deg: 0.0,
            rotation_angle_deg: 0.0,
            tilt_deg: 0.0,
            ew_horiz_wind_mps: 0.0,
            ns_horiz_wind_mps: 0.0,
            vert_wind_mps: 0.0,
            heading_rate_dps: 0.0,
            pitch_rate_dps: 0.0,
            drive_angle_1_deg: 0.0,
            drive_angle_2_deg: 0.0,
            longitude: 0.0,
            latitude: 0.0,
            track_deg: 0.0,
            roll_rate_dps: 0.0,
        }
    }
}

impl PlatformGeoref {
    pub fn decode(buf: &[u8]) -> IwrfResult<Self> {
        if buf.len() < PLATFORM_GEOREF_LEN {
            return Err(IwrfError::Format(format!(
                "platform georef needs {} bytes, buffer has {}",
                PLATFORM_GEOREF_LEN,
                buf.len()
            )));
        }
        match packet_id_order([buf[0], buf[1], buf[2], buf[3]]) {
            Some(true) => read_georef::<BigEndian>(buf),
            Some(false) => read_georef::<LittleEndian>(buf),
            None => Err(IwrfError::Format(format!(
                "unrecognized packet id bytes {:02x?}",
                &buf[..4]
            ))),
        }
    }

    pub fn encode(&self) -> IwrfResult<Vec<u8>> {
        type E = LittleEndian;
        let mut out = Vec::with_capacity(PLATFORM_GEOREF_LEN);
        out.write_i32::<E>(PLATFORM_GEOREF_ID)?;
        out.write_i32::<E>(PLATFORM_GEOREF_LEN as i32)?;
        out.write_i64::<E>(self.packet_seq_num)?;
        out.write_i32::<E>(1)?;
        out.write_i32::<E>(0)?;
        out.write_i64::<E>(self.time_secs)?;
        out.write_i32::<E>(self.time_nanos)?;
        out.write_all(&[0u8; 20])?;

        out.write_i32::<E>(self.unit_num)?;
        out.write_i32::<E>(self.unit_id)?;
        for value in self.float_fields() {
            out.write_f32::<E>(value)?;
        }
        out.write_f64::<E>(self.longitude)?;
        out.write_f64::<E>(self.latitude)?;
        out.write_f32::<E>(self.track_deg)?;
        out.write_f32::<E>(self.roll_rate_dps)?;
        out.write_all(&[0u8; GEOREF_UNUSED_LEN * 4])?;
        Ok(out)
    }

    /// Vertical platform velocity, if the packet carries one.
    pub fn vert_velocity(&self) -> Option<f64> {
        if self.vert_velocity_mps > GEOREF_MISSING_THRESHOLD {
            Some(self.vert_velocity_mps as f64)
        } else {
            None
        }
    }

    pub fn altitude_msl_m(&self) -> f64 {
        self.altitude_msl_km as f64 * 1000.0
    }

    fn float_fields(&self) -> [f32; 18] {
        [
            self.altitude_msl_km,
            self.altitude_agl_km,
            self.ew_velocity_mps,
            self.ns_velocity_mps,
            self.vert_velocity_mps,
            self.heading_deg,
            self.roll_deg,
            self.pitch_deg,
            self.drift_angle_deg,
            self.rotation_angle_deg,
            self.tilt_deg,
            self.ew_horiz_wind_mps,
            self.ns_horiz_wind_mps,
            self.vert_wind_mps,
            self.heading_rate_dps,
            self.pitch_rate_dps,
            self.drive_angle_1_deg,
            self.drive_angle_2_deg,
        ]
    }
}

fn read_georef<B: ByteOrder>(buf: &[u8]) -> IwrfResult<PlatformGeoref> {
    let mut cursor = Cursor::new(&buf[..PLATFORM_GEOREF_LEN]);
    let id = cursor.read_i32::<B>()?;
    if id != PLATFORM_GEOREF_ID {
        return Err(IwrfError::Format(format!(
            "incorrect packet id 0x{:x}, expected platform georef",
            id
        )));
    }
    let _len_bytes = cursor.read_i32::<B>()?;
    let packet_seq_num = cursor.read_i64::<B>()?;
    let _version_num = cursor.read_i32::<B>()?;
    let _radar_id = cursor.read_i32::<B>()?;
    let time_secs = cursor.read_i64::<B>()?;
    let time_nanos = cursor.read_i32::<B>()?;
    cursor.set_position(56);

    let unit_num = cursor.read_i32::<B>()?;
    let unit_id = cursor.read_i32::<B>()?;
    let mut floats = [0f32; 18];
    cursor.read_f32_into::<B>(&mut floats)?;
    let longitude = cursor.read_f64::<B>()?;
    let latitude = cursor.read_f64::<B>()?;
    let track_deg = cursor.read_f32::<B>()?;
    let roll_rate_dps = cursor.read_f32::<B>()?;

    Ok(PlatformGeoref {
        packet_seq_num,
        time_secs,
        time_nanos,
        unit_num,
        unit_id,
        altitude_msl_km: floats[0],
        altitude_agl_km: floats[1],
        ew_velocity_mps: floats[2],
        ns_velocity_mps: floats[3],
        vert_velocity_mps: floats[4],
        heading_deg: floats[5],
        roll_deg: floats[6],
        pitch_deg: floats[7],
        drift_angle_deg: floats[8],
        rotation_angle_deg: floats[9],
        tilt_deg: floats[10],
        ew_horiz_wind_mps: floats[11],
        ns_horiz_wind_mps: floats[12],
        vert_wind_mps: floats[13],
        heading_rate_dps: floats[14],
        pitch_rate_dps: floats[15],
        drive_angle_1_deg: floats[16],
        drive_angle_2_deg: floats[17],
        longitude,
        latitude,
        track_deg,
        roll_rate_dps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iwrf::PULSE_HEADER_ID;

    fn sample() -> PlatformGeoref {
        PlatformGeoref {
            time_secs: 1_600_000_000,
            vert_velocity_mps: 2.5,
            heading_deg: 270.0,
            altitude_msl_km: 1.25,
            longitude: -105.1,
            latitude: 40.0,
            track_deg: 87.5,
            roll_rate_dps: -1.25,
            ..Default::default()
        }
    }

    #[test]
    fn encoded_packet_decodes_to_same_fields() {
        let georef = sample();
        let buf = georef.encode().unwrap();
        assert_eq!(buf.len(), PLATFORM_GEOREF_LEN);
        assert_eq!(PlatformGeoref::decode(&buf).unwrap(), georef);
    }

    #[test]
    fn field_offsets_match_the_wire_layout() {
        let buf = sample().encode().unwrap();
        assert_eq!(LittleEndian::read_f32(&buf[80..84]), 2.5);
        assert_eq!(LittleEndian::read_f32(&buf[84..88]), 270.0);
        assert_eq!(LittleEndian::read_f64(&buf[136..144]), -105.1);
        assert_eq!(LittleEndian::read_f64(&buf[144..152]), 40.0);
        assert_eq!(LittleEndian::read_f32(&buf[152..156]), 87.5);
        assert_eq!(LittleEndian::read_f32(&buf[156..160]), -1.25);
        assert!(buf[160..].iter().all(|&b| b == 0));
    }

    #[test]
    fn packet_is_full_length_and_declares_it() {
        let buf = PlatformGeoref::default().encode().unwrap();
        assert_eq!(buf.len(), 256);
        assert_eq!(LittleEndian::read_i32(&buf[4..8]), 256);
        assert!(PlatformGeoref::decode(&buf[..152]).is_err());
    }

    #[test]
    fn missing_vertical_velocity_is_none() {
        assert!(PlatformGeoref::default().vert_velocity().is_none());
        assert_eq!(sample().vert_velocity(), Some(2.5));
    }

    #[test]
    fn rejects_short_and_foreign_packets() {
        let buf = sample().encode().unwrap();
        assert!(PlatformGeoref::decode(&buf[..100]).is_err());
        let mut foreign = buf.clone();
        foreign[..4].copy_from_slice(&PULSE_HEADER_ID.to_le_bytes());
        assert!(matches!(
            PlatformGeoref::decode(&foreign),
            Err(IwrfError::Format(_))
        ));
    }
}
