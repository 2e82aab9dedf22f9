//! Fixed-layout command reply parsing.
//!
//! Replies are little-endian structures at fixed byte offsets; text fields
//! are fixed-width and NUL-padded. [`ByteReader`] is a small bounds-checked
//! cursor so layout code reads top to bottom like the wire documentation.

use super::error::PacketParseError;

/// Bounds-checked little-endian cursor over a reply buffer.
#[derive(Debug)]
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PacketParseError> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(PacketParseError::TooShort {
                needed: end,
                got: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), PacketParseError> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8, PacketParseError> {
        Ok(self.take(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8, PacketParseError> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn u16(&mut self) -> Result<u16, PacketParseError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, PacketParseError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> Result<i32, PacketParseError> {
        Ok(self.u32()? as i32)
    }

    pub fn f32(&mut self) -> Result<f32, PacketParseError> {
        Ok(f32::from_bits(self.u32()?))
    }

    pub fn u64(&mut self) -> Result<u64, PacketParseError> {
        let b = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(b);
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn f64(&mut self) -> Result<f64, PacketParseError> {
        Ok(f64::from_bits(self.u64()?))
    }

    /// Reads a fixed-width NUL-padded text field.
    pub fn text(&mut self, width: usize) -> Result<String, PacketParseError> {
        let raw = self.take(width)?;
        Ok(String::from_utf8_lossy(raw)
            .trim_end_matches('\0')
            .replace('\0', ""))
    }
}

/// Battery charger state reported in the status block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChargerState {
    Idle,
    Charging,
    Complete,
    Error,
}

impl ChargerState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ChargerState::Idle,
            1 => ChargerState::Charging,
            2 => ChargerState::Complete,
            _ => ChargerState::Error,
        }
    }
}

/// Parsed get-status reply. Battery and charger fields change over a
/// session; everything else is effectively static.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub status: u8,
    /// Main CPU firmware version, rendered `major.minor.build`.
    pub master_cpu_version: String,
    /// Radio CPU firmware version.
    pub slave_cpu_version: String,
    pub battery_level_percent: u8,
    pub charger_state: ChargerState,
}

impl DeviceStatus {
    /// Layout: 6 header bytes, then status u8, spare u8, master fw
    /// major/minor u8 + build u16, slave fw major/minor u8 + build u16,
    /// battery percent u8, charger state u8.
    pub fn parse(reply: &[u8]) -> Result<Self, PacketParseError> {
        let mut r = ByteReader::new(reply);
        r.skip(6)?;
        let status = r.u8()?;
        let _spare = r.u8()?;
        let master_major = r.u8()?;
        let master_minor = r.u8()?;
        let master_build = r.u16()?;
        let slave_major = r.u8()?;
        let slave_minor = r.u8()?;
        let slave_build = r.u16()?;
        let battery_level_percent = r.u8()?;
        let charger_state = ChargerState::from_u8(r.u8()?);

        Ok(DeviceStatus {
            status,
            master_cpu_version: format!("{master_major}.{master_minor}.{master_build}"),
            slave_cpu_version: format!("{slave_major}.{slave_minor}.{slave_build}"),
            battery_level_percent,
            charger_state,
        })
    }
}

/// Parsed get-device-info reply. Immutable for the life of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub order_code: String,
    pub serial_number: String,
    pub name: String,
    pub description: String,
    pub mfg_id: u16,
    /// Manufacture date rendered `month/day/year`.
    pub mfg_date: String,
    pub master_cpu_version: String,
    pub slave_cpu_version: String,
    /// BLE MAC address, lowercase colon-separated hex.
    pub ble_address: String,
    pub nvram_size: u32,
}

impl DeviceInfo {
    /// Layout: 6 header bytes, order code [16], serial [16], name [32],
    /// mfg id u16, year u16, month u8, day u8, master fw major/minor u8 +
    /// build u16, slave fw major/minor u8 + build u16, BLE address bytes
    /// (stored high octet first), NVRAM size u32, description [64].
    pub fn parse(reply: &[u8]) -> Result<Self, PacketParseError> {
        let mut r = ByteReader::new(reply);
        r.skip(6)?;
        let order_code = r.text(16)?;
        let serial_number = r.text(16)?;
        let name = r.text(32)?;
        let mfg_id = r.u16()?;
        let year = r.u16()?;
        let month = r.u8()?;
        let day = r.u8()?;
        let master_major = r.u8()?;
        let master_minor = r.u8()?;
        let master_build = r.u16()?;
        let slave_major = r.u8()?;
        let slave_minor = r.u8()?;
        let slave_build = r.u16()?;
        let addr5 = r.u8()?;
        let addr4 = r.u8()?;
        let addr3 = r.u8()?;
        let addr2 = r.u8()?;
        let addr1 = r.u8()?;
        let addr0 = r.u8()?;
        let nvram_size = r.u32()?;
        let description = r.text(64)?;

        Ok(DeviceInfo {
            order_code,
            serial_number,
            name,
            description,
            mfg_id,
            mfg_date: format!("{month}/{day}/{year}"),
            master_cpu_version: format!("{master_major}.{master_minor}.{master_build}"),
            slave_cpu_version: format!("{slave_major}.{slave_minor}.{slave_build}"),
            ble_address: format!(
                "{addr0:02x}:{addr1:02x}:{addr2:02x}:{addr3:02x}:{addr4:02x}:{addr5:02x}"
            ),
            nvram_size,
        })
    }
}

/// Extracts the 32-bit sensor mask carried by the available-sensors and
/// default-sensors replies (LE u32 at offset 6).
pub fn parse_sensor_mask(reply: &[u8]) -> Result<u32, PacketParseError> {
    let mut r = ByteReader::new(reply);
    r.skip(6)?;
    r.u32()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_reply() -> Vec<u8> {
        let mut reply = vec![0x00; 6];
        reply.push(0x01); // status
        reply.push(0x00); // spare
        reply.push(1); // master major
        reply.push(2); // master minor
        reply.extend_from_slice(&300u16.to_le_bytes()); // master build
        reply.push(3); // slave major
        reply.push(4); // slave minor
        reply.extend_from_slice(&500u16.to_le_bytes()); // slave build
        reply.push(87); // battery %
        reply.push(1); // charging
        reply
    }

    #[test]
    fn test_parse_status() {
        let status = DeviceStatus::parse(&status_reply()).unwrap();
        assert_eq!(status.status, 1);
        assert_eq!(status.master_cpu_version, "1.2.300");
        assert_eq!(status.slave_cpu_version, "3.4.500");
        assert_eq!(status.battery_level_percent, 87);
        assert_eq!(status.charger_state, ChargerState::Charging);
    }

    #[test]
    fn test_parse_status_too_short() {
        let reply = status_reply();
        let result = DeviceStatus::parse(&reply[..10]);
        assert!(matches!(result, Err(PacketParseError::TooShort { .. })));
    }

    fn text_field(s: &str, width: usize) -> Vec<u8> {
        let mut field = s.as_bytes().to_vec();
        field.resize(width, 0);
        field
    }

    #[test]
    fn test_parse_device_info() {
        let mut reply = vec![0x00; 6];
        reply.extend_from_slice(&text_field("GDX-FOR", 16));
        reply.extend_from_slice(&text_field("0H1019Z9", 16));
        reply.extend_from_slice(&text_field("GDX-FOR 0H1019Z9", 32));
        reply.extend_from_slice(&0x0123u16.to_le_bytes()); // mfg id
        reply.extend_from_slice(&2023u16.to_le_bytes()); // year
        reply.push(7); // month
        reply.push(15); // day
        reply.extend_from_slice(&[1, 0]); // master major/minor
        reply.extend_from_slice(&11u16.to_le_bytes()); // master build
        reply.extend_from_slice(&[2, 1]); // slave major/minor
        reply.extend_from_slice(&22u16.to_le_bytes()); // slave build
        reply.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]); // addr5..addr0
        reply.extend_from_slice(&4096u32.to_le_bytes()); // nvram
        reply.extend_from_slice(&text_field("Force and Acceleration", 64));
        assert_eq!(reply.len(), 158);

        let info = DeviceInfo::parse(&reply).unwrap();
        assert_eq!(info.order_code, "GDX-FOR");
        assert_eq!(info.serial_number, "0H1019Z9");
        assert_eq!(info.name, "GDX-FOR 0H1019Z9");
        assert_eq!(info.description, "Force and Acceleration");
        assert_eq!(info.mfg_id, 0x0123);
        assert_eq!(info.mfg_date, "7/15/2023");
        assert_eq!(info.master_cpu_version, "1.0.11");
        assert_eq!(info.slave_cpu_version, "2.1.22");
        // Rendered starting from the low octet (addr0), as the reference
        // host stacks do.
        assert_eq!(info.ble_address, "ff:ee:dd:cc:bb:aa");
        assert_eq!(info.nvram_size, 4096);
    }

    #[test]
    fn test_parse_sensor_mask() {
        let mut reply = vec![0x20, 0x0A, 0x00, 0x00, 0x00, 0x00];
        reply.extend_from_slice(&0b1010u32.to_le_bytes());
        assert_eq!(parse_sensor_mask(&reply).unwrap(), 0b1010);

        assert!(matches!(
            parse_sensor_mask(&reply[..8]),
            Err(PacketParseError::TooShort { needed: 10, got: 8 })
        ));
    }

    #[test]
    fn test_text_strips_nul_padding() {
        let mut r = ByteReader::new(b"N\0\0\0");
        assert_eq!(r.text(4).unwrap(), "N");
    }
}
