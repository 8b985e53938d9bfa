use crate::error::DecodeError;

pub const FLAG_HEART_RATE_16BIT: u8 = 0b0000_0001;
pub const FLAG_SENSOR_CONTACT_STATUS: u8 = 0b0000_0110;
pub const FLAG_SENSOR_CONTACT_SUPPORTED: u8 = 0b0000_0100;
pub const FLAG_ENERGY_EXPENDED_PRESENT: u8 = 0b0000_1000;
pub const FLAG_RR_INTERVAL_PRESENT: u8 = 0b0001_0000;

/// RR intervals are reported in 1/1024 second units.
const RR_UNITS_PER_SECOND: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct HeartRateMeasurement {
    pub heart_rate: u16,
    pub sensor_contact_detected: bool,
    pub sensor_contact_supported: bool,
    pub energy_expended: u16,
    pub rr_intervals: Vec<u16>,
}

impl HeartRateMeasurement {
    pub fn rr_intervals_ms(&self) -> impl Iterator<Item = u32> + '_ {
        self.rr_intervals
            .iter()
            .map(|&rr| u32::from(rr) * 1000 / RR_UNITS_PER_SECOND)
    }

    /// Mean RR interval in milliseconds, estimated from the heart rate when
    /// the packet carried no RR intervals.
    pub fn average_rr_interval_ms(&self) -> u32 {
        if !self.rr_intervals.is_empty() {
            let sum: u32 = self.rr_intervals_ms().sum();
            return sum / self.rr_intervals.len() as u32;
        }

        if self.heart_rate == 0 {
            return 0;
        }

        60_000 / u32::from(self.heart_rate)
    }
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.offset + N;
        let bytes = self
            .data
            .get(self.offset..end)
            .ok_or(DecodeError::Truncated {
                needed: end,
                available: self.data.len(),
            })?;
        self.offset = end;

        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        let [b] = self.take::<1>()?;
        Ok(b)
    }

    fn u16_le(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take::<2>()?))
    }
}

/// Decodes a Heart Rate Measurement characteristic value.
///
/// Bit 2 of the flags is both the high bit of the contact status field and
/// the "contact supported" flag. Reserved bits are not checked.
pub fn decode(data: &[u8]) -> Result<HeartRateMeasurement, DecodeError> {
    let mut reader = Reader::new(data);

    let flags = reader.u8()?;
    let sensor_contact_detected = (flags & FLAG_SENSOR_CONTACT_STATUS) >> 1 == 0b11;
    let sensor_contact_supported = flags & FLAG_SENSOR_CONTACT_SUPPORTED != 0;

    let heart_rate = if flags & FLAG_HEART_RATE_16BIT != 0 {
        reader.u16_le()?
    } else {
        u16::from(reader.u8()?)
    };

    let energy_expended = if flags & FLAG_ENERGY_EXPENDED_PRESENT != 0 {
        reader.u16_le()?
    } else {
        0
    };

    let mut rr_intervals = Vec::new();
    if flags & FLAG_RR_INTERVAL_PRESENT != 0 {
        rr_intervals.reserve(reader.remaining() / 2);
        while reader.remaining() > 0 {
            rr_intervals.push(reader.u16_le()?);
        }
    }

    Ok(HeartRateMeasurement {
        heart_rate,
        sensor_contact_detected,
        sensor_contact_supported,
        energy_expended,
        rr_intervals,
    })
}

/// Builds the packet a sensor would send for `measurement`.
///
/// The 16-bit heart rate format is only used when the value does not fit a
/// byte, and the optional fields are only present when non-empty.
pub fn encode(measurement: &HeartRateMeasurement) -> Vec<u8> {
    let mut flags = 0u8;
    let mut body = Vec::with_capacity(4 + measurement.rr_intervals.len() * 2);

    match u8::try_from(measurement.heart_rate) {
        Ok(hr) => body.push(hr),
        Err(_) => {
            flags |= FLAG_HEART_RATE_16BIT;
            body.extend_from_slice(&measurement.heart_rate.to_le_bytes());
        }
    }

    if measurement.sensor_contact_supported {
        flags |= FLAG_SENSOR_CONTACT_SUPPORTED;
        if measurement.sensor_contact_detected {
            flags |= FLAG_SENSOR_CONTACT_STATUS;
        }
    }

    if measurement.energy_expended > 0 {
        flags |= FLAG_ENERGY_EXPENDED_PRESENT;
        body.extend_from_slice(&measurement.energy_expended.to_le_bytes());
    }

    if !measurement.rr_intervals.is_empty() {
        flags |= FLAG_RR_INTERVAL_PRESENT;
        for rr in &measurement.rr_intervals {
            body.extend_from_slice(&rr.to_le_bytes());
        }
    }

    let mut packet = Vec::with_capacity(body.len() + 1);
    packet.push(flags);
    packet.extend_from_slice(&body);
    packet
}
