use binrw::{BinRead, BinResult, BinWrite};

#[binrw::parser(reader)]
pub fn read_bool() -> BinResult<bool> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0] != 0)
}

#[binrw::writer(writer)]
pub fn write_bool(value: &bool) -> BinResult<()> {
    writer.write_all(&[u8::from(*value)])?;
    Ok(())
}

/// 40-bit little-endian size field, as used by CNMT content records.
#[binrw::parser(reader)]
pub fn read_u40() -> BinResult<u64> {
    let low = u32::read_le(reader)?;
    let high = u8::read_le(reader)?;
    Ok((high as u64) << 32 | (low as u64))
}

#[binrw::writer(writer)]
pub fn write_u40(value: &u64) -> BinResult<()> {
    let low = (value & 0xFFFF_FFFF) as u32;
    let high = ((value >> 32) & 0xFF) as u8;
    low.write_le(writer)?;
    high.write_le(writer)?;
    Ok(())
}
