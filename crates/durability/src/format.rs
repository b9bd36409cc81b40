//! On-disk snapshot row format: a file header carrying the checkpoint's
//! vector-clock signature, a sequence of framed INSERT-shaped rows, and an
//! EOF marker.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use duskdb_core::{SpaceId, Vclock};

/// Magic bytes identifying a duskdb snapshot file.
pub const FILE_MAGIC: [u8; 4] = *b"DUSK";

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Marker written once, after the last row, to indicate a clean close.
/// Absence of this marker means the file was truncated mid-write.
pub const EOF_MARKER: [u8; 8] = *b"DUSKEOF\0";

/// One row in a snapshot file: always an INSERT of one tuple into one space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// 1-based, dense, ascending position within the file.
    pub lsn: u64,
    /// Target space.
    pub space_id: SpaceId,
    /// Raw serialized tuple body.
    pub tuple: Vec<u8>,
}

/// Write the file header: magic, format version, and the checkpoint's
/// vector-clock signature.
pub fn write_header(w: &mut impl Write, vclock: &Vclock) -> io::Result<()> {
    w.write_all(&FILE_MAGIC)?;
    w.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    w.write_u32::<LittleEndian>(vclock.0.len() as u32)?;
    for (replica, lsn) in &vclock.0 {
        w.write_u32::<LittleEndian>(*replica)?;
        w.write_u64::<LittleEndian>(*lsn)?;
    }
    Ok(())
}

/// Read and validate the file header, returning the encoded vector clock.
pub fn read_header(r: &mut impl Read) -> io::Result<Vclock> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != FILE_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "snapshot file missing DUSK magic",
        ));
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported snapshot format version {version}"),
        ));
    }
    let n = r.read_u32::<LittleEndian>()?;
    let mut components = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let replica = r.read_u32::<LittleEndian>()?;
        let lsn = r.read_u64::<LittleEndian>()?;
        components.push((replica, lsn));
    }
    Ok(Vclock::new(components))
}

/// Frame one row: `[len: u32][lsn: u64][space_id: u32][tuple bytes][crc32: u32]`.
pub fn encode_row(row: &Row) -> Vec<u8> {
    let mut body = Vec::with_capacity(12 + row.tuple.len());
    body.write_u64::<LittleEndian>(row.lsn).unwrap();
    body.write_u32::<LittleEndian>(row.space_id.0).unwrap();
    body.extend_from_slice(&row.tuple);

    let crc = crc32fast::hash(&body);

    let mut framed = Vec::with_capacity(4 + body.len() + 4);
    framed
        .write_u32::<LittleEndian>(body.len() as u32)
        .unwrap();
    framed.extend_from_slice(&body);
    framed.write_u32::<LittleEndian>(crc).unwrap();
    framed
}

/// What a row read produced.
pub enum RowRead {
    /// A decoded row.
    Row(Row),
    /// The EOF marker was reached; no more rows follow.
    Eof,
}

/// Decode one framed row (or the EOF marker) from `r`.
pub fn decode_row(r: &mut impl Read) -> io::Result<RowRead> {
    let mut len_or_marker = [0u8; 4];
    r.read_exact(&mut len_or_marker)?;

    // The EOF marker is distinguished from a length-prefixed row by reading
    // the next 4 bytes too and comparing against the full 8-byte marker.
    let mut rest = [0u8; 4];
    let peek_result = r.read_exact(&mut rest);
    let mut probe = [0u8; 8];
    probe[..4].copy_from_slice(&len_or_marker);
    if peek_result.is_ok() {
        probe[4..].copy_from_slice(&rest);
        if probe == EOF_MARKER {
            return Ok(RowRead::Eof);
        }
    }

    let len = u32::from_le_bytes(len_or_marker) as usize;
    let mut body = vec![0u8; len];
    // The 4 bytes already read into `rest` are the first 4 bytes of body.
    let prefix_len = rest.len().min(len);
    body[..prefix_len].copy_from_slice(&rest[..prefix_len]);
    if len > prefix_len {
        r.read_exact(&mut body[prefix_len..])?;
    }

    let mut crc_bytes = [0u8; 4];
    r.read_exact(&mut crc_bytes)?;
    let expected_crc = u32::from_le_bytes(crc_bytes);
    let actual_crc = crc32fast::hash(&body);
    if actual_crc != expected_crc {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "snapshot row CRC mismatch",
        ));
    }

    let mut cursor = io::Cursor::new(&body);
    let lsn = cursor.read_u64::<LittleEndian>()?;
    let space_id = SpaceId(cursor.read_u32::<LittleEndian>()?);
    let mut tuple = Vec::new();
    cursor.read_to_end(&mut tuple)?;

    Ok(RowRead::Row(Row {
        lsn,
        space_id,
        tuple,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let vclock = Vclock::new(vec![(0, 42), (1, 7)]);
        let mut buf = Vec::new();
        write_header(&mut buf, &vclock).unwrap();
        let mut cursor = io::Cursor::new(buf);
        let decoded = read_header(&mut cursor).unwrap();
        assert_eq!(decoded, vclock);
    }

    #[test]
    fn row_round_trips() {
        let row = Row {
            lsn: 1,
            space_id: SpaceId(5),
            tuple: b"payload".to_vec(),
        };
        let framed = encode_row(&row);
        let mut cursor = io::Cursor::new(framed);
        match decode_row(&mut cursor).unwrap() {
            RowRead::Row(decoded) => assert_eq!(decoded, row),
            RowRead::Eof => panic!("expected a row, got EOF marker"),
        }
    }

    #[test]
    fn eof_marker_is_recognized() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&EOF_MARKER);
        let mut cursor = io::Cursor::new(buf);
        assert!(matches!(decode_row(&mut cursor).unwrap(), RowRead::Eof));
    }

    #[test]
    fn corrupted_row_crc_is_rejected() {
        let row = Row {
            lsn: 1,
            space_id: SpaceId(1),
            tuple: b"x".to_vec(),
        };
        let mut framed = encode_row(&row);
        let last = framed.len() - 1;
        framed[last] ^= 0xFF;
        let mut cursor = io::Cursor::new(framed);
        assert!(decode_row(&mut cursor).is_err());
    }
}
