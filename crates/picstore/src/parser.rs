//! Record log format parser using nom
//!
//! File format:
//! ```text
//! PICSTOR\n
//! [version: u32 little-endian]
//! ...records...
//! ```
//!
//! Record format:
//! ```text
//! [key_len: u32 LE][value_len: u32 LE][key bytes][value bytes]
//! ```

use nom::{
    bytes::complete::{tag, take},
    number::complete::le_u32,
    sequence::{pair, preceded},
    IResult,
};

use crate::error::{Error, Result};

/// Magic header for record log files
pub const STORE_MAGIC: &[u8] = b"PICSTOR\n";

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Length of the file header in bytes
pub const HEADER_LEN: usize = STORE_MAGIC.len() + 4;

/// Length of the fixed-size prefix in front of every record
pub const RECORD_PREFIX_LEN: usize = 8;

/// A record borrowed from the raw log bytes
#[derive(Debug, Clone, PartialEq)]
pub struct Record<'a> {
    /// Raw key bytes (UTF-8)
    pub key: &'a [u8],
    /// Raw value bytes
    pub value: &'a [u8],
}

/// Parse and validate the file header, returning the format version
pub fn parse_header(input: &[u8]) -> Result<u32> {
    if input.len() < HEADER_LEN {
        return Err(Error::Parse("Input too short for header".to_string()));
    }

    let parsed: IResult<&[u8], u32> = preceded(tag(STORE_MAGIC), le_u32)(input);
    let (_, version) =
        parsed.map_err(|_| Error::Parse("Invalid record log magic header".to_string()))?;

    if version != FORMAT_VERSION {
        return Err(Error::Parse(format!(
            "Unsupported record log version: {}",
            version
        )));
    }

    Ok(version)
}

/// Create a record log file header
pub fn create_header() -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(STORE_MAGIC);
    header.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    header
}

/// Parse a single record.
///
/// Fails on a truncated record, which is how a torn tail shows up.
pub fn parse_record(input: &[u8]) -> IResult<&[u8], Record<'_>> {
    let (input, (key_len, value_len)) = pair(le_u32, le_u32)(input)?;
    let (input, key) = take(key_len)(input)?;
    let (input, value) = take(value_len)(input)?;
    Ok((input, Record { key, value }))
}

/// Encode a record for appending to the log
pub fn encode_record(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECORD_PREFIX_LEN + key.len() + value.len());
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let header = create_header();
        assert_eq!(parse_header(&header).unwrap(), FORMAT_VERSION);
    }

    #[test]
    fn test_parse_header_invalid_magic() {
        let mut header = create_header();
        header[0] = b'X';

        assert!(parse_header(&header).is_err());
    }

    #[test]
    fn test_parse_header_too_short() {
        assert!(parse_header(b"PICSTOR\n").is_err());
    }

    #[test]
    fn test_parse_header_unknown_version() {
        let mut header = STORE_MAGIC.to_vec();
        header.extend_from_slice(&7u32.to_le_bytes());

        let err = parse_header(&header).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_parse_record() {
        let mut input = encode_record(b"event_1_cache", b"{\"a\":1}");
        input.extend_from_slice(b"rest");

        let (remaining, record) = parse_record(&input).unwrap();
        assert_eq!(record.key, b"event_1_cache");
        assert_eq!(record.value, b"{\"a\":1}");
        assert_eq!(remaining, b"rest");
    }

    #[test]
    fn test_parse_truncated_record() {
        let input = encode_record(b"key", b"a longer value");
        let torn = &input[..input.len() - 3];

        assert!(parse_record(torn).is_err());
        assert!(parse_record(&input[..5]).is_err());
    }

    #[test]
    fn test_encode_record_layout() {
        let record = encode_record(b"ab", b"xyz");

        assert_eq!(u32::from_le_bytes([record[0], record[1], record[2], record[3]]), 2);
        assert_eq!(u32::from_le_bytes([record[4], record[5], record[6], record[7]]), 3);
        assert_eq!(&record[8..], b"abxyz");
    }
}
