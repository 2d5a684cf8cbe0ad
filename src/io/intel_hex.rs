use log::debug;

use super::ParseError;
use crate::{Segment, SparseImage};

const RECORD_DATA: u8 = 0x00;
const RECORD_EOF: u8 = 0x01;
const RECORD_EXTENDED_SEGMENT: u8 = 0x02;
const RECORD_START_SEGMENT: u8 = 0x03;
const RECORD_EXTENDED_LINEAR: u8 = 0x04;
const RECORD_START_LINEAR: u8 = 0x05;

/// Data bytes per emitted record line.
const BYTES_PER_LINE: usize = 16;

/// Parse Intel-HEX input into a sparse image.
///
/// Tolerant of CR/LF/whitespace around lines; blank lines and lines not
/// starting with `:` are skipped. Every candidate record is validated
/// strictly: hex-only body, exact length for its declared byte count, and a
/// matching checksum. Parsing stops at the end-of-file record; input without
/// one is an error.
///
/// Each data record becomes its own segment. Adjacent records are not
/// coalesced, so segment boundaries reflect the record boundaries of the
/// input.
pub fn parse_hex(input: &[u8]) -> Result<SparseImage, ParseError> {
    let text = std::str::from_utf8(input).map_err(|e| ParseError::InvalidRecord {
        line: 1,
        message: format!("invalid UTF-8: {e}"),
    })?;

    let mut segments: Vec<Segment> = Vec::new();
    let mut current_address: u32 = 0;
    let mut eof_seen = false;

    for (line_num, line) in text.lines().enumerate() {
        let line_num = line_num + 1;
        let line = line.trim();

        if line.is_empty() || !line.starts_with(':') {
            continue;
        }

        let bytes = decode_record(&line[1..], line_num)?;
        let byte_count = bytes[0] as usize;
        let address = u16::from_be_bytes([bytes[1], bytes[2]]);
        let record_type = bytes[3];
        let data = &bytes[4..4 + byte_count];

        match record_type {
            RECORD_DATA => {
                let full_address = current_address
                    .checked_add(address as u32)
                    .ok_or_else(|| ParseError::AddressOverflow(format!("line {line_num}")))?;

                if full_address as u64 + byte_count as u64 > (1 << 32) {
                    return Err(ParseError::AddressOverflow(format!("line {line_num}")));
                }

                if byte_count > 0 {
                    segments.push(Segment::with_data(full_address, data.to_vec()));
                }
            }
            RECORD_EOF => {
                if byte_count != 0 {
                    return Err(ParseError::InvalidRecord {
                        line: line_num,
                        message: "end-of-file record must have 0 data bytes".to_string(),
                    });
                }
                eof_seen = true;
                break;
            }
            RECORD_EXTENDED_SEGMENT => {
                if byte_count != 2 {
                    return Err(ParseError::InvalidRecord {
                        line: line_num,
                        message: "extended segment address must have 2 data bytes".to_string(),
                    });
                }
                current_address = (u16::from_be_bytes([data[0], data[1]]) as u32) << 4;
            }
            RECORD_EXTENDED_LINEAR => {
                if byte_count != 2 {
                    return Err(ParseError::InvalidRecord {
                        line: line_num,
                        message: "extended linear address must have 2 data bytes".to_string(),
                    });
                }
                current_address = (u16::from_be_bytes([data[0], data[1]]) as u32) << 16;
            }
            RECORD_START_SEGMENT | RECORD_START_LINEAR => {
                // Entry-point records carry no memory contents.
            }
            _ => {
                return Err(ParseError::UnsupportedRecordType {
                    line: line_num,
                    record_type,
                });
            }
        }
    }

    if !eof_seen {
        return Err(ParseError::UnexpectedEof);
    }

    debug!("parsed {} data records", segments.len());

    SparseImage::from_segments(segments)
        .map_err(|e| ParseError::OverlappingSegments { address: e.address })
}

/// Serialize the image as Intel-HEX with CRLF line endings.
///
/// An extended-linear-address record for the high 16 bits of the first
/// covered address opens the output (even when those bits are zero); data
/// records carry at most 16 bytes, never cross a 64 KiB boundary, and a fresh
/// extended-linear-address record precedes each change of the high 16 bits.
pub fn write_hex(image: &SparseImage) -> Vec<u8> {
    let mut output = Vec::new();
    let mut high_address: Option<u32> = None;

    if let Some((first, _)) = image.find(0) {
        high_address = Some(first & 0xFFFF_0000);
        write_record(
            &mut output,
            RECORD_EXTENDED_LINEAR,
            0,
            &((first >> 16) as u16).to_be_bytes(),
        );
    }

    let mut pos: u64 = 0;
    while pos <= u32::MAX as u64 {
        let Some((run_address, run_len)) = image.find_contiguous(pos as u32) else {
            break;
        };

        // The run is fully covered, so the fill value never shows through.
        let run = image.nand_read(run_address, run_len as usize);
        let mut cursor = run_address as u64;
        let mut offset = 0;

        while offset < run.len() {
            let bank_remaining = 0x1_0000 - (cursor & 0xFFFF) as usize;
            let chunk_len = BYTES_PER_LINE.min(run.len() - offset).min(bank_remaining);

            let high = (cursor as u32) & 0xFFFF_0000;
            if Some(high) != high_address {
                high_address = Some(high);
                write_record(
                    &mut output,
                    RECORD_EXTENDED_LINEAR,
                    0,
                    &((high >> 16) as u16).to_be_bytes(),
                );
            }

            write_record(
                &mut output,
                RECORD_DATA,
                (cursor & 0xFFFF) as u16,
                &run[offset..offset + chunk_len],
            );

            offset += chunk_len;
            cursor += chunk_len as u64;
        }

        pos = run_address as u64 + run_len as u64;
    }

    write_record(&mut output, RECORD_EOF, 0, &[]);
    output
}

fn decode_record(hex_str: &str, line_num: usize) -> Result<Vec<u8>, ParseError> {
    // 2 (length) + 4 (address) + 2 (type) + 2 (checksum)
    if hex_str.len() < 10 {
        return Err(ParseError::InvalidRecord {
            line: line_num,
            message: "record too short".to_string(),
        });
    }

    let bytes = parse_hex_bytes(hex_str, line_num)?;
    let byte_count = bytes[0] as usize;

    if bytes.len() != 5 + byte_count {
        return Err(ParseError::InvalidRecord {
            line: line_num,
            message: format!(
                "byte count mismatch: header says {}, record has {} data bytes",
                byte_count,
                bytes.len().saturating_sub(5),
            ),
        });
    }

    validate_checksum(&bytes, line_num)?;

    Ok(bytes)
}

fn parse_hex_bytes(hex_str: &str, line_num: usize) -> Result<Vec<u8>, ParseError> {
    let bytes = hex_str.as_bytes();
    if bytes.len() % 2 != 0 {
        return Err(ParseError::InvalidRecord {
            line: line_num,
            message: "odd number of hex digits".to_string(),
        });
    }

    let mut out = Vec::with_capacity(bytes.len() / 2);
    for chunk in bytes.chunks_exact(2) {
        let high = hex_digit(chunk[0], line_num)?;
        let low = hex_digit(chunk[1], line_num)?;
        out.push((high << 4) | low);
    }

    Ok(out)
}

fn hex_digit(b: u8, line_num: usize) -> Result<u8, ParseError> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        _ => Err(ParseError::InvalidHexDigit {
            line: line_num,
            char: b as char,
        }),
    }
}

fn validate_checksum(bytes: &[u8], line_num: usize) -> Result<(), ParseError> {
    let sum: u8 = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    if sum != 0 {
        let actual = bytes[bytes.len() - 1];
        let expected = (!bytes[..bytes.len() - 1]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b)))
        .wrapping_add(1);
        return Err(ParseError::ChecksumMismatch {
            line: line_num,
            expected,
            actual,
        });
    }
    Ok(())
}

fn write_record(output: &mut Vec<u8>, record_type: u8, address: u16, data: &[u8]) {
    let byte_count = data.len() as u8;
    let addr_bytes = address.to_be_bytes();

    let mut checksum: u8 = byte_count;
    checksum = checksum.wrapping_add(addr_bytes[0]);
    checksum = checksum.wrapping_add(addr_bytes[1]);
    checksum = checksum.wrapping_add(record_type);
    for &b in data {
        checksum = checksum.wrapping_add(b);
    }
    checksum = (!checksum).wrapping_add(1);

    output.push(b':');
    write_hex_byte(output, byte_count);
    write_hex_byte(output, addr_bytes[0]);
    write_hex_byte(output, addr_bytes[1]);
    write_hex_byte(output, record_type);
    for &b in data {
        write_hex_byte(output, b);
    }
    write_hex_byte(output, checksum);
    output.extend_from_slice(b"\r\n");
}

fn write_hex_byte(output: &mut Vec<u8>, byte: u8) {
    const HEX_CHARS: &[u8; 16] = b"0123456789ABCDEF";
    output.push(HEX_CHARS[(byte >> 4) as usize]);
    output.push(HEX_CHARS[(byte & 0x0F) as usize]);
}
