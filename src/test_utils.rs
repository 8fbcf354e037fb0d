use crate::bluefile::{HEADER_SIZE, TYPE_RASTER};

use std::path::Path;

/// Header fields that tests vary. Everything else is fixed.
#[derive(Clone, Debug)]
pub(crate) struct HeaderFields {
    pub format: String,
    pub file_type: i32,
    pub subsize: i32,
    pub data_size: f64,
    pub xstart: f64,
    pub xdelta: f64,
    pub ystart: f64,
    pub ydelta: f64,
    pub data_rep: String,
}

impl Default for HeaderFields {
    fn default() -> Self {
        HeaderFields {
            format: "SB".to_string(),
            file_type: TYPE_RASTER,
            subsize: 60,
            data_size: 0.0,
            xstart: 0.0,
            xdelta: 1.0,
            ystart: 0.0,
            ydelta: 1.0,
            data_rep: "EEEI".to_string(),
        }
    }
}

fn put(header: &mut [u8], offset: usize, bytes: &[u8]) {
    header[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// Build a 512-byte header with data starting straight after it.
pub(crate) fn header_bytes(fields: &HeaderFields) -> Vec<u8> {
    let mut header = vec![0; HEADER_SIZE];
    put(&mut header, 0, b"BLUE");
    put(&mut header, 4, b"EEEI");
    put(&mut header, 8, fields.data_rep.as_bytes());
    put(&mut header, 32, &(HEADER_SIZE as f64).to_le_bytes());
    put(&mut header, 40, &fields.data_size.to_le_bytes());
    put(&mut header, 48, &fields.file_type.to_le_bytes());
    put(&mut header, 52, fields.format.as_bytes());
    put(&mut header, 256, &fields.xstart.to_le_bytes());
    put(&mut header, 264, &fields.xdelta.to_le_bytes());
    put(&mut header, 276, &fields.subsize.to_le_bytes());
    put(&mut header, 280, &fields.ystart.to_le_bytes());
    put(&mut header, 288, &fields.ydelta.to_le_bytes());
    header
}

/// Build a complete file from header fields and raw sample bytes.
pub(crate) fn bluefile_bytes(fields: &HeaderFields, data: &[u8]) -> Vec<u8> {
    let mut file = header_bytes(fields);
    file.extend_from_slice(data);
    file
}

/// 60x60 `SB` raster. Rows 0-9 are 0, rows 50-59 are 10 and the rows in between hold
/// `column / 6`.
pub(crate) fn fixture_60x60() -> Vec<u8> {
    let data: Vec<u8> = (0..60)
        .flat_map(|row| {
            (0..60).map(move |col| match row {
                0..=9 => 0,
                50..=59 => 10,
                _ => (col / 6) as u8,
            })
        })
        .collect();
    let fields = HeaderFields {
        data_size: data.len() as f64,
        ..Default::default()
    };
    bluefile_bytes(&fields, &data)
}

/// Write `contents` to `name` under `directory`.
pub(crate) fn write_file(directory: &Path, name: &str, contents: &[u8]) {
    std::fs::write(directory.join(name), contents).unwrap();
}
